//! Distributed event bus over Redis Streams.
//!
//! Three delivery disciplines share one bus namespace:
//!
//! - **Broadcast** — every live, subscribed instance gets a copy.
//! - **Anycast** — exactly one live, subscribed instance gets it.
//! - **Unicast** — exactly one named instance gets it.
//!
//! There is no registry and no leader election; an instance's liveness
//! is inferred from TTLs it renews on its own streams, checked by peers
//! during maintenance. See [`EventBus`] for the public contract.

pub mod bus;
pub mod codec;
pub mod config;
pub mod envelope;
pub mod error;
pub mod handler;
pub mod keys;
pub mod logging;
pub mod maintenance;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod reader;
pub mod store;

pub use bus::{EmitOptions, EventBus};
pub use config::{EventBusConfig, Role};
pub use envelope::{Envelope, Mode};
pub use error::{Error, Result};
pub use handler::{Handler, HandlerId};
