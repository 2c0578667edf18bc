//! The subscriber table: topic -> set of handlers.
//!
//! Rust has no stable notion of closure identity, so unlike the reference
//! behavior's "re-adding the same function reference is a no-op", `on`
//! mints a fresh [`HandlerId`] per registration and returns it; `off`
//! takes that id back. Because every id is unique by construction, a
//! given id can never appear twice for a topic — the idempotency the
//! reference behavior gets from set semantics falls out of this for free.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use crate::envelope::Envelope;

/// Token identifying one `on`/`once` registration, used to `off` it later.
pub type HandlerId = u64;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A topic subscriber. Implemented for any `Fn(Envelope<D>) -> impl Future
/// + Send` closure via the blanket impl below.
pub trait Handler<D>: Send + Sync {
    fn call(&self, envelope: Envelope<D>) -> BoxFuture<'static, ()>;
}

impl<D, F, Fut> Handler<D> for F
where
    F: Fn(Envelope<D>) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn call(&self, envelope: Envelope<D>) -> BoxFuture<'static, ()> {
        Box::pin(self(envelope))
    }
}

/// Concurrent topic -> handler-set map. Dispatch clones the handler list
/// for a topic (copy-on-iterate) before invoking user code, so the map is
/// never locked across an `await`.
pub struct SubscriberTable<D> {
    topics: DashMap<String, Vec<(HandlerId, Arc<dyn Handler<D>>)>>,
    next_id: AtomicU64,
}

impl<D> Default for SubscriberTable<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D> SubscriberTable<D> {
    pub fn new() -> Self {
        Self {
            topics: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Registers `handler` for `topic`, returning its id.
    pub fn on(&self, topic: &str, handler: Arc<dyn Handler<D>>) -> HandlerId {
        self.on_with(topic, |_id| handler)
    }

    /// Like `on`, but `make` receives the id before the handler is
    /// stored — lets a self-removing handler (see `once` in `bus.rs`)
    /// capture its own id without a registration-order race.
    pub fn on_with(
        &self,
        topic: &str,
        make: impl FnOnce(HandlerId) -> Arc<dyn Handler<D>>,
    ) -> HandlerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let handler = make(id);
        self.topics
            .entry(topic.to_string())
            .or_default()
            .push((id, handler));
        id
    }

    /// Removes a handler by id. Unknown ids are a no-op. Once a topic's
    /// handler set empties, the topic entry is removed entirely.
    pub fn off(&self, topic: &str, id: HandlerId) {
        let mut remove_topic = false;
        if let Some(mut entry) = self.topics.get_mut(topic) {
            entry.retain(|(hid, _)| *hid != id);
            remove_topic = entry.is_empty();
        }
        if remove_topic {
            self.topics.remove(topic);
        }
    }

    /// A point-in-time copy of the handlers registered for `topic`.
    pub fn snapshot(&self, topic: &str) -> Vec<(HandlerId, Arc<dyn Handler<D>>)> {
        self.topics
            .get(topic)
            .map(|entry| entry.clone())
            .unwrap_or_default()
    }
}
