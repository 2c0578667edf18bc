//! Public contract: `EventBus<D>`.
//!
//! One instance owns three reader loops (anycast, broadcast, unicast),
//! a subscriber table, a dedicated publish connection, and a maintenance
//! task. There is no registry to register with — `init` just creates this
//! instance's own streams/groups and starts reading; every other
//! instance does the same independently.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use crate::codec;
use crate::config::EventBusConfig;
use crate::envelope::{Envelope, Mode};
use crate::error::{Error, Result};
use crate::handler::{Handler, HandlerId, SubscriberTable};
use crate::keys;
use crate::maintenance::{self, MaintenanceConfig, OwnedStream};
use crate::reader::{self, ReaderHandle, StreamReaderConfig};
use crate::store::StoreClient;

/// Interval between maintenance passes, after the immediate one run from
/// `init`.
const MAINTENANCE_INTERVAL: std::time::Duration = std::time::Duration::from_secs(30);

const ANYCAST_BATCH: usize = 1;
const BROADCAST_BATCH: usize = 1;
const UNICAST_BATCH: usize = 10;

/// Destination for a published record.
#[derive(Debug, Clone)]
pub struct EmitOptions {
    pub mode: Mode,
    /// Required, and only meaningful, when `mode == Mode::Unicast`.
    pub target: Option<String>,
}

impl EmitOptions {
    pub fn broadcast() -> Self {
        Self {
            mode: Mode::Broadcast,
            target: None,
        }
    }

    pub fn anycast() -> Self {
        Self {
            mode: Mode::Anycast,
            target: None,
        }
    }

    pub fn unicast(target: impl Into<String>) -> Self {
        Self {
            mode: Mode::Unicast,
            target: Some(target.into()),
        }
    }
}

struct RunningState {
    readers: Vec<ReaderHandle>,
    maintenance: JoinHandle<()>,
}

/// A distributed event bus instance bound to one Redis-backed bus
/// namespace. `D` is the payload type this instance publishes and
/// receives; a process that needs several payload shapes runs several
/// `EventBus<D>`s.
pub struct EventBus<D> {
    id: String,
    config: EventBusConfig,
    publish_conn: AsyncMutex<StoreClient>,
    subscribers: Arc<SubscriberTable<D>>,
    closed: Arc<AtomicBool>,
    running: AsyncMutex<Option<RunningState>>,
}

impl<D> EventBus<D>
where
    D: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Connects a publish-path store client but does not create any
    /// stream or start any reader — call `init` for that.
    pub async fn new(config: EventBusConfig) -> Result<Self> {
        let id = Uuid::new_v4().simple().to_string();
        let publish_conn = StoreClient::connect(&config.redis_url).await?;

        Ok(Self {
            id,
            config,
            publish_conn: AsyncMutex::new(publish_conn),
            subscribers: Arc::new(SubscriberTable::new()),
            closed: Arc::new(AtomicBool::new(false)),
            running: AsyncMutex::new(None),
        })
    }

    /// This instance's id. Never changes for the lifetime of the bus.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Creates this instance's own streams/groups, runs one maintenance
    /// pass, and (unless `role` is `Publisher`) starts the three reader
    /// loops plus the periodic maintenance task. Idempotent to call more
    /// than once is not supported — call it exactly once per instance.
    pub async fn init(self: &Arc<Self>) -> Result<()> {
        let name = self.config.name.clone();
        let id = self.id.clone();

        let anycast_key = keys::anycast_stream(&name);
        let anycast_group = keys::anycast_group(&name);
        let broadcast_key = keys::broadcast_stream(&name);
        let broadcast_group = keys::broadcast_group(&name, &id);
        let unicast_key = keys::unicast_stream(&name, &id);
        let unicast_group = keys::unicast_group(&name, &id);

        let streams = vec![
            OwnedStream {
                key: anycast_key.clone(),
                group: anycast_group.clone(),
                is_broadcast: false,
            },
            OwnedStream {
                key: broadcast_key.clone(),
                group: broadcast_group.clone(),
                is_broadcast: true,
            },
            OwnedStream {
                key: unicast_key.clone(),
                group: unicast_group.clone(),
                is_broadcast: false,
            },
        ];

        let mut maintenance_conn = StoreClient::connect(&self.config.redis_url).await?;
        let maintenance_cfg = MaintenanceConfig {
            bus_name: name.clone(),
            instance_id: id.clone(),
            streams,
            stream_ttl_secs: self.config.effective_stream_ttl_secs(),
            max_message_count: self.config.max_message_count,
        };

        maintenance::tick(&mut maintenance_conn, &maintenance_cfg).await;
        info!(bus = %name, instance = %id, "event bus instance initialized");

        if !self.config.starts_readers() {
            let maintenance_task = self.spawn_maintenance_loop(maintenance_conn, maintenance_cfg);
            *self.running.lock().await = Some(RunningState {
                readers: Vec::new(),
                maintenance: maintenance_task,
            });
            return Ok(());
        }

        let start_id = self.config.start_id();
        let bus = Arc::clone(self);
        let anycast_reader = reader::spawn(
            self.config.redis_url.clone(),
            StreamReaderConfig {
                key: anycast_key,
                group: anycast_group,
                consumer: id.clone(),
                start_id,
                batch_size: ANYCAST_BATCH,
                message_retention_ms: self.config.message_retention_ms,
                debug: self.config.debug,
            },
            {
                let bus = Arc::clone(&bus);
                move |envelope: Envelope<D>| {
                    let bus = Arc::clone(&bus);
                    async move { bus.dispatch(envelope).await }
                }
            },
        )
        .await?;

        let broadcast_reader = reader::spawn(
            self.config.redis_url.clone(),
            StreamReaderConfig {
                key: keys::broadcast_stream(&name),
                group: keys::broadcast_group(&name, &id),
                consumer: id.clone(),
                start_id,
                batch_size: BROADCAST_BATCH,
                message_retention_ms: self.config.message_retention_ms,
                debug: self.config.debug,
            },
            {
                let bus = Arc::clone(&bus);
                move |envelope: Envelope<D>| {
                    let bus = Arc::clone(&bus);
                    async move { bus.dispatch(envelope).await }
                }
            },
        )
        .await?;

        let unicast_reader = reader::spawn(
            self.config.redis_url.clone(),
            StreamReaderConfig {
                key: keys::unicast_stream(&name, &id),
                group: keys::unicast_group(&name, &id),
                consumer: id.clone(),
                // A peer's unicast inbox always reads from the start of
                // its own stream: it is addressed directly, never
                // fanned out, so there is no "replay" concern to skip.
                start_id: "0",
                batch_size: UNICAST_BATCH,
                message_retention_ms: self.config.message_retention_ms,
                debug: self.config.debug,
            },
            move |envelope: Envelope<D>| {
                let bus = Arc::clone(&bus);
                async move { bus.dispatch(envelope).await }
            },
        )
        .await?;

        let maintenance_task = self.spawn_maintenance_loop(maintenance_conn, maintenance_cfg);

        *self.running.lock().await = Some(RunningState {
            readers: vec![anycast_reader, broadcast_reader, unicast_reader],
            maintenance: maintenance_task,
        });

        Ok(())
    }

    fn spawn_maintenance_loop(
        &self,
        mut conn: StoreClient,
        cfg: MaintenanceConfig,
    ) -> JoinHandle<()> {
        let closed = Arc::clone(&self.closed);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(MAINTENANCE_INTERVAL).await;
                if closed.load(Ordering::SeqCst) {
                    break;
                }
                maintenance::tick(&mut conn, &cfg).await;
            }
        })
    }

    async fn dispatch(&self, envelope: Envelope<D>) {
        for (_, handler) in self.subscribers.snapshot(&envelope.event) {
            handler.call(envelope.clone()).await;
        }
    }

    /// Publishes `data` under `event` per `opts.mode`, returning the
    /// store-assigned record id. Fails with `Error::Closed` after
    /// `close()`.
    pub async fn emit(&self, event: &str, data: D, opts: EmitOptions) -> Result<String> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }

        let key = match (&opts.mode, &opts.target) {
            (Mode::Broadcast, _) => keys::broadcast_stream(&self.config.name),
            (Mode::Anycast, _) => keys::anycast_stream(&self.config.name),
            (Mode::Unicast, Some(target)) => keys::unicast_stream(&self.config.name, target),
            (Mode::Unicast, None) => {
                return Err(Error::Internal(anyhow::anyhow!(
                    "unicast emit requires a target instance id"
                )));
            }
        };

        let envelope = Envelope {
            mode: opts.mode,
            target: opts.target,
            event: event.to_string(),
            data,
            timestamp: now_ms(),
            source: self.id.clone(),
        };

        let bytes = codec::encode(&envelope)?;
        let mut conn = self.publish_conn.lock().await;
        let id = conn.xadd(&key, &bytes).await?;
        debug!(stream = %key, record_id = %id, event = %event, "emitted record");
        Ok(id)
    }

    /// Registers `handler` for `event`, returning a token that `off`
    /// later consumes to remove it. Fails with `Error::Closed` after
    /// `close()`.
    pub fn on<F, Fut>(&self, event: &str, handler: F) -> Result<HandlerId>
    where
        F: Fn(Envelope<D>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }
        Ok(self
            .subscribers
            .on(event, Arc::new(handler) as Arc<dyn Handler<D>>))
    }

    /// Removes a previously registered handler. Unknown ids are a no-op.
    /// Fails with `Error::Closed` after `close()`.
    pub fn off(&self, event: &str, id: HandlerId) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }
        self.subscribers.off(event, id);
        Ok(())
    }

    /// Like `on`, but the handler removes itself after its first
    /// invocation. The removal races with neither re-registration nor
    /// concurrent delivery: the guard flag ensures only the first
    /// delivery runs the handler body, and the id the wrapper removes
    /// is baked in at registration time rather than recovered later.
    /// Fails with `Error::Closed` after `close()`.
    pub fn once<F, Fut>(&self, event: &str, handler: F) -> Result<HandlerId>
    where
        F: Fn(Envelope<D>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }
        let inner: Arc<dyn Handler<D>> = Arc::new(handler);
        let subscribers = Arc::clone(&self.subscribers);
        let event_owned = event.to_string();

        Ok(self
            .subscribers
            .on_with(event, move |id| once_wrapper(subscribers, event_owned, inner, id)))
    }

    /// Stops accepting new emits, stops every reader loop after its
    /// in-flight batch is acked, and aborts the maintenance task.
    /// Consumer groups are left in place for peers' maintenance to
    /// eventually reclaim.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);

        let Some(state) = self.running.lock().await.take() else {
            return;
        };

        for reader in state.readers {
            reader.stop().await;
        }
        state.maintenance.abort();

        info!(bus = %self.config.name, instance = %self.id, "event bus instance closed");
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Builds the self-removing handler `once` registers: `inner` runs on the
/// first delivery only (guarded by a compare-exchange, so a record that
/// somehow reaches this handler twice concurrently still only invokes
/// `inner` once), then deregisters itself from `subscribers` by `id`.
/// Free-standing so the guard logic is testable without a live store
/// connection.
fn once_wrapper<D>(
    subscribers: Arc<SubscriberTable<D>>,
    event: String,
    inner: Arc<dyn Handler<D>>,
    id: HandlerId,
) -> Arc<dyn Handler<D>>
where
    D: Send + Sync + 'static,
{
    let fired = Arc::new(AtomicBool::new(false));

    Arc::new(move |envelope: Envelope<D>| {
        let fired = Arc::clone(&fired);
        let subscribers = Arc::clone(&subscribers);
        let event = event.clone();
        let inner = Arc::clone(&inner);

        async move {
            if fired
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                return;
            }
            inner.call(envelope).await;
            subscribers.off(&event, id);
        }
    })
}
