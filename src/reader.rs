//! A single-topic blocking consumer loop.
//!
//! Each reader owns a dedicated store connection because it issues
//! indefinite blocking reads; sharing a connection with the control path
//! would stall unrelated ops.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::codec;
use crate::envelope::Envelope;
use crate::error::Result;
use crate::store::StoreClient;

/// Fixed per spec: bounds shutdown latency and lets the loop observe the
/// stop flag at least once a second.
const BLOCK_MS: usize = 1000;
/// TTL set once at reader init; the maintenance worker takes over renewal.
const INIT_TTL_SECS: u64 = 60;
const RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// Static parameters for one reader loop.
pub struct StreamReaderConfig {
    pub key: String,
    pub group: String,
    pub consumer: String,
    pub start_id: &'static str,
    pub batch_size: usize,
    /// Advisory retention window from `EventBusConfig`; not enforced here
    /// (trimming is the maintenance worker's job), only surfaced in the
    /// reader's startup log so it's visible to an operator reading logs.
    pub message_retention_ms: u64,
    /// Mirrors `EventBusConfig::debug`. Gates the decode-failure log per
    /// spec: a corrupt record is "logged (if debug)" and acked regardless.
    pub debug: bool,
}

/// A running reader loop. Dropping this without calling `stop` leaves the
/// task running; always `stop` it during `close()`.
pub struct ReaderHandle {
    stop: Arc<AtomicBool>,
    join: JoinHandle<()>,
}

impl ReaderHandle {
    /// Signals the loop to stop after its current batch is acked, then
    /// awaits the task.
    pub async fn stop(self) {
        self.stop.store(true, Ordering::SeqCst);
        let _ = self.join.await;
    }
}

/// Connects a dedicated connection, creates the consumer group
/// (idempotent), sets the initial 60s TTL, and spawns the loop.
///
/// `dispatch` runs for every envelope that decodes successfully. Decode
/// failures are logged when `cfg.debug` is set and the record is still
/// acked either way — a poison-pill record must not stall the stream.
pub async fn spawn<D, F, Fut>(
    redis_url: String,
    cfg: StreamReaderConfig,
    dispatch: F,
) -> Result<ReaderHandle>
where
    D: DeserializeOwned + Send + 'static,
    F: Fn(Envelope<D>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let mut store = StoreClient::connect(&redis_url).await?;
    store
        .xgroup_create_mkstream(&cfg.key, &cfg.group, cfg.start_id)
        .await?;
    store.expire(&cfg.key, INIT_TTL_SECS).await?;

    info!(
        stream = %cfg.key,
        group = %cfg.group,
        batch_size = cfg.batch_size,
        retention_ms = cfg.message_retention_ms,
        "stream reader starting"
    );

    let stop = Arc::new(AtomicBool::new(false));
    let stop_for_task = Arc::clone(&stop);

    let join = tokio::spawn(run_loop(store, cfg, dispatch, stop_for_task));

    Ok(ReaderHandle { stop, join })
}

async fn run_loop<D, F, Fut>(
    mut store: StoreClient,
    cfg: StreamReaderConfig,
    dispatch: F,
    stop: Arc<AtomicBool>,
) where
    D: DeserializeOwned + Send + 'static,
    F: Fn(Envelope<D>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    loop {
        if stop.load(Ordering::SeqCst) {
            break;
        }

        let records = match store
            .xreadgroup(
                &cfg.key,
                &cfg.group,
                &cfg.consumer,
                cfg.batch_size,
                BLOCK_MS,
            )
            .await
        {
            Ok(records) => records,
            Err(e) => {
                warn!(stream = %cfg.key, error = %e, "stream read failed, retrying");
                tokio::time::sleep(RETRY_BACKOFF).await;
                continue;
            }
        };

        if records.is_empty() {
            continue;
        }

        let mut ids = Vec::with_capacity(records.len());
        for record in &records {
            ids.push(record.id.clone());

            match codec::decode::<D>(&record.message) {
                Ok(envelope) => {
                    dispatch(envelope).await;
                    #[cfg(feature = "metrics")]
                    crate::metrics::RECORDS_DELIVERED_TOTAL
                        .with_label_values(&[&cfg.key])
                        .inc();
                }
                Err(e) => {
                    if cfg.debug {
                        warn!(
                            stream = %cfg.key,
                            id = %record.id,
                            error = %e,
                            "dropping undecodable record"
                        );
                    }
                    #[cfg(feature = "metrics")]
                    crate::metrics::RECORDS_DECODE_FAILED_TOTAL
                        .with_label_values(&[&cfg.key])
                        .inc();
                }
            }
        }

        #[cfg(feature = "metrics")]
        crate::metrics::RECORDS_ACKED_TOTAL
            .with_label_values(&[&cfg.key])
            .inc_by(ids.len() as u64);

        if let Err(e) = store.xack(&cfg.key, &cfg.group, &ids).await {
            error!(
                stream = %cfg.key,
                error = %e,
                "failed to ack batch; records may be redelivered"
            );
        }
    }
}
