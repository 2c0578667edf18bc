//! Periodic housekeeping: trim, TTL renewal, idle-consumer pruning, and
//! orphaned broadcast-group GC.
//!
//! There is no registry and no leader, so liveness is inferred entirely
//! from TTLs and from the presence of a peer's unicast stream (its
//! "witness"). This task is what keeps that inference honest over time.

use std::time::Duration;

use tracing::warn;

use crate::keys;
use crate::store::StoreClient;

/// A stream this instance owns maintenance responsibility for.
pub struct OwnedStream {
    pub key: String,
    pub group: String,
    /// Broadcast streams additionally get orphaned-group GC.
    pub is_broadcast: bool,
}

pub struct MaintenanceConfig {
    pub bus_name: String,
    pub instance_id: String,
    pub streams: Vec<OwnedStream>,
    pub stream_ttl_secs: u64,
    pub max_message_count: usize,
}

/// Delay between a broadcast group's first and second liveness probe.
/// Absorbs the gap between a peer's instance going down and its unicast
/// stream's own TTL expiring.
const GC_PROBE_DELAY: Duration = Duration::from_secs(2);

/// Runs one maintenance pass over every owned stream. Every step is
/// independently fallible; a failure is logged and the pass moves on to
/// the next step/stream rather than aborting.
pub async fn tick(store: &mut StoreClient, cfg: &MaintenanceConfig) {
    for stream in &cfg.streams {
        if let Err(e) = store.xtrim(&stream.key, cfg.max_message_count).await {
            warn!(stream = %stream.key, error = %e, "xtrim failed");
        }

        if let Err(e) = store.expire(&stream.key, cfg.stream_ttl_secs).await {
            warn!(stream = %stream.key, error = %e, "ttl renewal failed");
        }

        if let Err(e) = prune_idle_consumers(store, stream, cfg.stream_ttl_secs).await {
            warn!(stream = %stream.key, error = %e, "idle consumer prune failed");
        }

        if stream.is_broadcast {
            if let Err(e) = gc_broadcast_groups(store, &cfg.bus_name, &cfg.instance_id, &stream.key).await {
                warn!(stream = %stream.key, error = %e, "broadcast group gc failed");
            }
        }
    }
}

/// Evicts consumers that have been idle at least one full TTL window —
/// a consumer actively reading touches its own entry on every blocking
/// call, so only a genuinely gone instance accumulates that much idle
/// time.
async fn prune_idle_consumers(
    store: &mut StoreClient,
    stream: &OwnedStream,
    stream_ttl_secs: u64,
) -> crate::error::Result<()> {
    let floor_ms = (stream_ttl_secs * 1000) as i64;
    let consumers = store.xinfo_consumers(&stream.key, &stream.group).await?;

    for consumer in consumers {
        if consumer.idle_ms >= floor_ms {
            store
                .xgroup_delconsumer(&stream.key, &stream.group, &consumer.name)
                .await?;
        }
    }

    Ok(())
}

/// Destroys per-instance broadcast groups whose owning instance appears
/// gone. A group is never destroyed on a single probe: the owner's
/// unicast stream is checked, then checked again after a short delay,
/// to tolerate a peer that is merely slow rather than dead. An
/// instance's own group is never a GC candidate.
async fn gc_broadcast_groups(
    store: &mut StoreClient,
    bus_name: &str,
    own_instance_id: &str,
    broadcast_key: &str,
) -> crate::error::Result<()> {
    let groups = store.xinfo_groups(broadcast_key).await?;

    for group in groups {
        let Some(foreign_id) = keys::instance_id_from_broadcast_group(bus_name, &group) else {
            continue;
        };
        if foreign_id == own_instance_id {
            continue;
        }

        let witness = keys::unicast_stream(bus_name, foreign_id);

        if store.exists(&witness).await? {
            continue;
        }

        tokio::time::sleep(GC_PROBE_DELAY).await;

        if store.exists(&witness).await? {
            continue;
        }

        store.xgroup_destroy(broadcast_key, &group).await?;
    }

    Ok(())
}
