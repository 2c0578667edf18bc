//! Thin wrapper over the key/value store exposing exactly the stream ops
//! the bus needs. This is the one place that talks to `redis` directly;
//! everything above it works in terms of these methods.

use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use crate::error::{Error, Result};

/// A single record read back from a stream.
#[derive(Debug, Clone)]
pub struct StreamRecord {
    pub id: String,
    pub message: Vec<u8>,
}

/// Idle-consumer info from `XINFO CONSUMERS`.
#[derive(Debug, Clone)]
pub struct ConsumerInfo {
    pub name: String,
    pub idle_ms: i64,
}

pub struct StoreClient {
    conn: ConnectionManager,
}

impl StoreClient {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }

    /// `XADD key * message <bytes>` — append, auto-generated id.
    pub async fn xadd(&mut self, key: &str, message: &[u8]) -> Result<String> {
        let id: String = self.conn.xadd(key, "*", &[("message", message)]).await?;
        Ok(id)
    }

    /// `XGROUP CREATE key group start_id MKSTREAM`. Idempotent: a
    /// `BUSYGROUP` error (group already exists) is swallowed.
    pub async fn xgroup_create_mkstream(
        &mut self,
        key: &str,
        group: &str,
        start_id: &str,
    ) -> Result<()> {
        let result: redis::RedisResult<String> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(key)
            .arg(group)
            .arg(start_id)
            .arg("MKSTREAM")
            .query_async(&mut self.conn)
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
            Err(e) => Err(Error::from(e)),
        }
    }

    /// `XREADGROUP GROUP group consumer COUNT count BLOCK block_ms
    /// STREAMS key >` — blocking batch read of only-undelivered records.
    pub async fn xreadgroup(
        &mut self,
        key: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block_ms: usize,
    ) -> Result<Vec<StreamRecord>> {
        let reply: redis::Value = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(group)
            .arg(consumer)
            .arg("COUNT")
            .arg(count)
            .arg("BLOCK")
            .arg(block_ms)
            .arg("STREAMS")
            .arg(key)
            .arg(">")
            .query_async(&mut self.conn)
            .await?;

        Ok(parse_stream_reply(&reply))
    }

    /// `XACK key group id` for each id.
    pub async fn xack(&mut self, key: &str, group: &str, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut cmd = redis::cmd("XACK");
        cmd.arg(key).arg(group);
        for id in ids {
            cmd.arg(id);
        }
        let _: usize = cmd.query_async(&mut self.conn).await?;
        Ok(())
    }

    /// `XTRIM key MAXLEN ~ maxlen` — approximate, bounded retention.
    pub async fn xtrim(&mut self, key: &str, maxlen: usize) -> Result<()> {
        let _: usize = redis::cmd("XTRIM")
            .arg(key)
            .arg("MAXLEN")
            .arg("~")
            .arg(maxlen)
            .query_async(&mut self.conn)
            .await?;
        Ok(())
    }

    /// `EXPIRE key seconds`.
    pub async fn expire(&mut self, key: &str, seconds: u64) -> Result<()> {
        let _: bool = self.conn.expire(key, seconds as i64).await?;
        Ok(())
    }

    /// `EXISTS key`.
    pub async fn exists(&mut self, key: &str) -> Result<bool> {
        let exists: bool = self.conn.exists(key).await?;
        Ok(exists)
    }

    /// `XGROUP DELCONSUMER key group consumer`. Harmless if already gone.
    pub async fn xgroup_delconsumer(&mut self, key: &str, group: &str, consumer: &str) -> Result<()> {
        let result: redis::RedisResult<i64> = redis::cmd("XGROUP")
            .arg("DELCONSUMER")
            .arg(key)
            .arg(group)
            .arg(consumer)
            .query_async(&mut self.conn)
            .await;
        ignore_missing(result)
    }

    /// `XGROUP DESTROY key group`. Harmless if already gone.
    pub async fn xgroup_destroy(&mut self, key: &str, group: &str) -> Result<()> {
        let result: redis::RedisResult<i64> = redis::cmd("XGROUP")
            .arg("DESTROY")
            .arg(key)
            .arg(group)
            .query_async(&mut self.conn)
            .await;
        ignore_missing(result)
    }

    /// `XINFO CONSUMERS key group` — idle time per consumer, in ms.
    pub async fn xinfo_consumers(&mut self, key: &str, group: &str) -> Result<Vec<ConsumerInfo>> {
        let reply: redis::Value = redis::cmd("XINFO")
            .arg("CONSUMERS")
            .arg(key)
            .arg(group)
            .query_async(&mut self.conn)
            .await?;
        Ok(parse_consumers_reply(&reply))
    }

    /// `XINFO GROUPS key` — group names currently registered on `key`.
    pub async fn xinfo_groups(&mut self, key: &str) -> Result<Vec<String>> {
        let reply: redis::Value = redis::cmd("XINFO")
            .arg("GROUPS")
            .arg(key)
            .query_async(&mut self.conn)
            .await?;
        Ok(parse_group_names_reply(&reply))
    }
}

/// XGROUP DELCONSUMER/DESTROY against an already-absent stream/group is a
/// harmless error that every maintenance tick converges past.
fn ignore_missing(result: redis::RedisResult<i64>) -> Result<()> {
    match result {
        Ok(_) => Ok(()),
        Err(e) if e.to_string().contains("no such key") || e.to_string().contains("NOGROUP") => {
            Ok(())
        }
        Err(e) => Err(Error::from(e)),
    }
}

fn bulk_string(value: &redis::Value) -> Option<Vec<u8>> {
    match value {
        redis::Value::BulkString(bytes) => Some(bytes.clone()),
        redis::Value::SimpleString(s) => Some(s.clone().into_bytes()),
        _ => None,
    }
}

fn bulk_utf8(value: &redis::Value) -> Option<String> {
    bulk_string(value).and_then(|b| String::from_utf8(b).ok())
}

/// `XREADGROUP`/`XREAD` reply shape:
/// `Array[ Array[ key, Array[ Array[ id, Array[field, value, ...] ], ...] ], ...]`
fn parse_stream_reply(reply: &redis::Value) -> Vec<StreamRecord> {
    let mut out = Vec::new();
    let Some(streams) = as_array(reply) else {
        return out;
    };

    for stream in streams {
        let Some(stream_parts) = as_array(stream) else {
            continue;
        };
        let Some(entries) = stream_parts.get(1).and_then(as_array) else {
            continue;
        };

        for entry in entries {
            let Some(entry_parts) = as_array(entry) else {
                continue;
            };
            let Some(id) = entry_parts.first().and_then(bulk_utf8) else {
                continue;
            };
            let Some(fields) = entry_parts.get(1).and_then(as_array) else {
                continue;
            };

            let mut message = None;
            for chunk in fields.chunks(2) {
                if chunk.len() != 2 {
                    continue;
                }
                if bulk_utf8(&chunk[0]).as_deref() == Some("message") {
                    message = bulk_string(&chunk[1]);
                }
            }

            if let Some(message) = message {
                out.push(StreamRecord { id, message });
            }
        }
    }

    out
}

/// `XINFO CONSUMERS` reply: array of flat `[name, ..., idle, ..., ...]` maps.
fn parse_consumers_reply(reply: &redis::Value) -> Vec<ConsumerInfo> {
    let mut out = Vec::new();
    let Some(consumers) = as_array(reply) else {
        return out;
    };

    for consumer in consumers {
        let Some(fields) = as_array(consumer) else {
            continue;
        };
        let mut name = None;
        let mut idle_ms = None;
        for chunk in fields.chunks(2) {
            if chunk.len() != 2 {
                continue;
            }
            match bulk_utf8(&chunk[0]).as_deref() {
                Some("name") => name = bulk_utf8(&chunk[1]),
                Some("idle") => idle_ms = as_integer(&chunk[1]),
                _ => {}
            }
        }
        if let (Some(name), Some(idle_ms)) = (name, idle_ms) {
            out.push(ConsumerInfo { name, idle_ms });
        }
    }

    out
}

/// `XINFO GROUPS` reply: array of flat `[name, ..., ...]` maps.
fn parse_group_names_reply(reply: &redis::Value) -> Vec<String> {
    let mut out = Vec::new();
    let Some(groups) = as_array(reply) else {
        return out;
    };

    for group in groups {
        let Some(fields) = as_array(group) else {
            continue;
        };
        for chunk in fields.chunks(2) {
            if chunk.len() == 2 && bulk_utf8(&chunk[0]).as_deref() == Some("name") {
                if let Some(name) = bulk_utf8(&chunk[1]) {
                    out.push(name);
                }
            }
        }
    }

    out
}

fn as_array(value: &redis::Value) -> Option<&Vec<redis::Value>> {
    match value {
        redis::Value::Array(items) => Some(items),
        _ => None,
    }
}

fn as_integer(value: &redis::Value) -> Option<i64> {
    match value {
        redis::Value::Int(i) => Some(*i),
        _ => bulk_utf8(value).and_then(|s| s.parse().ok()),
    }
}
