//! Caller-facing configuration.
//!
//! No CLI, no files, no env vars are read by this crate — every option
//! arrives through the constructor, by design (collaborators such as the
//! process's own config loader decide how to get values here).

/// Whether an instance starts its reader loops. Publish is always
/// available regardless of role — this is the only axis `role` affects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Role {
    /// Can emit but never reads from any stream.
    Publisher,
    /// Can emit and starts all three reader loops.
    Consumer,
    /// Can emit and starts all three reader loops. Default.
    #[default]
    Both,
}

const DEFAULT_STREAM_TTL_SECS: u64 = 3600;
const MIN_STREAM_TTL_SECS: u64 = 300;
const DEFAULT_MAX_MESSAGE_COUNT: usize = 5000;
const DEFAULT_MESSAGE_RETENTION_MS: u64 = 300_000;
const DEFAULT_NAME: &str = "default";

/// Construction options for an [`crate::EventBus`].
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// Bus namespace; two instances with the same name share a logical bus.
    pub name: String,
    /// Redis connection URL.
    pub redis_url: String,
    /// Advisory retention window; surfaced to readers but not directly
    /// enforced (the operative control is `max_message_count`/XTRIM).
    pub message_retention_ms: u64,
    /// EXPIRE value renewed every maintenance tick. Clamped to >= 300s.
    pub stream_ttl_secs: u64,
    /// Consumer group start id: `$` (only new) when true, `0` (from
    /// beginning) when false.
    pub only_new: bool,
    /// Enables verbose diagnostic logging.
    pub debug: bool,
    /// XTRIM MAXLEN target applied to every owned stream.
    pub max_message_count: usize,
    /// Controls whether reader loops start.
    pub role: Role,
}

impl EventBusConfig {
    /// Configuration with every default except `redis_url`, which has no
    /// sane default.
    pub fn new(redis_url: impl Into<String>) -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            redis_url: redis_url.into(),
            message_retention_ms: DEFAULT_MESSAGE_RETENTION_MS,
            stream_ttl_secs: DEFAULT_STREAM_TTL_SECS,
            only_new: false,
            debug: false,
            max_message_count: DEFAULT_MAX_MESSAGE_COUNT,
            role: Role::Both,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_stream_ttl_secs(mut self, secs: u64) -> Self {
        self.stream_ttl_secs = secs;
        self
    }

    pub fn with_only_new(mut self, only_new: bool) -> Self {
        self.only_new = only_new;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_max_message_count(mut self, n: usize) -> Self {
        self.max_message_count = n;
        self
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    /// `stream_ttl_secs` clamped to the 300s floor. Values below are
    /// silently raised, never rejected.
    pub fn effective_stream_ttl_secs(&self) -> u64 {
        self.stream_ttl_secs.max(MIN_STREAM_TTL_SECS)
    }

    /// The `XGROUP CREATE` start id implied by `only_new`.
    pub fn start_id(&self) -> &'static str {
        if self.only_new { "$" } else { "0" }
    }

    /// Whether reader loops should start for this role.
    pub fn starts_readers(&self) -> bool {
        !matches!(self.role, Role::Publisher)
    }
}
