//! Stream/group/consumer key derivation.
//!
//! Every key a bus instance touches is a pure function of the bus `name`
//! and, where relevant, an instance id. No lookup, no discovery.

/// Namespace prefix shared by all keys of a bus `name`.
pub fn prefix(name: &str) -> String {
    format!("eventbus:{name}:")
}

/// The shared anycast stream key.
pub fn anycast_stream(name: &str) -> String {
    format!("{}anycast", prefix(name))
}

/// The shared broadcast stream key.
pub fn broadcast_stream(name: &str) -> String {
    format!("{}broadcast", prefix(name))
}

/// The per-instance unicast inbox stream key for instance `id`.
pub fn unicast_stream(name: &str, id: &str) -> String {
    format!("{}unicast:{id}", prefix(name))
}

/// The single, shared anycast consumer group name.
pub fn anycast_group(name: &str) -> String {
    format!("{}group", prefix(name))
}

/// The per-instance broadcast consumer group name, owned solely by `id`.
pub fn broadcast_group(name: &str, id: &str) -> String {
    format!("{}{id}", prefix(name))
}

/// The per-instance unicast consumer group name (same instance owns the
/// stream and the group: there is exactly one reader).
pub fn unicast_group(name: &str, id: &str) -> String {
    format!("{}{id}", prefix(name))
}

/// Extracts the foreign instance id `I'` from a broadcast-group name
/// `P+I'`, given the bus's own prefix. Returns `None` if `group` isn't
/// shaped like a per-instance broadcast group under this prefix.
pub fn instance_id_from_broadcast_group<'a>(name: &str, group: &'a str) -> Option<&'a str> {
    let p = prefix(name);
    let suffix = group.strip_prefix(&p)?;
    if suffix.is_empty() || suffix == "group" {
        None
    } else {
        Some(suffix)
    }
}
