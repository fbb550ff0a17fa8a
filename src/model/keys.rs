//! Datum key conventions.
//!
//! Every replicated record is addressed by a string key whose prefix tells
//! which kind of record it is and, for instance lists, which consistency path
//! owns it:
//!
//! - `naming.iplist.ephemeral.{ns}##{group@@service}` ephemeral instances (distro)
//! - `naming.iplist.{ns}##{group@@service}` persistent instances (raft)
//! - `naming.meta.{ns}##{group@@service}` service and cluster metadata (raft)
//! - `naming.meta.switch` the runtime switch record (raft)

pub const DEFAULT_NAMESPACE: &str = "public";
pub const DEFAULT_GROUP: &str = "DEFAULT_GROUP";
pub const DEFAULT_CLUSTER: &str = "DEFAULT";

pub const NAMESPACE_CONNECTOR: &str = "##";
pub const GROUP_CONNECTOR: &str = "@@";

pub const INSTANCE_LIST_KEY_PREFIX: &str = "naming.iplist.";
pub const EPHEMERAL_KEY_PREFIX: &str = "ephemeral.";
pub const SERVICE_META_KEY_PREFIX: &str = "naming.meta.";
pub const SWITCH_KEY: &str = "naming.meta.switch";

/// `group@@service`, leaving already-grouped names untouched.
pub fn grouped_name(group: &str, service: &str) -> String {
    if service.contains(GROUP_CONNECTOR) {
        return service.to_string();
    }
    let group = if group.is_empty() { DEFAULT_GROUP } else { group };
    format!("{group}{GROUP_CONNECTOR}{service}")
}

/// Split `group@@service` into its parts; ungrouped names land in the default group.
pub fn split_grouped_name(name: &str) -> (&str, &str) {
    match name.split_once(GROUP_CONNECTOR) {
        Some((group, service)) => (group, service),
        None => (DEFAULT_GROUP, name),
    }
}

pub fn full_service_name(namespace_id: &str, grouped: &str) -> String {
    format!("{namespace_id}{NAMESPACE_CONNECTOR}{grouped}")
}

pub fn build_instance_list_key(namespace_id: &str, grouped: &str, ephemeral: bool) -> String {
    if ephemeral {
        format!(
            "{INSTANCE_LIST_KEY_PREFIX}{EPHEMERAL_KEY_PREFIX}{}",
            full_service_name(namespace_id, grouped)
        )
    } else {
        format!(
            "{INSTANCE_LIST_KEY_PREFIX}{}",
            full_service_name(namespace_id, grouped)
        )
    }
}

pub fn build_service_meta_key(namespace_id: &str, grouped: &str) -> String {
    format!(
        "{SERVICE_META_KEY_PREFIX}{}",
        full_service_name(namespace_id, grouped)
    )
}

pub fn match_instance_list_key(key: &str) -> bool {
    key.starts_with(INSTANCE_LIST_KEY_PREFIX)
}

pub fn match_ephemeral_instance_list_key(key: &str) -> bool {
    key.starts_with(&format!("{INSTANCE_LIST_KEY_PREFIX}{EPHEMERAL_KEY_PREFIX}"))
}

/// Keys owned by the ephemeral (distro) path.
pub fn match_ephemeral_key(key: &str) -> bool {
    match_ephemeral_instance_list_key(key)
}

pub fn match_service_meta_key(key: &str) -> bool {
    key.starts_with(SERVICE_META_KEY_PREFIX) && !match_switch_key(key)
}

pub fn match_switch_key(key: &str) -> bool {
    key == SWITCH_KEY
}

/// Whether `key` is either instance list key of the given service.
pub fn match_instance_list_key_of(key: &str, namespace_id: &str, grouped: &str) -> bool {
    key == build_instance_list_key(namespace_id, grouped, true)
        || key == build_instance_list_key(namespace_id, grouped, false)
}

/// Recover `(namespace, grouped service)` from an instance-list or meta key.
pub fn parse_service_key(key: &str) -> Option<(String, String)> {
    let rest = if let Some(rest) = key.strip_prefix(INSTANCE_LIST_KEY_PREFIX) {
        rest.strip_prefix(EPHEMERAL_KEY_PREFIX).unwrap_or(rest)
    } else if match_service_meta_key(key) {
        key.strip_prefix(SERVICE_META_KEY_PREFIX)?
    } else {
        return None;
    };

    let (namespace_id, grouped) = rest.split_once(NAMESPACE_CONNECTOR)?;
    if namespace_id.is_empty() || grouped.is_empty() {
        return None;
    }
    Some((namespace_id.to_string(), grouped.to_string()))
}

/// The grouped service name a key belongs to; used for responsibility checks.
pub fn service_name_of(key: &str) -> Option<String> {
    parse_service_key(key).map(|(_, grouped)| grouped)
}
