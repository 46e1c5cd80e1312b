//! Tenant-scoped addressing

use crate::config::DEFAULT_TENANT;

/// Broker destination for `topic` within `tenant`: `<tenant>.<topic>`.
/// An empty tenant falls back to the single-tenant default.
pub fn destination(tenant_id: &str, topic: &str) -> String {
    let tenant = if tenant_id.is_empty() {
        DEFAULT_TENANT
    } else {
        tenant_id
    };
    format!("{}.{}", tenant, topic)
}

/// Topic on which one router instance receives replies.
pub fn reply_topic(agent_id: &str, instance_id: &str) -> String {
    format!("replies.{}.{}", agent_id, instance_id)
}

/// Ordering key: the recipient, or the sender for broadcasts.
pub fn partition_key<'a>(to: &'a str, from: &'a str) -> &'a str {
    if to.is_empty() {
        from
    } else {
        to
    }
}
