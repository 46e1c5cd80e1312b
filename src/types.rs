//! Core identifier types shared across the broker.

/// ContextID: unique identifier of a context (UUID v4 when assigned by the broker)
pub type ContextID = String;

/// AgentID: identity of an agent, creator or requester
pub type AgentID = String;

/// TenantID: isolation boundary for contexts, agents and destinations
pub type TenantID = String;

/// StreamID: identifier of a chunked upload
pub type StreamID = String;

/// MessageID: identifier of a routed message
pub type MessageID = String;

/// Checksum: lowercase hex SHA-256 digest
pub type Checksum = String;

/// Generate a fresh unique identifier.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
