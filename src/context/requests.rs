//! Request types accepted by the context manager.

use super::model::AccessControl;
use std::collections::HashMap;
use std::time::Duration;

/// Context creation data
#[derive(Debug, Clone, Default)]
pub struct CreateRequest {
    /// Caller-chosen id; a UUID is assigned when `None` or empty
    pub id: Option<String>,
    pub context_type: String,
    pub agent_id: String,
    /// Empty means the configured default tenant
    pub tenant_id: String,
    pub payload: Vec<u8>,
    pub metadata: HashMap<String, String>,
    pub version: String,
    pub schema_id: Option<String>,
    pub access_control: AccessControl,
    /// Zero means the configured default TTL
    pub ttl: Duration,
}

impl CreateRequest {
    pub fn new(
        context_type: impl Into<String>,
        agent_id: impl Into<String>,
        tenant_id: impl Into<String>,
    ) -> Self {
        Self {
            context_type: context_type.into(),
            agent_id: agent_id.into(),
            tenant_id: tenant_id.into(),
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = payload.into();
        self
    }

    pub fn with_access(mut self, access_control: AccessControl) -> Self {
        self.access_control = access_control;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Partial update; only the fields that are set are applied.
///
/// `access_control` replaces the whole policy, allow list included. Use
/// `ContextManager::grant_access` / `revoke_access` to edit the allow list alone.
#[derive(Debug, Clone, Default)]
pub struct UpdateRequest {
    /// Replaces the payload and checksum when non-empty
    pub payload: Option<Vec<u8>>,
    /// Replaces the whole metadata map (no per-key merge)
    pub metadata: Option<HashMap<String, String>>,
    /// Replaces the version when non-empty
    pub version: Option<String>,
    pub access_control: Option<AccessControl>,
    /// Resets `expires_at = now + ttl` when non-zero
    pub ttl: Option<Duration>,
}

impl UpdateRequest {
    pub fn ttl(ttl: Duration) -> Self {
        Self {
            ttl: Some(ttl),
            ..Self::default()
        }
    }

    pub fn payload(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: Some(payload.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.payload.as_ref().map_or(true, Vec::is_empty)
            && self.metadata.is_none()
            && self.version.as_ref().map_or(true, String::is_empty)
            && self.access_control.is_none()
            && self.ttl.map_or(true, |ttl| ttl.is_zero())
    }
}
