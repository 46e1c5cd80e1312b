//! Agent entity

use crate::types::{AgentID, TenantID};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Liveness of an agent as last observed by the registry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Online,
    Offline,
    #[default]
    Unknown,
}

impl AgentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AgentStatus::Online => "online",
            AgentStatus::Offline => "offline",
            AgentStatus::Unknown => "unknown",
        }
    }
}

/// An autonomous agent known to the broker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentID,
    /// Agent kind, e.g. "ml", "rpa", "chatbot"
    #[serde(rename = "type")]
    pub agent_type: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub status: AgentStatus,
    pub tenant_id: TenantID,
    pub created_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl Agent {
    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }
}
