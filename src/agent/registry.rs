//! Agent registry service
//!
//! Registration, liveness tracking and discovery over the agent persistence
//! contract.

use super::domain::{validate_agent, Agent, AgentStatus};
use crate::config::{BrokerConfig, PaginationConfig};
use crate::error::{ApiError, StorageError};
use crate::storage::{AgentFilters, AgentStore};
use crate::types::{new_id, AgentID, TenantID};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Data supplied by an agent when it registers.
#[derive(Debug, Clone, Default)]
pub struct AgentRegistration {
    /// Assigned when `None`
    pub id: Option<AgentID>,
    pub agent_type: String,
    pub location: String,
    pub capabilities: Vec<String>,
    pub metadata: HashMap<String, String>,
    /// Empty means the configured default tenant
    pub tenant_id: TenantID,
}

impl AgentRegistration {
    pub fn new(id: impl Into<AgentID>, agent_type: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            agent_type: agent_type.into(),
            ..Self::default()
        }
    }

    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.push(capability.into());
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = location.into();
        self
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<TenantID>) -> Self {
        self.tenant_id = tenant_id.into();
        self
    }
}

pub struct AgentRegistry {
    store: Arc<dyn AgentStore>,
    heartbeat_timeout: Duration,
    default_tenant: TenantID,
    pagination: PaginationConfig,
}

impl AgentRegistry {
    pub fn new(store: Arc<dyn AgentStore>, config: &BrokerConfig) -> Self {
        Self {
            store,
            heartbeat_timeout: config.registry.heartbeat_timeout(),
            default_tenant: config.router.tenant_id.clone(),
            pagination: config.pagination.clone(),
        }
    }

    /// Register an agent; it is online from the moment it is stored.
    pub async fn register(&self, registration: AgentRegistration) -> Result<Agent, ApiError> {
        let now = Utc::now();
        let agent = Agent {
            id: registration
                .id
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(new_id),
            agent_type: registration.agent_type,
            location: registration.location,
            capabilities: registration.capabilities,
            metadata: registration.metadata,
            status: AgentStatus::Online,
            tenant_id: if registration.tenant_id.is_empty() {
                self.default_tenant.clone()
            } else {
                registration.tenant_id
            },
            created_at: now,
            last_seen: now,
        };
        validate_agent(&agent)?;

        self.store
            .create(&agent)
            .await
            .map_err(|e| ApiError::from_storage(e, "agent", &agent.id))?;
        info!(agent_id = %agent.id, agent_type = %agent.agent_type, "Registered agent");
        Ok(agent)
    }

    pub async fn get(&self, agent_id: &str) -> Result<Agent, ApiError> {
        self.store
            .get(agent_id)
            .await
            .map_err(|e| ApiError::from_storage(e, "agent", agent_id))
    }

    pub async fn unregister(&self, agent_id: &str) -> Result<(), ApiError> {
        self.store
            .delete(agent_id)
            .await
            .map_err(|e| ApiError::from_storage(e, "agent", agent_id))?;
        info!(agent_id = %agent_id, "Unregistered agent");
        Ok(())
    }

    /// Record that the agent is alive.
    pub async fn heartbeat(&self, agent_id: &str) -> Result<(), ApiError> {
        self.store
            .update_last_seen(agent_id, Utc::now())
            .await
            .map_err(|e| ApiError::from_storage(e, "agent", agent_id))?;
        debug!(agent_id = %agent_id, "Heartbeat");
        Ok(())
    }

    /// Agents matching `filters`, limit clamped to the pagination bounds.
    pub async fn discover(&self, filters: &AgentFilters) -> Result<Vec<Agent>, ApiError> {
        let mut filters = filters.clone();
        filters.limit = self.pagination.clamp(filters.limit);
        self.store.list(&filters).await.map_err(ApiError::StorageError)
    }

    /// Mark online agents whose last heartbeat is older than the timeout as
    /// offline. Returns how many changed.
    pub async fn mark_stale_offline(&self) -> Result<usize, ApiError> {
        let timeout = chrono::Duration::from_std(self.heartbeat_timeout)
            .map_err(|e| ApiError::ConfigError(format!("heartbeat timeout: {}", e)))?;
        let cutoff = Utc::now() - timeout;
        let online = AgentFilters {
            status: Some(AgentStatus::Online),
            ..AgentFilters::default()
        };
        let agents = self.store.list(&online).await.map_err(ApiError::StorageError)?;

        let mut marked = 0;
        for mut agent in agents.into_iter().filter(|a| a.last_seen < cutoff) {
            agent.status = AgentStatus::Offline;
            match self.store.update(&agent).await {
                Ok(()) => marked += 1,
                // Unregistered since the scan.
                Err(StorageError::NotFound(_)) => continue,
                Err(e) => return Err(ApiError::StorageError(e)),
            }
            debug!(agent_id = %agent.id, "Marked agent offline");
        }
        if marked > 0 {
            info!(count = marked, "Marked stale agents offline");
        }
        Ok(marked)
    }
}
