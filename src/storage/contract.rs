//! Persistence contract for contexts and agents.

use crate::agent::domain::{Agent, AgentStatus};
use crate::context::model::Context;
use crate::error::StorageError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;

/// Filters for listing contexts; `None` fields match everything.
#[derive(Debug, Clone, Default)]
pub struct ContextFilters {
    pub tenant_id: Option<String>,
    pub context_type: Option<String>,
    pub agent_id: Option<String>,
    /// 0 means unbounded at the store; the manager clamps before calling
    pub limit: usize,
    pub offset: usize,
}

impl ContextFilters {
    pub fn for_tenant(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: Some(tenant_id.into()),
            ..Self::default()
        }
    }

    pub fn with_type(mut self, context_type: impl Into<String>) -> Self {
        self.context_type = Some(context_type.into());
        self
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn matches(&self, context: &Context) -> bool {
        field_matches(&self.tenant_id, &context.tenant_id)
            && field_matches(&self.context_type, &context.context_type)
            && field_matches(&self.agent_id, &context.agent_id)
    }

    /// Order newest first and apply offset/limit.
    pub fn page(&self, mut contexts: Vec<Context>) -> Vec<Context> {
        contexts.sort_by(newest_first);
        let iter = contexts.into_iter().skip(self.offset);
        if self.limit == 0 {
            iter.collect()
        } else {
            iter.take(self.limit).collect()
        }
    }
}

fn newest_first(a: &Context, b: &Context) -> Ordering {
    b.created_at
        .cmp(&a.created_at)
        .then_with(|| a.id.cmp(&b.id))
}

/// Filters for discovering agents; `None` fields match everything.
#[derive(Debug, Clone, Default)]
pub struct AgentFilters {
    pub agent_type: Option<String>,
    pub location: Option<String>,
    pub capability: Option<String>,
    pub status: Option<AgentStatus>,
    pub tenant_id: Option<String>,
    pub limit: usize,
    pub offset: usize,
}

impl AgentFilters {
    pub fn matches(&self, agent: &Agent) -> bool {
        field_matches(&self.agent_type, &agent.agent_type)
            && field_matches(&self.location, &agent.location)
            && field_matches(&self.tenant_id, &agent.tenant_id)
            && self
                .capability
                .as_deref()
                .map_or(true, |c| agent.has_capability(c))
            && self.status.map_or(true, |s| s == agent.status)
    }

    /// Order by id and apply offset/limit.
    pub fn page(&self, mut agents: Vec<Agent>) -> Vec<Agent> {
        agents.sort_by(|a, b| a.id.cmp(&b.id));
        let iter = agents.into_iter().skip(self.offset);
        if self.limit == 0 {
            iter.collect()
        } else {
            iter.take(self.limit).collect()
        }
    }
}

fn field_matches(filter: &Option<String>, value: &str) -> bool {
    match filter.as_deref() {
        None | Some("") => true,
        Some(expected) => expected == value,
    }
}

/// Context persistence, keyed by context id.
///
/// Implementations report a duplicate id on `create` as `StorageError::Conflict`
/// and an unknown id as `StorageError::NotFound`.
#[async_trait]
pub trait ContextStore: Send + Sync {
    async fn create(&self, context: &Context) -> Result<(), StorageError>;
    async fn get(&self, context_id: &str) -> Result<Context, StorageError>;
    async fn update(&self, context: &Context) -> Result<(), StorageError>;
    async fn delete(&self, context_id: &str) -> Result<Context, StorageError>;
    async fn list(&self, filters: &ContextFilters) -> Result<Vec<Context>, StorageError>;
    /// Remove every context whose `expires_at` is set and before `now`; returns the removed rows.
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<Vec<Context>, StorageError>;
}

/// Agent persistence, keyed by agent id.
#[async_trait]
pub trait AgentStore: Send + Sync {
    async fn create(&self, agent: &Agent) -> Result<(), StorageError>;
    async fn get(&self, agent_id: &str) -> Result<Agent, StorageError>;
    async fn update(&self, agent: &Agent) -> Result<(), StorageError>;
    async fn delete(&self, agent_id: &str) -> Result<(), StorageError>;
    async fn list(&self, filters: &AgentFilters) -> Result<Vec<Agent>, StorageError>;
    async fn update_last_seen(&self, agent_id: &str, at: DateTime<Utc>) -> Result<(), StorageError>;
}
