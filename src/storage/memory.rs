//! In-memory persistence for contexts and agents.

use super::contract::{AgentFilters, AgentStore, ContextFilters, ContextStore};
use crate::agent::domain::{Agent, AgentStatus};
use crate::context::model::Context;
use crate::error::StorageError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Context store held in process memory
#[derive(Default)]
pub struct MemoryContextStore {
    contexts: RwLock<HashMap<String, Context>>,
}

impl MemoryContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.contexts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.read().is_empty()
    }
}

#[async_trait]
impl ContextStore for MemoryContextStore {
    async fn create(&self, context: &Context) -> Result<(), StorageError> {
        let mut contexts = self.contexts.write();
        if contexts.contains_key(&context.id) {
            return Err(StorageError::Conflict(context.id.clone()));
        }
        contexts.insert(context.id.clone(), context.clone());
        Ok(())
    }

    async fn get(&self, context_id: &str) -> Result<Context, StorageError> {
        self.contexts
            .read()
            .get(context_id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(context_id.to_string()))
    }

    async fn update(&self, context: &Context) -> Result<(), StorageError> {
        let mut contexts = self.contexts.write();
        match contexts.get_mut(&context.id) {
            Some(existing) => {
                *existing = context.clone();
                Ok(())
            }
            None => Err(StorageError::NotFound(context.id.clone())),
        }
    }

    async fn delete(&self, context_id: &str) -> Result<Context, StorageError> {
        self.contexts
            .write()
            .remove(context_id)
            .ok_or_else(|| StorageError::NotFound(context_id.to_string()))
    }

    async fn list(&self, filters: &ContextFilters) -> Result<Vec<Context>, StorageError> {
        let matching: Vec<Context> = self
            .contexts
            .read()
            .values()
            .filter(|c| filters.matches(c))
            .cloned()
            .collect();
        Ok(filters.page(matching))
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<Vec<Context>, StorageError> {
        let mut contexts = self.contexts.write();
        let expired: Vec<String> = contexts
            .values()
            .filter(|c| c.is_expired_at(now))
            .map(|c| c.id.clone())
            .collect();
        Ok(expired
            .iter()
            .filter_map(|id| contexts.remove(id))
            .collect())
    }
}

/// Agent store held in process memory
#[derive(Default)]
pub struct MemoryAgentStore {
    agents: RwLock<HashMap<String, Agent>>,
}

impl MemoryAgentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AgentStore for MemoryAgentStore {
    async fn create(&self, agent: &Agent) -> Result<(), StorageError> {
        let mut agents = self.agents.write();
        if agents.contains_key(&agent.id) {
            return Err(StorageError::Conflict(agent.id.clone()));
        }
        agents.insert(agent.id.clone(), agent.clone());
        Ok(())
    }

    async fn get(&self, agent_id: &str) -> Result<Agent, StorageError> {
        self.agents
            .read()
            .get(agent_id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(agent_id.to_string()))
    }

    async fn update(&self, agent: &Agent) -> Result<(), StorageError> {
        let mut agents = self.agents.write();
        match agents.get_mut(&agent.id) {
            Some(existing) => {
                *existing = agent.clone();
                Ok(())
            }
            None => Err(StorageError::NotFound(agent.id.clone())),
        }
    }

    async fn delete(&self, agent_id: &str) -> Result<(), StorageError> {
        self.agents
            .write()
            .remove(agent_id)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(agent_id.to_string()))
    }

    async fn list(&self, filters: &AgentFilters) -> Result<Vec<Agent>, StorageError> {
        let matching: Vec<Agent> = self
            .agents
            .read()
            .values()
            .filter(|a| filters.matches(a))
            .cloned()
            .collect();
        Ok(filters.page(matching))
    }

    async fn update_last_seen(&self, agent_id: &str, at: DateTime<Utc>) -> Result<(), StorageError> {
        let mut agents = self.agents.write();
        let agent = agents
            .get_mut(agent_id)
            .ok_or_else(|| StorageError::NotFound(agent_id.to_string()))?;
        agent.last_seen = at;
        agent.status = AgentStatus::Online;
        Ok(())
    }
}
