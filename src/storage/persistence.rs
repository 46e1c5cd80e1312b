//! sled-backed persistence for contexts and agents.
//!
//! Records are stored as JSON under their id, one sled tree per entity.

use super::contract::{AgentFilters, AgentStore, ContextFilters, ContextStore};
use crate::agent::domain::{Agent, AgentStatus};
use crate::context::model::Context;
use crate::error::StorageError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use tracing::warn;

const CONTEXTS_TREE: &str = "contexts";
const AGENTS_TREE: &str = "agents";

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StorageError> {
    Ok(serde_json::to_vec(value)?)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StorageError> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Insert only if `key` is absent.
fn insert_new(tree: &sled::Tree, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
    match tree.compare_and_swap(key.as_bytes(), None as Option<&[u8]>, Some(value))? {
        Ok(()) => Ok(()),
        Err(_) => Err(StorageError::Conflict(key.to_string())),
    }
}

/// Overwrite only if `key` is present.
fn replace_existing(tree: &sled::Tree, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
    let mut found = false;
    tree.fetch_and_update(key.as_bytes(), |old| {
        found = old.is_some();
        old.map(|_| value.clone())
    })?;
    if found {
        Ok(())
    } else {
        Err(StorageError::NotFound(key.to_string()))
    }
}

/// Decode every record of a tree, skipping (and logging) corrupt entries.
fn scan<T: DeserializeOwned>(tree: &sled::Tree) -> Result<Vec<T>, StorageError> {
    let mut records = Vec::new();
    for entry in tree.iter() {
        let (key, value) = entry?;
        match decode::<T>(&value) {
            Ok(record) => records.push(record),
            Err(e) => warn!(
                key = %String::from_utf8_lossy(&key),
                error = %e,
                "Skipping undecodable record"
            ),
        }
    }
    Ok(records)
}

/// Context store persisted in a sled database
pub struct SledContextStore {
    tree: sled::Tree,
}

impl SledContextStore {
    pub fn new(path: &Path) -> Result<Self, StorageError> {
        let db = sled::open(path)?;
        Self::from_db(&db)
    }

    pub fn from_db(db: &sled::Db) -> Result<Self, StorageError> {
        Ok(Self {
            tree: db.open_tree(CONTEXTS_TREE)?,
        })
    }

    pub async fn flush(&self) -> Result<(), StorageError> {
        self.tree.flush_async().await?;
        Ok(())
    }
}

#[async_trait]
impl ContextStore for SledContextStore {
    async fn create(&self, context: &Context) -> Result<(), StorageError> {
        insert_new(&self.tree, &context.id, encode(context)?)
    }

    async fn get(&self, context_id: &str) -> Result<Context, StorageError> {
        match self.tree.get(context_id.as_bytes())? {
            Some(bytes) => decode(&bytes),
            None => Err(StorageError::NotFound(context_id.to_string())),
        }
    }

    async fn update(&self, context: &Context) -> Result<(), StorageError> {
        replace_existing(&self.tree, &context.id, encode(context)?)
    }

    async fn delete(&self, context_id: &str) -> Result<Context, StorageError> {
        match self.tree.remove(context_id.as_bytes())? {
            Some(bytes) => decode(&bytes),
            None => Err(StorageError::NotFound(context_id.to_string())),
        }
    }

    async fn list(&self, filters: &ContextFilters) -> Result<Vec<Context>, StorageError> {
        let matching = scan::<Context>(&self.tree)?
            .into_iter()
            .filter(|c| filters.matches(c))
            .collect();
        Ok(filters.page(matching))
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<Vec<Context>, StorageError> {
        let mut removed = Vec::new();
        for entry in self.tree.iter() {
            let (key, value) = entry?;
            let context: Context = match decode(&value) {
                Ok(context) => context,
                Err(_) => continue,
            };
            if !context.is_expired_at(now) {
                continue;
            }
            // A concurrent update that extended the TTL wins over the sweep.
            if self
                .tree
                .compare_and_swap(&key, Some(&value), None as Option<&[u8]>)?
                .is_ok()
            {
                removed.push(context);
            }
        }
        Ok(removed)
    }
}

/// Agent store persisted in a sled database
pub struct SledAgentStore {
    tree: sled::Tree,
}

impl SledAgentStore {
    pub fn new(path: &Path) -> Result<Self, StorageError> {
        let db = sled::open(path)?;
        Self::from_db(&db)
    }

    pub fn from_db(db: &sled::Db) -> Result<Self, StorageError> {
        Ok(Self {
            tree: db.open_tree(AGENTS_TREE)?,
        })
    }
}

#[async_trait]
impl AgentStore for SledAgentStore {
    async fn create(&self, agent: &Agent) -> Result<(), StorageError> {
        insert_new(&self.tree, &agent.id, encode(agent)?)
    }

    async fn get(&self, agent_id: &str) -> Result<Agent, StorageError> {
        match self.tree.get(agent_id.as_bytes())? {
            Some(bytes) => decode(&bytes),
            None => Err(StorageError::NotFound(agent_id.to_string())),
        }
    }

    async fn update(&self, agent: &Agent) -> Result<(), StorageError> {
        replace_existing(&self.tree, &agent.id, encode(agent)?)
    }

    async fn delete(&self, agent_id: &str) -> Result<(), StorageError> {
        match self.tree.remove(agent_id.as_bytes())? {
            Some(_) => Ok(()),
            None => Err(StorageError::NotFound(agent_id.to_string())),
        }
    }

    async fn list(&self, filters: &AgentFilters) -> Result<Vec<Agent>, StorageError> {
        let matching = scan::<Agent>(&self.tree)?
            .into_iter()
            .filter(|a| filters.matches(a))
            .collect();
        Ok(filters.page(matching))
    }

    async fn update_last_seen(&self, agent_id: &str, at: DateTime<Utc>) -> Result<(), StorageError> {
        let mut agent = self.get(agent_id).await?;
        agent.last_seen = at;
        agent.status = AgentStatus::Online;
        self.update(&agent).await
    }
}
