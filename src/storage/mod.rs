//! Storage collaborators
//!
//! Abstract persistence, cache and blob contracts consumed by the broker core,
//! with in-memory implementations for tests and single-process use and
//! `sled`-backed implementations for durable deployments.

pub mod blob;
pub mod cache;
pub mod contract;
pub mod memory;
pub mod persistence;

pub use blob::{BlobStore, MemoryBlobStore, SledBlobStore};
pub use cache::{Cache, MemoryCache};
pub use contract::{AgentFilters, AgentStore, ContextFilters, ContextStore};
pub use memory::{MemoryAgentStore, MemoryContextStore};
pub use persistence::{SledAgentStore, SledContextStore};
