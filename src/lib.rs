//! ACB: Agent Context Broker
//!
//! Shared, access-scoped context objects for autonomous agents, chunked
//! transfer for payloads too large to send at once, and tenant-scoped message
//! routing with idempotent consumption and request-reply correlation.

pub mod agent;
pub mod concurrency;
pub mod config;
pub mod context;
pub mod error;
pub mod logging;
pub mod router;
pub mod storage;
pub mod stream;
pub mod sweeper;
pub mod tooling;
pub mod types;

pub use error::{ApiError, StorageError};
