//! Message routing: addressing, publish/subscribe over an abstract broker,
//! idempotent consumption and request-reply correlation.

pub mod broker;
pub mod consumer;
pub mod dedup;
pub mod memory_broker;
pub mod message;
pub mod pending;
pub mod service;
pub mod topics;

pub use broker::{Acknowledger, BrokerError, Delivery, Headers, MessageBroker};
pub use consumer::{Consumer, MessageHandler, Outcome};
pub use dedup::{CacheIdempotencyStore, IdempotencyStore};
pub use memory_broker::{InMemoryBroker, PublishedRecord};
pub use message::{validate_message, Message, MessageType};
pub use pending::{PendingReply, PendingRequests};
pub use service::Router;
pub use topics::{destination, partition_key, reply_topic};
