//! Broker contract
//!
//! The router publishes through and consumes from an abstract broker so that
//! no particular broker technology is a hard dependency. Publishing returns
//! once the broker acknowledges the write; subscriptions yield deliveries that
//! must be explicitly acknowledged (or negatively acknowledged for redelivery).

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// Message headers carried alongside the payload.
pub type Headers = BTreeMap<String, String>;

pub const HEADER_MESSAGE_ID: &str = "message-id";
pub const HEADER_FROM: &str = "from";
pub const HEADER_TYPE: &str = "type";
pub const HEADER_CORRELATION_ID: &str = "correlation-id";

/// Broker transport failures
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker is closed")]
    Closed,

    #[error("publish to {destination} failed: {message}")]
    Publish { destination: String, message: String },

    #[error("unknown delivery {0}")]
    UnknownDelivery(u64),
}

/// Settles a delivery with the broker.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self, delivery_id: u64) -> Result<(), BrokerError>;
    async fn nack(&self, delivery_id: u64) -> Result<(), BrokerError>;
}

/// One message handed to a subscriber.
pub struct Delivery {
    pub delivery_id: u64,
    pub destination: String,
    pub key: String,
    pub payload: Vec<u8>,
    pub headers: Headers,
    /// 1 on first delivery, incremented on each redelivery.
    pub attempt: u32,
    acknowledger: Arc<dyn Acknowledger>,
}

impl Delivery {
    pub fn new(
        delivery_id: u64,
        destination: String,
        key: String,
        payload: Vec<u8>,
        headers: Headers,
        attempt: u32,
        acknowledger: Arc<dyn Acknowledger>,
    ) -> Self {
        Self {
            delivery_id,
            destination,
            key,
            payload,
            headers,
            attempt,
            acknowledger,
        }
    }

    /// Commit the delivery; it will not be redelivered.
    pub async fn ack(self) -> Result<(), BrokerError> {
        self.acknowledger.ack(self.delivery_id).await
    }

    /// Release the delivery for redelivery.
    pub async fn nack(self) -> Result<(), BrokerError> {
        self.acknowledger.nack(self.delivery_id).await
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("delivery_id", &self.delivery_id)
            .field("destination", &self.destination)
            .field("key", &self.key)
            .field("attempt", &self.attempt)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

/// Publish/subscribe contract
#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// Publish and wait for the broker's acknowledgment. Messages sharing a
    /// `key` are delivered in publish order.
    async fn publish(
        &self,
        destination: &str,
        key: &str,
        payload: Vec<u8>,
        headers: Headers,
    ) -> Result<(), BrokerError>;

    /// Join consumer `group` on `destination`. Members of one group share
    /// the deliveries; every group sees every message.
    async fn subscribe(
        &self,
        destination: &str,
        group: &str,
    ) -> Result<BoxStream<'static, Delivery>, BrokerError>;
}
