//! Consumer loop
//!
//! Pulls deliveries for one consumer identity, claims each message's
//! idempotency key before invoking the handler and settles the delivery
//! according to the outcome. Claims are scoped to the destination and group,
//! so every group sharing one idempotency store still sees each message once. Handler failures are never reported back to the
//! sender: the claim is released and the delivery is negatively acknowledged
//! so the broker redelivers it.

use super::broker::{Delivery, MessageBroker};
use super::dedup::IdempotencyStore;
use super::message::Message;
use crate::error::ApiError;
use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Application logic run once per distinct message.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &Message) -> anyhow::Result<()>;
}

/// What happened to one delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Handler succeeded; acknowledged.
    Processed,
    /// Key already claimed; acknowledged without invoking the handler.
    Duplicate,
    /// Past `expires_at`; acknowledged without invoking the handler.
    Expired,
    /// Payload was not a message; acknowledged and dropped.
    Undecodable,
    /// Handler failed; left for redelivery.
    Failed,
}

pub struct Consumer {
    broker: Arc<dyn MessageBroker>,
    dedup: Arc<dyn IdempotencyStore>,
    handler: Arc<dyn MessageHandler>,
    destination: String,
    group: String,
}

impl Consumer {
    pub fn new(
        broker: Arc<dyn MessageBroker>,
        dedup: Arc<dyn IdempotencyStore>,
        handler: Arc<dyn MessageHandler>,
        destination: impl Into<String>,
        group: impl Into<String>,
    ) -> Self {
        Self {
            broker,
            dedup,
            handler,
            destination: destination.into(),
            group: group.into(),
        }
    }

    /// Consume until `cancel` fires or the subscription ends.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), ApiError> {
        let mut deliveries = self
            .broker
            .subscribe(&self.destination, &self.group)
            .await
            .map_err(|e| {
                ApiError::DeliveryError(format!("subscribe to {}: {}", self.destination, e))
            })?;
        info!(destination = %self.destination, group = %self.group, "Consumer started");

        loop {
            let delivery = tokio::select! {
                _ = cancel.cancelled() => break,
                next = deliveries.next() => match next {
                    Some(delivery) => delivery,
                    None => break,
                },
            };
            if let Err(e) = self.process(delivery).await {
                warn!(destination = %self.destination, error = %e, "Delivery left for redelivery");
            }
        }

        info!(destination = %self.destination, group = %self.group, "Consumer stopped");
        Ok(())
    }

    /// Run the loop on the tokio runtime.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<Result<(), ApiError>> {
        tokio::spawn(async move { self.run(cancel).await })
    }

    /// Handle one delivery and settle it with the broker.
    pub async fn process(&self, delivery: Delivery) -> Result<Outcome, ApiError> {
        let message = match Message::decode(&delivery.payload) {
            Ok(message) => message,
            Err(e) => {
                warn!(delivery_id = delivery.delivery_id, error = %e, "Dropping undecodable delivery");
                settle(delivery, true).await?;
                return Ok(Outcome::Undecodable);
            }
        };

        if message.is_expired_at(Utc::now()) {
            debug!(message_id = %message.id, "Dropping expired message");
            settle(delivery, true).await?;
            return Ok(Outcome::Expired);
        }

        let key = dedup_key(&message).map(|key| self.claim_key(key));
        if let Some(key) = key.as_deref() {
            let first = match self.dedup.check_and_set(key).await {
                Ok(first) => first,
                Err(e) => {
                    settle(delivery, false).await?;
                    return Err(ApiError::StorageError(e));
                }
            };
            if !first {
                debug!(message_id = %message.id, idempotency_key = %key, "Duplicate message acknowledged");
                settle(delivery, true).await?;
                return Ok(Outcome::Duplicate);
            }
        }

        match self.handler.handle(&message).await {
            Ok(()) => {
                settle(delivery, true).await?;
                Ok(Outcome::Processed)
            }
            Err(e) => {
                warn!(
                    message_id = %message.id,
                    attempt = delivery.attempt,
                    error = %e,
                    "Handler failed; message will be redelivered"
                );
                if let Some(key) = key.as_deref() {
                    if let Err(release) = self.dedup.release(key).await {
                        warn!(idempotency_key = %key, error = %release, "Failed to release idempotency key");
                    }
                }
                settle(delivery, false).await?;
                Ok(Outcome::Failed)
            }
        }
    }

    /// `<destination>:<group>:<key>`
    fn claim_key(&self, key: &str) -> String {
        format!("{}:{}:{}", self.destination, self.group, key)
    }
}

/// Messages without an idempotency key fall back to their id.
fn dedup_key(message: &Message) -> Option<&str> {
    if !message.idempotency_key.is_empty() {
        Some(&message.idempotency_key)
    } else if !message.id.is_empty() {
        Some(&message.id)
    } else {
        None
    }
}

async fn settle(delivery: Delivery, ack: bool) -> Result<(), ApiError> {
    let result = if ack { delivery.ack().await } else { delivery.nack().await };
    result.map_err(|e| ApiError::DeliveryError(format!("settle delivery: {}", e)))
}
