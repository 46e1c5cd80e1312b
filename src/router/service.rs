//! Message Router
//!
//! Addresses messages to `<tenant>.<topic>` destinations, stamps missing
//! identity fields, publishes with a bounded acknowledgment wait and pairs
//! request/reply exchanges through a correlation table.

use super::broker::{
    Delivery, Headers, MessageBroker, HEADER_CORRELATION_ID, HEADER_FROM, HEADER_MESSAGE_ID,
    HEADER_TYPE,
};
use super::message::{validate_message, Message, MessageType};
use super::pending::PendingRequests;
use super::topics::{destination, partition_key, reply_topic};
use crate::concurrency::cancellable;
use crate::config::RouterConfig;
use crate::error::ApiError;
use crate::types::{new_id, AgentID, TenantID};
use chrono::Utc;
use futures::stream::{BoxStream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub struct Router {
    broker: Arc<dyn MessageBroker>,
    agent_id: AgentID,
    tenant_id: TenantID,
    instance_id: String,
    delivery_timeout: Duration,
    request_timeout: Duration,
    pending: Arc<PendingRequests>,
    reply_topic: OnceCell<String>,
    shutdown: CancellationToken,
}

impl Router {
    /// Router acting for `agent_id`. Replies to its requests arrive on a
    /// topic private to this instance.
    pub fn new(broker: Arc<dyn MessageBroker>, agent_id: impl Into<AgentID>, config: &RouterConfig) -> Self {
        Self {
            broker,
            agent_id: agent_id.into(),
            tenant_id: config.tenant_id.clone(),
            instance_id: new_id(),
            delivery_timeout: config.delivery_timeout(),
            request_timeout: config.request_timeout(),
            pending: Arc::new(PendingRequests::new()),
            reply_topic: OnceCell::new(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    /// Destination address for `topic` in this router's tenant.
    pub fn destination_for(&self, topic: &str) -> String {
        destination(&self.tenant_id, topic)
    }

    /// Number of requests still waiting for a reply.
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    /// Deliver `message` to `to` on `topic`.
    ///
    /// Fills `id`, `idempotency_key` and `timestamp` only when absent, then
    /// publishes keyed by the recipient so all traffic to one agent stays
    /// ordered. Waits for the broker's acknowledgment up to the delivery
    /// timeout and does not retry. Returns the message as sent.
    pub async fn send_to(&self, to: &str, topic: &str, message: Message) -> Result<Message, ApiError> {
        self.send_in(&self.tenant_id, to, topic, message).await
    }

    /// `send_to` addressed to `topic` in `tenant_id` instead of this router's tenant.
    pub async fn send_in(
        &self,
        tenant_id: &str,
        to: &str,
        topic: &str,
        mut message: Message,
    ) -> Result<Message, ApiError> {
        message.to = to.to_string();
        message.topic = topic.to_string();
        stamp(&mut message);
        validate_message(&message)?;

        let destination = destination(tenant_id, topic);
        let key = partition_key(&message.to, &message.from).to_string();
        let payload = message
            .encode()
            .map_err(|e| ApiError::DeliveryError(format!("encode message {}: {}", message.id, e)))?;

        let publish = self
            .broker
            .publish(&destination, &key, payload, publish_headers(&message));
        match tokio::time::timeout(self.delivery_timeout, publish).await {
            Ok(Ok(())) => {
                debug!(
                    message_id = %message.id,
                    destination = %destination,
                    key = %key,
                    message_type = %message.message_type,
                    "Published message"
                );
                Ok(message)
            }
            Ok(Err(e)) => Err(ApiError::DeliveryError(format!(
                "message {} to {}: {}",
                message.id, destination, e
            ))),
            Err(_) => Err(ApiError::DeliveryError(format!(
                "message {} to {} not acknowledged within {:?}",
                message.id, destination, self.delivery_timeout
            ))),
        }
    }

    /// Deliver `message` to every subscriber of `topic`.
    pub async fn broadcast(&self, topic: &str, message: Message) -> Result<Message, ApiError> {
        self.send_to("", topic, message).await
    }

    /// Broadcast on `topic` in `tenant_id`.
    pub async fn broadcast_in(
        &self,
        tenant_id: &str,
        topic: &str,
        message: Message,
    ) -> Result<Message, ApiError> {
        self.send_in(tenant_id, "", topic, message).await
    }

    /// Send a request and wait for the reply carrying its correlation id.
    ///
    /// A zero `timeout` uses the configured request timeout. Concurrent
    /// requests wait independently.
    pub async fn request(
        &self,
        to: &str,
        topic: &str,
        mut message: Message,
        timeout: Duration,
    ) -> Result<Message, ApiError> {
        if self.shutdown.is_cancelled() {
            return Err(ApiError::Cancelled(format!(
                "router for {} is shut down",
                self.agent_id
            )));
        }
        let timeout = if timeout.is_zero() {
            self.request_timeout
        } else {
            timeout
        };
        let reply_to = self.reply_listener().await?.to_string();

        message.correlation_id = new_id();
        message.reply_to = reply_to;
        let mut waiter = self.pending.register(&message.correlation_id);
        let sent = self.send_to(to, topic, message).await?;

        match tokio::time::timeout(timeout, waiter.wait()).await {
            Ok(Some(reply)) => {
                debug!(correlation_id = %sent.correlation_id, from = %reply.from, "Received reply");
                Ok(reply)
            }
            Ok(None) => Err(ApiError::Cancelled(format!(
                "router shut down while waiting for reply to {}",
                sent.id
            ))),
            Err(_) => Err(ApiError::Timeout(format!(
                "no reply to {} (correlation {}) within {:?}",
                sent.id, sent.correlation_id, timeout
            ))),
        }
    }

    /// `request` that also gives up when `cancel` fires.
    pub async fn request_with_cancel(
        &self,
        to: &str,
        topic: &str,
        message: Message,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Message, ApiError> {
        cancellable(cancel, "request", self.request(to, topic, message, timeout)).await
    }

    /// Answer `request` by sending `response` to its reply address.
    pub async fn reply(&self, request: &Message, mut response: Message) -> Result<Message, ApiError> {
        if request.reply_to.is_empty() || request.correlation_id.is_empty() {
            return Err(ApiError::ValidationError(format!(
                "message {} does not expect a reply",
                request.id
            )));
        }
        response.correlation_id = request.correlation_id.clone();
        response.message_type = MessageType::Response;
        self.send_to(&request.from, &request.reply_to, response).await
    }

    /// Stop the reply listener; outstanding and later requests fail as cancelled.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.pending.clear();
    }

    async fn reply_listener(&self) -> Result<&str, ApiError> {
        let topic = self
            .reply_topic
            .get_or_try_init(|| async {
                let topic = reply_topic(&self.agent_id, &self.instance_id);
                let destination = self.destination_for(&topic);
                let deliveries = self
                    .broker
                    .subscribe(&destination, &self.instance_id)
                    .await
                    .map_err(|e| {
                        ApiError::DeliveryError(format!("subscribe to {}: {}", destination, e))
                    })?;
                tokio::spawn(listen_for_replies(
                    deliveries,
                    Arc::clone(&self.pending),
                    self.shutdown.clone(),
                ));
                debug!(destination = %destination, "Reply listener started");
                Ok::<_, ApiError>(topic)
            })
            .await?;
        Ok(topic.as_str())
    }
}

impl Drop for Router {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn stamp(message: &mut Message) {
    if message.id.is_empty() {
        message.id = new_id();
    }
    if message.idempotency_key.is_empty() {
        message.idempotency_key = new_id();
    }
    if message.timestamp.is_none() {
        message.timestamp = Some(Utc::now());
    }
}

fn publish_headers(message: &Message) -> Headers {
    let mut headers = Headers::new();
    headers.insert(HEADER_MESSAGE_ID.to_string(), message.id.clone());
    headers.insert(HEADER_FROM.to_string(), message.from.clone());
    headers.insert(HEADER_TYPE.to_string(), message.message_type.as_str().to_string());
    if !message.correlation_id.is_empty() {
        headers.insert(HEADER_CORRELATION_ID.to_string(), message.correlation_id.clone());
    }
    headers
}

async fn listen_for_replies(
    mut deliveries: BoxStream<'static, Delivery>,
    pending: Arc<PendingRequests>,
    shutdown: CancellationToken,
) {
    loop {
        let delivery = tokio::select! {
            _ = shutdown.cancelled() => break,
            next = deliveries.next() => match next {
                Some(delivery) => delivery,
                None => break,
            },
        };

        match Message::decode(&delivery.payload) {
            Ok(reply) if !reply.correlation_id.is_empty() => {
                let correlation_id = reply.correlation_id.clone();
                if !pending.complete(&correlation_id, reply) {
                    debug!(correlation_id = %correlation_id, "Late reply discarded");
                }
            }
            Ok(reply) => warn!(message_id = %reply.id, "Reply without correlation id discarded"),
            Err(e) => warn!(delivery_id = delivery.delivery_id, error = %e, "Undecodable reply discarded"),
        }
        if let Err(e) = delivery.ack().await {
            warn!(error = %e, "Failed to acknowledge reply");
        }
    }
    pending.clear();
}
