//! Context change announcements routed to interested agents.

use super::model::Context;
use crate::router::{Message, MessageType, Router};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Topic context changes are broadcast on unless configured otherwise.
pub const CONTEXT_EVENTS_TOPIC: &str = "context.events";

/// Metadata key carrying the event name.
pub const EVENT_METADATA_KEY: &str = "event";

/// Kind of change applied to a context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextEvent {
    Created,
    Updated,
    Deleted,
}

impl ContextEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            ContextEvent::Created => "context.created",
            ContextEvent::Updated => "context.updated",
            ContextEvent::Deleted => "context.deleted",
        }
    }
}

impl fmt::Display for ContextEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Broadcasts context changes through a [`Router`], addressed to the
/// context's own tenant.
#[derive(Clone)]
pub struct ChangeAnnouncer {
    router: Arc<Router>,
    topic: String,
}

impl ChangeAnnouncer {
    pub fn new(router: Arc<Router>) -> Self {
        Self::with_topic(router, CONTEXT_EVENTS_TOPIC)
    }

    pub fn with_topic(router: Arc<Router>, topic: impl Into<String>) -> Self {
        Self {
            router,
            topic: topic.into(),
        }
    }

    /// Build the event message for a change. The payload is never embedded,
    /// only the id and type, so private contexts do not leak through events.
    pub fn event_message(event: ContextEvent, context: &Context) -> Message {
        let mut message = Message::new(context.agent_id.clone(), MessageType::Event);
        message.context_id = Some(context.id.clone());
        message
            .metadata
            .insert(EVENT_METADATA_KEY.to_string(), event.as_str().to_string());
        message
            .metadata
            .insert("context_type".to_string(), context.context_type.clone());
        message
            .metadata
            .insert("tenant_id".to_string(), context.tenant_id.clone());
        message
    }

    /// Publish the change. The change is already persisted, so a delivery
    /// failure is logged and not returned.
    pub async fn announce(&self, event: ContextEvent, context: &Context) {
        let message = Self::event_message(event, context);
        match self
            .router
            .broadcast_in(&context.tenant_id, &self.topic, message)
            .await
        {
            Ok(sent) => debug!(
                context_id = %context.id,
                event = %event,
                message_id = %sent.id,
                "Announced context change"
            ),
            Err(e) => warn!(
                context_id = %context.id,
                event = %event,
                error = %e,
                "Failed to announce context change"
            ),
        }
    }
}
