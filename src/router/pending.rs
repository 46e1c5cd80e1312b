//! Outstanding request table keyed by correlation id.
//!
//! Each request owns a single-slot channel. The slot is removed when the reply
//! arrives or when the waiting [`PendingReply`] is dropped (timeout or
//! cancellation), so the table never outlives its waiters.

use super::message::Message;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::oneshot;

#[derive(Default)]
pub struct PendingRequests {
    slots: Mutex<HashMap<String, oneshot::Sender<Message>>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a slot for `correlation_id`.
    pub fn register(self: &Arc<Self>, correlation_id: &str) -> PendingReply {
        let (sender, receiver) = oneshot::channel();
        self.slots.lock().insert(correlation_id.to_string(), sender);
        PendingReply {
            correlation_id: correlation_id.to_string(),
            receiver,
            table: Arc::clone(self),
        }
    }

    /// Hand `reply` to its waiter. Returns false when nobody is waiting.
    pub fn complete(&self, correlation_id: &str, reply: Message) -> bool {
        let sender = self.slots.lock().remove(correlation_id);
        match sender {
            Some(sender) => sender.send(reply).is_ok(),
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every slot; waiters observe a closed channel.
    pub fn clear(&self) {
        self.slots.lock().clear();
    }
}

/// Waiting side of one outstanding request.
pub struct PendingReply {
    correlation_id: String,
    receiver: oneshot::Receiver<Message>,
    table: Arc<PendingRequests>,
}

impl PendingReply {
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// Wait for the reply. `None` means the slot was dropped without one.
    pub async fn wait(&mut self) -> Option<Message> {
        (&mut self.receiver).await.ok()
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        self.table.slots.lock().remove(&self.correlation_id);
    }
}
