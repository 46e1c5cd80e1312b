//! In-memory broker adapter
//!
//! Each destination is an append-only log. Consumer groups keep their own
//! cursor into the log (starting at the earliest record) plus a redelivery
//! queue fed by negative acknowledgments, so a nacked record is handed out
//! again before anything newer. Intended for tests and single-process use.

use super::broker::{Acknowledger, BrokerError, Delivery, Headers, MessageBroker};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::debug;

/// A record as published.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedRecord {
    pub key: String,
    pub payload: Vec<u8>,
    pub headers: Headers,
}

#[derive(Default)]
struct GroupState {
    cursor: usize,
    redeliver: VecDeque<(Arc<PublishedRecord>, u32)>,
}

struct DestinationLog {
    records: Vec<Arc<PublishedRecord>>,
    groups: HashMap<String, GroupState>,
    notify: Arc<Notify>,
}

impl DestinationLog {
    fn new() -> Self {
        Self {
            records: Vec::new(),
            groups: HashMap::new(),
            notify: Arc::new(Notify::new()),
        }
    }
}

struct InFlight {
    destination: String,
    group: String,
    record: Arc<PublishedRecord>,
    attempt: u32,
}

#[derive(Default)]
struct BrokerState {
    destinations: HashMap<String, DestinationLog>,
    in_flight: HashMap<u64, InFlight>,
    next_delivery_id: u64,
    closed: bool,
    failing_publishes: usize,
    ack_delay: Option<Duration>,
}

struct Shared {
    state: Mutex<BrokerState>,
}

enum Next {
    Ready(Delivery),
    Empty,
    Closed,
}

impl Shared {
    fn take_next(self: &Arc<Self>, destination: &str, group: &str) -> Next {
        let mut state = self.state.lock();
        if state.closed {
            return Next::Closed;
        }
        let Some(log) = state.destinations.get_mut(destination) else {
            return Next::Empty;
        };
        let group_state = log.groups.entry(group.to_string()).or_default();
        let next = match group_state.redeliver.pop_front() {
            Some(entry) => Some(entry),
            None if group_state.cursor < log.records.len() => {
                let record = Arc::clone(&log.records[group_state.cursor]);
                group_state.cursor += 1;
                Some((record, 1))
            }
            None => None,
        };
        let Some((record, attempt)) = next else {
            return Next::Empty;
        };

        state.next_delivery_id += 1;
        let delivery_id = state.next_delivery_id;
        state.in_flight.insert(
            delivery_id,
            InFlight {
                destination: destination.to_string(),
                group: group.to_string(),
                record: Arc::clone(&record),
                attempt,
            },
        );
        Next::Ready(Delivery::new(
            delivery_id,
            destination.to_string(),
            record.key.clone(),
            record.payload.clone(),
            record.headers.clone(),
            attempt,
            Arc::clone(self) as Arc<dyn Acknowledger>,
        ))
    }

    fn notify_for(&self, destination: &str) -> Arc<Notify> {
        let mut state = self.state.lock();
        Arc::clone(
            &state
                .destinations
                .entry(destination.to_string())
                .or_insert_with(DestinationLog::new)
                .notify,
        )
    }
}

#[async_trait]
impl Acknowledger for Shared {
    async fn ack(&self, delivery_id: u64) -> Result<(), BrokerError> {
        self.state
            .lock()
            .in_flight
            .remove(&delivery_id)
            .map(|_| ())
            .ok_or(BrokerError::UnknownDelivery(delivery_id))
    }

    async fn nack(&self, delivery_id: u64) -> Result<(), BrokerError> {
        let mut state = self.state.lock();
        let entry = state
            .in_flight
            .remove(&delivery_id)
            .ok_or(BrokerError::UnknownDelivery(delivery_id))?;
        if let Some(log) = state.destinations.get_mut(&entry.destination) {
            log.groups
                .entry(entry.group)
                .or_default()
                .redeliver
                .push_front((entry.record, entry.attempt + 1));
            log.notify.notify_waiters();
        }
        Ok(())
    }
}

/// Broker that keeps everything in process memory.
#[derive(Clone)]
pub struct InMemoryBroker {
    shared: Arc<Shared>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(BrokerState::default()),
            }),
        }
    }

    /// Records published to `destination`, oldest first.
    pub fn published(&self, destination: &str) -> Vec<PublishedRecord> {
        self.shared
            .state
            .lock()
            .destinations
            .get(destination)
            .map(|log| log.records.iter().map(|r| (**r).clone()).collect())
            .unwrap_or_default()
    }

    /// Deliveries handed out but not yet settled.
    pub fn in_flight(&self) -> usize {
        self.shared.state.lock().in_flight.len()
    }

    /// Make the next `count` publishes fail.
    pub fn fail_next_publishes(&self, count: usize) {
        self.shared.state.lock().failing_publishes = count;
    }

    /// Delay every publish acknowledgment by `delay`.
    pub fn set_ack_delay(&self, delay: Option<Duration>) {
        self.shared.state.lock().ack_delay = delay;
    }

    /// Reject further publishes and end all subscriptions.
    pub fn close(&self) {
        let mut state = self.shared.state.lock();
        state.closed = true;
        for log in state.destinations.values() {
            log.notify.notify_waiters();
        }
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageBroker for InMemoryBroker {
    async fn publish(
        &self,
        destination: &str,
        key: &str,
        payload: Vec<u8>,
        headers: Headers,
    ) -> Result<(), BrokerError> {
        let delay = self.shared.state.lock().ack_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.shared.state.lock();
        if state.closed {
            return Err(BrokerError::Closed);
        }
        if state.failing_publishes > 0 {
            state.failing_publishes -= 1;
            return Err(BrokerError::Publish {
                destination: destination.to_string(),
                message: "injected failure".to_string(),
            });
        }
        let log = state
            .destinations
            .entry(destination.to_string())
            .or_insert_with(DestinationLog::new);
        log.records.push(Arc::new(PublishedRecord {
            key: key.to_string(),
            payload,
            headers,
        }));
        log.notify.notify_waiters();
        debug!(destination, key, offset = log.records.len() - 1, "Appended record");
        Ok(())
    }

    async fn subscribe(
        &self,
        destination: &str,
        group: &str,
    ) -> Result<BoxStream<'static, Delivery>, BrokerError> {
        {
            let mut state = self.shared.state.lock();
            if state.closed {
                return Err(BrokerError::Closed);
            }
            state
                .destinations
                .entry(destination.to_string())
                .or_insert_with(DestinationLog::new)
                .groups
                .entry(group.to_string())
                .or_default();
        }

        let notify = self.shared.notify_for(destination);
        let seed = (
            Arc::clone(&self.shared),
            destination.to_string(),
            group.to_string(),
            notify,
        );
        let deliveries = stream::unfold(seed, |(shared, destination, group, notify)| async move {
            loop {
                let next = {
                    let notified = notify.notified();
                    tokio::pin!(notified);
                    // Register before checking so a publish in between is not missed.
                    notified.as_mut().enable();
                    let next = shared.take_next(&destination, &group);
                    if let Next::Empty = next {
                        notified.await;
                        continue;
                    }
                    next
                };
                return match next {
                    Next::Ready(delivery) => Some((delivery, (shared, destination, group, notify))),
                    Next::Closed | Next::Empty => None,
                };
            }
        });
        Ok(deliveries.boxed())
    }
}
