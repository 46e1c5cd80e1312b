use std::sync::Arc;
use std::time::Duration;

use acb::config::{BrokerConfig, RouterConfig};
use acb::context::{ChangeAnnouncer, ContextManager, CreateRequest, CONTEXT_EVENTS_TOPIC};
use acb::router::{
    CacheIdempotencyStore, Consumer, InMemoryBroker, Message, MessageBroker, MessageHandler,
    MessageType, Outcome, Router,
};
use acb::storage::{MemoryCache, MemoryContextStore};
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;

#[derive(Default)]
struct Collect {
    handled: Mutex<Vec<String>>,
}

#[async_trait]
impl MessageHandler for Collect {
    async fn handle(&self, message: &Message) -> anyhow::Result<()> {
        self.handled.lock().push(message.from.clone());
        Ok(())
    }
}

fn router_config() -> RouterConfig {
    RouterConfig {
        tenant_id: "t1".to_string(),
        ..RouterConfig::default()
    }
}

#[tokio::test]
async fn same_idempotency_key_is_handled_once() {
    let broker = InMemoryBroker::new();
    let config = router_config();
    let alice = Router::new(Arc::new(broker.clone()), "alice", &config);
    let bob = Router::new(Arc::new(broker.clone()), "bob", &config);

    alice
        .send_to(
            "carol",
            "tasks",
            Message::new("alice", MessageType::Command).with_idempotency_key("job-42"),
        )
        .await
        .unwrap();
    bob.send_to(
        "carol",
        "tasks",
        Message::new("bob", MessageType::Command).with_idempotency_key("job-42"),
    )
    .await
    .unwrap();

    let handler = Arc::new(Collect::default());
    let dedup = Arc::new(CacheIdempotencyStore::new(
        Arc::new(MemoryCache::new()),
        Duration::from_secs(86_400),
    ));
    let consumer = Consumer::new(
        Arc::new(broker.clone()),
        dedup,
        handler.clone(),
        "t1.tasks",
        "carol",
    );

    let mut deliveries = broker.subscribe("t1.tasks", "carol").await.unwrap();
    let first = deliveries.next().await.unwrap();
    let second = deliveries.next().await.unwrap();
    assert_eq!(consumer.process(first).await.unwrap(), Outcome::Processed);
    assert_eq!(consumer.process(second).await.unwrap(), Outcome::Duplicate);
    assert_eq!(*handler.handled.lock(), vec!["alice".to_string()]);
}

#[tokio::test]
async fn concurrent_requests_are_answered_independently() {
    let broker = InMemoryBroker::new();
    let config = router_config();
    let client = Arc::new(Router::new(Arc::new(broker.clone()), "client", &config));
    let server = Router::new(Arc::new(broker.clone()), "server", &config);

    let responder = {
        let broker = broker.clone();
        tokio::spawn(async move {
            let mut inbox = broker.subscribe("t1.rpc", "server").await.unwrap();
            for _ in 0..3 {
                let delivery = inbox.next().await.unwrap();
                let request = Message::decode(&delivery.payload).unwrap();
                delivery.ack().await.unwrap();
                let n = request.metadata["n"].clone();
                server
                    .reply(&request, Message::new("server", MessageType::Response).with_metadata("n", n))
                    .await
                    .unwrap();
            }
        })
    };

    let mut calls = Vec::new();
    for n in 0..3 {
        let client = client.clone();
        calls.push(tokio::spawn(async move {
            let reply = client
                .request(
                    "server",
                    "rpc",
                    Message::new("client", MessageType::Query).with_metadata("n", n.to_string()),
                    Duration::from_secs(2),
                )
                .await
                .unwrap();
            (n, reply)
        }));
    }
    for call in calls {
        let (n, reply) = call.await.unwrap();
        assert_eq!(reply.metadata["n"], n.to_string());
    }
    responder.await.unwrap();
    assert_eq!(client.pending_requests(), 0);
}

#[tokio::test]
async fn context_changes_are_announced() {
    let broker = InMemoryBroker::new();
    let config = BrokerConfig {
        router: router_config(),
        ..BrokerConfig::default()
    };
    let router = Arc::new(Router::new(Arc::new(broker.clone()), "broker", &config.router));
    let manager = ContextManager::new(Arc::new(MemoryContextStore::new()), &config)
        .with_announcer(ChangeAnnouncer::new(router));

    let ctx = manager
        .create(CreateRequest::new("doc", "agent-a", "t1").with_payload(b"secret".to_vec()))
        .await
        .unwrap();
    manager.delete(&ctx.id).await.unwrap();

    let events: Vec<Message> = broker
        .published(&format!("t1.{}", CONTEXT_EVENTS_TOPIC))
        .iter()
        .map(|record| Message::decode(&record.payload).unwrap())
        .collect();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].metadata["event"], "context.created");
    assert_eq!(events[1].metadata["event"], "context.deleted");
    assert!(events.iter().all(|e| e.context_id.as_deref() == Some(ctx.id.as_str())));
    assert!(events.iter().all(|e| e.context.is_none()));
}

#[tokio::test]
async fn failed_announcement_does_not_fail_the_write() {
    let broker = InMemoryBroker::new();
    let config = BrokerConfig::default();
    let router = Arc::new(Router::new(Arc::new(broker.clone()), "broker", &config.router));
    let manager = ContextManager::new(Arc::new(MemoryContextStore::new()), &config)
        .with_announcer(ChangeAnnouncer::new(router));

    broker.fail_next_publishes(1);
    let ctx = manager
        .create(CreateRequest::new("doc", "agent-a", ""))
        .await
        .unwrap();
    assert!(manager.get(&ctx.id).await.is_ok());
}

#[tokio::test]
async fn announcements_follow_the_context_tenant() {
    let broker = InMemoryBroker::new();
    let config = BrokerConfig {
        router: router_config(),
        ..BrokerConfig::default()
    };
    let router = Arc::new(Router::new(Arc::new(broker.clone()), "broker", &config.router));
    let manager = ContextManager::new(Arc::new(MemoryContextStore::new()), &config)
        .with_announcer(ChangeAnnouncer::new(router));

    let ctx = manager
        .create(CreateRequest::new("doc", "agent-a", "t2"))
        .await
        .unwrap();

    assert!(broker
        .published(&format!("t1.{}", CONTEXT_EVENTS_TOPIC))
        .is_empty());
    let events = broker.published(&format!("t2.{}", CONTEXT_EVENTS_TOPIC));
    assert_eq!(events.len(), 1);
    let event = Message::decode(&events[0].payload).unwrap();
    assert_eq!(event.context_id.as_deref(), Some(ctx.id.as_str()));
    assert_eq!(event.metadata["tenant_id"], "t2");
}
