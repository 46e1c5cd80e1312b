use std::sync::Arc;
use std::time::Duration;

use acb::config::BrokerConfig;
use acb::context::{ContextManager, CreateRequest, UpdateRequest};
use acb::storage::{ContextFilters, ContextStore, MemoryCache, SledBlobStore, SledContextStore};
use acb::stream::{ChunkTransferEngine, StreamRequest};
use tempfile::TempDir;

fn small_limits() -> BrokerConfig {
    let mut config = BrokerConfig::default();
    config.limits.max_inline_payload = 64;
    config.limits.chunk_size = 32;
    config
}

#[tokio::test]
async fn contexts_survive_reopen() {
    let temp = TempDir::new().unwrap();
    let db_path = temp.path().join("db");
    let config = BrokerConfig::default();

    let id = {
        let store = Arc::new(SledContextStore::new(&db_path).unwrap());
        let manager = ContextManager::new(store.clone(), &config);
        let ctx = manager
            .create(CreateRequest::new("doc", "agent-a", "t1").with_payload(b"durable".to_vec()))
            .await
            .unwrap();
        store.flush().await.unwrap();
        ctx.id
    };

    let store = Arc::new(SledContextStore::new(&db_path).unwrap());
    let manager = ContextManager::new(store, &config);
    let ctx = manager.get(&id).await.unwrap();
    assert_eq!(ctx.payload, b"durable");
    assert_eq!(manager.fetch_payload(&ctx).await.unwrap(), b"durable");
}

#[tokio::test]
async fn sled_list_and_sweep() {
    let temp = TempDir::new().unwrap();
    let store = Arc::new(SledContextStore::new(&temp.path().join("db")).unwrap());
    let manager = ContextManager::new(store.clone(), &BrokerConfig::default());

    let doc = manager
        .create(CreateRequest::new("doc", "agent-a", "t1"))
        .await
        .unwrap();
    manager
        .create(CreateRequest::new("image", "agent-a", "t1"))
        .await
        .unwrap();
    let short = manager
        .create(CreateRequest::new("doc", "agent-a", "t1").with_ttl(Duration::from_secs(1)))
        .await
        .unwrap();

    let docs = manager
        .list(&ContextFilters::for_tenant("t1").with_type("doc"))
        .await
        .unwrap();
    assert_eq!(docs.len(), 2);

    let mut expired = short.clone();
    expired.expires_at = Some(chrono::Utc::now() - chrono::Duration::seconds(1));
    store.update(&expired).await.unwrap();

    assert_eq!(manager.delete_expired().await.unwrap(), 1);
    let docs = manager
        .list(&ContextFilters::for_tenant("t1").with_type("doc"))
        .await
        .unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].id, doc.id);
}

#[tokio::test]
async fn streamed_payload_lands_in_sled_blob_store() {
    let temp = TempDir::new().unwrap();
    let config = small_limits();
    let blobs = Arc::new(SledBlobStore::new(&temp.path().join("blobs")).unwrap());
    let manager = Arc::new(
        ContextManager::new(
            Arc::new(SledContextStore::new(&temp.path().join("db")).unwrap()),
            &config,
        )
        .with_blob_store(blobs),
    );
    let engine = ChunkTransferEngine::new(Arc::new(MemoryCache::new()), manager.clone(), &config).unwrap();

    let data: Vec<u8> = (0..200u8).collect();
    let stream = engine
        .init_stream(StreamRequest::new(data.len() as u64, "dataset", "agent-a", "t1"))
        .await
        .unwrap();
    let pieces = engine.chunk(&data);
    let last = pieces.len() - 1;
    for (index, piece) in pieces.into_iter().enumerate() {
        engine
            .upload_chunk(&stream.stream_id, index as u32, piece, index == last)
            .await
            .unwrap();
    }
    let ctx = engine.complete_stream(&stream.stream_id, None).await.unwrap();
    let reference = ctx.payload_ref.clone().unwrap();
    assert_eq!(reference.backend, "sled");
    assert_eq!(manager.fetch_payload(&ctx).await.unwrap(), data);

    // Replacing the payload inline drops the external copy.
    let updated = manager
        .update(&ctx.id, UpdateRequest::payload(b"small".to_vec()))
        .await
        .unwrap();
    assert!(updated.payload_ref.is_none());
    assert_eq!(manager.fetch_payload(&updated).await.unwrap(), b"small");
}
