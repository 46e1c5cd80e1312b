use acb::config::BrokerConfig;
use acb::context::ContextManager;
use acb::storage::{MemoryBlobStore, MemoryCache, MemoryContextStore};
use acb::stream::ChunkTransferEngine;
use std::sync::Arc;

pub const MIB: usize = 1024 * 1024;

pub struct Broker {
    pub manager: Arc<ContextManager>,
    pub engine: ChunkTransferEngine,
    pub blobs: Arc<MemoryBlobStore>,
    pub cache: Arc<MemoryCache>,
}

/// Manager and chunk engine over in-memory collaborators with default limits.
pub fn in_memory_broker() -> Broker {
    let config = BrokerConfig::default();
    let blobs = Arc::new(MemoryBlobStore::new());
    let manager = Arc::new(
        ContextManager::new(Arc::new(MemoryContextStore::new()), &config)
            .with_blob_store(blobs.clone()),
    );
    let cache = Arc::new(MemoryCache::new());
    let engine = ChunkTransferEngine::new(cache.clone(), manager.clone(), &config).unwrap();
    Broker {
        manager,
        engine,
        blobs,
        cache,
    }
}

/// Deterministic, non-repeating test bytes.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
