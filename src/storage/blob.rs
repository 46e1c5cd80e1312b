//! Blob storage for payloads too large to keep inline in a context.

use crate::context::model::PayloadRef;
use crate::error::StorageError;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::Path;

/// Stores raw payload bytes and hands back a [`PayloadRef`] to them.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Backend name recorded in every reference this store issues.
    fn backend(&self) -> &str;
    async fn put(&self, bucket: &str, key: &str, data: &[u8]) -> Result<PayloadRef, StorageError>;
    async fn get(&self, reference: &PayloadRef) -> Result<Vec<u8>, StorageError>;
    async fn delete(&self, reference: &PayloadRef) -> Result<(), StorageError>;
}

fn check_backend(store: &dyn BlobStore, reference: &PayloadRef) -> Result<(), StorageError> {
    if reference.backend != store.backend() {
        return Err(StorageError::backend(
            "resolve payload_ref",
            &reference.key,
            format!(
                "reference backend '{}' is not served by '{}'",
                reference.backend,
                store.backend()
            ),
        ));
    }
    Ok(())
}

/// Blob store held in process memory
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<(String, String), Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.read().is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    fn backend(&self) -> &str {
        "memory"
    }

    async fn put(&self, bucket: &str, key: &str, data: &[u8]) -> Result<PayloadRef, StorageError> {
        self.blobs
            .write()
            .insert((bucket.to_string(), key.to_string()), data.to_vec());
        Ok(PayloadRef {
            backend: self.backend().to_string(),
            bucket: bucket.to_string(),
            key: key.to_string(),
            size: data.len() as u64,
        })
    }

    async fn get(&self, reference: &PayloadRef) -> Result<Vec<u8>, StorageError> {
        check_backend(self, reference)?;
        self.blobs
            .read()
            .get(&(reference.bucket.clone(), reference.key.clone()))
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("{}/{}", reference.bucket, reference.key)))
    }

    async fn delete(&self, reference: &PayloadRef) -> Result<(), StorageError> {
        check_backend(self, reference)?;
        self.blobs
            .write()
            .remove(&(reference.bucket.clone(), reference.key.clone()));
        Ok(())
    }
}

/// Blob store persisted in a sled database, one tree per bucket
pub struct SledBlobStore {
    db: sled::Db,
}

impl SledBlobStore {
    pub fn new(path: &Path) -> Result<Self, StorageError> {
        Ok(Self {
            db: sled::open(path)?,
        })
    }

    pub fn from_db(db: sled::Db) -> Self {
        Self { db }
    }
}

#[async_trait]
impl BlobStore for SledBlobStore {
    fn backend(&self) -> &str {
        "sled"
    }

    async fn put(&self, bucket: &str, key: &str, data: &[u8]) -> Result<PayloadRef, StorageError> {
        let tree = self.db.open_tree(bucket)?;
        tree.insert(key.as_bytes(), data)?;
        tree.flush_async().await?;
        Ok(PayloadRef {
            backend: self.backend().to_string(),
            bucket: bucket.to_string(),
            key: key.to_string(),
            size: data.len() as u64,
        })
    }

    async fn get(&self, reference: &PayloadRef) -> Result<Vec<u8>, StorageError> {
        check_backend(self, reference)?;
        let tree = self.db.open_tree(&reference.bucket)?;
        tree.get(reference.key.as_bytes())?
            .map(|bytes| bytes.to_vec())
            .ok_or_else(|| StorageError::NotFound(format!("{}/{}", reference.bucket, reference.key)))
    }

    async fn delete(&self, reference: &PayloadRef) -> Result<(), StorageError> {
        check_backend(self, reference)?;
        let tree = self.db.open_tree(&reference.bucket)?;
        tree.remove(reference.key.as_bytes())?;
        Ok(())
    }
}
