//! Chunk Transfer Engine
//!
//! Tracks streamed uploads through the cache contract. A stream's progress,
//! its creation manifest and every accepted chunk live under `stream:<id>`
//! keys with the progress TTL, so the engine itself keeps no upload state and
//! an abandoned stream simply expires.
//!
//! Uploads to one stream are queued on a per-stream lock and checked against
//! the persisted `next_index`; different streams proceed in parallel.

use super::chunker::Chunker;
use super::progress::{chunk_key, manifest_key, progress_key, StreamProgress, StreamRequest, StreamStatus};
use crate::concurrency::KeyedLocks;
use crate::config::{BrokerConfig, LimitsConfig};
use crate::context::{compute_checksum, validate_access_control, Context, ContextManager};
use crate::error::{ApiError, StorageError};
use crate::storage::Cache;
use crate::types::new_id;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct ChunkTransferEngine {
    cache: Arc<dyn Cache>,
    manager: Arc<ContextManager>,
    chunker: Chunker,
    limits: LimitsConfig,
    progress_ttl: Duration,
    locks: KeyedLocks,
}

impl ChunkTransferEngine {
    pub fn new(
        cache: Arc<dyn Cache>,
        manager: Arc<ContextManager>,
        config: &BrokerConfig,
    ) -> Result<Self, ApiError> {
        Ok(Self {
            cache,
            manager,
            chunker: Chunker::new(config.limits.chunk_size)?,
            limits: config.limits.clone(),
            progress_ttl: config.ttl.stream_progress_ttl(),
            locks: KeyedLocks::new(),
        })
    }

    /// Split `data` with the configured chunk size.
    pub fn chunk<'a>(&self, data: &'a [u8]) -> Vec<&'a [u8]> {
        self.chunker.chunk(data)
    }

    /// Open a stream for `request.total_size` bytes.
    ///
    /// Empty payloads have nothing to transfer and go through
    /// `ContextManager::create` instead.
    pub async fn init_stream(&self, request: StreamRequest) -> Result<StreamProgress, ApiError> {
        if request.total_size == 0 {
            return Err(ApiError::ValidationError(
                "stream total size must be greater than zero".to_string(),
            ));
        }
        if request.total_size > self.limits.max_stream_payload {
            return Err(ApiError::PayloadTooLarge {
                size: request.total_size,
                max: self.limits.max_stream_payload,
            });
        }
        if request.context_type.trim().is_empty() {
            return Err(ApiError::ValidationError("context type cannot be empty".to_string()));
        }
        if request.agent_id.trim().is_empty() {
            return Err(ApiError::ValidationError("agent ID cannot be empty".to_string()));
        }
        validate_access_control(&request.access_control)?;

        let stream_id = new_id();
        let progress = StreamProgress::new(stream_id.clone(), request.total_size, Utc::now());
        self.put_json(&manifest_key(&stream_id), &request).await?;
        self.save_progress(&progress).await?;

        debug!(
            stream_id = %stream_id,
            total_bytes = request.total_size,
            chunks = self.chunker.chunk_count(request.total_size),
            "Initialized stream"
        );
        Ok(progress)
    }

    /// Accept chunk `index` of a stream.
    ///
    /// Chunks must arrive in ascending index order starting at 0; anything
    /// else fails with `OutOfOrderChunk` and leaves progress untouched. After
    /// a chunk flagged `is_last` no further uploads are accepted.
    pub async fn upload_chunk(
        &self,
        stream_id: &str,
        index: u32,
        data: &[u8],
        is_last: bool,
    ) -> Result<StreamProgress, ApiError> {
        let _guard = self.locks.lock(stream_id).await;
        let mut progress = self.load_progress(stream_id).await?;

        if progress.status.is_terminal() {
            return Err(ApiError::InvalidState(format!(
                "stream {} is {}",
                stream_id, progress.status
            )));
        }
        if progress.final_chunk_received {
            return Err(ApiError::InvalidState(format!(
                "stream {} already received its final chunk",
                stream_id
            )));
        }
        if index != progress.next_index {
            return Err(ApiError::OutOfOrderChunk {
                stream_id: stream_id.to_string(),
                expected: progress.next_index,
                received: index,
            });
        }
        let received = progress.bytes_received + data.len() as u64;
        if received > progress.total_bytes {
            return Err(ApiError::PayloadTooLarge {
                size: received,
                max: progress.total_bytes,
            });
        }

        self.cache
            .set(&chunk_key(stream_id, index), data.to_vec(), Some(self.progress_ttl))
            .await
            .map_err(|e| wrap(e, "store chunk", stream_id))?;
        progress.record_chunk(data.len() as u64, is_last, Utc::now());
        self.save_progress(&progress).await?;

        debug!(
            stream_id = %stream_id,
            index,
            bytes = data.len(),
            progress = progress.progress,
            is_last,
            "Accepted chunk"
        );
        Ok(progress)
    }

    /// Reassemble the stream and create its context.
    ///
    /// When `expected_checksum` is given it must match the reassembled
    /// payload; a mismatch fails the stream. Without it integrity is only
    /// recorded, not enforced.
    pub async fn complete_stream(
        &self,
        stream_id: &str,
        expected_checksum: Option<&str>,
    ) -> Result<Context, ApiError> {
        let _guard = self.locks.lock(stream_id).await;
        let mut progress = self.load_progress(stream_id).await?;

        if progress.status.is_terminal() {
            return Err(ApiError::InvalidState(format!(
                "stream {} is already {}",
                stream_id, progress.status
            )));
        }
        if progress.status == StreamStatus::Pending {
            return Err(ApiError::InvalidState(format!(
                "stream {} has not received any chunks",
                stream_id
            )));
        }
        if !progress.ready_to_complete() {
            return Err(ApiError::InvalidState(format!(
                "stream {} has {} of {} bytes and no final chunk",
                stream_id, progress.bytes_received, progress.total_bytes
            )));
        }
        if progress.bytes_received != progress.total_bytes {
            return Err(ApiError::InvalidState(format!(
                "stream {} declared {} bytes but received {}",
                stream_id, progress.total_bytes, progress.bytes_received
            )));
        }

        let request: StreamRequest = self
            .get_json(&manifest_key(stream_id))
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("stream {} manifest", stream_id)))?;

        let mut chunks = Vec::with_capacity(progress.next_index as usize);
        for index in 0..progress.next_index {
            let chunk = self
                .cache
                .get(&chunk_key(stream_id, index))
                .await
                .map_err(|e| wrap(e, "load chunk", stream_id))?
                .ok_or_else(|| {
                    ApiError::NotFound(format!("chunk {} of stream {}", index, stream_id))
                })?;
            chunks.push(chunk);
        }
        let payload = Chunker::reassemble(chunks);
        let actual = compute_checksum(&payload);

        if let Some(expected) = expected_checksum {
            if !expected.eq_ignore_ascii_case(&actual) {
                progress.checksum = Some(expected.to_string());
                progress.error = Some("checksum mismatch".to_string());
                progress.finish(StreamStatus::Failed, Utc::now());
                self.save_progress(&progress).await?;
                self.discard_chunks(stream_id, progress.next_index).await;
                warn!(stream_id = %stream_id, expected, actual = %actual, "Stream failed integrity check");
                return Err(ApiError::ChecksumMismatch {
                    expected: expected.to_string(),
                    actual,
                });
            }
        }

        let context = self
            .manager
            .create_streamed(request.into_create_request(payload))
            .await?;

        progress.checksum = Some(actual);
        progress.context_id = Some(context.id.clone());
        progress.finish(StreamStatus::Completed, Utc::now());
        self.save_progress(&progress).await?;
        self.discard_chunks(stream_id, progress.next_index).await;

        info!(
            stream_id = %stream_id,
            context_id = %context.id,
            bytes = progress.bytes_received,
            "Stream completed"
        );
        Ok(context)
    }

    /// Fail a stream that has not reached a terminal state.
    pub async fn abort_stream(&self, stream_id: &str) -> Result<StreamProgress, ApiError> {
        let _guard = self.locks.lock(stream_id).await;
        let mut progress = self.load_progress(stream_id).await?;
        if progress.status.is_terminal() {
            return Err(ApiError::InvalidState(format!(
                "stream {} is already {}",
                stream_id, progress.status
            )));
        }
        progress.error = Some("aborted".to_string());
        progress.finish(StreamStatus::Failed, Utc::now());
        self.save_progress(&progress).await?;
        self.discard_chunks(stream_id, progress.next_index).await;
        info!(stream_id = %stream_id, "Stream aborted");
        Ok(progress)
    }

    /// Current progress of a stream.
    pub async fn get_progress(&self, stream_id: &str) -> Result<StreamProgress, ApiError> {
        self.load_progress(stream_id).await
    }

    async fn load_progress(&self, stream_id: &str) -> Result<StreamProgress, ApiError> {
        self.get_json(&progress_key(stream_id))
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("stream {}", stream_id)))
    }

    async fn save_progress(&self, progress: &StreamProgress) -> Result<(), ApiError> {
        self.put_json(&progress_key(&progress.stream_id), progress).await
    }

    async fn discard_chunks(&self, stream_id: &str, count: u32) {
        for index in 0..count {
            if let Err(e) = self.cache.delete(&chunk_key(stream_id, index)).await {
                warn!(stream_id = %stream_id, index, error = %e, "Failed to discard chunk");
            }
        }
        if let Err(e) = self.cache.delete(&manifest_key(stream_id)).await {
            warn!(stream_id = %stream_id, error = %e, "Failed to discard stream manifest");
        }
    }

    async fn put_json<T: Serialize + Sync>(&self, key: &str, value: &T) -> Result<(), ApiError> {
        let bytes = serde_json::to_vec(value).map_err(|e| wrap(e.into(), "encode", key))?;
        self.cache
            .set(key, bytes, Some(self.progress_ttl))
            .await
            .map_err(|e| wrap(e, "cache set", key))
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, ApiError> {
        let Some(bytes) = self
            .cache
            .get(key)
            .await
            .map_err(|e| wrap(e, "cache get", key))?
        else {
            return Ok(None);
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| wrap(e.into(), "decode", key))
    }
}

fn wrap(err: StorageError, operation: &'static str, id: &str) -> ApiError {
    ApiError::StorageError(StorageError::backend(operation, id, err))
}
