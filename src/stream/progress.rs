//! Stream progress records and the data needed to create the resulting context.

use crate::context::{AccessControl, CreateRequest};
use crate::types::{AgentID, Checksum, ContextID, StreamID, TenantID};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Cache key holding the serialized progress of `stream_id`.
pub fn progress_key(stream_id: &str) -> String {
    format!("stream:{}", stream_id)
}

pub(crate) fn manifest_key(stream_id: &str) -> String {
    format!("stream:{}:meta", stream_id)
}

pub(crate) fn chunk_key(stream_id: &str, index: u32) -> String {
    format!("stream:{}:chunk:{}", stream_id, index)
}

/// Stream lifecycle state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl StreamStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, StreamStatus::Completed | StreamStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StreamStatus::Pending => "pending",
            StreamStatus::InProgress => "in_progress",
            StreamStatus::Completed => "completed",
            StreamStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for StreamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Upload progress of one stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamProgress {
    pub stream_id: StreamID,
    pub status: StreamStatus,
    pub bytes_received: u64,
    pub total_bytes: u64,
    /// `bytes_received / total_bytes`, 1.0 for an empty stream
    pub progress: f64,
    /// Index the next upload must carry
    pub next_index: u32,
    /// Set once an upload flagged `is_last` was accepted
    #[serde(default)]
    pub final_chunk_received: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<Checksum>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_id: Option<ContextID>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StreamProgress {
    pub fn new(stream_id: StreamID, total_bytes: u64, now: DateTime<Utc>) -> Self {
        let mut progress = Self {
            stream_id,
            status: StreamStatus::Pending,
            bytes_received: 0,
            total_bytes,
            progress: 0.0,
            next_index: 0,
            final_chunk_received: false,
            checksum: None,
            context_id: None,
            error: None,
            started_at: now,
            updated_at: now,
        };
        progress.recompute();
        progress
    }

    /// Account for an accepted chunk of `len` bytes.
    pub(crate) fn record_chunk(&mut self, len: u64, is_last: bool, now: DateTime<Utc>) {
        self.bytes_received += len;
        self.next_index += 1;
        self.status = StreamStatus::InProgress;
        self.final_chunk_received |= is_last;
        self.updated_at = now;
        self.recompute();
    }

    pub(crate) fn finish(&mut self, status: StreamStatus, now: DateTime<Utc>) {
        self.status = status;
        self.updated_at = now;
    }

    /// Whether `complete_stream` may run. A stream that has not accepted a
    /// chunk yet is still pending and cannot complete.
    pub fn ready_to_complete(&self) -> bool {
        self.status == StreamStatus::InProgress
            && (self.final_chunk_received || self.bytes_received == self.total_bytes)
    }

    fn recompute(&mut self) {
        self.progress = if self.total_bytes == 0 {
            if self.status == StreamStatus::Pending {
                0.0
            } else {
                1.0
            }
        } else {
            self.bytes_received as f64 / self.total_bytes as f64
        };
    }
}

/// Parameters for opening a stream, kept until the stream completes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamRequest {
    pub total_size: u64,
    pub context_type: String,
    pub agent_id: AgentID,
    /// Empty means the configured default tenant
    #[serde(default)]
    pub tenant_id: TenantID,
    /// Id for the resulting context; assigned when `None`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_id: Option<ContextID>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_id: Option<String>,
    #[serde(default)]
    pub access_control: AccessControl,
    /// Zero means the configured default TTL
    #[serde(default)]
    pub ttl_secs: u64,
}

impl StreamRequest {
    pub fn new(
        total_size: u64,
        context_type: impl Into<String>,
        agent_id: impl Into<AgentID>,
        tenant_id: impl Into<TenantID>,
    ) -> Self {
        Self {
            total_size,
            context_type: context_type.into(),
            agent_id: agent_id.into(),
            tenant_id: tenant_id.into(),
            ..Self::default()
        }
    }

    pub fn with_access(mut self, access_control: AccessControl) -> Self {
        self.access_control = access_control;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl_secs = ttl.as_secs();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_context_id(mut self, context_id: impl Into<ContextID>) -> Self {
        self.context_id = Some(context_id.into());
        self
    }

    /// The create request for the reassembled `payload`.
    pub(crate) fn into_create_request(self, payload: Vec<u8>) -> CreateRequest {
        CreateRequest {
            id: self.context_id,
            context_type: self.context_type,
            agent_id: self.agent_id,
            tenant_id: self.tenant_id,
            payload,
            metadata: self.metadata,
            version: self.version,
            schema_id: self.schema_id,
            access_control: self.access_control,
            ttl: Duration::from_secs(self.ttl_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_fraction() {
        let now = Utc::now();
        let mut progress = StreamProgress::new("s1".to_string(), 10, now);
        assert_eq!(progress.status, StreamStatus::Pending);
        assert_eq!(progress.progress, 0.0);
        assert!(!progress.ready_to_complete());

        progress.record_chunk(4, false, now);
        assert_eq!(progress.status, StreamStatus::InProgress);
        assert!((progress.progress - 0.4).abs() < f64::EPSILON);
        assert_eq!(progress.next_index, 1);

        progress.record_chunk(6, true, now);
        assert_eq!(progress.progress, 1.0);
        assert!(progress.ready_to_complete());

        progress.finish(StreamStatus::Completed, now);
        assert!(!progress.ready_to_complete());
    }

    #[test]
    fn test_pending_stream_is_never_ready() {
        let progress = StreamProgress::new("s0".to_string(), 0, Utc::now());
        assert_eq!(progress.bytes_received, progress.total_bytes);
        assert!(!progress.ready_to_complete());
    }

    #[test]
    fn test_status_wire_names() {
        assert_eq!(
            serde_json::to_string(&StreamStatus::InProgress).unwrap(),
            "\"in_progress\""
        );
        assert!(StreamStatus::Failed.is_terminal());
        assert!(!StreamStatus::Pending.is_terminal());
    }

    #[test]
    fn test_cache_keys() {
        assert_eq!(progress_key("abc"), "stream:abc");
        assert_eq!(chunk_key("abc", 3), "stream:abc:chunk:3");
    }
}
