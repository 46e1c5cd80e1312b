//! Chunked transfer of payloads too large to send in one request.

pub mod chunker;
pub mod engine;
pub mod progress;

pub use chunker::Chunker;
pub use engine::ChunkTransferEngine;
pub use progress::{progress_key, StreamProgress, StreamRequest, StreamStatus};
