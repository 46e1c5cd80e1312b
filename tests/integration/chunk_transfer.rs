use std::sync::Arc;

use acb::context::compute_checksum;
use acb::stream::{Chunker, StreamRequest, StreamStatus};
use acb::ApiError;

use crate::integration::support::{in_memory_broker, payload, MIB};

#[tokio::test]
async fn five_chunk_upload_completes_with_matching_checksum() {
    let broker = in_memory_broker();
    let data = payload(5 * MIB);
    let stream = broker
        .engine
        .init_stream(StreamRequest::new(data.len() as u64, "dataset", "agent-a", "t1"))
        .await
        .unwrap();
    assert_eq!(stream.status, StreamStatus::Pending);

    let pieces = broker.engine.chunk(&data);
    assert_eq!(pieces.len(), 5);
    let mut last = None;
    for (index, piece) in pieces.iter().enumerate() {
        last = Some(
            broker
                .engine
                .upload_chunk(&stream.stream_id, index as u32, piece, index == 4)
                .await
                .unwrap(),
        );
    }
    let last = last.unwrap();
    assert_eq!(last.progress, 1.0);
    assert_eq!(last.bytes_received, data.len() as u64);

    let concatenated = Chunker::reassemble(pieces);
    let context = broker
        .engine
        .complete_stream(&stream.stream_id, Some(&compute_checksum(&data)))
        .await
        .unwrap();
    assert_eq!(context.checksum, compute_checksum(&concatenated));
    assert!(context.payload.is_empty());
    assert_eq!(context.payload_ref.as_ref().unwrap().size, data.len() as u64);

    let stored = broker.manager.get(&context.id).await.unwrap();
    assert_eq!(broker.manager.fetch_payload(&stored).await.unwrap(), data);

    let progress = broker.engine.get_progress(&stream.stream_id).await.unwrap();
    assert_eq!(progress.status, StreamStatus::Completed);
    assert_eq!(progress.checksum.as_deref(), Some(context.checksum.as_str()));
}

#[tokio::test]
async fn skipped_index_is_rejected_without_progress_change() {
    let broker = in_memory_broker();
    let stream = broker
        .engine
        .init_stream(StreamRequest::new(3 * MIB as u64, "dataset", "agent-a", "t1"))
        .await
        .unwrap();
    let chunk = payload(MIB);
    broker
        .engine
        .upload_chunk(&stream.stream_id, 0, &chunk, false)
        .await
        .unwrap();
    let before = broker.engine.get_progress(&stream.stream_id).await.unwrap();

    let err = broker
        .engine
        .upload_chunk(&stream.stream_id, 2, &chunk, false)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ApiError::OutOfOrderChunk { expected: 1, received: 2, .. }
    ));
    assert_eq!(broker.engine.get_progress(&stream.stream_id).await.unwrap(), before);
}

#[tokio::test]
async fn streams_beyond_ceiling_are_refused() {
    let broker = in_memory_broker();
    let err = broker
        .engine
        .init_stream(StreamRequest::new(100 * MIB as u64 + 1, "dataset", "agent-a", "t1"))
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::PayloadTooLarge { .. }));
}

#[tokio::test]
async fn parallel_streams_do_not_interfere() {
    let broker = Arc::new(in_memory_broker());
    let mut handles = Vec::new();
    for n in 0..4u8 {
        let broker = broker.clone();
        handles.push(tokio::spawn(async move {
            let data = vec![n; 3 * 1024];
            let stream = broker
                .engine
                .init_stream(StreamRequest::new(data.len() as u64, "blob", "agent-a", "t1"))
                .await
                .unwrap();
            for (index, piece) in data.chunks(1024).enumerate() {
                broker
                    .engine
                    .upload_chunk(&stream.stream_id, index as u32, piece, index == 2)
                    .await
                    .unwrap();
                tokio::task::yield_now().await;
            }
            let ctx = broker
                .engine
                .complete_stream(&stream.stream_id, None)
                .await
                .unwrap();
            (data, ctx)
        }));
    }
    for handle in handles {
        let (data, ctx) = handle.await.unwrap();
        assert_eq!(ctx.payload, data);
    }
    assert!(broker.blobs.is_empty());
    assert_eq!(broker.cache.len(), 4);
}
