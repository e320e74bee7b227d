use gateway_core::{StreamChunk, StreamChunkKind};
use std::time::Instant;
use tokio::sync::mpsc;

/// `{fullContent, chunks, tokenCount, durationSec, tokensPerSec}`
/// (spec.md §4.C "Aggregator").
#[derive(Debug, Clone)]
pub struct AggregatedStream {
    pub full_content: String,
    pub chunks: Vec<StreamChunk>,
    pub token_count: usize,
    pub duration_sec: f64,
    pub tokens_per_sec: f64,
}

/// Wraps a chunk channel so each forwarded chunk is also appended to an
/// internal buffer; on completion returns the aggregate. Forwards every
/// chunk to `downstream` before returning, so callers can both relay live
/// output and retain a complete record.
pub async fn aggregate(
    mut source: mpsc::Receiver<StreamChunk>,
    downstream: Option<mpsc::Sender<StreamChunk>>,
) -> AggregatedStream {
    let started_at = Instant::now();
    let mut full_content = String::new();
    let mut chunks = Vec::new();

    while let Some(chunk) = source.recv().await {
        if matches!(chunk.kind, StreamChunkKind::Text | StreamChunkKind::Reasoning) {
            full_content.push_str(&chunk.content);
        }
        let terminal = chunk.kind.is_terminal();
        chunks.push(chunk.clone());
        if let Some(tx) = &downstream {
            let _ = tx.send(chunk).await;
        }
        if terminal {
            break;
        }
    }

    let duration_sec = started_at.elapsed().as_secs_f64();
    let token_count = chunks
        .iter()
        .filter(|c| matches!(c.kind, StreamChunkKind::Text | StreamChunkKind::Reasoning))
        .count();
    let tokens_per_sec = if duration_sec > 0.0 { token_count as f64 / duration_sec } else { 0.0 };

    AggregatedStream { full_content, chunks, token_count, duration_sec, tokens_per_sec }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn aggregates_text_and_stops_at_terminal_chunk() {
        let (tx, rx) = mpsc::channel(8);
        tx.send(StreamChunk::text(0, "Hello ")).await.unwrap();
        tx.send(StreamChunk::text(1, "world")).await.unwrap();
        tx.send(StreamChunk::done(2)).await.unwrap();
        drop(tx);

        let result = aggregate(rx, None).await;
        assert_eq!(result.full_content, "Hello world");
        assert_eq!(result.chunks.len(), 3);
        assert_eq!(result.token_count, 2);
    }

    #[tokio::test]
    async fn forwards_every_chunk_downstream() {
        let (tx, rx) = mpsc::channel(8);
        let (down_tx, mut down_rx) = mpsc::channel(8);
        tx.send(StreamChunk::text(0, "hi")).await.unwrap();
        tx.send(StreamChunk::done(1)).await.unwrap();
        drop(tx);

        aggregate(rx, Some(down_tx)).await;
        assert!(down_rx.recv().await.is_some());
        assert!(down_rx.recv().await.is_some());
        assert!(down_rx.recv().await.is_none());
    }
}
