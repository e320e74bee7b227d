use gateway_core::StreamChunk;

/// Mandatory headers for an SSE response (spec.md §4.C "SSE relay").
pub fn sse_headers() -> Vec<(&'static str, &'static str)> {
    vec![
        ("Content-Type", "text/event-stream"),
        ("Cache-Control", "no-cache"),
        ("Connection", "keep-alive"),
        ("X-Accel-Buffering", "no"),
    ]
}

/// Renders one chunk as `event: <name>\ndata: <json>\n\n`.
pub fn render_event(chunk: &StreamChunk) -> String {
    let name = match chunk.kind {
        gateway_core::StreamChunkKind::Text => "text",
        gateway_core::StreamChunkKind::Reasoning => "reasoning",
        gateway_core::StreamChunkKind::ToolCall => "tool_call",
        gateway_core::StreamChunkKind::Done => "done",
        gateway_core::StreamChunkKind::Error => "error",
    };
    let data = serde_json::to_string(chunk).unwrap_or_else(|_| "{}".to_string());
    format!("event: {name}\ndata: {data}\n\n")
}

/// The frame that terminates every SSE relay (spec.md §4.C).
pub fn terminal_frame() -> &'static str {
    "data: [DONE]\n\n"
}

/// Translates a chunk channel into a sequence of SSE text frames, ending
/// with the terminal `[DONE]` frame regardless of how the source channel
/// closed.
pub async fn relay(mut source: tokio::sync::mpsc::Receiver<StreamChunk>) -> Vec<String> {
    let mut frames = Vec::new();
    while let Some(chunk) = source.recv().await {
        let terminal = chunk.kind.is_terminal();
        frames.push(render_event(&chunk));
        if terminal {
            break;
        }
    }
    frames.push(terminal_frame().to_string());
    frames
}
