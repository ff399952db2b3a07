// Streamed response aggregation
//
// The Gemini streaming endpoint sends server-sent events whose `data:`
// payloads each carry a JSON chunk with a text fragment. This module folds
// the byte stream into the complete answer text.

use anyhow::{Context, Result};
use futures::{Stream, StreamExt};
use serde_json::Value;

use crate::services::normalize::NOT_FOUND;

/// Drains an SSE byte stream and concatenates every text fragment, in
/// arrival order. Chunks may split lines anywhere, so a partial trailing
/// line is buffered until the next chunk completes it.
pub async fn collect_sse<S, B, E>(stream: S) -> Result<String>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::error::Error + Send + Sync + 'static,
{
    let mut stream = std::pin::pin!(stream);
    let mut buffer = String::new();
    let mut answer = String::new();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("Stream read failed")?;
        buffer.push_str(&String::from_utf8_lossy(chunk.as_ref()));

        while let Some(pos) = buffer.find('\n') {
            let line: String = buffer.drain(..=pos).collect();
            append_sse_line(line.trim_end_matches(['\n', '\r']), &mut answer);
        }
    }
    // final line may arrive without a trailing newline
    append_sse_line(buffer.trim_end_matches('\r'), &mut answer);

    Ok(answer)
}

fn append_sse_line(line: &str, answer: &mut String) {
    let Some(payload) = line.strip_prefix("data:") else {
        return;
    };
    let payload = payload.trim();
    if payload.is_empty() || payload == "[DONE]" {
        return;
    }

    // Malformed chunks are skipped; a partial answer is still usable and the
    // caller pads missing lines anyway.
    let Ok(value) = serde_json::from_str::<Value>(payload) else {
        return;
    };
    let parts = value
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array);
    if let Some(parts) = parts {
        for part in parts {
            if let Some(text) = part.get("text").and_then(Value::as_str) {
                answer.push_str(text);
            }
        }
    }
}

/// Splits an aggregated answer into exactly `expected` per-image lines.
///
/// Blank lines are dropped, surplus lines truncated, and missing lines padded
/// with the not-found marker so position `i` always answers image `i`.
pub fn split_answers(blob: &str, expected: usize) -> Vec<String> {
    let mut lines: Vec<String> = blob
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect();

    lines.truncate(expected);
    while lines.len() < expected {
        lines.push(NOT_FOUND.to_string());
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;

    fn sse_chunk(text: &str) -> String {
        format!(
            "data: {{\"candidates\":[{{\"content\":{{\"parts\":[{{\"text\":\"{text}\"}}]}}}}]}}\n\n"
        )
    }

    async fn collect(chunks: Vec<String>) -> String {
        let stream =
            futures::stream::iter(chunks.into_iter().map(Ok::<_, Infallible>));
        collect_sse(stream).await.unwrap()
    }

    #[tokio::test]
    async fn fragments_are_concatenated_in_order() {
        let out = collect(vec![sse_chunk("0812"), sse_chunk("345678\\n"), sse_chunk("628999")]).await;
        assert_eq!(out, "0812345678\n628999");
    }

    #[tokio::test]
    async fn events_split_across_chunks_are_reassembled() {
        let whole = sse_chunk("62812345678");
        let (a, b) = whole.split_at(20);
        let out = collect(vec![a.to_string(), b.to_string()]).await;
        assert_eq!(out, "62812345678");
    }

    #[tokio::test]
    async fn garbage_and_done_markers_are_skipped() {
        let out = collect(vec![
            "data: [DONE]\n".to_string(),
            "data: {not json}\n".to_string(),
            ": keepalive comment\n".to_string(),
            sse_chunk("081234"),
        ])
        .await;
        assert_eq!(out, "081234");
    }

    #[test]
    fn split_pads_and_truncates_to_expected() {
        let answers = split_answers("a\n\n  b  \nc\nd", 3);
        assert_eq!(answers, vec!["a", "b", "c"]);

        let answers = split_answers("only one", 3);
        assert_eq!(answers, vec!["only one", NOT_FOUND, NOT_FOUND]);

        assert_eq!(split_answers("", 2), vec![NOT_FOUND, NOT_FOUND]);
    }
}
