//! Server-sent events transport (the persistent channel).

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::header::ACCEPT;

use crate::api::endpoint_url;
use crate::error::{Result, SyncError};
use crate::logging::log_debug;

use super::transport::{Frame, Transport, TransportKind, TransportStream};

/// Incremental `text/event-stream` parser
///
/// Bytes go in as they arrive; complete events (blank-line terminated) come out.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend(chunk.iter().copied().filter(|b| *b != b'\r'));
    }

    /// Next complete event, skipping comment-only blocks (heartbeats)
    pub fn next_frame(&mut self) -> Option<Frame> {
        loop {
            let end = self.buffer.windows(2).position(|w| w == b"\n\n")?;
            let block: Vec<u8> = self.buffer.drain(..end + 2).collect();
            if let Some(frame) = parse_block(&String::from_utf8_lossy(&block)) {
                return Some(frame);
            }
        }
    }
}

fn parse_block(block: &str) -> Option<Frame> {
    let mut event = None;
    let mut data_lines: Vec<&str> = Vec::new();
    let mut sequence = None;

    for line in block.lines() {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => event = Some(value.to_string()),
            "data" => data_lines.push(value),
            "id" => sequence = value.trim().parse::<u64>().ok(),
            _ => {}
        }
    }

    if event.is_none() && data_lines.is_empty() {
        return None;
    }

    let raw = data_lines.join("\n");
    let data = if raw.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_str(&raw).unwrap_or(serde_json::Value::String(raw))
    };

    Some(Frame {
        event: event.unwrap_or_else(|| "message".to_string()),
        data,
        sequence,
    })
}

pub struct SseTransport {
    client: reqwest::Client,
    url: url::Url,
}

impl SseTransport {
    pub fn new(server_url: &str, path: &str) -> Result<Self> {
        Ok(Self {
            client: reqwest::Client::new(),
            url: endpoint_url(server_url, path)?,
        })
    }
}

#[async_trait]
impl Transport for SseTransport {
    async fn open(&self, token: &str) -> Result<Box<dyn TransportStream>> {
        let response = self
            .client
            .get(self.url.clone())
            .bearer_auth(token)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| SyncError::Transport(format!("Stream connect failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(SyncError::Transport(format!(
                "Stream connect failed with status {}",
                response.status()
            )));
        }

        log_debug("live", &format!("Event stream open at {}", self.url)).unwrap_or_default();

        let chunks = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()))
            .boxed();

        Ok(Box::new(SseStream {
            chunks,
            parser: SseParser::new(),
        }))
    }
}

struct SseStream {
    chunks: BoxStream<'static, reqwest::Result<Vec<u8>>>,
    parser: SseParser,
}

#[async_trait]
impl TransportStream for SseStream {
    fn kind(&self) -> TransportKind {
        TransportKind::Stream
    }

    async fn next_frame(&mut self) -> Result<Option<Frame>> {
        loop {
            if let Some(frame) = self.parser.next_frame() {
                return Ok(Some(frame));
            }
            match self.chunks.next().await {
                Some(Ok(chunk)) => self.parser.push(&chunk),
                Some(Err(e)) => {
                    return Err(SyncError::Transport(format!("Stream read failed: {}", e)))
                }
                None => return Ok(None),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parses_named_json_event() {
        let mut parser = SseParser::new();
        parser.push(b"event: dashboard:update\nid: 12\ndata: {\"summary\":{\"total\":5}}\n\n");

        let frame = parser.next_frame().unwrap();
        assert_eq!(frame.event, "dashboard:update");
        assert_eq!(frame.sequence, Some(12));
        assert_eq!(frame.data, json!({"summary": {"total": 5}}));
        assert!(parser.next_frame().is_none());
    }

    #[test]
    fn test_event_split_across_chunks() {
        let mut parser = SseParser::new();
        parser.push(b"event: billing:upd");
        assert!(parser.next_frame().is_none());
        parser.push(b"ate\r\ndata: {\"plan\":");
        assert!(parser.next_frame().is_none());
        parser.push(b"\"pro\"}\r\n\r\n");

        let frame = parser.next_frame().unwrap();
        assert_eq!(frame.event, "billing:update");
        assert_eq!(frame.data, json!({"plan": "pro"}));
    }

    #[test]
    fn test_heartbeats_and_multiline_data() {
        let mut parser = SseParser::new();
        parser.push(b": heartbeat\n\ndata: line one\ndata: line two\n\n");

        let frame = parser.next_frame().unwrap();
        assert_eq!(frame.event, "message");
        assert_eq!(frame.data, json!("line one\nline two"));
        assert_eq!(frame.sequence, None);
    }

    #[test]
    fn test_multiple_events_in_one_chunk() {
        let mut parser = SseParser::new();
        parser.push(b"event: a\ndata: 1\n\nevent: b\ndata: 2\n\n");

        assert_eq!(parser.next_frame().unwrap().event, "a");
        assert_eq!(parser.next_frame().unwrap().data, json!(2));
        assert!(parser.next_frame().is_none());
    }
}
