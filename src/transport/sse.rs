//! Server-Sent Events framing shared by the GET and POST adapters.

use serde::Deserialize;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

use super::{ChatMessage, Emitter, StreamEvent};
use crate::error::{redact, GenerationError};

/// One dispatched SSE record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    /// Value of the last `event:` field, `"message"` when absent.
    pub event: String,
    /// `data:` lines joined with `\n`.
    pub data: String,
}

/// Incremental SSE parser.
///
/// - Buffers bytes until a full line is available, so frames (and UTF-8
///   sequences) may be split anywhere across reads
/// - Accepts LF and CRLF line endings
/// - Emits a frame when a blank line ends a record
#[derive(Debug, Default)]
pub struct SseParser {
    buf: Vec<u8>,
    event: Option<String>,
    data: Option<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buf.extend_from_slice(chunk);
        let mut out = Vec::new();

        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let mut line = self.buf.drain(..=pos).collect::<Vec<u8>>();
            line.pop();
            if line.ends_with(b"\r") {
                line.pop();
            }

            if line.is_empty() {
                if let Some(frame) = self.dispatch() {
                    out.push(frame);
                }
                continue;
            }

            // A line that is not UTF-8 is a malformed field; drop it.
            let Ok(s) = std::str::from_utf8(&line) else {
                continue;
            };
            self.field(s);
        }

        out
    }

    fn field(&mut self, line: &str) {
        if line.starts_with(':') {
            return;
        }
        let (name, value) = match line.split_once(':') {
            Some((name, value)) => (name, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match name {
            "event" => self.event = Some(value.to_string()),
            "data" => match &mut self.data {
                Some(data) => {
                    data.push('\n');
                    data.push_str(value);
                }
                None => self.data = Some(value.to_string()),
            },
            // id:, retry: and unknown fields carry nothing we use.
            _ => {}
        }
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        let event = self.event.take();
        let data = self.data.take();
        if event.is_none() && data.is_none() {
            return None;
        }
        Some(SseFrame {
            event: event.filter(|e| !e.is_empty()).unwrap_or_else(|| "message".to_string()),
            data: data.unwrap_or_default(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct ChunkPayload {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: serde_json::Value,
}

#[derive(Debug, Default, Deserialize)]
struct DonePayload {
    #[serde(default)]
    html: serde_json::Value,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    messages: Option<Vec<ChatMessage>>,
}

#[derive(Debug, Deserialize)]
struct ErrorPayload {
    message: String,
}

/// Translate a frame into an event. Malformed or unknown frames yield `None`.
///
/// A named `error` frame always terminates the stream, with the payload's
/// message when it has one.
pub fn frame_to_event(frame: &SseFrame) -> Option<StreamEvent> {
    match frame.event.as_str() {
        "chunk" => {
            let chunk: ChunkPayload = serde_json::from_str(&frame.data).ok()?;
            match chunk.kind.as_str() {
                "code" => chunk.payload.as_str().map(|s| StreamEvent::CodeChunk(s.to_string())),
                "status" => chunk.payload.as_str().map(|s| StreamEvent::Status(s.to_string())),
                "meta" => Some(StreamEvent::MetaChunk(chunk.payload)),
                "reset" => Some(StreamEvent::CodeReset),
                _ => None,
            }
        }
        "done" => {
            let done: DonePayload = if frame.data.trim().is_empty() {
                DonePayload::default()
            } else {
                serde_json::from_str(&frame.data).ok()?
            };
            Some(StreamEvent::Done {
                html: done.html.as_str().map(str::to_string),
                content: done.content,
                messages: done.messages,
            })
        }
        "error" => {
            let message = serde_json::from_str::<ErrorPayload>(&frame.data)
                .map(|e| e.message)
                .unwrap_or_else(|_| "backend reported an error".to_string());
            Some(StreamEvent::Error(GenerationError::Transport(message)))
        }
        _ => None,
    }
}

/// Read an event-stream body to its terminal event.
///
/// Dropping the response on return closes the connection.
pub(crate) async fn pump(
    resp: reqwest::Response,
    emitter: &mut Emitter,
    cancel: &CancellationToken,
    secrets: &[&str],
) -> Result<(), GenerationError> {
    let mut body = resp.bytes_stream();
    let mut parser = SseParser::new();

    loop {
        let item = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(GenerationError::Aborted),
            item = body.next() => item,
        };

        let bytes = match item {
            Some(Ok(b)) => b,
            Some(Err(e)) => return Err(GenerationError::from_reqwest(&e, secrets)),
            None => return Ok(()),
        };

        for frame in parser.push(&bytes) {
            tracing::debug!(kind = %frame.event, bytes = frame.data.len(), "sse frame");
            let ev = match frame_to_event(&frame) {
                Some(StreamEvent::Error(GenerationError::Transport(msg))) => {
                    StreamEvent::Error(GenerationError::Transport(redact(&msg, secrets)))
                }
                Some(ev) => ev,
                None => {
                    tracing::debug!(kind = %frame.event, "dropping malformed sse frame");
                    continue;
                }
            };
            if !emitter.send(ev).await {
                return Ok(());
            }
        }
    }
}
