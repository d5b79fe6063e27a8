#![cfg(feature = "websocket")]

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use reqwest::Url;
use serde::Deserialize;
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};
use tokio_util::sync::CancellationToken;

use super::{event_channel, ChatMessage, Emitter, EventStream, GenerationRequest, StreamEvent, Tier, Transport};
use crate::error::GenerationError;

/// Inbound `{role, content, done, html?}` message.
#[derive(Debug, Deserialize)]
struct WsFrame {
    #[allow(dead_code)]
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    html: serde_json::Value,
}

enum Step {
    Cancelled,
    Inbound(Option<Result<WsMessage, tungstenite::Error>>),
}

/// Chat stream over a WebSocket. One connection per generation, no
/// reconnects; the orchestrator decides what happens after a failure.
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    url: Url,
}

impl WebSocketTransport {
    pub fn new(url: Url) -> Self {
        Self { url }
    }

    async fn run(
        &self,
        req: &GenerationRequest,
        emitter: &mut Emitter,
        cancel: &CancellationToken,
    ) -> Result<(), GenerationError> {
        let connected = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(GenerationError::Aborted),
            r = tokio_tungstenite::connect_async(self.url.as_str()) => r,
        };
        let (mut ws, _resp) = connected.map_err(connect_error)?;
        tracing::debug!("websocket connected");

        let hello = serde_json::json!({
            "type": "chat.stream",
            "messages": [ChatMessage::user(req.prompt())],
        });
        ws.send(WsMessage::Text(hello.to_string()))
            .await
            .map_err(|e| GenerationError::Transport(e.to_string()))?;

        loop {
            let step = tokio::select! {
                biased;
                () = cancel.cancelled() => Step::Cancelled,
                msg = ws.next() => Step::Inbound(msg),
            };

            let text = match step {
                Step::Cancelled => {
                    let _ = ws.close(None).await;
                    return Err(GenerationError::Aborted);
                }
                Step::Inbound(Some(Ok(WsMessage::Text(t)))) => t,
                Step::Inbound(Some(Ok(WsMessage::Binary(b)))) => match String::from_utf8(b) {
                    Ok(t) => t,
                    Err(_) => continue,
                },
                // Pings are answered by tungstenite on the next read/write.
                Step::Inbound(Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_)))) => {
                    continue
                }
                Step::Inbound(Some(Ok(WsMessage::Close(_))) | None) => {
                    return Err(GenerationError::Transport(
                        "socket closed before completion".to_string(),
                    ));
                }
                Step::Inbound(Some(Err(e))) => {
                    let _ = ws.close(None).await;
                    return Err(GenerationError::Transport(e.to_string()));
                }
            };

            let Ok(frame) = serde_json::from_str::<WsFrame>(&text) else {
                tracing::debug!("dropping malformed websocket message");
                continue;
            };

            if frame.done {
                emitter
                    .send(StreamEvent::Done {
                        html: frame.html.as_str().map(str::to_string),
                        content: frame.content,
                        messages: None,
                    })
                    .await;
                let _ = ws.close(None).await;
                return Ok(());
            }

            if let Some(content) = frame.content.filter(|c| !c.is_empty()) {
                if !emitter.send(StreamEvent::Status(content)).await {
                    let _ = ws.close(None).await;
                    return Ok(());
                }
            }
        }
    }
}

fn connect_error(err: tungstenite::Error) -> GenerationError {
    match err {
        tungstenite::Error::Http(resp) => GenerationError::HttpStatus {
            status: resp.status().as_u16(),
            message: "websocket upgrade refused".to_string(),
        },
        other => GenerationError::Network(other.to_string()),
    }
}

impl Transport for WebSocketTransport {
    fn tier(&self) -> Tier {
        Tier::WebSocket
    }

    fn open(&self, req: Arc<GenerationRequest>, cancel: CancellationToken) -> EventStream {
        let this = self.clone();
        let (mut emitter, stream) = event_channel();

        // Cancellation is handled inside run() so the socket gets a close frame.
        tokio::spawn(async move {
            let outcome = this.run(&req, &mut emitter, &cancel).await;
            emitter.close(outcome).await;
        });

        stream
    }
}
