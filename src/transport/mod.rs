//! Transport tiers. Each one turns a [`GenerationRequest`] into an
//! [`EventStream`] fed by a spawned task.

pub mod event_source;
pub mod fetch_sse;
pub mod http;
pub mod local;
pub mod sse;
#[cfg(feature = "websocket")]
pub mod websocket;

mod types;

pub use types::*;

use reqwest::Url;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::error::GenerationError;

const CHANNEL_CAPACITY: usize = 64;

/// Sending half of an [`EventStream`] that enforces the single-terminal rule.
#[derive(Debug)]
pub(crate) struct Emitter {
    tx: mpsc::Sender<StreamEvent>,
    terminated: bool,
}

impl Emitter {
    /// Deliver `ev`. Returns `false` once the stream is over, either because a
    /// terminal event has been sent or because the consumer went away.
    pub(crate) async fn send(&mut self, ev: StreamEvent) -> bool {
        if self.terminated {
            return false;
        }
        if ev.is_terminal() {
            self.terminated = true;
        }
        let terminal = self.terminated;
        self.tx.send(ev).await.is_ok() && !terminal
    }

    /// Finish the stream. An error outcome becomes the terminal event; a
    /// stream that ran out without one gets a transport error instead.
    pub(crate) async fn close(mut self, outcome: Result<(), GenerationError>) {
        if self.terminated {
            return;
        }
        let err = match outcome {
            Err(e) => e,
            Ok(()) => GenerationError::Transport("stream closed before completion".to_string()),
        };
        self.send(StreamEvent::Error(err)).await;
    }
}

/// Resolve `path` under `base`, keeping any path prefix `base` already has.
pub(crate) fn endpoint(base: &Url, path: &str) -> Result<Url, GenerationError> {
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let with_slash = format!("{}/", base.path());
        base.set_path(&with_slash);
    }
    base.join(path)
        .map_err(|e| GenerationError::Transport(format!("invalid endpoint {path}: {e}")))
}

pub(crate) fn event_channel() -> (Emitter, EventStream) {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let emitter = Emitter {
        tx,
        terminated: false,
    };
    (emitter, Box::pin(ReceiverStream::new(rx)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    #[test]
    fn endpoint_keeps_prefix() {
        let base = Url::parse("http://host:8080/backend").unwrap();
        assert_eq!(
            endpoint(&base, "api/generate").unwrap().as_str(),
            "http://host:8080/backend/api/generate"
        );
        let root = Url::parse("http://host:8080").unwrap();
        assert_eq!(
            endpoint(&root, "api/generate").unwrap().as_str(),
            "http://host:8080/api/generate"
        );
    }

    #[tokio::test]
    async fn emitter_stops_after_terminal() {
        let (mut emitter, stream) = event_channel();
        assert!(emitter.send(StreamEvent::Status("a".into())).await);
        assert!(!emitter.send(StreamEvent::done(None, None)).await);
        assert!(!emitter.send(StreamEvent::Status("late".into())).await);
        emitter.close(Err(GenerationError::Aborted)).await;

        let events: Vec<_> = stream.collect().await;
        assert_eq!(
            events,
            vec![StreamEvent::Status("a".into()), StreamEvent::done(None, None)]
        );
    }

    #[tokio::test]
    async fn close_without_terminal_reports_transport_error() {
        let (emitter, stream) = event_channel();
        emitter.close(Ok(())).await;
        let events: Vec<_> = stream.collect().await;
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], StreamEvent::Error(GenerationError::Transport(_))));
    }
}
