use std::sync::Arc;

use reqwest::header::{ACCEPT, CACHE_CONTROL, CONTENT_TYPE};
use reqwest::Url;
use tokio_util::sync::CancellationToken;

use super::{endpoint, event_channel, sse, Emitter, EventStream, GenerationRequest, Tier, Transport};
use crate::error::GenerationError;

/// SSE over `GET {base}/api/generate/stream?prompt=…`, with the semantics of
/// a browser `EventSource`: the response must be `text/event-stream`, and only
/// the named events `chunk`, `done` and `error` are observed.
#[derive(Debug, Clone)]
pub struct EventSourceTransport {
    http: reqwest::Client,
    base: Url,
}

impl EventSourceTransport {
    pub fn new(http: reqwest::Client, base: Url) -> Self {
        Self { http, base }
    }

    fn build_url(&self, prompt: &str) -> Result<Url, GenerationError> {
        let mut url = endpoint(&self.base, "api/generate/stream")?;
        url.query_pairs_mut().append_pair("prompt", prompt);
        Ok(url)
    }

    async fn run(
        &self,
        req: &GenerationRequest,
        emitter: &mut Emitter,
        cancel: &CancellationToken,
    ) -> Result<(), GenerationError> {
        let url = self.build_url(req.prompt())?;
        let secrets = req.secrets();

        let resp = self
            .http
            .get(url)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await
            .map_err(|e| GenerationError::from_reqwest(&e, &secrets))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(GenerationError::HttpStatus {
                status: status.as_u16(),
                message: "event stream refused".to_string(),
            });
        }

        let is_event_stream = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.to_ascii_lowercase().starts_with("text/event-stream"));
        if !is_event_stream {
            return Err(GenerationError::Transport(
                "response is not an event stream".to_string(),
            ));
        }

        sse::pump(resp, emitter, cancel, &secrets).await
    }
}

impl Transport for EventSourceTransport {
    fn tier(&self) -> Tier {
        Tier::EventSource
    }

    fn open(&self, req: Arc<GenerationRequest>, cancel: CancellationToken) -> EventStream {
        let this = self.clone();
        let (mut emitter, stream) = event_channel();

        tokio::spawn(async move {
            let outcome = tokio::select! {
                biased;
                () = cancel.cancelled() => Err(GenerationError::Aborted),
                r = this.run(&req, &mut emitter, &cancel) => r,
            };
            emitter.close(outcome).await;
        });

        stream
    }
}
