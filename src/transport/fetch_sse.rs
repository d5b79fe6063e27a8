use std::sync::Arc;

use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::Url;
use tokio_util::sync::CancellationToken;

use super::http::{header_map, status_error, GenerateBody, GenerateResponse};
use super::{endpoint, event_channel, sse, Emitter, EventStream, GenerationRequest, Tier, Transport};
use crate::error::{redact, GenerationError};

/// SSE over `POST {base}/api/generate` with `Accept: text/event-stream`,
/// framing parsed by hand from the response body.
///
/// Used when the GET stream is disabled. Unlike a browser `EventSource` this
/// can carry the provider headers.
#[derive(Debug, Clone)]
pub struct FetchSseTransport {
    http: reqwest::Client,
    base: Url,
}

impl FetchSseTransport {
    pub fn new(http: reqwest::Client, base: Url) -> Self {
        Self { http, base }
    }

    async fn run(
        &self,
        req: &GenerationRequest,
        emitter: &mut Emitter,
        cancel: &CancellationToken,
    ) -> Result<(), GenerationError> {
        let url = endpoint(&self.base, "api/generate")?;
        let secrets = req.secrets();

        let resp = self
            .http
            .post(url)
            .headers(header_map(req)?)
            .header(ACCEPT, "text/event-stream")
            .json(&GenerateBody::from_request(req))
            .send()
            .await
            .map_err(|e| GenerationError::from_reqwest(&e, &secrets))?;

        if !resp.status().is_success() {
            return Err(status_error(resp, &secrets).await);
        }

        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        // Some backends ignore Accept and answer with plain JSON.
        if content_type.starts_with("application/json") {
            tracing::debug!("backend answered the stream request with JSON");
            let body = resp.json::<GenerateResponse>().await.map_err(|e| {
                GenerationError::Transport(redact(&format!("invalid response body: {e}"), &secrets))
            })?;
            for ev in body.into_events() {
                if !emitter.send(ev).await {
                    break;
                }
            }
            return Ok(());
        }

        sse::pump(resp, emitter, cancel, &secrets).await
    }
}

impl Transport for FetchSseTransport {
    fn tier(&self) -> Tier {
        Tier::FetchSse
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
