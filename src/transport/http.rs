//! Single-shot `POST /api/generate` client and the tier built on it.

use std::sync::Arc;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::{
    endpoint, event_channel, ChatMessage, Emitter, EventStream, GenerationRequest,
    GenerationResult, Provider, StreamEvent, Tier, Transport,
};
use crate::error::{redact, GenerationError};
use crate::preview::Aggregator;

#[derive(Debug, Serialize)]
pub(crate) struct GenerateBody<'a> {
    pub prompt: &'a str,
    pub provider: Provider,
    pub model: &'a str,
}

impl<'a> GenerateBody<'a> {
    pub(crate) fn from_request(req: &'a GenerationRequest) -> Self {
        Self {
            prompt: req.prompt(),
            provider: req.provider(),
            model: req.model(),
        }
    }
}

/// Either `{html?, content?, messages?}` or `{code, meta}`.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct GenerateResponse {
    #[serde(default)]
    pub html: serde_json::Value,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub messages: Option<Vec<ChatMessage>>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub meta: Option<serde_json::Value>,
}

impl GenerateResponse {
    /// The events a streaming tier would have produced for this body.
    pub(crate) fn into_events(self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if let Some(meta) = self.meta {
            events.push(StreamEvent::MetaChunk(meta));
        }
        if let Some(code) = self.code.filter(|c| !c.is_empty()) {
            events.push(StreamEvent::CodeChunk(code));
        }
        events.push(StreamEvent::Done {
            html: self.html.as_str().map(str::to_string),
            content: self.content,
            messages: self.messages,
        });
        events
    }

    pub(crate) fn into_result(self) -> GenerationResult {
        let mut agg = Aggregator::default();
        if let Some(code) = &self.code {
            agg.push_code(code);
        }
        agg.finish(
            self.html.as_str().map(str::to_string),
            self.content,
            self.messages,
        )
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

pub(crate) fn header_map(req: &GenerationRequest) -> Result<HeaderMap, GenerationError> {
    let mut headers = HeaderMap::new();
    for (name, value) in req.auth_headers() {
        // Never echo the value: it is a credential or a private URL.
        let value = HeaderValue::from_str(value.expose()).map_err(|_| {
            GenerationError::Validation(format!("header {name} has an invalid value"))
        })?;
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| GenerationError::Validation(format!("bad header name {name}: {e}")))?;
        headers.insert(name, value);
    }
    Ok(headers)
}

/// Turn a non-2xx response into an error, using the `{error}` body if any.
pub(crate) async fn status_error(resp: reqwest::Response, secrets: &[&str]) -> GenerationError {
    let status = resp.status().as_u16();
    let text = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&text)
        .map(|b| b.error)
        .unwrap_or_else(|_| reason(status));
    GenerationError::HttpStatus {
        status,
        message: redact(&message, secrets),
    }
}

fn reason(status: u16) -> String {
    reqwest::StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("request failed")
        .to_string()
}

/// Non-streaming generation client; also the tier after SSE.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http: reqwest::Client,
    base: Url,
}

impl HttpTransport {
    pub fn new(http: reqwest::Client, base: Url) -> Self {
        Self { http, base }
    }

    /// One request, one response, no intermediate events.
    pub async fn generate_once(
        &self,
        req: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<GenerationResult, GenerationError> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(GenerationError::Aborted),
            r = self.fetch(req) => r.map(GenerateResponse::into_result),
        }
    }

    async fn fetch(&self, req: &GenerationRequest) -> Result<GenerateResponse, GenerationError> {
        let url = endpoint(&self.base, "api/generate")?;
        let secrets = req.secrets();

        let resp = self
            .http
            .post(url)
            .headers(header_map(req)?)
            .header(ACCEPT, "application/json")
            .json(&GenerateBody::from_request(req))
            .send()
            .await
            .map_err(|e| GenerationError::from_reqwest(&e, &secrets))?;

        if !resp.status().is_success() {
            return Err(status_error(resp, &secrets).await);
        }

        resp.json::<GenerateResponse>()
            .await
            .map_err(|e| GenerationError::Transport(redact(&format!("invalid response body: {e}"), &secrets)))
    }

    async fn run(&self, req: &GenerationRequest, emitter: &mut Emitter) -> Result<(), GenerationError> {
        if !emitter.send(StreamEvent::Status("Generating…".to_string())).await {
            return Ok(());
        }
        let body = self.fetch(req).await?;
        for ev in body.into_events() {
            if !emitter.send(ev).await {
                break;
            }
        }
        Ok(())
    }
}

impl Transport for HttpTransport {
    fn tier(&self) -> Tier {
        Tier::Http
    }

    fn open(&self, req: Arc<GenerationRequest>, cancel: CancellationToken) -> EventStream {
        let this = self.clone();
        let (mut emitter, stream) = event_channel();

        tokio::spawn(async move {
            let outcome = tokio::select! {
                biased;
                () = cancel.cancelled() => Err(GenerationError::Aborted),
                r = this.run(&req, &mut emitter) => r,
            };
            emitter.close(outcome).await;
        });

        stream
    }
}
