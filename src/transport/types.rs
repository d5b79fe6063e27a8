use std::fmt;

use futures_core::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::config::{Secret, Settings};
use crate::error::GenerationError;

/// Longest prompt accepted, in characters, after trimming.
pub const MAX_PROMPT_CHARS: usize = 600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    Ollama,
    Openai,
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provider::Ollama => write!(f, "ollama"),
            Provider::Openai => write!(f, "openai"),
        }
    }
}

impl Provider {
    pub fn default_model(self) -> &'static str {
        match self {
            Provider::Ollama => "llama3",
            Provider::Openai => "gpt-4o-mini",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// One prompt, validated and frozen. Shared between tiers behind an `Arc`.
#[derive(Clone)]
pub struct GenerationRequest {
    prompt: String,
    provider: Provider,
    model: String,
    auth_headers: Vec<(&'static str, Secret)>,
}

impl GenerationRequest {
    /// Validate `prompt` and capture what the backend needs from `settings`.
    pub fn new(prompt: &str, settings: &Settings) -> Result<Self, GenerationError> {
        let prompt = validate_prompt(prompt)?;
        Ok(Self {
            prompt,
            provider: settings.provider,
            model: settings.model.clone(),
            auth_headers: settings.auth_headers(),
        })
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn auth_headers(&self) -> &[(&'static str, Secret)] {
        &self.auth_headers
    }

    /// Header values that must never leak into messages.
    pub(crate) fn secrets(&self) -> Vec<&str> {
        self.auth_headers.iter().map(|(_, v)| v.expose()).collect()
    }
}

impl fmt::Debug for GenerationRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let headers: Vec<&str> = self.auth_headers.iter().map(|(k, _)| *k).collect();
        f.debug_struct("GenerationRequest")
            .field("prompt", &self.prompt)
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("auth_headers", &headers)
            .finish()
    }
}

/// Trimmed prompt, or a validation error if it is empty or too long.
pub fn validate_prompt(prompt: &str) -> Result<String, GenerationError> {
    let trimmed = prompt.trim();
    if trimmed.is_empty() {
        return Err(GenerationError::Validation("prompt is empty".to_string()));
    }
    let len = trimmed.chars().count();
    if len > MAX_PROMPT_CHARS {
        return Err(GenerationError::Validation(format!(
            "prompt is {len} characters, limit is {MAX_PROMPT_CHARS}"
        )));
    }
    Ok(trimmed.to_string())
}

/// What a transport delivers, in arrival order.
///
/// `Done` and `Error` are terminal: a stream yields exactly one of them and
/// nothing after it.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Status(String),
    /// Incremental code; appended to the running buffer.
    CodeChunk(String),
    /// Clears the code buffer before a backend resends the whole document.
    CodeReset,
    /// Replaces the current metadata object.
    MetaChunk(serde_json::Value),
    Done {
        html: Option<String>,
        content: Option<String>,
        messages: Option<Vec<ChatMessage>>,
    },
    Error(GenerationError),
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done { .. } | StreamEvent::Error(_))
    }

    #[cfg(test)]
    pub(crate) fn done(html: Option<String>, content: Option<String>) -> Self {
        StreamEvent::Done {
            html,
            content,
            messages: None,
        }
    }
}

/// Converged output of any tier.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GenerationResult {
    pub html: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<ChatMessage>>,
}

/// Transport tiers in fallback priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    WebSocket,
    EventSource,
    FetchSse,
    Http,
    Local,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Tier::WebSocket => "websocket",
            Tier::EventSource => "sse-get",
            Tier::FetchSse => "sse-post",
            Tier::Http => "http",
            Tier::Local => "local",
        };
        f.write_str(s)
    }
}

pub type EventStream = BoxStream<'static, StreamEvent>;

/// A way of turning a request into a stream of events.
///
/// Implementations spawn their I/O and return immediately. Failures to
/// connect are reported as an `Error` event, not as a return value, so that
/// every tier looks the same to the orchestrator.
pub trait Transport: Send + Sync {
    fn tier(&self) -> Tier;

    /// Start streaming. Cancelling `cancel` must close the underlying
    /// connection and end the stream with exactly one `Error(Aborted)`.
    fn open(&self, req: std::sync::Arc<GenerationRequest>, cancel: CancellationToken) -> EventStream;
}

/// Cancellation handle for one generation.
#[derive(Debug, Clone)]
pub struct TransportHandle {
    cancel: CancellationToken,
}

impl TransportHandle {
    pub(crate) fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    pub fn abort(&self) {
        self.cancel.cancel();
    }

    pub fn is_aborted(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_prompt_bounds() {
        assert!(matches!(validate_prompt("   "), Err(GenerationError::Validation(_))));
        assert!(matches!(validate_prompt(""), Err(GenerationError::Validation(_))));
        assert_eq!(validate_prompt("  hi \n").unwrap(), "hi");
        assert!(validate_prompt(&"a".repeat(MAX_PROMPT_CHARS)).is_ok());
        assert!(validate_prompt(&"a".repeat(MAX_PROMPT_CHARS + 1)).is_err());
        // characters, not bytes
        assert!(validate_prompt(&"é".repeat(MAX_PROMPT_CHARS)).is_ok());
    }

    #[test]
    fn terminal_events() {
        assert!(StreamEvent::done(None, None).is_terminal());
        assert!(StreamEvent::Error(GenerationError::Aborted).is_terminal());
        assert!(!StreamEvent::Status("x".into()).is_terminal());
        assert!(!StreamEvent::CodeReset.is_terminal());
    }

    #[test]
    fn request_debug_hides_header_values() {
        let settings = Settings {
            provider: Provider::Openai,
            api_key: Some(Secret::new("sk-secret")),
            ..Settings::default()
        };
        let req = GenerationRequest::new("a page", &settings).unwrap();
        let dbg = format!("{req:?}");
        assert!(dbg.contains("X-OpenAI-Key"));
        assert!(!dbg.contains("sk-secret"));
        assert_eq!(req.secrets(), vec!["sk-secret"]);
    }

    #[test]
    fn provider_serde_is_lowercase() {
        assert_eq!(serde_json::to_string(&Provider::Openai).unwrap(), "\"openai\"");
        assert_eq!(Provider::Ollama.to_string(), "ollama");
        assert_eq!(Provider::Openai.default_model(), "gpt-4o-mini");
    }
}
