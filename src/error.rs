//! Error taxonomy shared by every transport tier and the orchestrator.

use std::fmt;

/// Longest error message carried out of a backend response.
pub const MAX_ERROR_MESSAGE: usize = 200;

/// Why a generation attempt (or a single tier of it) failed.
///
/// Values are cheap to clone so they can travel inside [`crate::StreamEvent`]
/// and be compared in tests. Messages never contain secrets: anything that
/// originates from a backend goes through [`redact`] first.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    /// Prompt was empty or too long; raised before any network I/O.
    #[error("invalid prompt: {0}")]
    Validation(String),

    /// No connection could be made (DNS, refused, TLS).
    #[error("network error: {0}")]
    Network(String),

    /// The backend or the idle timer gave up waiting.
    #[error("timed out: {0}")]
    Timeout(String),

    /// Malformed framing, socket failure mid-stream, or a backend `error` event.
    #[error("transport error: {0}")]
    Transport(String),

    /// Non-2xx response from the HTTP endpoint.
    #[error("HTTP {status}: {message}")]
    HttpStatus { status: u16, message: String },

    /// Cancelled by the user or superseded by a newer generation.
    #[error("aborted")]
    Aborted,
}

/// Coarse classification used for user-facing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    RateLimited,
    Timeout,
    ServerError,
    ClientError,
    NetworkError,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::RateLimited => "rate-limited",
            FailureKind::Timeout => "timeout",
            FailureKind::ServerError => "server error",
            FailureKind::ClientError => "client error",
            FailureKind::NetworkError => "network error",
        };
        f.write_str(s)
    }
}

impl FailureKind {
    /// Classify an HTTP status code. Returns `None` for success codes.
    pub fn from_status(status: u16) -> Option<Self> {
        match status {
            429 => Some(FailureKind::RateLimited),
            408 | 504 => Some(FailureKind::Timeout),
            500..=599 => Some(FailureKind::ServerError),
            400..=499 => Some(FailureKind::ClientError),
            _ => None,
        }
    }
}

impl GenerationError {
    pub fn is_aborted(&self) -> bool {
        matches!(self, GenerationError::Aborted)
    }

    /// Failure class for messaging. Validation and abort are not failures of
    /// the backend and have no class.
    pub fn kind(&self) -> Option<FailureKind> {
        match self {
            GenerationError::Validation(_) | GenerationError::Aborted => None,
            GenerationError::Network(_) => Some(FailureKind::NetworkError),
            GenerationError::Timeout(_) => Some(FailureKind::Timeout),
            GenerationError::Transport(_) => Some(FailureKind::ServerError),
            GenerationError::HttpStatus { status, .. } => {
                FailureKind::from_status(*status).or(Some(FailureKind::ServerError))
            }
        }
    }

    /// Short sentence suitable for a status line.
    pub fn user_message(&self) -> String {
        match self {
            GenerationError::Validation(msg) => format!("Invalid prompt: {msg}"),
            GenerationError::Aborted => "Generation canceled".to_string(),
            _ => match self.kind() {
                Some(FailureKind::RateLimited) => {
                    "The backend is rate-limiting requests; try again shortly".to_string()
                }
                Some(FailureKind::Timeout) => "The backend took too long to respond".to_string(),
                Some(FailureKind::ClientError) => "The backend rejected the request".to_string(),
                Some(FailureKind::NetworkError) => "Could not reach the backend".to_string(),
                Some(FailureKind::ServerError) | None => "The backend failed to generate".to_string(),
            },
        }
    }

    /// Map a reqwest error onto the taxonomy, keeping secrets out of the text.
    pub(crate) fn from_reqwest(err: &reqwest::Error, secrets: &[&str]) -> Self {
        // reqwest errors may embed the request URL, which can carry the prompt
        // but never a header value; redact anyway in case a key was put in a URL.
        let msg = redact(&err.to_string(), secrets);
        if err.is_timeout() {
            GenerationError::Timeout(msg)
        } else if err.is_connect() {
            GenerationError::Network(msg)
        } else if let Some(status) = err.status() {
            GenerationError::HttpStatus {
                status: status.as_u16(),
                message: msg,
            }
        } else if err.is_request() {
            GenerationError::Network(msg)
        } else {
            GenerationError::Transport(msg)
        }
    }
}

/// Replace every non-empty secret in `msg` with `***` and cap the length.
pub fn redact(msg: &str, secrets: &[&str]) -> String {
    let mut out = msg.to_string();
    for secret in secrets.iter().filter(|s| !s.is_empty()) {
        out = out.replace(secret, "***");
    }
    truncate_chars(&out, MAX_ERROR_MESSAGE)
}

fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}
