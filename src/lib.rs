//! Streaming website-preview generation client.
//!
//! A prompt goes through a chain of transport tiers (WebSocket, SSE, plain
//! HTTP, then an offline generator) until one of them produces a page. The
//! result is always sanitized before anyone sees it.

pub mod config;
pub mod error;
pub mod local;
pub mod orchestrator;
pub mod preview;
pub mod sanitize;
pub mod transport;

pub use config::{Config, Secret, Settings};
pub use error::{FailureKind, GenerationError};
pub use local::local_generate;
pub use orchestrator::{Generation, Orchestrator, Outcome, Phase, PreviewState, TransportPlan, Update};
pub use sanitize::sanitize;
pub use transport::{GenerationRequest, GenerationResult, Provider, StreamEvent, Tier, Transport, TransportHandle};
