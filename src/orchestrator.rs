//! Runs one generation at a time through the configured transport tiers.
//!
//! Each [`Orchestrator::start`] validates the prompt, cancels whatever was in
//! flight, and spawns a driver task that opens tiers in priority order until
//! one completes. The driver is the only writer of the code and meta buffers
//! for its generation, and it writes the shared [`PreviewState`] only while
//! its generation is still the latest one.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use reqwest::Url;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::error::Elapsed;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::config::Settings;
use crate::error::GenerationError;
use crate::preview::Aggregator;
use crate::transport::event_source::EventSourceTransport;
use crate::transport::fetch_sse::FetchSseTransport;
use crate::transport::http::HttpTransport;
use crate::transport::local::LocalTransport;
#[cfg(feature = "websocket")]
use crate::transport::websocket::WebSocketTransport;
use crate::transport::{
    EventStream, GenerationRequest, GenerationResult, StreamEvent, Tier, Transport,
    TransportHandle,
};

const STATUS_GENERATING: &str = "Generating…";
const STATUS_COMPLETE: &str = "Generation complete";
const STATUS_CANCELED: &str = "Generation canceled";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    Requesting,
    Streaming,
    Completed,
    Failed,
    Cancelled,
}

/// What a viewer of the latest generation sees.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PreviewState {
    pub generation: Option<u64>,
    pub phase: Phase,
    pub status: String,
    pub tier: Option<Tier>,
    /// Code accumulated by the current tier.
    pub code: String,
    pub meta: Option<Value>,
    pub html: Option<String>,
    pub content: Option<String>,
}

/// Progress of one generation, in order. The last update is always one of
/// `Completed`, `Cancelled` or `Failed`.
#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    TierStarted(Tier),
    Status(String),
    /// One code chunk, to be appended to what came before. `CodeReset` and
    /// `Fallback` both empty the buffer.
    Code(String),
    /// Code received so far was discarded.
    CodeReset,
    Meta(Value),
    Fallback { from: Tier, error: GenerationError },
    Completed { tier: Tier, result: GenerationResult },
    Cancelled,
    Failed(GenerationError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Completed { tier: Tier, result: GenerationResult },
    Cancelled,
    Failed(GenerationError),
}

/// Which tiers to build, from resolved configuration.
#[derive(Debug, Clone)]
pub struct TransportPlan {
    pub base_url: Option<Url>,
    pub ws_url: Option<Url>,
    /// Try GET-style SSE before POST-style SSE.
    pub event_source: bool,
    pub idle_timeout: Option<Duration>,
    pub local_pacing: Duration,
}

impl Default for TransportPlan {
    fn default() -> Self {
        Self {
            base_url: None,
            ws_url: None,
            event_source: true,
            idle_timeout: None,
            local_pacing: Duration::ZERO,
        }
    }
}

impl TransportPlan {
    pub fn build(&self, http: &reqwest::Client) -> Vec<Arc<dyn Transport>> {
        let mut tiers: Vec<Arc<dyn Transport>> = Vec::new();

        if let Some(ws) = &self.ws_url {
            #[cfg(feature = "websocket")]
            tiers.push(Arc::new(WebSocketTransport::new(ws.clone())));
            #[cfg(not(feature = "websocket"))]
            tracing::warn!(url = %ws, "built without websocket support, skipping that tier");
        }

        if let Some(base) = &self.base_url {
            if self.event_source {
                tiers.push(Arc::new(EventSourceTransport::new(http.clone(), base.clone())));
            }
            tiers.push(Arc::new(FetchSseTransport::new(http.clone(), base.clone())));
            tiers.push(Arc::new(HttpTransport::new(http.clone(), base.clone())));
        }

        tiers.push(Arc::new(LocalTransport::new(self.local_pacing)));
        tiers
    }
}

#[derive(Default)]
struct Shared {
    latest: u64,
    active: Option<(u64, CancellationToken)>,
    preview: PreviewState,
}

struct Inner {
    shared: Mutex<Shared>,
    transports: Vec<Arc<dyn Transport>>,
    settings: Settings,
    idle_timeout: Option<Duration>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Owner of the single active-generation slot. Cheap to clone; clones share
/// state.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tiers: Vec<Tier> = self.inner.transports.iter().map(|t| t.tier()).collect();
        f.debug_struct("Orchestrator")
            .field("tiers", &tiers)
            .field("settings", &self.inner.settings)
            .field("idle_timeout", &self.inner.idle_timeout)
            .finish()
    }
}

impl Orchestrator {
    pub fn new(http: reqwest::Client, settings: Settings, plan: &TransportPlan) -> Self {
        Self::with_transports(settings, plan.build(&http), plan.idle_timeout)
    }

    /// Use an explicit tier list, tried in the given order.
    pub fn with_transports(
        settings: Settings,
        transports: Vec<Arc<dyn Transport>>,
        idle_timeout: Option<Duration>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                shared: Mutex::new(Shared::default()),
                transports,
                settings,
                idle_timeout,
            }),
        }
    }

    pub fn tiers(&self) -> Vec<Tier> {
        self.inner.transports.iter().map(|t| t.tier()).collect()
    }

    /// Begin a new generation, superseding any that is still running.
    ///
    /// An invalid prompt is rejected here, before any I/O and without
    /// disturbing the generation in flight. Must be called inside a Tokio
    /// runtime.
    pub fn start(&self, prompt: &str) -> Result<Generation, GenerationError> {
        let req = Arc::new(GenerationRequest::new(prompt, &self.inner.settings)?);
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::unbounded_channel();

        let id = {
            let mut shared = self.inner.lock();
            if let Some((prev, token)) = shared.active.take() {
                tracing::debug!(generation = prev, "superseding generation in flight");
                token.cancel();
            }
            shared.latest += 1;
            let id = shared.latest;
            shared.active = Some((id, cancel.clone()));
            shared.preview = PreviewState {
                generation: Some(id),
                phase: Phase::Requesting,
                status: STATUS_GENERATING.to_string(),
                ..PreviewState::default()
            };
            id
        };

        tracing::debug!(generation = id, chars = req.prompt().chars().count(), "generation started");

        let driver = Driver {
            inner: Arc::clone(&self.inner),
            id,
            req,
            cancel: cancel.clone(),
            tx,
        };
        tokio::spawn(driver.run());

        Ok(Generation {
            id,
            handle: TransportHandle::new(cancel),
            updates: rx,
        })
    }

    /// Cancel the generation in flight, if any.
    pub fn cancel(&self) {
        let shared = self.inner.lock();
        if let Some((id, token)) = &shared.active {
            tracing::debug!(generation = id, "cancel requested");
            token.cancel();
        }
    }

    pub fn snapshot(&self) -> PreviewState {
        self.inner.lock().preview.clone()
    }
}

/// A started generation: its id, its cancel handle and its updates.
#[derive(Debug)]
pub struct Generation {
    id: u64,
    handle: TransportHandle,
    updates: mpsc::UnboundedReceiver<Update>,
}

impl Generation {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn handle(&self) -> TransportHandle {
        self.handle.clone()
    }

    pub fn abort(&self) {
        self.handle.abort();
    }

    pub async fn next_update(&mut self) -> Option<Update> {
        self.updates.recv().await
    }

    /// Skip intermediate updates and return how the generation ended.
    pub async fn wait(mut self) -> Outcome {
        while let Some(update) = self.updates.recv().await {
            match update {
                Update::Completed { tier, result } => return Outcome::Completed { tier, result },
                Update::Cancelled => return Outcome::Cancelled,
                Update::Failed(err) => return Outcome::Failed(err),
                _ => {}
            }
        }
        Outcome::Failed(GenerationError::Transport(
            "generation driver stopped unexpectedly".to_string(),
        ))
    }
}

enum TierResult {
    Completed(GenerationResult),
    Failed(GenerationError),
    Cancelled,
}

struct Driver {
    inner: Arc<Inner>,
    id: u64,
    req: Arc<GenerationRequest>,
    cancel: CancellationToken,
    tx: mpsc::UnboundedSender<Update>,
}

impl Driver {
    async fn run(self) {
        let outcome = self.drive().await;
        let update = match outcome {
            Outcome::Completed { tier, result } => {
                tracing::info!(generation = self.id, %tier, bytes = result.html.len(), "generation complete");
                self.finish(|p| {
                    p.phase = Phase::Completed;
                    p.status = STATUS_COMPLETE.to_string();
                    p.html = Some(result.html.clone());
                    p.content = Some(result.content.clone());
                });
                Update::Completed { tier, result }
            }
            Outcome::Cancelled => {
                tracing::info!(generation = self.id, "generation canceled");
                self.finish(|p| {
                    p.phase = Phase::Cancelled;
                    p.status = STATUS_CANCELED.to_string();
                });
                Update::Cancelled
            }
            Outcome::Failed(err) => {
                tracing::warn!(generation = self.id, error = %err, "every tier failed");
                self.finish(|p| {
                    p.phase = Phase::Failed;
                    p.status = err.user_message();
                });
                Update::Failed(err)
            }
        };
        self.notify(update);
    }

    async fn drive(&self) -> Outcome {
        let mut last_error = None;

        for transport in &self.inner.transports {
            if self.cancel.is_cancelled() {
                return Outcome::Cancelled;
            }
            let tier = transport.tier();
            match self.run_tier(transport.as_ref()).await {
                TierResult::Completed(result) => return Outcome::Completed { tier, result },
                TierResult::Cancelled => return Outcome::Cancelled,
                TierResult::Failed(error) => {
                    tracing::warn!(generation = self.id, %tier, %error, "tier failed, falling back");
                    // Partial output of a failed tier is dropped; status stays.
                    self.apply(|p| {
                        p.phase = Phase::Requesting;
                        p.tier = None;
                        p.code.clear();
                        p.meta = None;
                    });
                    self.notify(Update::Fallback {
                        from: tier,
                        error: error.clone(),
                    });
                    last_error = Some(error);
                }
            }
        }

        Outcome::Failed(
            last_error
                .unwrap_or_else(|| GenerationError::Transport("no transport configured".to_string())),
        )
    }

    async fn run_tier(&self, transport: &dyn Transport) -> TierResult {
        let tier = transport.tier();
        let tier_cancel = self.cancel.child_token();
        tracing::debug!(generation = self.id, %tier, "opening tier");
        self.apply(|p| {
            p.phase = Phase::Requesting;
            p.tier = Some(tier);
        });
        self.notify(Update::TierStarted(tier));

        let mut events = transport.open(Arc::clone(&self.req), tier_cancel.clone());
        let mut agg = Aggregator::default();
        let mut streaming = false;

        loop {
            let next = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return TierResult::Cancelled,
                next = next_event(&mut events, self.inner.idle_timeout) => next,
            };

            let event = match next {
                Ok(Some(event)) => event,
                Ok(None) => {
                    return TierResult::Failed(GenerationError::Transport(
                        "stream ended without completion".to_string(),
                    ))
                }
                Err(_) => {
                    tier_cancel.cancel();
                    let secs = self.inner.idle_timeout.unwrap_or_default().as_secs_f64();
                    return TierResult::Failed(GenerationError::Timeout(format!(
                        "no event from {tier} for {secs}s"
                    )));
                }
            };

            if !streaming {
                streaming = true;
                self.apply(|p| p.phase = Phase::Streaming);
            }

            match event {
                StreamEvent::Status(msg) => {
                    self.apply(|p| p.status = msg.clone());
                    self.notify(Update::Status(msg));
                }
                StreamEvent::CodeChunk(chunk) => {
                    agg.push_code(&chunk);
                    self.apply(|p| p.code.push_str(&chunk));
                    self.notify(Update::Code(chunk));
                }
                StreamEvent::CodeReset => {
                    agg.reset_code();
                    self.apply(|p| p.code.clear());
                    self.notify(Update::CodeReset);
                }
                StreamEvent::MetaChunk(meta) => {
                    agg.set_meta(meta.clone());
                    self.apply(|p| p.meta = Some(meta.clone()));
                    self.notify(Update::Meta(meta));
                }
                StreamEvent::Done {
                    html,
                    content,
                    messages,
                } => return TierResult::Completed(agg.finish(html, content, messages)),
                StreamEvent::Error(err) if err.is_aborted() && self.cancel.is_cancelled() => {
                    return TierResult::Cancelled
                }
                StreamEvent::Error(err) => return TierResult::Failed(err),
            }
        }
    }

    /// Mutate the shared preview, unless a newer generation owns it.
    fn apply(&self, f: impl FnOnce(&mut PreviewState)) {
        let mut shared = self.inner.lock();
        if shared.latest == self.id {
            f(&mut shared.preview);
        }
    }

    /// Final state change; also frees the active slot if it is still ours.
    fn finish(&self, f: impl FnOnce(&mut PreviewState)) {
        let mut shared = self.inner.lock();
        if shared.latest != self.id {
            return;
        }
        f(&mut shared.preview);
        if matches!(shared.active, Some((id, _)) if id == self.id) {
            shared.active = None;
        }
    }

    fn notify(&self, update: Update) {
        // Nobody listening is fine; the preview state still advances.
        let _ = self.tx.send(update);
    }
}

async fn next_event(
    events: &mut EventStream,
    idle: Option<Duration>,
) -> Result<Option<StreamEvent>, Elapsed> {
    match idle {
        Some(window) => tokio::time::timeout(window, events.next()).await,
        None => Ok(events.next().await),
    }
}
