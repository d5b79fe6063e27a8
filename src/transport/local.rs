use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::{event_channel, Emitter, EventStream, GenerationRequest, StreamEvent, Tier, Transport};
use crate::error::GenerationError;
use crate::local::{local_generate, LocalPage};

/// Final tier: synthesizes the page in-process. Cannot fail, only be
/// cancelled.
#[derive(Debug, Clone, Default)]
pub struct LocalTransport {
    pacing: Duration,
}

impl LocalTransport {
    /// `pacing` is the pause between streamed sections, purely cosmetic.
    pub fn new(pacing: Duration) -> Self {
        Self { pacing }
    }

    async fn run(&self, req: &GenerationRequest, emitter: &mut Emitter) -> Result<(), GenerationError> {
        if !emitter
            .send(StreamEvent::Status("Generating locally…".to_string()))
            .await
        {
            return Ok(());
        }

        let page = LocalPage::compose(req.prompt());
        let parts = std::iter::once(&page.head)
            .chain(page.sections.iter())
            .chain(std::iter::once(&page.foot));

        for part in parts {
            if !self.pacing.is_zero() {
                tokio::time::sleep(self.pacing).await;
            }
            if !emitter.send(StreamEvent::CodeChunk(part.clone())).await {
                return Ok(());
            }
        }

        let result = local_generate(req.prompt());
        emitter
            .send(StreamEvent::Done {
                html: Some(result.html),
                content: Some(result.content),
                messages: result.messages,
            })
            .await;
        Ok(())
    }
}

impl Transport for LocalTransport {
    fn tier(&self) -> Tier {
        Tier::Local
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
