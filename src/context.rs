// src/context.rs
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use crate::core::collab::{AsnCache, CredentialStore, ScopePredicate, Transport};
use crate::core::model::SourceEvent;
use crate::error::{ReconError, ReconResult};
use crate::service::rate_limit::RateLimiter;
use crate::service::shutdown::ShutdownSignal;

/// Shared collaborators handed to every actor at construction time
#[derive(Clone)]
pub struct Collaborators {
    pub credentials: Arc<dyn CredentialStore>,
    pub scope: Arc<dyn ScopePredicate>,
    pub cache: Arc<dyn AsnCache>,
    pub transport: Arc<dyn Transport>,
}

/// Everything a single source may touch while handling a request.
///
/// Built once per actor; the limiter and shutdown signal are private to it.
pub struct SourceContext {
    pub source: String,
    pub scope: Arc<dyn ScopePredicate>,
    pub cache: Arc<dyn AsnCache>,
    pub transport: Arc<dyn Transport>,
    pub limiter: RateLimiter,
    events: mpsc::Sender<SourceEvent>,
    shutdown: ShutdownSignal,
}

impl SourceContext {
    pub fn new(
        source: impl Into<String>,
        collaborators: &Collaborators,
        rate_limit: u32,
        events: mpsc::Sender<SourceEvent>,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            source: source.into(),
            scope: collaborators.scope.clone(),
            cache: collaborators.cache.clone(),
            transport: collaborators.transport.clone(),
            limiter: RateLimiter::new(rate_limit, shutdown.clone()),
            events,
            shutdown,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub fn shutdown(&self) -> &ShutdownSignal {
        &self.shutdown
    }

    /// One outbound call, gated by the rate limiter.
    ///
    /// Fails with `Cancelled` instead of starting the call once shutdown was signalled.
    pub async fn fetch(
        &self,
        url: &str,
        body: Option<String>,
        headers: &[(String, String)],
    ) -> ReconResult<String> {
        self.limiter.admit().await?;
        debug!("{}: fetching {}", self.source, url);
        self.transport.fetch(url, body, headers).await
    }

    /// Hand an event to the orchestrator.
    ///
    /// Waits for channel capacity but gives up as soon as the actor is
    /// cancelled, so a stalled consumer cannot block shutdown.
    pub async fn emit(&self, event: SourceEvent) -> ReconResult<()> {
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(ReconError::Cancelled),
            sent = self.events.send(event) => {
                sent.map_err(|_| ReconError::Unexpected(format!("{}: event channel closed", self.source)))?;
                debug!("{}: event emitted", self.source);
                Ok(())
            }
        }
    }
}
