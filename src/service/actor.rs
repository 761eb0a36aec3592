// src/service/actor.rs
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, debug, warn};

use crate::context::{Collaborators, SourceContext};
use crate::core::collab::CredentialStore;
use crate::core::model::{Request, SourceEvent};
use crate::error::{ReconError, ReconResult};
use super::shutdown::{self, ShutdownTrigger};

/// A third-party data source driven by a service actor
#[async_trait]
pub trait DataSource: Send {
    /// Stable source identifier, used for credentials lookup and provenance
    fn name(&self) -> &str;

    /// How the source currently operates ("api" or "scrape")
    fn description(&self) -> String;

    /// Load credentials and pick the operating strategy.
    ///
    /// Returns `Configuration` when a required credential is missing and the
    /// source has no credential-free alternative.
    async fn on_start(&mut self, credentials: &dyn CredentialStore) -> ReconResult<()>;

    /// Outbound requests per second allowed for this source
    fn rate_limit(&self) -> u32;

    /// Process a single request to completion
    async fn handle(&mut self, request: Request, ctx: &SourceContext) -> ReconResult<()>;
}

/// Orchestrator-side handle to a running actor
pub struct ServiceHandle {
    name: String,
    description: String,
    mailbox: mpsc::Sender<Request>,
    trigger: ShutdownTrigger,
    task: JoinHandle<()>,
}

impl ServiceHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Queue a request; requests are processed in arrival order
    pub async fn send(&self, request: Request) -> ReconResult<()> {
        self.mailbox
            .send(request)
            .await
            .map_err(|_| ReconError::Unexpected(format!("{}: mailbox closed", self.name)))
    }

    /// Signal cancellation and wait for the dispatch loop to exit.
    ///
    /// A request in progress finishes its current outbound call but starts no new one.
    pub async fn stop(self) {
        self.trigger.cancel();
        if let Err(e) = self.task.await {
            warn!("{}: actor task failed: {}", self.name, e);
        }
    }

    /// Close the mailbox and wait until every queued request was handled
    pub async fn finish(self) {
        let ServiceHandle { name, mailbox, trigger, task, .. } = self;
        drop(mailbox);
        if let Err(e) = task.await {
            warn!("{}: actor task failed: {}", name, e);
        }
        drop(trigger);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Start `source` and spawn its dispatch loop
pub async fn spawn(
    mut source: Box<dyn DataSource>,
    collaborators: &Collaborators,
    events: mpsc::Sender<SourceEvent>,
    mailbox_size: usize,
) -> ReconResult<ServiceHandle> {
    source.on_start(collaborators.credentials.as_ref()).await?;

    let name = source.name().to_string();
    let description = source.description();
    let (trigger, signal) = shutdown::channel();
    let ctx = SourceContext::new(name.clone(), collaborators, source.rate_limit(), events, signal);
    let (tx, rx) = mpsc::channel(mailbox_size.max(1));

    info!("{}: started ({}, {} req/s)", name, description, ctx.limiter.per_second());
    let task = tokio::spawn(run(source, ctx, rx));

    Ok(ServiceHandle {
        name,
        description,
        mailbox: tx,
        trigger,
        task,
    })
}

/// Dispatch loop: one request at a time until cancelled or the mailbox closes
async fn run(mut source: Box<dyn DataSource>, ctx: SourceContext, mut mailbox: mpsc::Receiver<Request>) {
    loop {
        if ctx.is_cancelled() {
            break;
        }

        let request = tokio::select! {
            biased;
            _ = ctx.shutdown().cancelled() => break,
            next = mailbox.recv() => match next {
                Some(request) => request,
                None => break,
            },
        };

        let kind = request.kind();
        let subject = request.subject();
        debug!("{}: handling {} request for {}", ctx.source, kind, subject);

        match source.handle(request, &ctx).await {
            Ok(()) => {}
            Err(ReconError::Cancelled) => {
                debug!("{}: {} request for {} cancelled", ctx.source, kind, subject);
            }
            Err(e) => {
                warn!("{}: {} request for {} produced no result: {}", ctx.source, kind, subject, e);
            }
        }
    }

    info!("{}: stopped after {} outbound calls", ctx.source, ctx.limiter.admitted());
}
