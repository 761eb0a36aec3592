// src/service/registry.rs
use tokio::sync::mpsc;
use tracing::{info, warn, debug, error};

use crate::context::Collaborators;
use crate::core::model::{Request, SourceEvent};
use crate::error::{ReconError, ReconResult};
use super::actor::{self, DataSource, ServiceHandle};

/// Starts data sources and fans requests out to them
pub struct SourceRegistry {
    collaborators: Collaborators,
    pending: Vec<Box<dyn DataSource>>,
    running: Vec<ServiceHandle>,
    events_tx: Option<mpsc::Sender<SourceEvent>>,
    events_rx: Option<mpsc::Receiver<SourceEvent>>,
    mailbox_size: usize,
}

impl SourceRegistry {
    pub fn new(collaborators: Collaborators, mailbox_size: usize, event_buffer: usize) -> Self {
        let (tx, rx) = mpsc::channel(event_buffer.max(1));
        Self {
            collaborators,
            pending: Vec::new(),
            running: Vec::new(),
            events_tx: Some(tx),
            events_rx: Some(rx),
            mailbox_size,
        }
    }

    /// Register a source to be started by [`SourceRegistry::start_all`]
    pub fn register_source(&mut self, source: Box<dyn DataSource>) {
        debug!("Registering data source: {}", source.name());
        self.pending.push(source);
    }

    /// Start every registered source.
    ///
    /// A source that fails to start is logged and skipped; the others keep
    /// running. Returns the number of sources now running.
    pub async fn start_all(&mut self) -> usize {
        let Some(events) = self.events_tx.take() else {
            warn!("Sources were already started");
            return self.running.len();
        };

        for source in std::mem::take(&mut self.pending) {
            let name = source.name().to_string();
            match actor::spawn(source, &self.collaborators, events.clone(), self.mailbox_size).await {
                Ok(handle) => self.running.push(handle),
                Err(e) => error!("{}: failed to start: {}", name, e),
            }
        }

        info!("{} data sources running", self.running.len());
        self.running.len()
    }

    /// Running sources as (name, description) pairs
    pub fn running(&self) -> Vec<(&str, &str)> {
        self.running.iter().map(|h| (h.name(), h.description())).collect()
    }

    /// Queue `request` on every running source
    pub async fn broadcast(&self, request: Request) {
        for handle in &self.running {
            if let Err(e) = handle.send(request.clone()).await {
                warn!("{}: could not queue {} request: {}", handle.name(), request.kind(), e);
            }
        }
    }

    /// Queue `request` on a single source
    pub async fn send_to(&self, source: &str, request: Request) -> ReconResult<()> {
        let handle = self.running
            .iter()
            .find(|h| h.name().eq_ignore_ascii_case(source))
            .ok_or_else(|| ReconError::InvalidInput(format!("Data source not running: {}", source)))?;
        handle.send(request).await
    }

    /// The shared event stream; it ends once every source has stopped
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<SourceEvent>> {
        self.events_rx.take()
    }

    /// Let every source work through its queue, then stop
    pub async fn finish(self) {
        for handle in self.running {
            handle.finish().await;
        }
    }

    /// Cancel every source without waiting for queued requests
    pub async fn shutdown(self) {
        info!("Stopping {} data sources", self.running.len());
        for handle in self.running {
            handle.stop().await;
        }
    }
}
