// src/sources/mod.rs
pub mod networksdb;
pub mod umbrella;

use serde::de::DeserializeOwned;
use tracing::debug;

use crate::config::Config;
use crate::context::SourceContext;
use crate::core::collab::Credentials;
use crate::core::model::{DiscoveredName, Provenance, SourceEvent, SourceTag};
use crate::error::{ReconError, ReconResult};
use crate::service::actor::DataSource;

pub use networksdb::NetworksDb;
pub use umbrella::Umbrella;

/// How a source talks to its provider, decided once at start
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Strategy {
    Api(Credentials),
    Scrape,
}

impl Strategy {
    pub fn tag(&self) -> SourceTag {
        match self {
            Strategy::Api(_) => SourceTag::Api,
            Strategy::Scrape => SourceTag::Scrape,
        }
    }
}

/// Names of every bundled source
pub const AVAILABLE: &[&str] = &[networksdb::NAME, umbrella::NAME];

/// Build the enabled sources, applying configured rate overrides
pub fn from_config(config: &Config) -> Vec<Box<dyn DataSource>> {
    let mut sources: Vec<Box<dyn DataSource>> = Vec::new();

    if config.is_source_enabled(networksdb::NAME) {
        let mut source = NetworksDb::new();
        if let Some(rate) = config.get_source_config(networksdb::NAME).and_then(|s| s.rate_limit) {
            source = source.with_rate_limit(rate);
        }
        sources.push(Box::new(source));
    }

    if config.is_source_enabled(umbrella::NAME) {
        let mut source = Umbrella::new();
        if let Some(rate) = config.get_source_config(umbrella::NAME).and_then(|s| s.rate_limit) {
            source = source.with_rate_limit(rate);
        }
        sources.push(Box::new(source));
    }

    sources
}

pub(crate) fn decode<T: DeserializeOwned>(url: &str, body: &str) -> ReconResult<T> {
    serde_json::from_str(body).map_err(|e| ReconError::parse(url, e))
}

/// Emit every in-scope name once and return how many were emitted.
///
/// Names are normalized to lowercase without a trailing dot
pub(crate) async fn emit_names<I>(ctx: &SourceContext, provenance: &Provenance, names: I) -> ReconResult<usize>
where
    I: IntoIterator<Item = String>,
{
    let mut seen = std::collections::BTreeSet::new();
    let mut emitted = 0;
    for name in names {
        let name = name.trim().trim_end_matches('.').to_lowercase();
        if name.is_empty() || !seen.insert(name.clone()) {
            continue;
        }
        if !ctx.scope.is_domain_in_scope(&name) {
            debug!("{}: {} is out of scope", ctx.source, name);
            continue;
        }

        ctx.emit(SourceEvent::Name(DiscoveredName {
            name,
            provenance: provenance.clone(),
        }))
        .await?;
        emitted += 1;
    }
    Ok(emitted)
}
