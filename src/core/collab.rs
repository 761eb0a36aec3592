// src/core/collab.rs
//! Contracts between the source framework and the rest of the platform.
//!
//! Every collaborator is shared by many actors at once, so implementations
//! must be safe for concurrent use without the caller taking any lock.

use async_trait::async_trait;
use serde::{Serialize, Deserialize};

use crate::core::model::AsnFact;
use crate::error::ReconResult;

/// API credentials for a single data source
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Credentials {
    pub key: String,
    #[serde(default)]
    pub secret: Option<String>,
}

/// Read access to per-source credentials
#[cfg_attr(test, mockall::automock)]
pub trait CredentialStore: Send + Sync {
    /// Credentials for `source`, or `None` when nothing usable is configured
    fn credentials(&self, source: &str) -> Option<Credentials>;
}

/// Decides whether a name belongs to the authorized investigation target
#[cfg_attr(test, mockall::automock)]
pub trait ScopePredicate: Send + Sync {
    fn is_domain_in_scope(&self, name: &str) -> bool;
}

/// Shared knowledge cache for AS facts
#[cfg_attr(test, mockall::automock)]
pub trait AsnCache: Send + Sync {
    /// Idempotent upsert keyed by AS number
    fn update(&self, fact: AsnFact);

    fn get(&self, asn: u32) -> Option<AsnFact>;
}

/// Text retrieval over HTTP. Requests with a body are sent as POST.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    async fn fetch(
        &self,
        url: &str,
        body: Option<String>,
        headers: &[(String, String)],
    ) -> ReconResult<String>;
}
