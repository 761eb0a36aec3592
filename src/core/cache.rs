// src/core/cache.rs
use std::collections::HashMap;
use parking_lot::RwLock;
use tracing::debug;

use crate::core::collab::AsnCache;
use crate::core::model::AsnFact;

/// In-memory AS fact cache
#[derive(Default)]
pub struct MemoryCache {
    facts: RwLock<HashMap<u32, AsnFact>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every cached fact, ordered by AS number
    pub fn facts(&self) -> Vec<AsnFact> {
        let mut facts: Vec<AsnFact> = self.facts.read().values().cloned().collect();
        facts.sort_by_key(|fact| fact.asn);
        facts
    }

    pub fn len(&self) -> usize {
        self.facts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.read().is_empty()
    }
}

impl AsnCache for MemoryCache {
    fn update(&self, fact: AsnFact) {
        debug!("Caching AS{} from {}", fact.asn, fact.provenance.source);

        let mut facts = self.facts.write();
        match facts.get_mut(&fact.asn) {
            Some(existing) => existing.merge(fact),
            None => {
                facts.insert(fact.asn, fact);
            }
        }
    }

    fn get(&self, asn: u32) -> Option<AsnFact> {
        self.facts.read().get(&asn).cloned()
    }
}
