// src/resolve.rs
//! Address ↔ AS number ↔ netblock ↔ country resolution.
//!
//! The resolver walks an explicit state machine instead of letting the two
//! lookup directions call each other. Each cross-direction hop
//! (address → AS and AS → probe address) can be taken once per request.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::net::IpAddr;
use async_trait::async_trait;
use chrono::NaiveDate;
use ipnetwork::IpNetwork;
use tracing::{debug, info, warn};

use crate::core::model::{AsnFact, AsnRequest, Provenance, Registry};
use crate::core::netblock;
use crate::error::{ReconError, ReconResult};

/// Descriptive AS information
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AsnDescription {
    pub name: String,
    pub country_code: String,
    pub description: String,
    pub registry: Registry,
    pub allocation_date: Option<NaiveDate>,
}

/// Provider-specific lookups used by the resolver.
///
/// Implementations charge the rate limiter once per outbound call they make.
#[async_trait]
pub trait AsnProvider: Send {
    fn provenance(&self) -> Provenance;

    /// Whether `locate` names the announcing AS directly.
    ///
    /// Such a candidate is accepted even when its netblock list does not
    /// cover the address; the prefix then falls back to the first netblock.
    fn pins_candidates(&self) -> bool {
        false
    }

    /// Candidate AS numbers for the organization owning `addr`
    async fn locate(&mut self, addr: IpAddr) -> ReconResult<Vec<u32>>;

    /// Full netblock set announced by `asn`
    async fn netblocks(&mut self, asn: u32) -> ReconResult<BTreeSet<IpNetwork>>;

    /// Name, country and registry details; `addr` narrows geo data when known
    async fn describe(&mut self, asn: u32, addr: Option<IpAddr>) -> ReconResult<AsnDescription>;
}

enum Step {
    Locate(IpAddr),
    Select { addr: IpAddr, candidates: VecDeque<u32>, pinned: bool },
    Netblocks(u32),
    Describe { asn: u32, netblocks: BTreeSet<IpNetwork> },
    Finish(AsnFact),
}

/// Drives an [`AsnProvider`] through a single logical ASN request
pub struct AsnResolver<P> {
    provider: P,
    memo: HashMap<u32, BTreeSet<IpNetwork>>,
    address: Option<IpAddr>,
    located: bool,
    probed: bool,
    fallback: Option<AsnFact>,
}

impl<P: AsnProvider> AsnResolver<P> {
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            memo: HashMap::new(),
            address: None,
            located: false,
            probed: false,
            fallback: None,
        }
    }

    /// Whether the address → AS hop was taken
    pub fn located(&self) -> bool {
        self.located
    }

    /// Whether the AS → probe address hop was taken
    pub fn probed(&self) -> bool {
        self.probed
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Resolve the request into a complete fact
    pub async fn resolve(&mut self, request: &AsnRequest) -> ReconResult<AsnFact> {
        let known = request.known.as_ref();
        let asn = request
            .asn
            .filter(|asn| *asn != 0)
            .or_else(|| known.map(|fact| fact.asn).filter(|asn| *asn != 0));
        self.address = request.address.or_else(|| known.and_then(|fact| fact.address));

        if let Some(fact) = known.filter(|fact| fact.asn != 0 && !fact.netblocks().is_empty()) {
            self.memo.insert(fact.asn, fact.netblocks().clone());
        }

        let mut step = match (self.address, asn) {
            (Some(addr), Some(asn)) => Step::Select {
                addr,
                candidates: VecDeque::from([asn]),
                pinned: false,
            },
            (Some(addr), None) => Step::Locate(addr),
            (None, Some(asn)) => Step::Netblocks(asn),
            (None, None) => {
                return Err(ReconError::InvalidInput(
                    "ASN request needs an address or an AS number".to_string(),
                ))
            }
        };

        let fact = loop {
            step = match step {
                Step::Locate(addr) => self.locate(addr).await?,
                Step::Select { addr, candidates, pinned } => self.select(addr, candidates, pinned).await?,
                Step::Netblocks(asn) => {
                    let netblocks = self.netblocks_for(asn).await?;
                    if netblocks.is_empty() {
                        return Err(ReconError::NoData(format!("AS{} has no netblocks", asn)));
                    }
                    Step::Describe { asn, netblocks }
                }
                Step::Describe { asn, netblocks } => self.describe(asn, netblocks).await?,
                Step::Finish(fact) => break fact,
            };
        };

        Ok(match known.cloned() {
            Some(mut merged) if merged.asn == fact.asn => {
                merged.merge(fact);
                merged
            }
            _ => fact,
        })
    }

    async fn locate(&mut self, addr: IpAddr) -> ReconResult<Step> {
        if self.located {
            return Err(ReconError::NoData(format!("{}: address lookup already performed", addr)));
        }
        self.located = true;

        let candidates = match self.provider.locate(addr).await {
            Ok(candidates) => candidates,
            Err(ReconError::NoData(msg)) if self.fallback.is_some() => {
                debug!("Probe lookup for {} found nothing: {}", addr, msg);
                return self.take_fallback();
            }
            Err(e) => return Err(e),
        };
        if candidates.is_empty() {
            if self.fallback.is_some() {
                return self.take_fallback();
            }
            return Err(ReconError::NoData(format!("{}: no AS numbers for the owning organization", addr)));
        }

        debug!("{}: {} candidate AS numbers", addr, candidates.len());
        Ok(Step::Select {
            addr,
            candidates: candidates.into(),
            pinned: self.provider.pins_candidates(),
        })
    }

    async fn select(&mut self, addr: IpAddr, mut candidates: VecDeque<u32>, pinned: bool) -> ReconResult<Step> {
        let mut uncovered = None;
        while let Some(asn) = candidates.pop_front() {
            let netblocks = match self.netblocks_for(asn).await {
                Ok(netblocks) => netblocks,
                Err(ReconError::NoData(msg)) => {
                    debug!("AS{}: {}", asn, msg);
                    continue;
                }
                Err(e) => return Err(e),
            };

            if netblock::containing(&netblocks, addr).is_some() {
                self.address = Some(addr);
                return Ok(Step::Describe { asn, netblocks });
            }
            if pinned && uncovered.is_none() {
                uncovered = Some((asn, netblocks));
            }
        }

        if let Some((asn, netblocks)) = uncovered {
            debug!("AS{}: announces {} but lists no covering netblock", asn, addr);
            self.address = Some(addr);
            return Ok(Step::Describe { asn, netblocks });
        }

        if !self.located {
            return Ok(Step::Locate(addr));
        }
        if self.fallback.is_some() {
            return self.take_fallback();
        }
        Err(ReconError::NoData(format!("{}: no candidate AS announces the address", addr)))
    }

    async fn describe(&mut self, asn: u32, netblocks: BTreeSet<IpNetwork>) -> ReconResult<Step> {
        let description = self.provider.describe(asn, self.address).await?;

        if self.address.is_none() && description.country_code.is_empty() && !self.probed && !self.located {
            if let Some(first) = netblocks.iter().next() {
                let probe = first.network();
                info!("AS{}: no geolocation data, probing with {}", asn, probe);

                self.probed = true;
                self.fallback = Some(self.build(asn, netblocks, None, description));
                return Ok(Step::Locate(probe));
            }
        }

        let address = self.address;
        Ok(Step::Finish(self.build(asn, netblocks, address, description)))
    }

    fn take_fallback(&mut self) -> ReconResult<Step> {
        match self.fallback.take() {
            Some(fact) => {
                warn!("AS{}: probe lookup failed, keeping AS-level facts", fact.asn);
                Ok(Step::Finish(fact))
            }
            None => Err(ReconError::NoData("no fallback facts".to_string())),
        }
    }

    async fn netblocks_for(&mut self, asn: u32) -> ReconResult<BTreeSet<IpNetwork>> {
        if let Some(netblocks) = self.memo.get(&asn) {
            return Ok(netblocks.clone());
        }

        let netblocks = self.provider.netblocks(asn).await?;
        self.memo.insert(asn, netblocks.clone());
        Ok(netblocks)
    }

    fn build(
        &self,
        asn: u32,
        netblocks: BTreeSet<IpNetwork>,
        address: Option<IpAddr>,
        description: AsnDescription,
    ) -> AsnFact {
        let mut fact = AsnFact::new(asn, netblocks, address, self.provider.provenance());
        fact.registry = description.registry;
        fact.allocation_date = description.allocation_date;
        fact.description = if description.description.is_empty() {
            description.name
        } else {
            description.description
        };
        fact.country_code = description.country_code;
        fact
    }
}
