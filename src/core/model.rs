// src/core/model.rs
use std::collections::BTreeSet;
use std::fmt;
use std::net::IpAddr;
use chrono::NaiveDate;
use ipnetwork::IpNetwork;
use serde::{Serialize, Deserialize};

use crate::core::netblock;

/// How a fact was obtained
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum SourceTag {
    Api,
    Scrape,
    Cache,
}

impl fmt::Display for SourceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceTag::Api => write!(f, "api"),
            SourceTag::Scrape => write!(f, "scrape"),
            SourceTag::Cache => write!(f, "cache"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Provenance {
    pub source: String,
    pub tag: SourceTag,
}

impl Provenance {
    pub fn new(source: impl Into<String>, tag: SourceTag) -> Self {
        Self {
            source: source.into(),
            tag,
        }
    }
}

/// Regional internet registry that allocated an AS
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum Registry {
    AfriNic,
    Apnic,
    Arin,
    Lacnic,
    RipeNcc,
    #[default]
    Unknown,
}

impl Registry {
    /// Numeric registry codes as used by BGP route providers (1-5)
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => Registry::AfriNic,
            2 => Registry::Apnic,
            3 => Registry::Arin,
            4 => Registry::Lacnic,
            5 => Registry::RipeNcc,
            _ => Registry::Unknown,
        }
    }
}

impl fmt::Display for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Registry::AfriNic => "AfriNIC",
            Registry::Apnic => "APNIC",
            Registry::Arin => "ARIN",
            Registry::Lacnic => "LACNIC",
            Registry::RipeNcc => "RIPE NCC",
            Registry::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Autonomous system facts resolved for an address or AS number.
///
/// `prefix`, when set, is always an element of `netblocks`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(try_from = "RawAsnFact")]
pub struct AsnFact {
    pub asn: u32,
    prefix: Option<IpNetwork>,
    pub registry: Registry,
    pub allocation_date: Option<NaiveDate>,
    pub description: String,
    pub country_code: String,
    netblocks: BTreeSet<IpNetwork>,
    pub address: Option<IpAddr>,
    pub provenance: Provenance,
}

impl AsnFact {
    /// Build a fact whose prefix is the netblock containing `address`, or the
    /// first netblock in canonical order when no address is known.
    pub fn new(
        asn: u32,
        netblocks: BTreeSet<IpNetwork>,
        address: Option<IpAddr>,
        provenance: Provenance,
    ) -> Self {
        let prefix = netblock::select_prefix(&netblocks, address);
        Self {
            asn,
            prefix,
            registry: Registry::Unknown,
            allocation_date: None,
            description: String::new(),
            country_code: String::new(),
            netblocks,
            address,
            provenance,
        }
    }

    pub fn prefix(&self) -> Option<IpNetwork> {
        self.prefix
    }

    pub fn netblocks(&self) -> &BTreeSet<IpNetwork> {
        &self.netblocks
    }

    /// Merge a newer fact for the same AS into this one
    pub fn merge(&mut self, other: AsnFact) {
        if self.asn == 0 {
            self.asn = other.asn;
        }
        self.netblocks.extend(other.netblocks);
        if let Some(prefix) = other.prefix {
            self.prefix = Some(prefix);
        }
        if other.registry != Registry::Unknown {
            self.registry = other.registry;
        }
        if other.allocation_date.is_some() {
            self.allocation_date = other.allocation_date;
        }
        if !other.description.is_empty() {
            self.description = other.description;
        }
        if !other.country_code.is_empty() {
            self.country_code = other.country_code;
        }
        if other.address.is_some() {
            self.address = other.address;
        }
        self.provenance = other.provenance;
    }
}

/// Wire form of [`AsnFact`], checked before it becomes one
#[derive(Deserialize)]
struct RawAsnFact {
    asn: u32,
    prefix: Option<IpNetwork>,
    registry: Registry,
    allocation_date: Option<NaiveDate>,
    description: String,
    country_code: String,
    netblocks: BTreeSet<IpNetwork>,
    address: Option<IpAddr>,
    provenance: Provenance,
}

impl TryFrom<RawAsnFact> for AsnFact {
    type Error = String;

    fn try_from(raw: RawAsnFact) -> Result<Self, Self::Error> {
        let netblocks: BTreeSet<IpNetwork> = raw.netblocks.into_iter().map(netblock::normalize).collect();
        let prefix = raw.prefix.map(netblock::normalize);
        if let Some(prefix) = prefix {
            if !netblocks.contains(&prefix) {
                return Err(format!("AS{}: prefix {} is not one of its netblocks", raw.asn, prefix));
            }
        }

        Ok(Self {
            asn: raw.asn,
            prefix,
            registry: raw.registry,
            allocation_date: raw.allocation_date,
            description: raw.description,
            country_code: raw.country_code,
            netblocks,
            address: raw.address,
            provenance: raw.provenance,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsRequest {
    pub domain: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddrRequest {
    pub address: IpAddr,
    pub domain: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AsnRequest {
    pub address: Option<IpAddr>,
    pub asn: Option<u32>,
    /// Facts already resolved by another source
    pub known: Option<AsnFact>,
}

impl AsnRequest {
    pub fn for_address(address: IpAddr) -> Self {
        Self {
            address: Some(address),
            ..Default::default()
        }
    }

    pub fn for_asn(asn: u32) -> Self {
        Self {
            asn: if asn == 0 { None } else { Some(asn) },
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhoisRequest {
    pub domain: String,
}

/// Typed request delivered to a source's mailbox
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Request {
    Dns(DnsRequest),
    Addr(AddrRequest),
    Asn(AsnRequest),
    Whois(WhoisRequest),
}

impl Request {
    pub fn kind(&self) -> &'static str {
        match self {
            Request::Dns(_) => "dns",
            Request::Addr(_) => "addr",
            Request::Asn(_) => "asn",
            Request::Whois(_) => "whois",
        }
    }

    /// Human readable subject, used in log lines
    pub fn subject(&self) -> String {
        match self {
            Request::Dns(req) => req.domain.clone(),
            Request::Addr(req) => req.address.to_string(),
            Request::Asn(req) => match (req.address, req.asn) {
                (Some(addr), Some(asn)) => format!("{} (AS{})", addr, asn),
                (Some(addr), None) => addr.to_string(),
                (None, Some(asn)) => format!("AS{}", asn),
                (None, None) => "<empty>".to_string(),
            },
            Request::Whois(req) => req.domain.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct DiscoveredName {
    pub name: String,
    pub provenance: Provenance,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WhoisResult {
    pub domain: String,
    pub new_domains: BTreeSet<String>,
    pub provenance: Provenance,
}

/// Events emitted by sources for the orchestrator
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum SourceEvent {
    Name(DiscoveredName),
    Whois(WhoisResult),
}
