// src/sources/umbrella.rs
//! Cisco Umbrella Investigate. API only; the source refuses to start without a key.

use std::collections::{BTreeSet, HashMap};
use std::net::IpAddr;
use async_trait::async_trait;
use chrono::NaiveDate;
use ipnetwork::IpNetwork;
use serde::Deserialize;
use tracing::{debug, info};

use crate::context::SourceContext;
use crate::core::collab::{CredentialStore, Credentials};
use crate::core::model::{AsnRequest, Provenance, Registry, Request, SourceEvent, SourceTag};
use crate::core::netblock;
use crate::error::{ReconError, ReconResult};
use crate::resolve::{AsnDescription, AsnProvider, AsnResolver};
use crate::service::actor::DataSource;
use crate::whois::{ReverseQuery, ReverseWhoisAggregator, ReverseWhoisPage, WhoisProvider, WhoisRecord};
use super::{decode, emit_names};

pub const NAME: &str = "Umbrella";

const API_URL: &str = "https://investigate.api.umbrella.com";
const DEFAULT_RATE_LIMIT: u32 = 2;

pub struct Umbrella {
    credentials: Option<Credentials>,
    rate_limit: u32,
}

impl Umbrella {
    pub fn new() -> Self {
        Self {
            credentials: None,
            rate_limit: DEFAULT_RATE_LIMIT,
        }
    }

    pub fn with_rate_limit(mut self, per_second: u32) -> Self {
        self.rate_limit = per_second;
        self
    }

    fn headers(&self) -> ReconResult<Vec<(String, String)>> {
        let creds = self
            .credentials
            .as_ref()
            .ok_or_else(|| ReconError::Configuration(format!("{}: source was not started", NAME)))?;

        Ok(vec![
            ("Content-Type".to_string(), "application/json".to_string()),
            ("Authorization".to_string(), format!("Bearer {}", creds.key)),
        ])
    }

    fn provenance() -> Provenance {
        Provenance::new(NAME, SourceTag::Api)
    }

    async fn dns_request(&self, domain: &str, ctx: &SourceContext) -> ReconResult<()> {
        if !ctx.scope.is_domain_in_scope(domain) {
            debug!("{}: {} is out of scope", NAME, domain);
            return Ok(());
        }

        info!("Querying {} for {} subdomains", NAME, domain);
        let url = format!("{}/search/.*[.]{}?start=-30days&limit=1000", API_URL, domain);
        let page = ctx.fetch(&url, None, &self.headers()?).await?;
        let results: SearchResults = decode(&url, &page)?;

        let emitted = emit_names(ctx, &Self::provenance(), results.matches.into_iter().map(|m| m.name)).await?;
        debug!("{}: {} names for {}", NAME, emitted, domain);
        Ok(())
    }

    async fn addr_request(&self, addr: IpAddr, ctx: &SourceContext) -> ReconResult<()> {
        let url = format!("{}/pdns/ip/{}?recordType=A,AAAA", API_URL, addr);
        let page = ctx.fetch(&url, None, &self.headers()?).await?;
        let results: PassiveDns = decode(&url, &page)?;

        let emitted = emit_names(ctx, &Self::provenance(), results.records.into_iter().map(|r| r.rr)).await?;
        debug!("{}: {} names pointing at {}", NAME, emitted, addr);
        Ok(())
    }

    async fn asn_request(&self, request: &AsnRequest, ctx: &SourceContext) -> ReconResult<()> {
        let provider = RouteProvider::new(ctx, self.headers()?);
        let fact = AsnResolver::new(provider).resolve(request).await?;

        info!("{}: AS{} resolved ({} netblocks)", NAME, fact.asn, fact.netblocks().len());
        ctx.cache.update(fact);
        Ok(())
    }

    async fn whois_request(&self, domain: &str, ctx: &SourceContext) -> ReconResult<()> {
        let provider = InvestigateWhois {
            ctx,
            headers: self.headers()?,
        };
        let mut aggregator = ReverseWhoisAggregator::new(provider, ctx.scope.as_ref());

        if let Some(result) = aggregator.aggregate(domain).await? {
            ctx.emit(SourceEvent::Whois(result)).await?;
        }
        Ok(())
    }
}

impl Default for Umbrella {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DataSource for Umbrella {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> String {
        SourceTag::Api.to_string()
    }

    async fn on_start(&mut self, credentials: &dyn CredentialStore) -> ReconResult<()> {
        match credentials.credentials(NAME) {
            Some(creds) => {
                self.credentials = Some(creds);
                Ok(())
            }
            None => Err(ReconError::Configuration(format!("{}: API key data was not provided", NAME))),
        }
    }

    fn rate_limit(&self) -> u32 {
        self.rate_limit
    }

    async fn handle(&mut self, request: Request, ctx: &SourceContext) -> ReconResult<()> {
        match request {
            Request::Dns(req) => self.dns_request(&req.domain, ctx).await,
            Request::Addr(req) => self.addr_request(req.address, ctx).await,
            Request::Asn(req) => self.asn_request(&req, ctx).await,
            Request::Whois(req) => self.whois_request(&req.domain, ctx).await,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SearchResults {
    #[serde(default)]
    matches: Vec<SearchMatch>,
}

#[derive(Debug, Deserialize)]
struct SearchMatch {
    name: String,
}

#[derive(Debug, Deserialize)]
struct PassiveDns {
    #[serde(default)]
    records: Vec<PassiveRecord>,
}

#[derive(Debug, Deserialize)]
struct PassiveRecord {
    #[serde(default)]
    rr: String,
}

/// One entry of `as_for_ip.json`
#[derive(Debug, Clone, Deserialize)]
struct AsRoute {
    #[serde(default)]
    creation_date: String,
    #[serde(default)]
    ir: i64,
    #[serde(default)]
    description: String,
    asn: u32,
    #[serde(default)]
    cidr: String,
}

/// One entry of `prefixes_for_asn.json`
#[derive(Debug, Deserialize)]
struct AsPrefix {
    cidr: String,
    #[serde(default)]
    geo: PrefixGeo,
}

#[derive(Debug, Default, Deserialize)]
struct PrefixGeo {
    #[serde(default)]
    country_code: String,
}

/// BGP route lookups. AS details come back with the address lookup and
/// country codes with the prefix list, so `describe` makes no calls itself.
struct RouteProvider<'a> {
    ctx: &'a SourceContext,
    headers: Vec<(String, String)>,
    routes: HashMap<u32, AsRoute>,
    geo: HashMap<IpNetwork, String>,
}

impl<'a> RouteProvider<'a> {
    fn new(ctx: &'a SourceContext, headers: Vec<(String, String)>) -> Self {
        Self {
            ctx,
            headers,
            routes: HashMap::new(),
            geo: HashMap::new(),
        }
    }

    /// Country of the most specific prefix holding `addr`
    fn country_for(&self, addr: IpAddr) -> Option<&str> {
        self.geo
            .iter()
            .filter(|(block, cc)| block.contains(addr) && !cc.is_empty())
            .max_by_key(|(block, _)| block.prefix())
            .map(|(_, cc)| cc.as_str())
    }
}

#[async_trait]
impl AsnProvider for RouteProvider<'_> {
    fn provenance(&self) -> Provenance {
        Umbrella::provenance()
    }

    async fn locate(&mut self, addr: IpAddr) -> ReconResult<Vec<u32>> {
        let url = format!("{}/bgp_routes/ip/{}/as_for_ip.json", API_URL, addr);
        let page = self.ctx.fetch(&url, None, &self.headers).await?;
        let routes: Vec<AsRoute> = decode(&url, &page)?;

        let mut candidates = Vec::new();
        for route in routes.into_iter().filter(|r| r.asn != 0) {
            if !candidates.contains(&route.asn) {
                candidates.push(route.asn);
            }
            self.routes.entry(route.asn).or_insert(route);
        }
        Ok(candidates)
    }

    async fn netblocks(&mut self, asn: u32) -> ReconResult<BTreeSet<IpNetwork>> {
        let url = format!("{}/bgp_routes/asn/{}/prefixes_for_asn.json", API_URL, asn);
        let page = self.ctx.fetch(&url, None, &self.headers).await?;
        let prefixes: Vec<AsPrefix> = decode(&url, &page)?;

        let mut netblocks = BTreeSet::new();
        for prefix in prefixes {
            if let Some(block) = netblock::parse_cidr(&prefix.cidr) {
                netblocks.insert(block);
                self.geo.insert(block, prefix.geo.country_code.to_uppercase());
            }
        }
        if let Some(route) = self.routes.get(&asn).and_then(|r| netblock::parse_cidr(&r.cidr)) {
            netblocks.insert(route);
        }

        if netblocks.is_empty() {
            return Err(ReconError::NoData(format!("AS{}: no announced prefixes", asn)));
        }
        Ok(netblocks)
    }

    async fn describe(&mut self, asn: u32, addr: Option<IpAddr>) -> ReconResult<AsnDescription> {
        let country_code = addr
            .and_then(|addr| self.country_for(addr))
            .unwrap_or_default()
            .to_string();

        let Some(route) = self.routes.get(&asn) else {
            return Ok(AsnDescription { country_code, ..Default::default() });
        };

        Ok(AsnDescription {
            name: route.description.clone(),
            country_code,
            description: route.description.clone(),
            registry: Registry::from_code(route.ir),
            allocation_date: NaiveDate::parse_from_str(&route.creation_date, "%Y-%m-%d").ok(),
        })
    }
}

struct InvestigateWhois<'a> {
    ctx: &'a SourceContext,
    headers: Vec<(String, String)>,
}

#[async_trait]
impl WhoisProvider for InvestigateWhois<'_> {
    fn provenance(&self) -> Provenance {
        Umbrella::provenance()
    }

    async fn record(&mut self, domain: &str) -> ReconResult<WhoisRecord> {
        let url = format!("{}/whois/{}", API_URL, domain);
        let page = self.ctx.fetch(&url, None, &self.headers).await?;
        decode(&url, &page)
    }

    async fn reverse_page(&mut self, query: &ReverseQuery, offset: usize) -> ReconResult<ReverseWhoisPage> {
        let (path, param) = match query {
            ReverseQuery::Emails(_) => ("emails", "emailList"),
            ReverseQuery::Nameservers(_) => ("nameservers", "nameServerList"),
        };
        let params = url::form_urlencoded::Serializer::new(String::new())
            .append_pair(param, &query.joined())
            .append_pair("offset", &offset.to_string())
            .finish();

        let url = format!("{}/whois/{}?{}", API_URL, path, params);
        let page = self.ctx.fetch(&url, None, &self.headers).await?;
        decode(&url, &page)
    }
}
