// src/sources/networksdb.rs
//! NetworksDB.io: AS lookups through the REST API when a key is configured,
//! otherwise by scraping the public site. WHOIS pivots always use the site.

use std::collections::{BTreeSet, HashMap};
use std::net::IpAddr;
use async_trait::async_trait;
use ipnetwork::IpNetwork;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::context::SourceContext;
use crate::core::collab::{CredentialStore, Credentials};
use crate::core::model::{AsnRequest, Provenance, Request, SourceEvent, SourceTag, WhoisResult};
use crate::core::netblock;
use crate::error::{ReconError, ReconResult};
use crate::resolve::{AsnDescription, AsnProvider, AsnResolver};
use crate::scrape;
use crate::service::actor::DataSource;
use crate::whois::retain_out_of_scope;
use super::{decode, Strategy};

pub const NAME: &str = "NetworksDB";

const BASE_URL: &str = "https://networksdb.io";
const API_PATH: &str = "/api/v1";
const DEFAULT_RATE_LIMIT: u32 = 1;

pub struct NetworksDb {
    strategy: Strategy,
    rate_limit: u32,
}

impl NetworksDb {
    pub fn new() -> Self {
        Self {
            strategy: Strategy::Scrape,
            rate_limit: DEFAULT_RATE_LIMIT,
        }
    }

    pub fn with_rate_limit(mut self, per_second: u32) -> Self {
        self.rate_limit = per_second;
        self
    }

    pub fn strategy(&self) -> &Strategy {
        &self.strategy
    }

    async fn asn_request(&self, request: &AsnRequest, ctx: &SourceContext) -> ReconResult<()> {
        let fact = match &self.strategy {
            Strategy::Api(creds) => AsnResolver::new(ApiProvider::new(ctx, creds)).resolve(request).await?,
            Strategy::Scrape => AsnResolver::new(ScrapeProvider::new(ctx)).resolve(request).await?,
        };

        info!(
            "{}: AS{} resolved ({} netblocks, prefix {})",
            NAME,
            fact.asn,
            fact.netblocks().len(),
            fact.prefix().map(|p| p.to_string()).unwrap_or_else(|| "-".to_string())
        );
        ctx.cache.update(fact);
        Ok(())
    }

    async fn whois_request(&self, domain: &str, ctx: &SourceContext) -> ReconResult<()> {
        if !ctx.scope.is_domain_in_scope(domain) {
            debug!("{}: {} is out of scope", NAME, domain);
            return Ok(());
        }

        let url = format!("{}/domain-to-ips/{}", BASE_URL, domain);
        let page = ctx.fetch(&url, None, &[]).await?;
        let links = scrape::ip_links(&page);
        if links.is_empty() {
            return Err(ReconError::parse(url, "no IP page links"));
        }

        let mut found = BTreeSet::new();
        for link in links {
            match domains_behind(ctx, &link).await {
                Ok(domains) => found.extend(domains),
                Err(ReconError::Cancelled) => return Err(ReconError::Cancelled),
                Err(e) => debug!("{}: {}: {}", NAME, link, e),
            }
        }

        let found = retain_out_of_scope(found, ctx.scope.as_ref());
        if found.is_empty() {
            debug!("{}: no new domains share networks with {}", NAME, domain);
            return Ok(());
        }

        ctx.emit(SourceEvent::Whois(WhoisResult {
            domain: domain.to_string(),
            new_domains: found,
            provenance: Provenance::new(NAME, SourceTag::Scrape),
        }))
        .await
    }
}

impl Default for NetworksDb {
    fn default() -> Self {
        Self::new()
    }
}

/// Domains hosted in the network of one IP detail page
async fn domains_behind(ctx: &SourceContext, link: &str) -> ReconResult<BTreeSet<String>> {
    let url = format!("{}{}", BASE_URL, link);
    let page = ctx.fetch(&url, None, &[]).await?;
    let cidr = scrape::ip_page_cidr(&page).ok_or_else(|| ReconError::parse(url.as_str(), "no network CIDR"))?;

    let (first, last) = netblock::first_last(&cidr);
    let url = format!("{}/domains-in-network/{}/{}", BASE_URL, first, last);
    let page = ctx.fetch(&url, None, &[]).await?;

    scrape::domains_in_network(&page).ok_or_else(|| ReconError::parse(url, "no domain section"))
}

#[async_trait]
impl DataSource for NetworksDb {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> String {
        self.strategy.tag().to_string()
    }

    async fn on_start(&mut self, credentials: &dyn CredentialStore) -> ReconResult<()> {
        self.strategy = match credentials.credentials(NAME) {
            Some(creds) => Strategy::Api(creds),
            None => {
                warn!("{}: API key data was not provided, falling back to scraping", NAME);
                Strategy::Scrape
            }
        };
        Ok(())
    }

    fn rate_limit(&self) -> u32 {
        self.rate_limit
    }

    async fn handle(&mut self, request: Request, ctx: &SourceContext) -> ReconResult<()> {
        match request {
            Request::Asn(req) => self.asn_request(&req, ctx).await,
            Request::Whois(req) => self.whois_request(&req.domain, ctx).await,
            other => {
                debug!("{}: ignoring {} request", NAME, other.kind());
                Ok(())
            }
        }
    }
}

/// Envelope shared by every API endpoint
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    total: u64,
    #[serde(default = "Vec::new")]
    results: Vec<T>,
}

impl<T> ApiResponse<T> {
    fn into_results(self, url: &str) -> ReconResult<Vec<T>> {
        if let Some(error) = self.error.filter(|e| !e.is_empty()) {
            return Err(ReconError::transport(url, error));
        }
        if self.total == 0 || self.results.is_empty() {
            return Err(ReconError::NoData(format!("{}: the request returned zero results", url)));
        }
        Ok(self.results)
    }
}

#[derive(Debug, Deserialize)]
struct IpInfo {
    organisation: OrgRef,
}

#[derive(Debug, Deserialize)]
struct OrgRef {
    #[serde(default)]
    id: String,
}

#[derive(Debug, Deserialize)]
struct OrgInfo {
    #[serde(default)]
    asns: Vec<u32>,
}

#[derive(Debug, Deserialize)]
struct NetworkInfo {
    cidr: String,
}

#[derive(Debug, Deserialize)]
struct AsInfo {
    #[serde(default)]
    as_name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    countrycode: String,
}

fn describe_with_country(text: &str, country_code: &str) -> String {
    if country_code.is_empty() {
        text.to_string()
    } else if text.is_empty() {
        country_code.to_string()
    } else {
        format!("{}, {}", text, country_code)
    }
}

struct ApiProvider<'a> {
    ctx: &'a SourceContext,
    headers: Vec<(String, String)>,
}

impl<'a> ApiProvider<'a> {
    fn new(ctx: &'a SourceContext, creds: &Credentials) -> Self {
        Self {
            ctx,
            headers: vec![
                ("X-Api-Key".to_string(), creds.key.clone()),
                ("Content-Type".to_string(), "application/x-www-form-urlencoded".to_string()),
            ],
        }
    }

    async fn post<T: serde::de::DeserializeOwned>(&self, endpoint: &str, key: &str, value: &str) -> ReconResult<Vec<T>> {
        let url = format!("{}{}{}", BASE_URL, API_PATH, endpoint);
        let body = url::form_urlencoded::Serializer::new(String::new())
            .append_pair(key, value)
            .finish();

        let page = self.ctx.fetch(&url, Some(body), &self.headers).await?;
        decode::<ApiResponse<T>>(&url, &page)?.into_results(&url)
    }
}

#[async_trait]
impl AsnProvider for ApiProvider<'_> {
    fn provenance(&self) -> Provenance {
        Provenance::new(NAME, SourceTag::Api)
    }

    async fn locate(&mut self, addr: IpAddr) -> ReconResult<Vec<u32>> {
        let info: Vec<IpInfo> = self.post("/ip/info", "ip", &addr.to_string()).await?;
        let org = info
            .into_iter()
            .next()
            .map(|i| i.organisation.id)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ReconError::NoData(format!("{}: no owning organization", addr)))?;

        let orgs: Vec<OrgInfo> = self.post("/org/info", "id", &org).await?;
        Ok(orgs.into_iter().next().map(|o| o.asns).unwrap_or_default())
    }

    async fn netblocks(&mut self, asn: u32) -> ReconResult<BTreeSet<IpNetwork>> {
        let networks: Vec<NetworkInfo> = self.post("/as/networks", "asn", &asn.to_string()).await?;
        Ok(netblock::parse_all(networks.iter().map(|n| n.cidr.as_str())))
    }

    async fn describe(&mut self, asn: u32, _addr: Option<IpAddr>) -> ReconResult<AsnDescription> {
        let info: Vec<AsInfo> = self.post("/as/info", "asn", &asn.to_string()).await?;
        let info = info
            .into_iter()
            .next()
            .ok_or_else(|| ReconError::NoData(format!("AS{}: no information", asn)))?;

        let text = if info.description.is_empty() { &info.as_name } else { &info.description };
        Ok(AsnDescription {
            description: describe_with_country(text, &info.countrycode),
            name: info.as_name,
            country_code: info.countrycode,
            ..Default::default()
        })
    }
}

/// Page-scraping provider; AS pages are fetched at most once per request
struct ScrapeProvider<'a> {
    ctx: &'a SourceContext,
    as_pages: HashMap<u32, String>,
    /// Network shown on the address page, keyed by the AS announcing it
    announced: HashMap<u32, IpNetwork>,
}

impl<'a> ScrapeProvider<'a> {
    fn new(ctx: &'a SourceContext) -> Self {
        Self {
            ctx,
            as_pages: HashMap::new(),
            announced: HashMap::new(),
        }
    }

    async fn as_page(&mut self, asn: u32) -> ReconResult<&str> {
        if !self.as_pages.contains_key(&asn) {
            let url = format!("{}/autonomous-system/AS{}", BASE_URL, asn);
            let page = self.ctx.fetch(&url, None, &[]).await?;
            self.as_pages.insert(asn, page);
        }
        Ok(self.as_pages.get(&asn).map(String::as_str).unwrap_or_default())
    }
}

#[async_trait]
impl AsnProvider for ScrapeProvider<'_> {
    fn provenance(&self) -> Provenance {
        Provenance::new(NAME, SourceTag::Scrape)
    }

    // The address page links the announcing AS itself
    fn pins_candidates(&self) -> bool {
        true
    }

    async fn locate(&mut self, addr: IpAddr) -> ReconResult<Vec<u32>> {
        let url = format!("{}/ip/{}", BASE_URL, addr);
        let page = self.ctx.fetch(&url, None, &[]).await?;
        let network = scrape::ip_page_cidr(&page).filter(|block| block.contains(addr));
        let link = scrape::as_link(&page)
            .ok_or_else(|| ReconError::parse(url.as_str(), "failed to extract the autonomous system href"))?;

        let url = format!("{}{}", BASE_URL, link);
        let page = self.ctx.fetch(&url, None, &[]).await?;
        let asn = scrape::asn(&page).ok_or_else(|| ReconError::parse(url.as_str(), "failed to extract the ASN"))?;

        if let Some(network) = network {
            self.announced.insert(asn, network);
        }
        self.as_pages.insert(asn, page);
        Ok(vec![asn])
    }

    async fn netblocks(&mut self, asn: u32) -> ReconResult<BTreeSet<IpNetwork>> {
        let mut netblocks = scrape::cidrs(self.as_page(asn).await?);
        netblocks.extend(self.announced.get(&asn).copied());
        if netblocks.is_empty() {
            return Err(ReconError::NoData(format!("AS{}: no CIDRs on the AS page", asn)));
        }
        Ok(netblocks)
    }

    async fn describe(&mut self, asn: u32, _addr: Option<IpAddr>) -> ReconResult<AsnDescription> {
        let page = self.as_page(asn).await?;
        let name = scrape::as_name(page).unwrap_or_else(|| {
            warn!("{}: AS{}: failed to extract the AS name", NAME, asn);
            String::new()
        });
        let country_code = scrape::country_code(page).map(|cc| cc.to_uppercase()).unwrap_or_default();

        Ok(AsnDescription {
            description: describe_with_country(&name, &country_code),
            name,
            country_code,
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use parking_lot::Mutex;
    use tokio::sync::mpsc;

    use crate::context::Collaborators;
    use crate::core::cache::MemoryCache;
    use crate::core::collab::{AsnCache, MockCredentialStore, MockScopePredicate, MockTransport};
    use crate::core::model::WhoisRequest;
    use crate::service::shutdown::{self, ShutdownTrigger};

    type Calls = Arc<Mutex<Vec<(String, Option<String>)>>>;

    /// Serves canned pages by URL suffix and records every call
    fn routed(routes: Vec<(&'static str, &'static str)>, calls: Calls) -> MockTransport {
        let mut transport = MockTransport::new();
        transport.expect_fetch().returning(move |url, body, _headers| {
            calls.lock().push((url.to_string(), body.clone()));
            routes
                .iter()
                .find(|(suffix, _)| url.ends_with(suffix))
                .map(|(_, page)| page.to_string())
                .ok_or_else(|| ReconError::transport(url, "HTTP status 404 Not Found"))
        });
        transport
    }

    fn store(key: Option<&'static str>) -> MockCredentialStore {
        let mut credentials = MockCredentialStore::new();
        credentials.expect_credentials().returning(move |_| {
            key.map(|key| Credentials { key: key.to_string(), secret: None })
        });
        credentials
    }

    struct Harness {
        ctx: SourceContext,
        cache: Arc<MemoryCache>,
        events: mpsc::Receiver<SourceEvent>,
        _trigger: ShutdownTrigger,
    }

    fn harness(transport: MockTransport) -> Harness {
        let mut scope = MockScopePredicate::new();
        scope.expect_is_domain_in_scope().returning(|name| name.ends_with("example.com"));
        let cache = Arc::new(MemoryCache::new());
        let collaborators = Collaborators {
            credentials: Arc::new(store(None)),
            scope: Arc::new(scope),
            cache: cache.clone(),
            transport: Arc::new(transport),
        };
        let (tx, rx) = mpsc::channel(8);
        let (trigger, signal) = shutdown::channel();
        Harness {
            ctx: SourceContext::new(NAME, &collaborators, 1000, tx, signal),
            cache,
            events: rx,
            _trigger: trigger,
        }
    }

    const IP_INFO: &str = r#"{"total":1,"results":[{"organisation":{"id":"X"},"network":{"cidr":"8.8.8.0/24"}}]}"#;
    const ORG_INFO: &str = r#"{"total":1,"results":[{"asns":[15169]}]}"#;
    const AS_NETWORKS: &str = r#"{"total":1,"results":[{"cidr":"8.8.8.0/24"}]}"#;
    const AS_INFO: &str = r#"{"total":1,"results":[{"asn":15169,"as_name":"GOOGLE","description":"Google LLC","countrycode":"US","country":"United States"}]}"#;

    const IP_PAGE: &str = r#"<b>Network:</b> <a href="/org/google">Google</a> <a href="/net/8.8.8.0">8.8.8.0/24</a>
<b>Announcing ASN:</b> <a class="link_sm" href="/autonomous-system/AS15169">AS15169</a>"#;
    const AS_PAGE: &str = r#"<b>AS Name:</b> Google<br>
<b>AS Number:</b> 15169<br>
<b>CIDR:</b> 8.8.8.0/24<br>"#;

    #[tokio::test]
    async fn test_start_picks_strategy_from_credentials() {
        let mut source = NetworksDb::new();
        source.on_start(&store(Some("k"))).await.unwrap();
        assert_eq!(source.description(), "api");

        let mut source = NetworksDb::new();
        source.on_start(&store(None)).await.unwrap();
        assert_eq!(source.strategy(), &Strategy::Scrape);
        assert_eq!(source.rate_limit(), 1);
    }

    #[tokio::test]
    async fn test_api_lookup_for_address() {
        let calls = Calls::default();
        let transport = routed(
            vec![("/ip/info", IP_INFO), ("/org/info", ORG_INFO), ("/as/networks", AS_NETWORKS), ("/as/info", AS_INFO)],
            calls.clone(),
        );
        let h = harness(transport);
        let mut source = NetworksDb::new();
        source.on_start(&store(Some("secret-key"))).await.unwrap();

        let request = Request::Asn(AsnRequest::for_address("8.8.8.8".parse().unwrap()));
        source.handle(request, &h.ctx).await.unwrap();

        let fact = h.cache.get(15169).unwrap();
        assert_eq!(fact.prefix(), Some("8.8.8.0/24".parse().unwrap()));
        assert_eq!(fact.netblocks().len(), 1);
        assert_eq!(fact.country_code, "US");
        assert_eq!(fact.description, "Google LLC, US");
        assert_eq!(fact.provenance.tag, SourceTag::Api);

        let calls = calls.lock();
        assert_eq!(calls.len(), 4);
        assert_eq!(h.ctx.limiter.admitted(), 4);
        assert_eq!(calls[0].1.as_deref(), Some("ip=8.8.8.8"));
        assert_eq!(calls[1].1.as_deref(), Some("id=X"));
    }

    #[tokio::test]
    async fn test_scrape_lookup_for_address() {
        let calls = Calls::default();
        let transport = routed(vec![("/ip/8.8.8.8", IP_PAGE), ("/autonomous-system/AS15169", AS_PAGE)], calls.clone());
        let h = harness(transport);
        let mut source = NetworksDb::new();
        source.on_start(&store(None)).await.unwrap();

        let request = Request::Asn(AsnRequest::for_address("8.8.8.8".parse().unwrap()));
        source.handle(request, &h.ctx).await.unwrap();

        let fact = h.cache.get(15169).unwrap();
        assert_eq!(fact.prefix(), Some("8.8.8.0/24".parse().unwrap()));
        assert_eq!(fact.description, "Google");
        assert_eq!(fact.provenance.tag, SourceTag::Scrape);
        // The AS page is reused for netblocks and description
        assert_eq!(calls.lock().len(), 2);
        assert_eq!(h.ctx.limiter.admitted(), 2);
    }

    #[tokio::test]
    async fn test_scrape_without_as_name_keeps_facts() {
        let calls = Calls::default();
        let as_page = "<b>AS Number:</b> 15169<br>\n<b>CIDR:</b> 8.8.8.0/24<br>";
        let transport = routed(vec![("/ip/8.8.8.8", IP_PAGE), ("/autonomous-system/AS15169", as_page)], calls.clone());
        let h = harness(transport);
        let mut source = NetworksDb::new();
        source.on_start(&store(None)).await.unwrap();

        let request = Request::Asn(AsnRequest::for_address("8.8.8.8".parse().unwrap()));
        source.handle(request, &h.ctx).await.unwrap();

        let fact = h.cache.get(15169).unwrap();
        assert_eq!(fact.prefix(), Some("8.8.8.0/24".parse().unwrap()));
        assert_eq!(fact.description, "");
        assert_eq!(fact.provenance.tag, SourceTag::Scrape);
    }

    #[tokio::test]
    async fn test_scrape_adds_address_page_network() {
        let calls = Calls::default();
        let as_page = "<b>AS Name:</b> Google<br>\n<b>AS Number:</b> 15169<br>\n<b>CIDR:</b> 8.8.4.0/24<br>";
        let transport = routed(vec![("/ip/8.8.8.8", IP_PAGE), ("/autonomous-system/AS15169", as_page)], calls.clone());
        let h = harness(transport);
        let mut source = NetworksDb::new();
        source.on_start(&store(None)).await.unwrap();

        let request = Request::Asn(AsnRequest::for_address("8.8.8.8".parse().unwrap()));
        source.handle(request, &h.ctx).await.unwrap();

        let fact = h.cache.get(15169).unwrap();
        assert_eq!(fact.prefix(), Some("8.8.8.0/24".parse().unwrap()));
        assert_eq!(fact.netblocks().len(), 2);
        assert_eq!(calls.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_scrape_keeps_linked_as_without_covering_netblock() {
        let calls = Calls::default();
        let ip_page = r#"<b>Announcing ASN:</b> <a class="link_sm" href="/autonomous-system/AS15169">AS15169</a>"#;
        let as_page = "<b>AS Name:</b> Google<br>\n<b>AS Number:</b> 15169<br>\n<b>CIDR:</b> 8.8.4.0/24<br>";
        let transport = routed(vec![("/ip/8.8.8.8", ip_page), ("/autonomous-system/AS15169", as_page)], calls.clone());
        let h = harness(transport);
        let mut source = NetworksDb::new();
        source.on_start(&store(None)).await.unwrap();

        let request = Request::Asn(AsnRequest::for_address("8.8.8.8".parse().unwrap()));
        source.handle(request, &h.ctx).await.unwrap();

        let fact = h.cache.get(15169).unwrap();
        assert_eq!(fact.prefix(), Some("8.8.4.0/24".parse().unwrap()));
        assert_eq!(fact.address, Some("8.8.8.8".parse().unwrap()));
        assert_eq!(fact.description, "Google");
    }

    #[tokio::test]
    async fn test_api_error_field_aborts_request() {
        let calls = Calls::default();
        let transport = routed(vec![("/ip/info", r#"{"error":"Invalid API key","total":0}"#)], calls.clone());
        let h = harness(transport);
        let mut source = NetworksDb::new();
        source.on_start(&store(Some("bad"))).await.unwrap();

        let request = Request::Asn(AsnRequest::for_address("8.8.8.8".parse().unwrap()));
        let result = source.handle(request, &h.ctx).await;

        assert!(matches!(result, Err(ReconError::Transport { .. })));
        assert!(h.cache.is_empty());
        assert_eq!(calls.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_whois_collects_domains_in_network() {
        let calls = Calls::default();
        let transport = routed(
            vec![
                ("/domain-to-ips/example.com", r#"<a class="link_sm" href="/ip/93.184.216.34">93.184.216.34</a>"#),
                (
                    "/ip/93.184.216.34",
                    r#"<b>Network:</b> <a href="/org/edg">Edgecast</a> <a href="/net/1">93.184.216.0/24</a>"#,
                ),
                (
                    "/domains-in-network/93.184.216.0/93.184.216.255",
                    "<h2>Domains in network</h2><li>www.example.com</li><li>sister.org</li><table class=\"x\">",
                ),
            ],
            calls.clone(),
        );
        let mut h = harness(transport);
        let mut source = NetworksDb::new();
        source.on_start(&store(None)).await.unwrap();

        let request = Request::Whois(WhoisRequest { domain: "example.com".to_string() });
        source.handle(request, &h.ctx).await.unwrap();

        match h.events.try_recv().unwrap() {
            SourceEvent::Whois(result) => {
                assert_eq!(result.domain, "example.com");
                assert_eq!(result.new_domains.into_iter().collect::<Vec<_>>(), vec!["sister.org"]);
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(h.ctx.limiter.admitted(), calls.lock().len() as u64);
    }

    #[tokio::test]
    async fn test_whois_skips_out_of_scope_domain() {
        let calls = Calls::default();
        let h = harness(routed(Vec::new(), calls.clone()));
        let mut source = NetworksDb::new();

        let request = Request::Whois(WhoisRequest { domain: "other.org".to_string() });
        source.handle(request, &h.ctx).await.unwrap();

        assert!(calls.lock().is_empty());
    }
}
