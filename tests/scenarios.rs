// tests/scenarios.rs
//! End-to-end runs through the registry with a scripted transport.

use std::collections::BTreeSet;
use std::sync::Arc;
use async_trait::async_trait;
use ipnetwork::IpNetwork;
use mockall::mock;
use parking_lot::Mutex;

use reconsrc::config::{Config, SourceConfig};
use reconsrc::context::Collaborators;
use reconsrc::core::collab::{AsnCache, Transport};
use reconsrc::core::model::{AsnFact, AsnRequest, Request, SourceEvent, SourceTag, WhoisRequest};
use reconsrc::error::{ReconError, ReconResult};
use reconsrc::scope_filter::scope;
use reconsrc::service::SourceRegistry;
use reconsrc::sources;

mock! {
    pub Cache {}

    impl AsnCache for Cache {
        fn update(&self, fact: AsnFact);
        fn get(&self, asn: u32) -> Option<AsnFact>;
    }
}

/// Answers with the first route whose key is part of the URL
struct ScriptedTransport {
    routes: Vec<(&'static str, &'static str)>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    fn new(routes: Vec<(&'static str, &'static str)>) -> Arc<Self> {
        Arc::new(Self { routes, calls: Mutex::new(Vec::new()) })
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn fetch(&self, url: &str, _body: Option<String>, _headers: &[(String, String)]) -> ReconResult<String> {
        self.calls.lock().push(url.to_string());
        self.routes
            .iter()
            .find(|(key, _)| url.contains(key))
            .map(|(_, body)| body.to_string())
            .ok_or_else(|| ReconError::transport(url, "HTTP status 404 Not Found"))
    }
}

fn source(api_key: Option<&str>, enabled: bool) -> SourceConfig {
    SourceConfig {
        enabled,
        api_key: api_key.map(str::to_string),
        secret: None,
        rate_limit: Some(200),
    }
}

fn config(networksdb: SourceConfig, umbrella: SourceConfig) -> Config {
    let mut config = Config::default();
    config.sources.insert("networksdb".to_string(), networksdb);
    config.sources.insert("umbrella".to_string(), umbrella);
    config
}

/// Run one request through every enabled source and collect the emitted events
async fn run(config: Config, transport: Arc<ScriptedTransport>, cache: MockCache, request: Request) -> Vec<SourceEvent> {
    let collaborators = Collaborators {
        credentials: Arc::new(config.clone()),
        scope: Arc::new(scope::domain("example.com").unwrap()),
        cache: Arc::new(cache),
        transport,
    };

    let mut registry = SourceRegistry::new(collaborators, 4, 16);
    for source in sources::from_config(&config) {
        registry.register_source(source);
    }
    assert!(registry.start_all().await > 0);

    let mut events = registry.take_events().unwrap();
    registry.broadcast(request).await;
    registry.finish().await;

    let mut collected = Vec::new();
    while let Some(event) = events.recv().await {
        collected.push(event);
    }
    collected
}

fn google_blocks() -> BTreeSet<IpNetwork> {
    ["8.8.8.0/24".parse().unwrap()].into_iter().collect()
}

#[tokio::test]
async fn scenario_api_lookup_updates_cache() {
    let transport = ScriptedTransport::new(vec![
        ("/api/v1/ip/info", r#"{"total":1,"results":[{"organisation":{"id":"X"},"network":{"cidr":"8.8.8.0/24"}}]}"#),
        ("/api/v1/org/info", r#"{"total":1,"results":[{"asns":[15169]}]}"#),
        ("/api/v1/as/networks", r#"{"total":1,"results":[{"cidr":"8.8.8.0/24"}]}"#),
        ("/api/v1/as/info", r#"{"total":1,"results":[{"asn":15169,"description":"Google LLC","countrycode":"US"}]}"#),
    ]);

    let mut cache = MockCache::new();
    cache
        .expect_update()
        .withf(|fact| {
            fact.asn == 15169
                && fact.prefix() == Some("8.8.8.0/24".parse().unwrap())
                && *fact.netblocks() == google_blocks()
                && fact.provenance.tag == SourceTag::Api
        })
        .times(1)
        .return_const(());

    let config = config(source(Some("key"), true), source(None, false));
    let request = Request::Asn(AsnRequest::for_address("8.8.8.8".parse().unwrap()));
    let events = run(config, transport.clone(), cache, request).await;

    assert!(events.is_empty());
    assert_eq!(transport.calls().len(), 4);
}

#[tokio::test]
async fn scenario_scrape_lookup_updates_cache() {
    let transport = ScriptedTransport::new(vec![
        (
            "networksdb.io/ip/8.8.8.8",
            r#"<b>Announcing ASN:</b> <a class="link_sm" href="/autonomous-system/AS15169">AS15169</a>"#,
        ),
        (
            "/autonomous-system/AS15169",
            "<b>AS Name:</b> Google<br>\n<b>AS Number:</b> 15169<br>\n<b>CIDR:</b> 8.8.8.0/24<br>",
        ),
    ]);

    let mut cache = MockCache::new();
    cache
        .expect_update()
        .withf(|fact| {
            fact.asn == 15169
                && fact.prefix() == Some("8.8.8.0/24".parse().unwrap())
                && *fact.netblocks() == google_blocks()
                && fact.provenance.tag == SourceTag::Scrape
        })
        .times(1)
        .return_const(());

    let config = config(source(None, true), source(None, false));
    let request = Request::Asn(AsnRequest::for_address("8.8.8.8".parse().unwrap()));
    run(config, transport.clone(), cache, request).await;

    assert_eq!(transport.calls().len(), 2);
}

#[tokio::test]
async fn scenario_whois_without_contacts_issues_no_reverse_query() {
    let transport = ScriptedTransport::new(vec![(
        "/whois/example.com",
        r#"{"registrantEmail":"hostmaster@registrar.net","nameServers":["ns1.registrar.net"]}"#,
    )]);
    let mut cache = MockCache::new();
    cache.expect_update().never();

    let config = config(source(None, false), source(Some("token"), true));
    let request = Request::Whois(WhoisRequest { domain: "example.com".to_string() });
    let events = run(config, transport.clone(), cache, request).await;

    assert!(events.is_empty());
    assert_eq!(transport.calls().len(), 1);
}

#[tokio::test]
async fn scenario_reverse_whois_known_domains_are_dropped() {
    let transport = ScriptedTransport::new(vec![
        ("/whois/emails?", r#"{"admin@example.com":{"totalResults":2,"moreDataAvailable":false,"limit":500,
            "domains":[{"domain":"www.example.com","current":true},{"domain":"shop.example.com","current":true}]}}"#),
        ("/whois/example.com", r#"{"administrativeContactEmail":"admin@example.com"}"#),
    ]);
    let mut cache = MockCache::new();
    cache.expect_update().never();

    let config = config(source(None, false), source(Some("token"), true));
    let request = Request::Whois(WhoisRequest { domain: "example.com".to_string() });
    let events = run(config, transport.clone(), cache, request).await;

    assert!(events.is_empty());
    assert_eq!(transport.calls().len(), 2);
}

#[tokio::test]
async fn unstartable_sources_are_skipped() {
    let transport = ScriptedTransport::new(Vec::new());
    let mut cache = MockCache::new();
    cache.expect_update().never();

    // Umbrella has no key and refuses to start; NetworksDB degrades to scraping
    let config = config(source(None, true), source(None, true));
    let request = Request::Asn(AsnRequest::default());
    let events = run(config, transport.clone(), cache, request).await;

    assert!(events.is_empty());
    assert!(transport.calls().is_empty());
}
