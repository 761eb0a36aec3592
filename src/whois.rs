// src/whois.rs
//! Reverse-WHOIS aggregation: find other domains registered with the same
//! contacts or nameservers as an in-scope domain.

use std::collections::{BTreeSet, HashMap};
use async_trait::async_trait;
use serde::{Serialize, Deserialize};
use tracing::{debug, info, warn};

use crate::core::collab::ScopePredicate;
use crate::core::model::{Provenance, WhoisResult};
use crate::error::ReconResult;

/// Providers return reverse-WHOIS results in chunks of this size
pub const PAGE_SIZE: usize = 500;

/// Upper bound on pages fetched for a single query
pub const MAX_PAGES: usize = 200;

/// The subset of a WHOIS record used for pivoting
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WhoisRecord {
    #[serde(rename = "nameServers", default)]
    pub name_servers: Vec<String>,
    #[serde(rename = "administrativeContactEmail", default)]
    pub admin_contact_email: String,
    #[serde(rename = "billingContactEmail", default)]
    pub billing_contact_email: String,
    #[serde(rename = "registrantEmail", default)]
    pub registrant_email: String,
    #[serde(rename = "technicalContactEmail", default)]
    pub tech_contact_email: String,
    #[serde(rename = "zoneContactEmail", default)]
    pub zone_contact_email: String,
}

impl WhoisRecord {
    fn contact_emails(&self) -> [&str; 5] {
        [
            &self.admin_contact_email,
            &self.billing_contact_email,
            &self.registrant_email,
            &self.tech_contact_email,
            &self.zone_contact_email,
        ]
    }
}

/// Deduplicated, scope-filtered contacts of one WHOIS record
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WhoisContactSet {
    pub emails: BTreeSet<String>,
    pub nameservers: BTreeSet<String>,
}

impl WhoisContactSet {
    pub fn collate(record: &WhoisRecord, scope: &dyn ScopePredicate) -> Self {
        let accept = |value: &str| {
            let value = value.trim();
            (!value.is_empty() && scope.is_domain_in_scope(value)).then(|| value.to_lowercase())
        };

        Self {
            emails: record.contact_emails().into_iter().filter_map(accept).collect(),
            nameservers: record.name_servers.iter().filter_map(|ns| accept(ns)).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.emails.is_empty() && self.nameservers.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReverseWhoisDomain {
    pub domain: String,
    #[serde(default)]
    pub current: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReverseWhoisResponse {
    #[serde(rename = "totalResults", default)]
    pub total_results: u64,
    #[serde(rename = "moreDataAvailable", default)]
    pub more_data_available: bool,
    #[serde(default)]
    pub limit: u64,
    #[serde(default)]
    pub domains: Vec<ReverseWhoisDomain>,
}

/// One page of results, keyed by the queried email or nameserver
pub type ReverseWhoisPage = HashMap<String, ReverseWhoisResponse>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReverseQuery {
    Emails(Vec<String>),
    Nameservers(Vec<String>),
}

impl ReverseQuery {
    pub fn terms(&self) -> &[String] {
        match self {
            ReverseQuery::Emails(terms) | ReverseQuery::Nameservers(terms) => terms,
        }
    }

    /// Query terms joined into a single request parameter
    pub fn joined(&self) -> String {
        self.terms().join(",")
    }
}

/// Provider-specific WHOIS lookups.
///
/// Each call is one outbound request and charges the rate limiter once.
#[async_trait]
pub trait WhoisProvider: Send {
    fn provenance(&self) -> Provenance;

    async fn record(&mut self, domain: &str) -> ReconResult<WhoisRecord>;

    async fn reverse_page(&mut self, query: &ReverseQuery, offset: usize) -> ReconResult<ReverseWhoisPage>;
}

/// Keep only the names the scope predicate rejects, i.e. the ones not yet known
pub fn retain_out_of_scope(domains: BTreeSet<String>, scope: &dyn ScopePredicate) -> BTreeSet<String> {
    domains
        .into_iter()
        .filter(|domain| !scope.is_domain_in_scope(domain))
        .collect()
}

pub struct ReverseWhoisAggregator<'a, P> {
    provider: P,
    scope: &'a dyn ScopePredicate,
    pages_fetched: usize,
}

impl<'a, P: WhoisProvider> ReverseWhoisAggregator<'a, P> {
    pub fn new(provider: P, scope: &'a dyn ScopePredicate) -> Self {
        Self {
            provider,
            scope,
            pages_fetched: 0,
        }
    }

    pub fn pages_fetched(&self) -> usize {
        self.pages_fetched
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Find novel domains sharing contacts or nameservers with `domain`
    pub async fn aggregate(&mut self, domain: &str) -> ReconResult<Option<WhoisResult>> {
        if !self.scope.is_domain_in_scope(domain) {
            debug!("{} is out of scope, skipping reverse WHOIS", domain);
            return Ok(None);
        }

        let record = self.provider.record(domain).await?;
        let contacts = WhoisContactSet::collate(&record, self.scope);
        if contacts.is_empty() {
            debug!("{}: no in-scope contacts or nameservers", domain);
            return Ok(None);
        }

        let mut found = BTreeSet::new();
        if !contacts.emails.is_empty() {
            let query = ReverseQuery::Emails(contacts.emails.iter().cloned().collect());
            let domains = self.paginate(&query).await?;
            found.extend(retain_out_of_scope(domains, self.scope));
        }
        if !contacts.nameservers.is_empty() {
            let query = ReverseQuery::Nameservers(contacts.nameservers.iter().cloned().collect());
            let domains = self.paginate(&query).await?;
            found.extend(retain_out_of_scope(domains, self.scope));
        }

        if found.is_empty() {
            debug!("{}: reverse WHOIS found nothing new", domain);
            return Ok(None);
        }

        info!("{}: reverse WHOIS found {} new domains", domain, found.len());
        Ok(Some(WhoisResult {
            domain: domain.to_string(),
            new_domains: found,
            provenance: self.provider.provenance(),
        }))
    }

    /// Fetch every page of `query`, keeping current domains only
    pub async fn paginate(&mut self, query: &ReverseQuery) -> ReconResult<BTreeSet<String>> {
        let mut domains = BTreeSet::new();
        let mut offset = 0;

        for _ in 0..MAX_PAGES {
            let page = self.provider.reverse_page(query, offset).await?;
            self.pages_fetched += 1;

            let mut total = 0;
            let mut more = false;
            for response in page.values() {
                total += response.total_results;
                if response.total_results > 0 {
                    domains.extend(
                        response
                            .domains
                            .iter()
                            .filter(|d| d.current)
                            .map(|d| d.domain.trim().to_lowercase()),
                    );
                }
                more |= response.more_data_available;
            }

            if !more || total == 0 {
                return Ok(domains);
            }
            offset += PAGE_SIZE;
        }

        warn!("Reverse WHOIS query {} stopped after {} pages", query.joined(), MAX_PAGES);
        Ok(domains)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::collab::MockScopePredicate;
    use crate::core::model::SourceTag;
    use crate::error::ReconError;

    /// Serves scripted pages keyed by offset
    struct FakeWhois {
        record: WhoisRecord,
        pages: HashMap<usize, ReverseWhoisPage>,
        offsets: Vec<usize>,
        queries: Vec<ReverseQuery>,
    }

    impl FakeWhois {
        fn new(record: WhoisRecord) -> Self {
            Self { record, pages: HashMap::new(), offsets: Vec::new(), queries: Vec::new() }
        }
    }

    #[async_trait]
    impl WhoisProvider for FakeWhois {
        fn provenance(&self) -> Provenance {
            Provenance::new("fake", SourceTag::Api)
        }

        async fn record(&mut self, _domain: &str) -> ReconResult<WhoisRecord> {
            Ok(self.record.clone())
        }

        async fn reverse_page(&mut self, query: &ReverseQuery, offset: usize) -> ReconResult<ReverseWhoisPage> {
            self.offsets.push(offset);
            self.queries.push(query.clone());
            self.pages
                .get(&offset)
                .cloned()
                .ok_or_else(|| ReconError::NoData(format!("offset {}", offset)))
        }
    }

    fn page(key: &str, more: bool, domains: &[(&str, bool)]) -> ReverseWhoisPage {
        let response = ReverseWhoisResponse {
            total_results: 1200,
            more_data_available: more,
            limit: PAGE_SIZE as u64,
            domains: domains
                .iter()
                .map(|(d, current)| ReverseWhoisDomain { domain: d.to_string(), current: *current })
                .collect(),
        };
        HashMap::from([(key.to_string(), response)])
    }

    fn suffix_scope(suffix: &'static str) -> MockScopePredicate {
        let mut scope = MockScopePredicate::new();
        scope.expect_is_domain_in_scope().returning(move |name| name.ends_with(suffix));
        scope
    }

    #[tokio::test]
    async fn test_three_pages_are_fetched_and_merged() {
        let mut provider = FakeWhois::new(WhoisRecord::default());
        provider.pages.insert(0, page("a@x.com", true, &[("one.org", true), ("old.org", false)]));
        provider.pages.insert(500, page("a@x.com", true, &[("two.org", true), ("one.org", true)]));
        provider.pages.insert(1000, page("a@x.com", false, &[("three.org", true)]));

        let scope = suffix_scope("example.com");
        let mut aggregator = ReverseWhoisAggregator::new(provider, &scope);
        let domains = aggregator
            .paginate(&ReverseQuery::Emails(vec!["a@x.com".to_string()]))
            .await
            .unwrap();

        assert_eq!(aggregator.provider().offsets, vec![0, 500, 1000]);
        assert_eq!(aggregator.pages_fetched(), 3);
        let expected: BTreeSet<String> = ["one.org", "two.org", "three.org"].iter().map(|s| s.to_string()).collect();
        assert_eq!(domains, expected);
    }

    #[tokio::test]
    async fn test_zero_total_stops_pagination() {
        let mut provider = FakeWhois::new(WhoisRecord::default());
        let mut empty = page("ns1.example.com", true, &[("ignored.org", true)]);
        empty.values_mut().for_each(|r| r.total_results = 0);
        provider.pages.insert(0, empty);

        let scope = suffix_scope("example.com");
        let mut aggregator = ReverseWhoisAggregator::new(provider, &scope);
        let domains = aggregator
            .paginate(&ReverseQuery::Nameservers(vec!["ns1.example.com".to_string()]))
            .await
            .unwrap();

        assert!(domains.is_empty());
        assert_eq!(aggregator.provider().offsets, vec![0]);
    }

    #[tokio::test]
    async fn test_no_contacts_means_no_queries() {
        let record = WhoisRecord {
            name_servers: vec!["ns1.registrar.net".to_string()],
            registrant_email: "hostmaster@registrar.net".to_string(),
            ..Default::default()
        };
        let scope = suffix_scope("example.com");
        let mut aggregator = ReverseWhoisAggregator::new(FakeWhois::new(record), &scope);

        let result = aggregator.aggregate("example.com").await.unwrap();
        assert!(result.is_none());
        assert!(aggregator.provider().offsets.is_empty());
    }

    #[tokio::test]
    async fn test_in_scope_results_are_dropped() {
        let record = WhoisRecord {
            admin_contact_email: "admin@example.com".to_string(),
            ..Default::default()
        };
        let mut provider = FakeWhois::new(record);
        provider.pages.insert(
            0,
            page("admin@example.com", false, &[("www.example.com", true), ("mail.example.com", true)]),
        );

        let scope = suffix_scope("example.com");
        let mut aggregator = ReverseWhoisAggregator::new(provider, &scope);

        assert!(aggregator.aggregate("example.com").await.unwrap().is_none());
        assert_eq!(aggregator.provider().offsets, vec![0]);
    }

    #[tokio::test]
    async fn test_email_and_nameserver_queries_are_independent() {
        let record = WhoisRecord {
            name_servers: vec!["NS1.EXAMPLE.COM".to_string(), "ns1.example.com".to_string()],
            admin_contact_email: "admin@example.com".to_string(),
            registrant_email: "admin@example.com".to_string(),
            tech_contact_email: "tech@example.com".to_string(),
            ..Default::default()
        };
        let mut provider = FakeWhois::new(record);
        provider.pages.insert(0, page("k", false, &[("sister.org", true)]));

        let scope = suffix_scope("example.com");
        let mut aggregator = ReverseWhoisAggregator::new(provider, &scope);
        let result = aggregator.aggregate("example.com").await.unwrap().unwrap();

        assert_eq!(result.domain, "example.com");
        assert!(result.new_domains.contains("sister.org"));
        let queries = &aggregator.provider().queries;
        assert_eq!(queries.len(), 2);
        assert_eq!(queries[0].joined(), "admin@example.com,tech@example.com");
        assert_eq!(queries[1], ReverseQuery::Nameservers(vec!["ns1.example.com".to_string()]));
    }

    #[test]
    fn test_out_of_scope_filter_is_idempotent() {
        let scope = suffix_scope("example.com");
        let input: BTreeSet<String> = ["a.example.com", "b.org", "c.net"].iter().map(|s| s.to_string()).collect();

        let once = retain_out_of_scope(input, &scope);
        let twice = retain_out_of_scope(once.clone(), &scope);
        assert_eq!(once, twice);
        assert_eq!(once.len(), 2);
    }
}
