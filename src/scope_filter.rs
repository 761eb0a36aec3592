// src/scope_filter.rs - Scope filtering for domains, addresses and contact emails

use std::collections::HashSet;
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::Arc;
use regex::Regex;
use ipnetwork::IpNetwork;
use tracing::debug;

use crate::config::ScopeConfig;
use crate::core::collab::ScopePredicate;
use crate::error::{ReconError, ReconResult};

/// ScopeFilter decides whether names, addresses and emails belong to the target
pub struct ScopeFilter {
    include_patterns: Vec<DomainPattern>,
    exclude_patterns: Vec<DomainPattern>,
    include_networks: Vec<IpNetwork>,
    exclude_networks: Vec<IpNetwork>,
}

/// Pattern for matching domains with wildcard support
enum DomainPattern {
    /// Matches the domain itself and every subdomain of it
    Exact(String),
    Wildcard(String, Regex),
    Regex(Regex),
}

impl ScopeFilter {
    pub fn new(scope_config: &ScopeConfig) -> ReconResult<Self> {
        let include_patterns = scope_config.include_domains
            .iter()
            .map(|p| Self::parse_domain_pattern(p))
            .collect::<ReconResult<Vec<_>>>()?;

        let exclude_patterns = scope_config.exclude_domains
            .iter()
            .map(|p| Self::parse_domain_pattern(p))
            .collect::<ReconResult<Vec<_>>>()?;

        let include_networks = Self::parse_networks(&scope_config.include_ips)?;
        let exclude_networks = Self::parse_networks(&scope_config.exclude_ips)?;

        Ok(Self {
            include_patterns,
            exclude_patterns,
            include_networks,
            exclude_networks,
        })
    }

    fn parse_networks(ranges: &[String]) -> ReconResult<Vec<IpNetwork>> {
        ranges
            .iter()
            .map(|range| {
                IpNetwork::from_str(range)
                    .map_err(|e| ReconError::Configuration(format!("Invalid IP range {}: {}", range, e)))
            })
            .collect()
    }

    /// Parse a domain pattern into a DomainPattern enum
    fn parse_domain_pattern(pattern: &str) -> ReconResult<DomainPattern> {
        if pattern.len() > 1 && pattern.starts_with('/') && pattern.ends_with('/') {
            let regex_str = &pattern[1..pattern.len() - 1];
            let regex = Regex::new(regex_str)
                .map_err(|e| ReconError::Configuration(format!("Invalid regex pattern {}: {}", regex_str, e)))?;
            Ok(DomainPattern::Regex(regex))
        } else if pattern.contains('*') {
            let regex_pattern = regex::escape(&pattern.to_lowercase()).replace("\\*", ".*");

            let regex = Regex::new(&format!("(?i)^{}$", regex_pattern))
                .map_err(|e| ReconError::Configuration(format!("Invalid wildcard pattern {}: {}", pattern, e)))?;

            Ok(DomainPattern::Wildcard(pattern.to_string(), regex))
        } else {
            Ok(DomainPattern::Exact(pattern.trim_end_matches('.').to_lowercase()))
        }
    }

    /// Check if a domain is in scope.
    ///
    /// Emails are judged by the part after '@'; address literals go through
    /// the network lists instead.
    pub fn is_domain_in_scope(&self, domain: &str) -> bool {
        match host_of(domain) {
            Some(host) => self.is_host_in_scope(&host),
            None => false,
        }
    }

    /// Scope decision for a name already passed through [`host_of`]
    fn is_host_in_scope(&self, host: &str) -> bool {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return self.is_ip_in_scope(&ip);
        }

        // Exclusions take precedence
        if self.exclude_patterns.iter().any(|p| Self::domain_matches_pattern(host, p)) {
            debug!("Domain {} excluded by pattern", host);
            return false;
        }

        if self.include_patterns.iter().any(|p| Self::domain_matches_pattern(host, p)) {
            return true;
        }

        debug!("Domain {} not matched by any inclusion pattern", host);
        false
    }

    fn domain_matches_pattern(domain: &str, pattern: &DomainPattern) -> bool {
        match pattern {
            DomainPattern::Exact(exact) => {
                domain == exact
                    || (domain.len() > exact.len()
                        && domain.ends_with(exact.as_str())
                        && domain.as_bytes()[domain.len() - exact.len() - 1] == b'.')
            }
            DomainPattern::Wildcard(_, regex) => regex.is_match(domain),
            DomainPattern::Regex(regex) => regex.is_match(domain),
        }
    }

    /// Check if an IP address is in scope
    pub fn is_ip_in_scope(&self, ip: &IpAddr) -> bool {
        for network in &self.exclude_networks {
            if network.contains(*ip) {
                debug!("IP {} excluded by network {}", ip, network);
                return false;
            }
        }

        self.include_networks.iter().any(|network| network.contains(*ip))
    }
}

impl ScopePredicate for ScopeFilter {
    fn is_domain_in_scope(&self, name: &str) -> bool {
        ScopeFilter::is_domain_in_scope(self, name)
    }
}

/// Host part of a name or email: lowercase, no trailing dot
fn host_of(name: &str) -> Option<String> {
    let host = name.rsplit('@').next().unwrap_or(name);
    let host = host.trim().trim_end_matches('.').to_lowercase();
    (!host.is_empty()).then_some(host)
}

/// Upper bound on remembered hosts; the set starts over once it is reached
const SCOPE_CACHE_CAPACITY: usize = 4096;

/// Scope cache for efficient scope checking
pub struct ScopeCache {
    filter: Arc<ScopeFilter>,
    domains_cache: parking_lot::RwLock<HashSet<String>>,
}

impl ScopeCache {
    pub fn new(filter: ScopeFilter) -> Self {
        Self {
            filter: Arc::new(filter),
            domains_cache: parking_lot::RwLock::new(HashSet::new()),
        }
    }

    /// Check if a domain is in scope (cached)
    pub fn is_domain_in_scope(&self, domain: &str) -> bool {
        let Some(host) = host_of(domain) else {
            return false;
        };

        {
            let cache = self.domains_cache.read();
            if cache.contains(&host) {
                return true;
            }
        }

        let result = self.filter.is_host_in_scope(&host);

        // Only positive answers are cached
        if result {
            let mut cache = self.domains_cache.write();
            if cache.len() >= SCOPE_CACHE_CAPACITY {
                debug!("Scope cache full, clearing {} entries", cache.len());
                cache.clear();
            }
            cache.insert(host);
        }

        result
    }

    /// Number of hosts currently remembered as in scope
    pub fn cached(&self) -> usize {
        self.domains_cache.read().len()
    }

    pub fn filter(&self) -> &ScopeFilter {
        &self.filter
    }
}

impl ScopePredicate for ScopeCache {
    fn is_domain_in_scope(&self, name: &str) -> bool {
        ScopeCache::is_domain_in_scope(self, name)
    }
}

/// Helper module to create scope filters on the fly
pub mod scope {
    use super::*;

    /// Create a scope filter for a single domain
    pub fn domain(domain: &str) -> ReconResult<ScopeFilter> {
        domains(&[domain])
    }

    /// Create a scope filter for multiple domains
    pub fn domains(domains: &[&str]) -> ReconResult<ScopeFilter> {
        let config = ScopeConfig {
            include_domains: domains.iter().map(|d| d.to_string()).collect(),
            ..Default::default()
        };
        ScopeFilter::new(&config)
    }
}
