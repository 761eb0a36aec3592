// src/scrape.rs
//! Field extraction from network-registry HTML pages.
//!
//! Every extractor yields `Some(value)` or `None`; deciding whether a missing
//! field is fatal is left to the caller.

use std::collections::BTreeSet;
use std::net::IpAddr;
use ipnetwork::IpNetwork;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::core::netblock;

static AS_LINK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"Announcing ASN:</b> <a class="link_sm" href="([^"]*)""#).expect("valid AS link regex")
});

static IP_LINK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<a class="link_sm" href="(/ip/[.:a-zA-Z0-9]+)">"#).expect("valid IP link regex")
});

static ASN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"AS Number:</b> ([0-9]*)<br>").expect("valid ASN regex")
});

static CIDR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"CIDR:</b>(.*?)<br>").expect("valid CIDR regex")
});

static IP_PAGE_CIDR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<b>Network:.* href=".*".*href=".*">(.*)</a>"#).expect("valid network regex")
});

static AS_NAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"AS Name:</b>(.*?)<br>").expect("valid AS name regex")
});

static COUNTRY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"Location:</b>.*href="/country/([^"]*)">"#).expect("valid country regex")
});

static DOMAINS_START_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Domains in network").expect("valid section start regex")
});

static TABLE_END_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<table class").expect("valid section end regex")
});

static SUBDOMAIN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:[a-z0-9](?:[a-z0-9_-]{0,61}[a-z0-9])?\.)+[a-z][a-z0-9-]{0,61}[a-z0-9]\b")
        .expect("valid subdomain regex")
});

fn capture<'a>(re: &Regex, page: &'a str) -> Option<&'a str> {
    re.captures(page)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
        .filter(|value| !value.is_empty())
}

/// Relative link to the AS announcing an address, from an IP detail page
pub fn as_link(page: &str) -> Option<String> {
    capture(&AS_LINK_RE, page).map(str::to_string)
}

/// Relative links to IP detail pages, in page order
pub fn ip_links(page: &str) -> Vec<String> {
    IP_LINK_RE
        .captures_iter(page)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Numeric AS number from an AS detail page; 0 and non-numeric values are rejected
pub fn asn(page: &str) -> Option<u32> {
    capture(&ASN_RE, page)
        .and_then(|value| value.parse::<u32>().ok())
        .filter(|asn| *asn != 0)
}

/// Every well-formed CIDR on the page; malformed occurrences are skipped
pub fn cidrs(page: &str) -> BTreeSet<IpNetwork> {
    netblock::parse_all(
        CIDR_RE
            .captures_iter(page)
            .filter_map(|caps| caps.get(1))
            .map(|m| m.as_str()),
    )
}

/// Network CIDR from an IP detail page
pub fn ip_page_cidr(page: &str) -> Option<IpNetwork> {
    capture(&IP_PAGE_CIDR_RE, page).and_then(netblock::parse_cidr)
}

pub fn as_name(page: &str) -> Option<String> {
    capture(&AS_NAME_RE, page).map(str::to_string)
}

pub fn country_code(page: &str) -> Option<String> {
    capture(&COUNTRY_RE, page).map(str::to_string)
}

/// Slice of `page` between the end of the first `start` match and the end of
/// the first `end` match that follows it
pub fn bounded_region<'a>(page: &'a str, start: &Regex, end: &Regex) -> Option<&'a str> {
    let from = start.find(page)?.end();
    let to = end.find_at(page, from)?.end();
    page.get(from..to)
}

/// Domain names listed in the "domains in network" section only
pub fn domains_in_network(page: &str) -> Option<BTreeSet<String>> {
    let region = bounded_region(page, &DOMAINS_START_RE, &TABLE_END_RE)?;
    Some(
        SUBDOMAIN_RE
            .find_iter(region)
            .map(|m| m.as_str().trim().to_lowercase())
            .filter(|name| name.parse::<IpAddr>().is_err())
            .collect(),
    )
}
