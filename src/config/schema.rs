use serde::{Serialize, Deserialize};
use std::collections::BTreeMap;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub global: GlobalConfig,
    /// Per-source settings keyed by lowercase source name
    pub sources: BTreeMap<String, SourceConfig>,
    pub scope: ScopeConfig,
}

/// Global configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    pub user_agent: String,
    pub timeout_secs: u64,
    pub mailbox_size: usize,
    pub event_buffer: usize,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("reconsrc/{}", env!("CARGO_PKG_VERSION")),
            timeout_secs: 30,
            mailbox_size: 64,
            event_buffer: 256,
        }
    }
}

/// Source-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub enabled: bool,
    pub api_key: Option<String>,
    pub secret: Option<String>,
    /// Overrides the source's built-in requests per second
    pub rate_limit: Option<u32>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key: None,
            secret: None,
            rate_limit: None,
        }
    }
}

/// Target scope
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScopeConfig {
    pub include_domains: Vec<String>,
    pub exclude_domains: Vec<String>,
    pub include_ips: Vec<String>,
    pub exclude_ips: Vec<String>,
}
