pub mod config;
pub mod context;
pub mod core;
pub mod error;
pub mod resolve;
pub mod scope_filter;
pub mod scrape;
pub mod service;
pub mod sources;
pub mod utils;
pub mod whois;

// Re-export main types for easier access
pub use config::Config;
pub use context::{Collaborators, SourceContext};
pub use core::{
    AsnFact,
    AsnRequest,
    MemoryCache,
    Request,
    SourceEvent,
};
pub use error::{ReconError, ReconResult};
pub use scope_filter::ScopeFilter;
pub use service::{DataSource, SourceRegistry};
pub use utils::HttpClient;
