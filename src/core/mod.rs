pub mod cache;
pub mod collab;
pub mod model;
pub mod netblock;

pub use cache::MemoryCache;
pub use collab::{AsnCache, CredentialStore, Credentials, ScopePredicate, Transport};
pub use model::{
    AddrRequest, AsnFact, AsnRequest, DiscoveredName, DnsRequest, Provenance,
    Registry, Request, SourceEvent, SourceTag, WhoisRequest, WhoisResult,
};
