// src/service/mod.rs
pub mod actor;
pub mod rate_limit;
pub mod registry;
pub mod shutdown;

pub use actor::{DataSource, ServiceHandle};
pub use registry::SourceRegistry;
