//! # vSphere Collector Core
//!
//! Shared primitives used by every crate in the collector workspace:
//!
//! - [`arena`] — the bump-pointer arena and reference-counted string pool (C1)
//! - [`model`] — the typed inventory and performance-counter data model (C5, C8)
//! - [`config`] — environment-driven configuration (C12)
//! - [`error`] — the `CollectorError` taxonomy shared across crate boundaries (C13)
//!
//! ## Features
//!
//! - `monitoring` — enables Prometheus metric types reused by downstream crates

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod arena;
pub mod config;
pub mod error;
pub mod model;

pub use error::{CollectorError, Result};

/// Current version of the collector core crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Common imports for downstream crates.
pub mod prelude {
    pub use crate::arena::{Arena, StringPool};
    pub use crate::config::CollectorConfig;
    pub use crate::error::{CollectorError, Result};
    pub use crate::model::{DeepCopy, Inventory, Service, ServiceState, ServiceType};
}
