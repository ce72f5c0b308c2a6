//! # vSphere Collector Engine
//!
//! The collection logic that sits between the wire-level `vsphere-collector-soap`
//! crate and a running service: endpoint authentication and type
//! auto-detection (C6 step 1), the inventory fetcher (C6), the event-log
//! tailer (C7), the two-pass performance fetcher (C8, C9), and the
//! per-[`Service`](vsphere_collector_core::model::Service) cycle
//! orchestration that ties them together (C10).
//!
//! ## Features
//!
//! - `monitoring` — enables the [`metrics`] module's Prometheus types,
//!   mirroring [`collector::Collector::statistics`]'s counters as gauges.

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod auth;
pub mod collector;
pub mod cycle;
pub mod events;
pub mod inventory;
#[cfg(feature = "monitoring")]
pub mod metrics;
pub mod perf;
pub mod scheduler;

pub use collector::{Collector, CollectorStatistics};
pub use cycle::{run_inventory_cycle, run_perf_cycle};

/// Current version of the collection engine crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Common imports for the service binary crate.
pub mod prelude {
    pub use crate::collector::{Collector, CollectorStatistics};
    pub use crate::scheduler::Scheduler;
}
