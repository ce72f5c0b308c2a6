//! Optional Prometheus metrics mirroring [`crate::collector::CollectorStatistics`],
//! gated behind the `monitoring` feature. Additive observability only: the
//! scheduler and read API never consult these gauges, they only publish
//! what `statistics()` already computes under the lock.

use prometheus::{IntGauge, Opts, Registry};

/// Per-process gauges reflecting the last [`crate::collector::CollectorStatistics`]
/// snapshot. Registered once against a shared [`Registry`] by the service
/// binary and refreshed on a timer alongside the scheduler loop.
pub struct CollectorMetrics {
    pub services_total: IntGauge,
    pub services_ready: IntGauge,
    pub services_failed: IntGauge,
    pub services_updating: IntGauge,
    pub interned_strings: IntGauge,
    pub interned_bytes: IntGauge,
}

impl CollectorMetrics {
    pub fn new(registry: &Registry) -> prometheus::Result<Self> {
        let services_total =
            IntGauge::with_opts(Opts::new("vmware_services_total", "Number of monitored vCenter/ESXi endpoints"))?;
        let services_ready = IntGauge::with_opts(Opts::new(
            "vmware_services_ready",
            "Number of services with a ready (successfully built) inventory snapshot",
        ))?;
        let services_failed = IntGauge::with_opts(Opts::new(
            "vmware_services_failed",
            "Number of services whose last cycle ended in failure",
        ))?;
        let services_updating = IntGauge::with_opts(Opts::new(
            "vmware_services_updating",
            "Number of services with an inventory or performance cycle in flight",
        ))?;
        let interned_strings = IntGauge::with_opts(Opts::new(
            "vmware_arena_interned_strings",
            "Distinct strings currently live in the shared string pool",
        ))?;
        let interned_bytes =
            IntGauge::with_opts(Opts::new("vmware_arena_used_bytes", "Bytes consumed in the shared arena"))?;

        registry.register(Box::new(services_total.clone()))?;
        registry.register(Box::new(services_ready.clone()))?;
        registry.register(Box::new(services_failed.clone()))?;
        registry.register(Box::new(services_updating.clone()))?;
        registry.register(Box::new(interned_strings.clone()))?;
        registry.register(Box::new(interned_bytes.clone()))?;

        Ok(CollectorMetrics {
            services_total,
            services_ready,
            services_failed,
            services_updating,
            interned_strings,
            interned_bytes,
        })
    }

    /// Overwrites every gauge with the latest [`crate::collector::CollectorStatistics`].
    pub fn observe(&self, stats: &crate::collector::CollectorStatistics) {
        self.services_total.set(stats.service_count as i64);
        self.services_ready.set(stats.ready_count as i64);
        self.services_failed.set(stats.failed_count as i64);
        self.services_updating.set(stats.updating_count as i64);
        self.interned_strings.set(stats.interned_strings as i64);
        self.interned_bytes.set(stats.interned_bytes as i64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::CollectorStatistics;

    #[test]
    fn observe_copies_every_field_onto_its_gauge() {
        let registry = Registry::new();
        let metrics = CollectorMetrics::new(&registry).unwrap();
        let stats = CollectorStatistics {
            service_count: 3,
            ready_count: 2,
            failed_count: 1,
            updating_count: 1,
            interned_strings: 40,
            interned_bytes: 1024,
        };
        metrics.observe(&stats);
        assert_eq!(metrics.services_total.get(), 3);
        assert_eq!(metrics.services_ready.get(), 2);
        assert_eq!(metrics.services_failed.get(), 1);
        assert_eq!(metrics.services_updating.get(), 1);
        assert_eq!(metrics.interned_strings.get(), 40);
        assert_eq!(metrics.interned_bytes.get(), 1024);
    }
}
