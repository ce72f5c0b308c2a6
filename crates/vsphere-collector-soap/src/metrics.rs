//! Optional Prometheus metrics for the SOAP transport, gated behind the
//! `monitoring` feature. Mirrors the scheduler's `statistics()` accessor
//! (C11) rather than replacing it: these gauges/counters are additive
//! observability, not the source of truth.

use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry};

/// Per-process SOAP transport metrics, registered once against a shared
/// [`Registry`] by the service binary.
pub struct SoapMetrics {
    pub requests_total: IntCounterVec,
    pub faults_total: IntCounter,
    pub transport_errors_total: IntCounter,
    pub request_duration_seconds: Histogram,
}

impl SoapMetrics {
    pub fn new(registry: &Registry) -> prometheus::Result<Self> {
        let requests_total = IntCounterVec::new(
            Opts::new("vmware_soap_requests_total", "Total SOAP requests issued, labeled by method"),
            &["method"],
        )?;
        let faults_total =
            IntCounter::with_opts(Opts::new("vmware_soap_faults_total", "Total SOAP faultstring responses"))?;
        let transport_errors_total = IntCounter::with_opts(Opts::new(
            "vmware_soap_transport_errors_total",
            "Total transport-level (TCP/TLS/HTTP) failures",
        ))?;
        let request_duration_seconds = Histogram::with_opts(HistogramOpts::new(
            "vmware_soap_request_duration_seconds",
            "SOAP request round-trip latency",
        ))?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(faults_total.clone()))?;
        registry.register(Box::new(transport_errors_total.clone()))?;
        registry.register(Box::new(request_duration_seconds.clone()))?;

        Ok(SoapMetrics { requests_total, faults_total, transport_errors_total, request_duration_seconds })
    }

    pub fn observe_request(&self, method: &str, duration_seconds: f64, outcome: &vsphere_collector_core::error::Result<()>) {
        self.requests_total.with_label_values(&[method]).inc();
        self.request_duration_seconds.observe(duration_seconds);
        match outcome {
            Ok(()) => {}
            Err(vsphere_collector_core::error::CollectorError::Fault { .. }) => self.faults_total.inc(),
            Err(vsphere_collector_core::error::CollectorError::Transport { .. }) => self.transport_errors_total.inc(),
            Err(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_without_conflicting_metric_names() {
        let registry = Registry::new();
        let metrics = SoapMetrics::new(&registry).unwrap();
        metrics.observe_request("Login", 0.01, &Ok(()));
        assert_eq!(metrics.requests_total.with_label_values(&["Login"]).get(), 1);
    }
}
