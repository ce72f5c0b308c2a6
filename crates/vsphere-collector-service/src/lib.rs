//! # vSphere Collector Service
//!
//! Binary entry point (C15): loads configuration, initializes logging,
//! spawns the collector's scheduler thread, and blocks until a shutdown
//! signal (`SIGINT`/`SIGTERM`) arrives, at which point it joins the
//! scheduler thread for an orderly exit. This binary owns configuration
//! loading, logging initialization, and graceful shutdown; it does not
//! own an RPC/trapper layer, item preprocessor, or SQL layer — those
//! stay external collaborators per the Non-goals.

pub mod shutdown;

use std::time::Duration;

use vsphere_collector_core::config::CollectorConfig;
use vsphere_collector_core::error::CollectorError;
use vsphere_collector_engine::Collector;

/// How often the service logs a statistics summary while idling on the
/// shutdown signal.
const STATS_LOG_INTERVAL: Duration = Duration::from_secs(60);

/// Loads configuration and spawns the scheduler thread, returning a
/// handle callers can read from or shut down. Split out from [`run`] so
/// tests can exercise bootstrap without waiting on a signal.
pub fn bootstrap(config: CollectorConfig) -> Collector {
    log::info!(
        "starting vsphere collector: {} endpoint(s), inventory period {:?}, perf period {:?}",
        config.endpoints.len(),
        config.frequency,
        config.perf_frequency,
    );
    Collector::spawn(config)
}

/// Runs the collector service to completion: loads config from the
/// process environment, spawns the scheduler, logs periodic statistics,
/// and waits for a shutdown signal. Returns once the scheduler thread
/// has joined.
pub async fn run() -> Result<(), CollectorError> {
    let config = CollectorConfig::from_env()?;
    let collector = bootstrap(config);

    let stats_collector = collector.clone();
    let stats_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(STATS_LOG_INTERVAL);
        loop {
            ticker.tick().await;
            log_statistics(&stats_collector);
        }
    });

    shutdown::wait_for_shutdown_signal().await;
    log::info!("shutdown signal received, stopping scheduler");
    stats_task.abort();
    collector.shutdown();
    log::info!("scheduler stopped, exiting");
    Ok(())
}

fn log_statistics(collector: &Collector) {
    let stats = collector.statistics();
    log::info!(
        "collector statistics: services={} ready={} failed={} updating={} interned_strings={} interned_bytes={}",
        stats.service_count,
        stats.ready_count,
        stats.failed_count,
        stats.updating_count,
        stats.interned_strings,
        stats.interned_bytes,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    fn test_config() -> CollectorConfig {
        CollectorConfig {
            endpoints: vec![],
            frequency: StdDuration::from_secs(3600),
            perf_frequency: StdDuration::from_secs(3600),
            service_ttl: StdDuration::from_secs(3600),
            timeout: StdDuration::from_secs(5),
            max_query_metrics_default: 64,
            log_level: "info".into(),
        }
    }

    #[test]
    fn bootstrap_spawns_a_joinable_collector() {
        let collector = bootstrap(test_config());
        let stats = collector.statistics();
        assert_eq!(stats.service_count, 0);
        collector.shutdown();
    }

    #[test]
    fn log_statistics_does_not_panic_on_an_empty_collector() {
        let collector = bootstrap(test_config());
        log_statistics(&collector);
        collector.shutdown();
    }
}
