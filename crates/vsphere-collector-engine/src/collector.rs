//! Public read API (C11): the process-wide handle callers use to register
//! endpoints and read back inventory/performance data the scheduler keeps
//! current. Every accessor takes the single global lock for the duration
//! of one read; none of them ever block on network I/O themselves.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;

use vsphere_collector_core::arena::{Arena, StringPool};
use vsphere_collector_core::config::CollectorConfig;
use vsphere_collector_core::model::{Inventory, PerfCounter, PerfEntity, Service, ServiceState};

use crate::scheduler::Scheduler;

/// Initial arena capacity for the shared string pool. Chosen generously
/// large relative to a typical endpoint's string footprint; the arena does
/// not currently grow past this, see `DESIGN.md`.
const INITIAL_ARENA_BYTES: usize = 1024 * 1024;

/// Everything the scheduler and the read API share under one lock.
pub(crate) struct SharedState {
    pub(crate) pool: StringPool,
    pub(crate) services: HashMap<String, Service>,
    pub(crate) config: CollectorConfig,
    /// When the arena was last offered a chance to `compact`, so the
    /// scheduler can honour the once-per-`COMPRESS_PERIOD` cap from §4.1
    /// rather than shrinking the buffer on every idle tick.
    pub(crate) last_compact: Option<SystemTime>,
}

/// Point-in-time counts mirroring what callers (and, with the `monitoring`
/// feature, Prometheus) can observe about the collector's health.
#[derive(Debug, Clone, Default)]
pub struct CollectorStatistics {
    pub service_count: usize,
    pub ready_count: usize,
    pub failed_count: usize,
    pub updating_count: usize,
    pub interned_strings: usize,
    pub interned_bytes: usize,
}

/// Process-wide handle: owns the shared state and the scheduler thread
/// that keeps it current. Cloning shares the same underlying state (it is
/// a thin `Arc` wrapper around a single global lock), matching the
/// teacher's registry-handle pattern.
#[derive(Clone)]
pub struct Collector {
    shared: Arc<Mutex<SharedState>>,
    scheduler: Arc<Scheduler>,
}

impl Collector {
    /// Spawns the scheduler thread and returns a handle. `config.endpoints`
    /// seeds the initial set of monitored services; more can be registered
    /// later with [`Collector::add_service`].
    pub fn spawn(config: CollectorConfig) -> Self {
        let mut services = HashMap::new();
        for endpoint in &config.endpoints {
            services.insert(
                endpoint.url.clone(),
                Service::new(
                    endpoint.url.clone(),
                    endpoint.username.clone(),
                    endpoint.password.clone(),
                    endpoint.tls_verify,
                ),
            );
        }
        let shared = Arc::new(Mutex::new(SharedState {
            pool: StringPool::new(Arena::reserve(INITIAL_ARENA_BYTES)),
            services,
            config,
            last_compact: None,
        }));
        let scheduler = Arc::new(Scheduler::start(shared.clone()));
        Collector { shared, scheduler }
    }

    /// Registers (or replaces) a monitored endpoint. TLS verification is
    /// disabled for endpoints registered this way, matching the
    /// transport's documented default; endpoints needing verification must
    /// be seeded through `config.endpoints` at [`Collector::spawn`] time.
    pub fn add_service(&self, url: impl Into<String>, username: impl Into<String>, password: impl Into<String>) {
        let url = url.into();
        let mut state = self.lock();
        state.services.insert(url.clone(), Service::new(url, username, password, false));
    }

    /// The C11 `get_service` contract verbatim: a poller worker's single
    /// entry point. A hit on a service that has completed at least one
    /// cycle (ready or failed) touches `last_access` and returns it; a
    /// miss registers a stub (`state=new`) for the scheduler to pick up
    /// and returns `None` either way, since a brand-new or still-cycling
    /// service has nothing ready to serve yet.
    pub fn get_service_or_register(&self, url: &str, username: &str, password: &str) -> Option<Service> {
        let mut state = self.lock();
        match state.services.get_mut(url) {
            Some(service) if service.state.has_completed_a_cycle() => {
                service.touch();
                Some(service.clone())
            }
            Some(_) => None,
            None => {
                state.services.insert(url.to_string(), Service::new(url, username, password, false));
                None
            }
        }
    }

    /// Marks a service for removal. The scheduler drops it on its next
    /// pass rather than here, so an in-flight cycle is never interrupted
    /// mid-request.
    pub fn remove_service(&self, url: &str) {
        let mut state = self.lock();
        if let Some(service) = state.services.get_mut(url) {
            service.state |= ServiceState::REMOVING;
        }
    }

    /// Returns a clone of the named service's current state, or `None` if
    /// it is not (or no longer) monitored. A hit counts as access and
    /// pushes back the idle-TTL eviction the scheduler would otherwise
    /// perform.
    pub fn get_service(&self, url: &str) -> Option<Service> {
        let mut state = self.lock();
        let service = state.services.get_mut(url)?;
        service.touch();
        Some(service.clone())
    }

    /// Returns the current inventory snapshot for `url`, if the service
    /// has completed at least one cycle. Also counts as access, per
    /// [`Collector::get_service`].
    pub fn get_inventory(&self, url: &str) -> Option<Inventory> {
        let mut state = self.lock();
        let service = state.services.get_mut(url)?;
        service.touch();
        service.data.clone()
    }

    /// Resolves a counter path to its vendor-assigned numeric id for the
    /// named service, if the counter registry has been populated yet.
    pub fn get_counterid(&self, url: &str, path: &str) -> Option<u64> {
        self.lock().services.get(url).and_then(|s| s.counter_ids.get(path).copied())
    }

    /// Registers interest in one additional performance counter on the
    /// named entity, adding it to the entity's tracked set if not already
    /// present (creating the entity if it doesn't exist yet). No-op if the
    /// service itself is not known.
    pub fn add_perf_counter(&self, url: &str, entity_type: &str, entity_id: &str, counter_id: u64) {
        let mut state = self.lock();
        let Some(service) = state.services.get_mut(url) else { return };
        let key = (entity_type.to_string(), entity_id.to_string());
        let entity = service.perf_entities.entry(key).or_insert_with(|| PerfEntity::new(entity_type, entity_id, "*"));
        if !entity.counters.iter().any(|c| c.counter_id == counter_id) {
            entity.counters.push(PerfCounter::new(counter_id, 1));
        }
    }

    /// Returns a clone of one tracked performance entity.
    pub fn get_perf_entity(&self, url: &str, entity_type: &str, entity_id: &str) -> Option<PerfEntity> {
        self.lock()
            .services
            .get(url)
            .and_then(|s| s.perf_entities.get(&(entity_type.to_string(), entity_id.to_string())))
            .cloned()
    }

    /// Aggregate counts across every monitored service, plus the shared
    /// string pool's size.
    pub fn statistics(&self) -> CollectorStatistics {
        let state = self.lock();
        let mut stats = CollectorStatistics {
            service_count: state.services.len(),
            interned_strings: state.pool.len(),
            interned_bytes: state.pool.arena().used(),
            ..Default::default()
        };
        for service in state.services.values() {
            if service.state.contains(ServiceState::READY) {
                stats.ready_count += 1;
            }
            if service.state.contains(ServiceState::FAILED) {
                stats.failed_count += 1;
            }
            if service.state.is_busy() {
                stats.updating_count += 1;
            }
        }
        stats
    }

    /// Explicit lock, exposed for callers (and the scheduler) that need to
    /// perform more than one read/write under a single critical section.
    pub(crate) fn lock(&self) -> MutexGuard<'_, SharedState> {
        self.shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Signals the scheduler thread to stop after its current task and
    /// blocks until it has joined.
    pub fn shutdown(self) {
        self.scheduler.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_config() -> CollectorConfig {
        CollectorConfig {
            endpoints: vec![],
            frequency: Duration::from_secs(3600),
            perf_frequency: Duration::from_secs(3600),
            service_ttl: Duration::from_secs(3600),
            timeout: Duration::from_secs(30),
            max_query_metrics_default: 64,
            log_level: "info".into(),
        }
    }

    #[test]
    fn add_and_read_back_a_service() {
        let collector = Collector::spawn(test_config());
        collector.add_service("https://vc.example/sdk", "user", "pass");
        let service = collector.get_service("https://vc.example/sdk").unwrap();
        assert_eq!(service.username, "user");
        collector.shutdown();
    }

    #[test]
    fn get_service_or_register_returns_none_on_first_miss_but_registers_a_stub() {
        let collector = Collector::spawn(test_config());
        let result = collector.get_service_or_register("https://vc.example/sdk", "user", "pass");
        assert!(result.is_none());
        let stub = collector.get_service("https://vc.example/sdk").unwrap();
        assert_eq!(stub.state, ServiceState::NEW);
        collector.shutdown();
    }

    #[test]
    fn get_service_or_register_returns_none_while_still_new() {
        let collector = Collector::spawn(test_config());
        collector.get_service_or_register("https://vc.example/sdk", "user", "pass");
        let second = collector.get_service_or_register("https://vc.example/sdk", "user", "pass");
        assert!(second.is_none(), "a service with no completed cycle yet must not be served");
        collector.shutdown();
    }

    #[test]
    fn add_perf_counter_creates_entity_on_demand() {
        let collector = Collector::spawn(test_config());
        collector.add_service("https://esx.example/sdk", "user", "pass");
        collector.add_perf_counter("https://esx.example/sdk", "HostSystem", "host-1", 6);
        let entity = collector.get_perf_entity("https://esx.example/sdk", "HostSystem", "host-1").unwrap();
        assert_eq!(entity.counters.len(), 1);
        assert_eq!(entity.counters[0].counter_id, 6);
        collector.shutdown();
    }

    #[test]
    fn statistics_counts_registered_services() {
        let collector = Collector::spawn(test_config());
        collector.add_service("https://vc.example/sdk", "user", "pass");
        let stats = collector.statistics();
        assert_eq!(stats.service_count, 1);
        collector.shutdown();
    }

    #[test]
    fn remove_service_marks_removing_without_deleting_immediately() {
        let collector = Collector::spawn(test_config());
        collector.add_service("https://vc.example/sdk", "user", "pass");
        collector.remove_service("https://vc.example/sdk");
        let service = collector.get_service("https://vc.example/sdk").unwrap();
        assert!(service.state.contains(ServiceState::REMOVING));
        collector.shutdown();
    }

    /// Regression test for the race the scheduler's fold-back design must
    /// avoid: a removal requested while a cycle is in flight (`UPDATING`
    /// set) must still latch, because the service stays in the map for
    /// the cycle's whole duration rather than being briefly absent.
    #[test]
    fn remove_service_during_in_flight_cycle_is_not_lost() {
        let collector = Collector::spawn(test_config());
        collector.add_service("https://vc.example/sdk", "user", "pass");
        {
            let mut state = collector.lock();
            let service = state.services.get_mut("https://vc.example/sdk").unwrap();
            service.state |= ServiceState::UPDATING;
        }
        collector.remove_service("https://vc.example/sdk");
        let service = collector.get_service("https://vc.example/sdk").unwrap();
        assert!(service.state.contains(ServiceState::REMOVING));
        assert!(service.state.contains(ServiceState::UPDATING), "removal must not clobber the in-flight flag");
        collector.shutdown();
    }
}
