//! Cooperative single-thread scheduler (C10): one background thread that
//! repeatedly picks exactly one due task — removal, performance refresh,
//! or inventory refresh, in that priority order — across every monitored
//! service, runs it with the shared lock released, then re-acquires the
//! lock just long enough to fold the result back in.
//!
//! A plain `std::thread` rather than an async task: each cycle blocks on
//! one HTTP round trip at a time by design, mirroring the source's single
//! collector thread rather than introducing unbounded concurrent requests
//! against one endpoint.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime};

use vsphere_collector_core::config::COMPRESS_PERIOD_SECS;
use vsphere_collector_core::model::{DeepCopy, Service, ServiceState};

use crate::collector::SharedState;
use crate::cycle;

/// Upper bound on how long the scheduler thread sleeps when nothing is
/// due, so a newly-registered service or a shutdown request is noticed
/// promptly rather than after a long nap.
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// How often the loop offers the arena a chance to `compact`, per §4.1:
/// "Compaction is attempted at most once per `COMPRESS_PERIOD` (24 hours)".
const COMPRESS_PERIOD: Duration = Duration::from_secs(COMPRESS_PERIOD_SECS);

/// One task the scheduler can run for a single service, in priority order.
enum Task {
    Remove,
    UpdatePerf,
    Update,
}

/// Owns the background thread driving every registered service's cycle.
pub struct Scheduler {
    shutdown: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub(crate) fn start(shared: Arc<Mutex<SharedState>>) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let thread_shutdown = shutdown.clone();
        let handle = std::thread::Builder::new()
            .name("vsphere-collector-scheduler".into())
            .spawn(move || run_loop(shared, thread_shutdown))
            .expect("failed to spawn scheduler thread");
        Scheduler { shutdown, handle: Mutex::new(Some(handle)) }
    }

    /// Signals the loop to stop after its current task (if any) and blocks
    /// until the thread has joined.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.lock().unwrap_or_else(|p| p.into_inner()).take() {
            let _ = handle.join();
        }
    }
}

fn run_loop(shared: Arc<Mutex<SharedState>>, shutdown: Arc<AtomicBool>) {
    while !shutdown.load(Ordering::SeqCst) {
        maybe_compact(&shared);
        let picked = pick_task(&shared);
        match picked {
            Some((url, Task::Remove)) => {
                let mut state = lock(&shared);
                state.services.remove(&url);
            }
            Some((url, Task::UpdatePerf)) => run_and_fold(&shared, &url, Op::Perf),
            Some((url, Task::Update)) => run_and_fold(&shared, &url, Op::Inventory),
            None => std::thread::sleep(IDLE_POLL_INTERVAL),
        }
    }
}

enum Op {
    Inventory,
    Perf,
}

fn busy_flag(op: &Op) -> ServiceState {
    match op {
        Op::Inventory => ServiceState::UPDATING,
        Op::Perf => ServiceState::UPDATING_PERF,
    }
}

/// Marks the named service busy (`UPDATING`/`UPDATING_PERF`) under the
/// lock, then clones it, runs its cycle with the lock released, and
/// re-acquires the lock to fold the mutated service (and, for an
/// inventory cycle, its freshly built snapshot re-interned into the
/// shared pool) back in. The service itself stays in the shared map for
/// the cycle's whole duration — only the flag marks it busy — so a
/// removal requested mid-cycle latches onto the live entry instead of
/// racing a remove-then-reinsert; the busy flag is cleared unconditionally
/// once the cycle returns, and any `REMOVING` set while it was running is
/// carried over onto the folded-back copy rather than lost.
fn run_and_fold(shared: &Arc<Mutex<SharedState>>, url: &str, op: Op) {
    let (mut service, timeout, max_query_metrics_default) = {
        let mut state = lock(shared);
        let Some(service) = state.services.get_mut(url) else { return };
        service.state |= busy_flag(&op);
        let timeout = state.config.timeout;
        let default_cap = state.config.max_query_metrics_default;
        (service.clone(), timeout, default_cap)
    };

    let is_inventory_cycle = matches!(op, Op::Inventory);
    match op {
        Op::Inventory => cycle::run_inventory_cycle(&mut service, timeout, max_query_metrics_default),
        Op::Perf => cycle::run_perf_cycle(&mut service, timeout),
    }
    service.state &= !busy_flag(&op);

    let mut state = lock(shared);
    if is_inventory_cycle {
        if let Some(inv) = service.data.take() {
            service.data = Some(inv.deep_copy_into(&mut state.pool));
        }
    }
    let Some(slot) = state.services.get_mut(url) else { return };
    if slot.state.contains(ServiceState::REMOVING) {
        service.state |= ServiceState::REMOVING;
    }
    *slot = service;
}

/// Offers the shared arena a chance to shrink to its current high-water
/// mark, but no more than once per [`COMPRESS_PERIOD`] (§4.1). A no-op
/// whenever the arena has no slack to reclaim, or compaction was already
/// attempted within the period — the timestamp advances either way so a
/// tight arena does not retry every tick.
fn maybe_compact(shared: &Arc<Mutex<SharedState>>) {
    let mut state = lock(shared);
    let now = SystemTime::now();
    if due(state.last_compact, COMPRESS_PERIOD, now) {
        state.last_compact = Some(now);
        let shrank = state.pool.arena_mut().compact();
        if shrank {
            log::debug!("arena compacted to {} bytes", state.pool.arena().used());
        }
    }
}

fn lock(shared: &Arc<Mutex<SharedState>>) -> std::sync::MutexGuard<'_, SharedState> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Scans every service once and returns the first task due, in priority
/// order (remove, then perf, then inventory) to avoid starving removals
/// behind a busy endpoint's refresh cadence.
fn pick_task(shared: &Arc<Mutex<SharedState>>) -> Option<(String, Task)> {
    let state = lock(shared);
    let now = SystemTime::now();

    for (url, service) in state.services.iter() {
        if service.state.contains(ServiceState::REMOVING) {
            return Some((url.clone(), Task::Remove));
        }
        if service.is_idle_past(state.config.service_ttl, now) {
            return Some((url.clone(), Task::Remove));
        }
    }
    for (url, service) in state.services.iter() {
        if service.state.is_busy() || service.state.contains(ServiceState::REMOVING) {
            continue;
        }
        if due(service.last_perf, state.config.perf_frequency, now) && service.data.is_some() {
            return Some((url.clone(), Task::UpdatePerf));
        }
    }
    for (url, service) in state.services.iter() {
        if service.state.is_busy() || service.state.contains(ServiceState::REMOVING) {
            continue;
        }
        if due(service.last_inventory, state.config.frequency, now) {
            return Some((url.clone(), Task::Update));
        }
    }
    None
}

fn due(last_run: Option<SystemTime>, period: Duration, now: SystemTime) -> bool {
    match last_run {
        None => true,
        Some(last) => now.duration_since(last).map(|age| age >= period).unwrap_or(true),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn due_is_true_when_never_run() {
        assert!(due(None, Duration::from_secs(60), SystemTime::now()));
    }

    #[test]
    fn due_respects_period() {
        let now = SystemTime::now();
        let last = now - Duration::from_secs(30);
        assert!(!due(Some(last), Duration::from_secs(60), now));
        assert!(due(Some(last), Duration::from_secs(10), now));
    }

    #[test]
    fn service_is_unchanged_check() {
        // Sanity check that Service is Clone-able the way the collector
        // API depends on, without needing a live scheduler thread.
        let svc = Service::new("https://vc.example/sdk", "u", "p", false);
        let cloned = svc.clone();
        assert_eq!(svc.url, cloned.url);
    }

    #[test]
    fn maybe_compact_shrinks_arena_once_per_period_and_updates_timestamp() {
        use vsphere_collector_core::arena::{Arena, StringPool};
        use vsphere_collector_core::config::CollectorConfig;
        use std::collections::HashMap;

        let mut pool = StringPool::new(Arena::reserve(4096));
        pool.strdup_interned(Some("esxi-01")).unwrap();

        let shared = Arc::new(Mutex::new(SharedState {
            pool,
            services: HashMap::new(),
            config: CollectorConfig {
                endpoints: vec![],
                frequency: Duration::from_secs(60),
                perf_frequency: Duration::from_secs(60),
                service_ttl: Duration::from_secs(3600),
                timeout: Duration::from_secs(30),
                max_query_metrics_default: 64,
                log_level: "info".into(),
            },
            last_compact: None,
        }));

        maybe_compact(&shared);
        {
            let state = lock(&shared);
            assert!(state.last_compact.is_some());
            assert_eq!(state.pool.arena().size(), state.pool.arena().used());
        }

        let first_stamp = lock(&shared).last_compact.unwrap();
        maybe_compact(&shared);
        assert_eq!(lock(&shared).last_compact.unwrap(), first_stamp, "second call within the period must not re-stamp");
    }
}
