//! Performance-counter model: entity table, per-counter sample ring, and
//! the counter-path registry populated from `PerformanceManager`.

use std::collections::HashMap;

/// Refresh rate reported by `QueryPerfProviderSummary`, or one of the two
/// special states the vendor protocol can report instead of a concrete
/// interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshRate {
    Seconds(u32),
    Unknown,
    /// Aggregate providers (datastores) report no meaningful interval.
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PerfCounterState {
    New,
    Ready,
    Updating,
}

/// One (instance, value) sample taken during a single `QueryPerf` cycle.
/// `value` is `u64::MAX` for the vendor's "-1"/not-available sentinel as
/// well as any value that fails to parse as `u64`; both cases still
/// propagate so the cache reflects "no data this cycle" rather than
/// silently dropping the entity.
#[derive(Debug, Clone)]
pub struct PerfSample {
    pub instance: String,
    pub value: u64,
}

/// Bounded ring of the most recent samples for one counter id. One value
/// is appended per collection cycle; pushing past `capacity` drops the
/// oldest.
#[derive(Debug, Clone)]
pub struct PerfCounter {
    pub counter_id: u64,
    pub state: PerfCounterState,
    capacity: usize,
    samples: Vec<Vec<PerfSample>>,
}

impl PerfCounter {
    pub fn new(counter_id: u64, capacity: usize) -> Self {
        PerfCounter { counter_id, state: PerfCounterState::New, capacity: capacity.max(1), samples: Vec::new() }
    }

    pub fn push_cycle(&mut self, cycle: Vec<PerfSample>) {
        self.samples.push(cycle);
        if self.samples.len() > self.capacity {
            self.samples.remove(0);
        }
        self.state = PerfCounterState::Ready;
    }

    pub fn latest(&self) -> Option<&[PerfSample]> {
        self.samples.last().map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// One monitored object's performance-counter state. Keyed externally by
/// `(type, id)`, matching `Service::perf_entities`.
#[derive(Debug, Clone)]
pub struct PerfEntity {
    pub entity_type: String,
    pub entity_id: String,
    pub refresh_rate: RefreshRate,
    /// `"*"` for per-instance breakdown (HV, VM) or `""` for aggregate
    /// (Datastore).
    pub query_instance: String,
    pub counters: Vec<PerfCounter>,
    pub last_seen: i64,
    pub error: Option<String>,
}

impl PerfEntity {
    pub fn new(entity_type: impl Into<String>, entity_id: impl Into<String>, query_instance: impl Into<String>) -> Self {
        PerfEntity {
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            refresh_rate: RefreshRate::Unknown,
            query_instance: query_instance.into(),
            counters: Vec::new(),
            last_seen: 0,
            error: None,
        }
    }

    /// True if this entity should be dropped at the start of the next
    /// perf cycle because it was not refreshed in the cycle that just
    /// ended.
    pub fn is_stale(&self, current_cycle_timestamp: i64) -> bool {
        self.last_seen < current_cycle_timestamp
    }
}

/// Maps a full counter path (e.g. `"cpu/usage[average]"`) to the vendor's
/// numeric counter id, populated once from `PerformanceManager` at first
/// connect. Unknown names looked up after construction are logged by the
/// caller and skipped, not treated as an error here.
#[derive(Debug, Clone, Default)]
pub struct CounterRegistry {
    by_path: HashMap<String, u64>,
}

impl CounterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, path: impl Into<String>, id: u64) {
        self.by_path.insert(path.into(), id);
    }

    pub fn resolve(&self, path: &str) -> Option<u64> {
        self.by_path.get(path).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &u64)> {
        self.by_path.iter()
    }

    pub fn len(&self) -> usize {
        self.by_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_path.is_empty()
    }
}

/// Parses a perf value as the source does: any string that fails `u64`
/// parsing, including the literal `"-1"`, becomes the sentinel
/// `u64::MAX`. Returns whether the literal `-1` case was hit, so callers
/// can distinguish "no data this cycle" from a malformed payload in logs.
pub fn parse_perf_value(raw: &str) -> (u64, bool) {
    match raw.parse::<u64>() {
        Ok(v) => (v, false),
        Err(_) => (u64::MAX, raw.trim() == "-1"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_drops_oldest_past_capacity() {
        let mut counter = PerfCounter::new(101, 2);
        counter.push_cycle(vec![PerfSample { instance: "*".into(), value: 1 }]);
        counter.push_cycle(vec![PerfSample { instance: "*".into(), value: 2 }]);
        counter.push_cycle(vec![PerfSample { instance: "*".into(), value: 3 }]);
        assert_eq!(counter.len(), 2);
        assert_eq!(counter.latest().unwrap()[0].value, 3);
    }

    #[test]
    fn parse_perf_value_maps_minus_one_and_garbage_to_max() {
        let (v, was_minus_one) = parse_perf_value("-1");
        assert_eq!(v, u64::MAX);
        assert!(was_minus_one);

        let (v, was_minus_one) = parse_perf_value("not-a-number");
        assert_eq!(v, u64::MAX);
        assert!(!was_minus_one);

        let (v, was_minus_one) = parse_perf_value("42");
        assert_eq!(v, 42);
        assert!(!was_minus_one);
    }

    #[test]
    fn counter_registry_resolves_registered_paths_only() {
        let mut reg = CounterRegistry::new();
        reg.register("cpu/usage[average]", 6);
        assert_eq!(reg.resolve("cpu/usage[average]"), Some(6));
        assert_eq!(reg.resolve("mem/usage[average]"), None);
    }

    #[test]
    fn entity_is_stale_when_not_seen_this_cycle() {
        let mut entity = PerfEntity::new("HostSystem", "host-1", "*");
        entity.last_seen = 100;
        assert!(entity.is_stale(200));
        entity.last_seen = 250;
        assert!(!entity.is_stale(200));
    }
}
