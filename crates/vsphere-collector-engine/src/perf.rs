//! Performance fetcher (C9): two-pass `QueryPerfProviderSummary` /
//! `QueryPerf` pipeline with an adaptive batch sizer that respects the
//! vendor-imposed `maxQueryMetrics` limit.
//!
//! Phase 1 discovers each entity's refresh rate (or marks it `none` for
//! aggregate-only providers like datastores); phase 2 partitions entities
//! into real-time/historical lists and issues `QueryPerf` batches sized
//! so the total counter count per request never exceeds the applicable
//! cap. The two phases are kept separate because phase 1's result feeds
//! both phase 2's batching strategy and its `intervalId`/`startTime`
//! choice (design note: two-phase perf cycle).

use std::collections::HashMap;

use vsphere_collector_core::config::MAX_QUERY_METRICS_UNLIMITED;
use vsphere_collector_core::error::Result;
use vsphere_collector_core::model::{parse_perf_value, PerfEntity, PerfSample, RefreshRate};
use vsphere_collector_soap::envelope::{self, MethodCall};
use vsphere_collector_soap::transport::SoapTransport;
use vsphere_collector_soap::xml::{self, Document, Element};

/// One-hour lookback window used for historical (`refresh == None`)
/// entities, which carry a `startTime` instead of an `intervalId`.
const HISTORICAL_START_TIME_SECS: i64 = 3600;

/// **Pass 1.** For every entity whose refresh rate is still `Unknown`,
/// issues `QueryPerfProviderSummary` and resolves it to one of:
/// aggregate-only (`RefreshRate::None`), a concrete interval, or left
/// `Unknown` with an error logged (and the entity skipped in pass 2).
pub fn discover_refresh_rates(transport: &SoapTransport, entities: &mut HashMap<(String, String), PerfEntity>) {
    for entity in entities.values_mut() {
        if entity.refresh_rate != RefreshRate::Unknown {
            continue;
        }
        match query_perf_provider_summary(transport, &entity.entity_type, &entity.entity_id) {
            Ok(rate) => entity.refresh_rate = rate,
            Err(e) => {
                log::error!(
                    "QueryPerfProviderSummary failed for {}:{}: {e}",
                    entity.entity_type,
                    entity.entity_id
                );
            }
        }
    }
}

fn query_perf_provider_summary(transport: &SoapTransport, entity_type: &str, entity_id: &str) -> Result<RefreshRate> {
    let body = MethodCall::new("QueryPerfProviderSummary")
        .moref("_this", "PerformanceManager", "PerfMgr")
        .moref("entity", entity_type, entity_id)
        .finish("QueryPerfProviderSummary");
    let doc = transport.post(&envelope::wrap(&body))?;

    let currently_supported = xml::read_doc_value(&doc, &["Body", "*", "returnval", "currentSupported"]);
    if currently_supported.as_deref() == Some("false") {
        return Ok(RefreshRate::None);
    }

    match xml::read_doc_value(&doc, &["Body", "*", "returnval", "refreshRate"]).and_then(|v| v.parse::<i64>().ok()) {
        Some(v) if (1..=i32::MAX as i64).contains(&v) => Ok(RefreshRate::Seconds(v as u32)),
        _ => Ok(RefreshRate::Unknown),
    }
}

/// **Pass 2.** Partitions entities into real-time and historical lists,
/// assembles `QueryPerf` batches respecting `real_time_cap`/`historical_cap`,
/// and writes fresh samples back onto each entity's counters. Entities
/// still at `RefreshRate::Unknown` (pass 1 failed or was never run) are
/// skipped entirely.
pub fn fetch_values(
    transport: &SoapTransport,
    entities: &mut HashMap<(String, String), PerfEntity>,
    historical_cap: i32,
) {
    let real_time_cap = MAX_QUERY_METRICS_UNLIMITED as usize;
    let historical_cap = historical_cap.max(1) as usize;

    let mut real_time_keys = Vec::new();
    let mut historical_keys = Vec::new();
    for (key, entity) in entities.iter() {
        match entity.refresh_rate {
            RefreshRate::Seconds(_) => real_time_keys.push(key.clone()),
            RefreshRate::None => historical_keys.push(key.clone()),
            RefreshRate::Unknown => {}
        }
    }

    run_batches(transport, entities, &real_time_keys, real_time_cap, false);
    run_batches(transport, entities, &historical_keys, historical_cap, true);
}

fn run_batches(
    transport: &SoapTransport,
    entities: &mut HashMap<(String, String), PerfEntity>,
    keys: &[(String, String)],
    cap: usize,
    historical: bool,
) {
    let counts: Vec<usize> = keys.iter().map(|k| entities[k].counters.len()).collect();
    let plan = plan_batches(&counts, cap);

    for batch in plan {
        if batch.is_empty() {
            continue;
        }
        let request_entities: Vec<BatchEntity> = batch
            .iter()
            .map(|&(idx, start, len)| {
                let key = &keys[idx];
                let entity = &entities[key];
                BatchEntity {
                    entity_type: entity.entity_type.clone(),
                    entity_id: entity.entity_id.clone(),
                    query_instance: entity.query_instance.clone(),
                    counter_ids: entity.counters[start..start + len].iter().map(|c| c.counter_id).collect(),
                    historical,
                }
            })
            .collect();

        match query_perf(transport, &request_entities) {
            Ok(doc) => apply_perf_response(&doc, entities, &request_entities),
            Err(e) => {
                log::error!("QueryPerf batch failed ({} entities): {e}", request_entities.len());
                for be in &request_entities {
                    if let Some(entity) = entities.get_mut(&(be.entity_type.clone(), be.entity_id.clone())) {
                        entity.error = Some(e.to_string());
                    }
                }
            }
        }
    }
}

struct BatchEntity {
    entity_type: String,
    entity_id: String,
    query_instance: String,
    counter_ids: Vec<u64>,
    historical: bool,
}

fn query_perf(transport: &SoapTransport, entities: &[BatchEntity]) -> Result<Document> {
    let mut entity_xml = String::new();
    for e in entities {
        let metrics: String = e
            .counter_ids
            .iter()
            .map(|id| {
                format!(
                    "<ns0:metricId><ns0:counterId>{id}</ns0:counterId><ns0:instance>{}</ns0:instance></ns0:metricId>",
                    envelope::escape(&e.query_instance)
                )
            })
            .collect();
        let interval = if e.historical {
            format!("<ns0:startTime>{}</ns0:startTime>", HISTORICAL_START_TIME_SECS)
        } else {
            "<ns0:intervalId>20</ns0:intervalId>".to_string()
        };
        entity_xml.push_str(&format!(
            "<ns0:querySpec><ns0:entity type=\"{}\">{}</ns0:entity>{interval}<ns0:maxSample>1</ns0:maxSample>{metrics}</ns0:querySpec>",
            envelope::escape(&e.entity_type),
            envelope::escape(&e.entity_id),
        ));
    }

    let body = MethodCall::new("QueryPerf")
        .moref("_this", "PerformanceManager", "PerfMgr")
        .raw(&entity_xml)
        .finish("QueryPerf");
    transport.post(&envelope::wrap(&body))
}

fn apply_perf_response(doc: &Document, entities: &mut HashMap<(String, String), PerfEntity>, requested: &[BatchEntity]) {
    let returned = xml::descend(&doc.root, &["Body", "*", "returnval"]);
    for (node, requested_entity) in returned.iter().zip(requested.iter()) {
        let key = (requested_entity.entity_type.clone(), requested_entity.entity_id.clone());
        let Some(entity) = entities.get_mut(&key) else { continue };

        let samples_by_counter = parse_perf_entity_response(node);
        for counter in entity.counters.iter_mut() {
            if let Some(samples) = samples_by_counter.get(&counter.counter_id) {
                counter.push_cycle(samples.clone());
            }
        }
        entity.error = None;
    }
}

/// Parses one `<returnval>` child of a `QueryPerfResponse`: a header
/// naming the entity plus a list of `(counterId, instance, value)`
/// tuples, grouped here by counter id.
fn parse_perf_entity_response(node: &Element) -> HashMap<u64, Vec<PerfSample>> {
    let mut out: HashMap<u64, Vec<PerfSample>> = HashMap::new();
    for series in xml::descend(node, &["value"]) {
        let Some(counter_id) = xml::read_node_value(series, &["id", "counterId"]).and_then(|v| v.parse().ok()) else {
            continue;
        };
        let instance = xml::read_node_value(series, &["id", "instance"]).unwrap_or_default();
        let Some(raw_value) = xml::read_node_value(series, &["value"]).and_then(|v| v.split(',').next_back().map(str::to_string)) else {
            continue;
        };
        let (value, was_literal_minus_one) = parse_perf_value(&raw_value);
        if was_literal_minus_one {
            log::debug!("counter {counter_id} instance '{instance}' reported -1 (no data this cycle)");
        } else if value == u64::MAX {
            log::debug!("counter {counter_id} instance '{instance}' value '{raw_value}' failed to parse as u64");
        }
        out.entry(counter_id).or_default().push(PerfSample { instance, value });
    }
    out
}

/// Partitions `counts[i]` counters per entity `i` into batches whose
/// total counter count never exceeds `cap`. An entity whose remaining
/// counters exceed the current batch's remaining budget is split across
/// batches, continuing from its last `start` index (scenario: batch
/// sizing with `maxQueryMetrics` smaller than a single entity's counter
/// count).
fn plan_batches(counts: &[usize], cap: usize) -> Vec<Vec<(usize, usize, usize)>> {
    let mut batches = Vec::new();
    let mut current = Vec::new();
    let mut current_total = 0usize;
    let mut idx = 0;
    let mut start = 0usize;

    while idx < counts.len() {
        if counts[idx] == 0 {
            idx += 1;
            start = 0;
            continue;
        }
        if current_total == cap {
            batches.push(std::mem::take(&mut current));
            current_total = 0;
            continue;
        }
        let remaining_in_entity = counts[idx] - start;
        let remaining_budget = cap - current_total;
        let take = remaining_in_entity.min(remaining_budget);

        current.push((idx, start, take));
        current_total += take;
        start += take;
        if start == counts[idx] {
            idx += 1;
            start = 0;
        }
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_plan_splits_entities_across_batches_per_scenario_5() {
        let plan = plan_batches(&[50, 50, 50], 64);
        assert_eq!(plan.len(), 3);
        assert_eq!(plan[0], vec![(0, 0, 50), (1, 0, 14)]);
        assert_eq!(plan[1], vec![(1, 14, 36), (2, 0, 28)]);
        assert_eq!(plan[2], vec![(2, 28, 22)]);

        let total: usize = plan.iter().flatten().map(|(_, _, len)| len).sum();
        assert_eq!(total, 150);
    }

    #[test]
    fn batch_plan_respects_cap_per_batch() {
        let plan = plan_batches(&[10, 10, 10], 15);
        for batch in &plan {
            let sum: usize = batch.iter().map(|(_, _, len)| len).sum();
            assert!(sum <= 15);
        }
    }

    #[test]
    fn batch_plan_handles_entity_smaller_than_cap() {
        let plan = plan_batches(&[5], 64);
        assert_eq!(plan, vec![vec![(0, 0, 5)]]);
    }

    proptest::proptest! {
        /// §8: "for every `QueryPerf` batch `B`, `Σ (entity.counter_count_in_batch) ≤ cap(entity_class)`",
        /// and every counter assigned by a batch plan is assigned exactly once overall.
        #[test]
        fn batch_plan_never_exceeds_cap_and_covers_every_counter(
            counts in proptest::collection::vec(0usize..40, 0..12),
            cap in 1usize..64,
        ) {
            let plan = plan_batches(&counts, cap);
            for batch in &plan {
                let sum: usize = batch.iter().map(|(_, _, len)| len).sum();
                proptest::prop_assert!(sum <= cap);
            }
            let mut covered = vec![0usize; counts.len()];
            for (idx, start, len) in plan.iter().flatten() {
                proptest::prop_assert_eq!(*start, covered[*idx]);
                covered[*idx] += len;
            }
            proptest::prop_assert_eq!(covered, counts);
        }
    }

    #[test]
    fn parse_perf_entity_response_maps_minus_one_to_sentinel() {
        let node = xml::parse(
            br#"<returnval>
                <value><id><counterId>6</counterId><instance>*</instance></id><value>-1</value></value>
                <value><id><counterId>7</counterId><instance>vmnic0</instance></id><value>1234</value></value>
            </returnval>"#,
        )
        .unwrap()
        .root;
        let samples = parse_perf_entity_response(&node);
        assert_eq!(samples[&6][0].value, u64::MAX);
        assert_eq!(samples[&7][0].value, 1234);
    }
}
