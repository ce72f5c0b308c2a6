//! Orchestrates one full update cycle (inventory, C6) or one performance
//! cycle (C9) for a single [`Service`], wiring together auth, inventory,
//! event-tail and performance-fetch into the sequence the scheduler
//! drives.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use vsphere_collector_core::model::{PerfEntity, Service, ServiceState, ServiceType};
use vsphere_collector_soap::transport::{SoapTransport, TransportConfig};

use crate::{auth, events, inventory, perf};

/// Fixed counter-path lists resolved through the counter registry at the
/// end of each inventory cycle. Unknown names are logged and skipped,
/// never treated as a cycle error.
const HV_COUNTER_PATHS: &[&str] =
    &["cpu/usage[average]", "mem/usage[average]", "net/usage[average]", "disk/usage[average]"];
const VM_COUNTER_PATHS: &[&str] = &["cpu/usage[average]", "cpu/ready[summation]", "mem/usage[average]", "disk/usage[average]"];
const DS_COUNTER_PATHS: &[&str] = &["disk/used[latest]", "disk/provisioned[latest]"];

fn now_unix() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0)
}

/// Runs one inventory cycle against `service`, mutating it in place:
/// `data`, `version`, `full_name`, `counter_ids`, `event_last_key` and
/// `event_skip_old` are all updated on success. Per the propagation
/// policy, transport/parse/fault errors are captured onto the built
/// inventory's `error` field and the (partial) snapshot is still
/// promoted; only an authentication failure aborts the cycle with no
/// promotion at all.
pub fn run_inventory_cycle(service: &mut Service, timeout: std::time::Duration, max_query_metrics_default: i32) {
    let transport = match SoapTransport::new(TransportConfig {
        endpoint_url: service.url.clone(),
        timeout,
        source_ip: None,
        tls_verify: service.tls_verify,
    }) {
        Ok(t) => t,
        Err(e) => {
            log::error!("failed to build SOAP transport for {}: {e}", service.url);
            service.state |= ServiceState::FAILED;
            return;
        }
    };

    let auth_result = auth::authenticate(&transport, &service.username, &service.password, service.service_type);
    let auth_result = match auth_result {
        Ok(r) => r,
        Err(e) => {
            log::error!("authentication failed for {}: {e}", service.url);
            service.state |= ServiceState::FAILED;
            return;
        }
    };
    service.set_service_type(auth_result.service_type);
    if let Some(full_name) = auth_result.full_name {
        service.full_name = Some(full_name);
    }

    let mut cycle_error = None;

    if service.version.is_none() || service.counter_ids.is_empty() {
        match inventory::fetch_service_content(&transport) {
            Ok((version, full_name)) => {
                service.version = Some(version);
                service.full_name = Some(full_name);
            }
            Err(e) => {
                cycle_error.get_or_insert(e.to_string());
            }
        }
        match inventory::fetch_counter_registry(&transport) {
            Ok(registry) => {
                for (path, id) in registry.iter() {
                    service.counter_ids.insert(path.clone(), *id);
                }
            }
            Err(e) => {
                cycle_error.get_or_insert(e.to_string());
            }
        }
    }

    let built = build_inventory(&transport, service, max_query_metrics_default, &mut cycle_error);

    if let Some(mut inv) = built {
        inv.error = cycle_error.clone();

        if !service.event_skip_old {
            match events::tail_events(&transport, service.event_last_key) {
                Ok(tail) => {
                    inv.events = tail.events;
                    service.event_last_key = Some(tail.last_key);
                }
                Err(e) => {
                    log::error!("event tail failed for {}: {e}", service.url);
                }
            }
        } else {
            match events::fetch_latest_event_only(&transport) {
                Ok(Some(event)) => {
                    service.event_last_key = Some(event.key);
                    inv.events = vec![event];
                }
                Ok(None) => {}
                Err(e) => log::error!("latest-event fetch failed for {}: {e}", service.url),
            }
            service.event_skip_old = false;
        }

        reconcile_perf_entities(service, &inv);

        service.data = Some(inv);
        service.last_inventory = Some(SystemTime::now());
        service.state &= !(ServiceState::UPDATING);
        if cycle_error.is_some() {
            service.state |= ServiceState::FAILED;
            service.state &= !ServiceState::READY;
        } else {
            service.state |= ServiceState::READY;
            service.state &= !ServiceState::FAILED;
        }
    } else {
        service.state |= ServiceState::FAILED;
    }

    let _ = auth::logout(&transport).map_err(|e| log::warn!("logout failed for {}: {e}", service.url));
}

fn build_inventory(
    transport: &SoapTransport,
    service: &Service,
    max_query_metrics_default: i32,
    cycle_error: &mut Option<String>,
) -> Option<vsphere_collector_core::model::Inventory> {
    let morefs = match inventory::enumerate_hosts_and_datastores(transport) {
        Ok(m) => m,
        Err(e) => {
            cycle_error.get_or_insert(e.to_string());
            Vec::new()
        }
    };

    let host_ids: Vec<String> =
        morefs.iter().filter(|m| m.moref_type == "HostSystem").map(|m| m.id.clone()).collect();
    let ds_ids: Vec<String> =
        morefs.iter().filter(|m| m.moref_type == "Datastore").map(|m| m.id.clone()).collect();

    let version = service.version.clone().unwrap_or_default();
    let mut datastores = match inventory::fetch_datastores(transport, &ds_ids, service.service_type, &version) {
        Ok(d) => d,
        Err(e) => {
            cycle_error.get_or_insert(e.to_string());
            HashMap::new()
        }
    };

    let hypervisors = match inventory::fetch_hypervisors(transport, &host_ids, &mut datastores, service.service_type) {
        Ok(h) => h,
        Err(e) => {
            cycle_error.get_or_insert(e.to_string());
            HashMap::new()
        }
    };

    let hv_vm_ids: HashMap<String, Vec<String>> =
        hypervisors.iter().map(|(id, hv)| (id.clone(), hv.vm_ids.clone())).collect();
    let virtual_machines = match inventory::fetch_virtual_machines(transport, &hv_vm_ids, service.service_type) {
        Ok(v) => v,
        Err(e) => {
            cycle_error.get_or_insert(e.to_string());
            HashMap::new()
        }
    };

    let clusters = if service.service_type == ServiceType::VCenter {
        match inventory::fetch_clusters(transport) {
            Ok(c) => c,
            Err(e) => {
                cycle_error.get_or_insert(e.to_string());
                HashMap::new()
            }
        }
    } else {
        HashMap::new()
    };

    let max_query_metrics = if service.service_type == ServiceType::VCenter {
        match inventory::fetch_max_query_metrics(transport) {
            Ok(reported) => inventory::resolve_max_query_metrics(reported),
            Err(e) => {
                cycle_error.get_or_insert(e.to_string());
                max_query_metrics_default
            }
        }
    } else {
        max_query_metrics_default
    };

    Some(inventory::assemble_inventory(datastores, hypervisors, virtual_machines, clusters, max_query_metrics))
}

/// Populates `service.perf_entities` from the just-built inventory: one
/// entity per hypervisor (query-instance `"*"`), one per VM (`"*"`), and
/// one per datastore on vCenter endpoints (aggregate, `""`). Entities no
/// longer present in the new inventory are dropped.
fn reconcile_perf_entities(service: &mut Service, inventory: &vsphere_collector_core::model::Inventory) {
    let mut fresh: HashMap<(String, String), PerfEntity> = HashMap::new();

    for hv in inventory.hypervisors.values() {
        let key = ("HostSystem".to_string(), hv.id.clone());
        let mut entity = service.perf_entities.remove(&key).unwrap_or_else(|| PerfEntity::new("HostSystem", &hv.id, "*"));
        ensure_counters(&mut entity, HV_COUNTER_PATHS, &service.counter_ids);
        fresh.insert(key, entity);
    }
    for hv in inventory.hypervisors.values() {
        for vm_id in &hv.vm_ids {
            let key = ("VirtualMachine".to_string(), vm_id.clone());
            let mut entity =
                service.perf_entities.remove(&key).unwrap_or_else(|| PerfEntity::new("VirtualMachine", vm_id, "*"));
            ensure_counters(&mut entity, VM_COUNTER_PATHS, &service.counter_ids);
            fresh.insert(key, entity);
        }
    }
    if service.service_type == ServiceType::VCenter {
        for ds in inventory.datastores.values() {
            let key = ("Datastore".to_string(), ds.id.clone());
            let mut entity =
                service.perf_entities.remove(&key).unwrap_or_else(|| PerfEntity::new("Datastore", &ds.id, ""));
            ensure_counters(&mut entity, DS_COUNTER_PATHS, &service.counter_ids);
            fresh.insert(key, entity);
        }
    }

    service.perf_entities = fresh;
}

fn ensure_counters(entity: &mut PerfEntity, paths: &[&str], counter_ids: &HashMap<String, u64>) {
    for path in paths {
        let Some(&id) = counter_ids.get(*path) else {
            log::warn!("counter path '{path}' not found in registry for entity {}:{}", entity.entity_type, entity.entity_id);
            continue;
        };
        if !entity.counters.iter().any(|c| c.counter_id == id) {
            entity.counters.push(vsphere_collector_core::model::PerfCounter::new(id, 1));
        }
    }
}

/// Runs one performance cycle: evicts entities that were not refreshed
/// in the previous perf cycle, then drives phase 1 (refresh-rate
/// discovery) and phase 2 (`QueryPerf` value fetch) over what remains.
pub fn run_perf_cycle(service: &mut Service, timeout: std::time::Duration) {
    let cycle_start = now_unix();
    service.perf_entities.retain(|_, entity| !entity.is_stale(cycle_start));

    let transport = match SoapTransport::new(TransportConfig {
        endpoint_url: service.url.clone(),
        timeout,
        source_ip: None,
        tls_verify: service.tls_verify,
    }) {
        Ok(t) => t,
        Err(e) => {
            log::error!("failed to build SOAP transport for perf cycle on {}: {e}", service.url);
            return;
        }
    };

    let auth_result = auth::authenticate(&transport, &service.username, &service.password, service.service_type);
    if let Err(e) = auth_result {
        log::error!("authentication failed for perf cycle on {}: {e}", service.url);
        return;
    }

    perf::discover_refresh_rates(&transport, &mut service.perf_entities);

    let historical_cap =
        service.data.as_ref().map(|d| d.max_query_metrics).unwrap_or(vsphere_collector_core::config::DEFAULT_MAX_QUERY_METRICS);
    perf::fetch_values(&transport, &mut service.perf_entities, historical_cap);

    for entity in service.perf_entities.values_mut() {
        entity.last_seen = cycle_start;
    }

    service.last_perf = Some(SystemTime::now());
    service.state &= !ServiceState::UPDATING_PERF;

    let _ = auth::logout(&transport).map_err(|e| log::warn!("logout failed after perf cycle for {}: {e}", service.url));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_counters_skips_unknown_paths_without_erroring() {
        let mut entity = PerfEntity::new("HostSystem", "host-1", "*");
        let registry = HashMap::from([("cpu/usage[average]".to_string(), 6u64)]);
        ensure_counters(&mut entity, &["cpu/usage[average]", "nonexistent/path[average]"], &registry);
        assert_eq!(entity.counters.len(), 1);
        assert_eq!(entity.counters[0].counter_id, 6);
    }

    #[test]
    fn ensure_counters_is_idempotent() {
        let mut entity = PerfEntity::new("HostSystem", "host-1", "*");
        let registry = HashMap::from([("cpu/usage[average]".to_string(), 6u64)]);
        ensure_counters(&mut entity, &["cpu/usage[average]"], &registry);
        ensure_counters(&mut entity, &["cpu/usage[average]"], &registry);
        assert_eq!(entity.counters.len(), 1);
    }
}
