//! Inventory snapshot: Hypervisor, VirtualMachine, Datastore, Cluster,
//! Event, Device, FileSystem, and the `Inventory` tree that roots them.

use std::collections::HashMap;

use super::DeepCopy;
use crate::arena::StringPool;

/// Typed property slots for a [`Hypervisor`], drawn from the vendor's
/// `hv_propmap` table. Unsupported/missing properties on older hosts
/// default to empty string rather than erroring.
#[derive(Debug, Clone, Default)]
pub struct HypervisorProps {
    pub name: String,
    pub hw_uuid: String,
    pub hw_model: String,
    pub hw_vendor: String,
    pub memory_size: String,
    pub cpu_model: String,
    pub cpu_cores: String,
    pub cpu_threads: String,
    pub cpu_mhz: String,
    pub os_full_name: String,
    pub product_name: String,
    pub product_version: String,
    pub sensor_status: String,
}

#[derive(Debug, Clone)]
pub struct Hypervisor {
    pub hw_uuid: String,
    pub id: String,
    pub cluster_id: Option<String>,
    pub datacenter_name: String,
    pub parent_name: String,
    pub parent_type: String,
    pub props: HypervisorProps,
    pub datastore_names: Vec<String>,
    pub vm_ids: Vec<String>,
}

impl DeepCopy for Hypervisor {
    fn deep_copy_into(&self, dest: &mut StringPool) -> Self {
        for s in std::iter::once(&self.hw_uuid)
            .chain(std::iter::once(&self.id))
            .chain(self.datastore_names.iter())
            .chain(self.vm_ids.iter())
        {
            let _ = dest.strdup_interned(Some(s));
        }
        self.clone()
    }
}

/// Typed property slots for a [`VirtualMachine`], drawn from the vendor's
/// `vm_propmap` table.
#[derive(Debug, Clone, Default)]
pub struct VirtualMachineProps {
    pub name: String,
    pub folder: String,
    pub snapshot: String,
    pub num_cpu: String,
    pub num_cores_per_socket: String,
    pub memory_size_mb: String,
    pub guest_full_name: String,
    pub guest_host_name: String,
    pub guest_ip_address: String,
    pub power_state: String,
    pub tools_status: String,
    pub cpu_reservation: String,
    pub memory_reservation: String,
    pub template: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Nic,
    Disk,
}

#[derive(Debug, Clone)]
pub struct Device {
    pub kind: DeviceKind,
    pub instance: String,
    pub label: String,
}

#[derive(Debug, Clone)]
pub struct FileSystem {
    pub path: String,
    pub capacity: u64,
    pub free: u64,
}

#[derive(Debug, Clone)]
pub struct VirtualMachine {
    pub uuid: String,
    pub id: String,
    pub props: VirtualMachineProps,
    pub devices: Vec<Device>,
    pub file_systems: Vec<FileSystem>,
}

impl DeepCopy for VirtualMachine {
    fn deep_copy_into(&self, dest: &mut StringPool) -> Self {
        let _ = dest.strdup_interned(Some(&self.uuid));
        let _ = dest.strdup_interned(Some(&self.id));
        for d in &self.devices {
            let _ = dest.strdup_interned(Some(&d.instance));
        }
        for fs in &self.file_systems {
            let _ = dest.strdup_interned(Some(&fs.path));
        }
        self.clone()
    }
}

#[derive(Debug, Clone)]
pub struct Datastore {
    pub id: String,
    pub name: String,
    pub uuid: Option<String>,
    pub capacity: Option<u64>,
    pub free_space: Option<u64>,
    pub uncommitted: Option<u64>,
    pub hv_uuids: Vec<String>,
}

impl DeepCopy for Datastore {
    fn deep_copy_into(&self, dest: &mut StringPool) -> Self {
        let _ = dest.strdup_interned(Some(&self.id));
        let _ = dest.strdup_interned(Some(&self.name));
        for uuid in &self.hv_uuids {
            let _ = dest.strdup_interned(Some(uuid));
        }
        self.clone()
    }
}

#[derive(Debug, Clone)]
pub struct Cluster {
    pub id: String,
    pub name: String,
    pub status: String,
}

/// A single event-log entry. `key` is a signed 32-bit value per the
/// source's `atoi`-equivalent parse; negative parses are rejected by the
/// event tailer before construction, never silently coerced.
#[derive(Debug, Clone)]
pub struct Event {
    pub key: i32,
    pub timestamp: i64,
    pub message: String,
}

/// One completed inventory cycle's result, swapped into a [`Service`] as a
/// whole. `max_query_metrics` is resolved once per cycle from the
/// endpoint's `OptionManager` and cached here for the performance fetcher.
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    pub hypervisors: HashMap<String, Hypervisor>,
    pub virtual_machines: HashMap<String, VirtualMachine>,
    pub datastores: HashMap<String, Datastore>,
    pub datastores_by_name: Vec<String>,
    pub clusters: HashMap<String, Cluster>,
    pub events: Vec<Event>,
    pub max_query_metrics: i32,
    pub error: Option<String>,
}

impl Inventory {
    pub fn new(max_query_metrics: i32) -> Self {
        Inventory { max_query_metrics, ..Default::default() }
    }

    /// Inserts a datastore and keeps the secondary name-ordered index
    /// sorted.
    pub fn insert_datastore(&mut self, ds: Datastore) {
        let name = ds.name.clone();
        self.datastores.insert(ds.id.clone(), ds);
        let pos = self.datastores_by_name.binary_search(&name).unwrap_or_else(|p| p);
        self.datastores_by_name.insert(pos, name);
    }

    /// Appends `event` if newer than `last_key`, returning the new
    /// `last_key` to persist on the service. Events are kept newest-first.
    pub fn append_event_if_newer(&mut self, event: Event, last_key: Option<i32>) -> i32 {
        let is_newer = last_key.map(|k| event.key > k).unwrap_or(true);
        let key = event.key;
        if is_newer {
            self.events.insert(0, event);
        }
        key.max(last_key.unwrap_or(i32::MIN))
    }
}

impl DeepCopy for Inventory {
    fn deep_copy_into(&self, dest: &mut StringPool) -> Self {
        let hypervisors = self
            .hypervisors
            .iter()
            .map(|(k, v)| (k.clone(), v.deep_copy_into(dest)))
            .collect();
        let virtual_machines = self
            .virtual_machines
            .iter()
            .map(|(k, v)| (k.clone(), v.deep_copy_into(dest)))
            .collect();
        let datastores = self
            .datastores
            .iter()
            .map(|(k, v)| (k.clone(), v.deep_copy_into(dest)))
            .collect();
        let clusters = self.clusters.clone();
        for c in clusters.values() {
            let _ = dest.strdup_interned(Some(&c.id));
            let _ = dest.strdup_interned(Some(&c.name));
        }
        for e in &self.events {
            let _ = dest.strdup_interned(Some(&e.message));
        }
        Inventory {
            hypervisors,
            virtual_machines,
            datastores,
            datastores_by_name: self.datastores_by_name.clone(),
            clusters,
            events: self.events.clone(),
            max_query_metrics: self.max_query_metrics,
            error: self.error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::{Arena, StringPool};

    #[test]
    fn append_event_if_newer_keeps_newest_first_and_advances_key() {
        let mut inv = Inventory::new(64);
        let last_key = inv.append_event_if_newer(Event { key: 5, timestamp: 100, message: "a".into() }, None);
        assert_eq!(last_key, 5);
        let last_key = inv.append_event_if_newer(Event { key: 9, timestamp: 200, message: "b".into() }, Some(5));
        assert_eq!(last_key, 9);
        assert_eq!(inv.events[0].key, 9);
        assert_eq!(inv.events[1].key, 5);
    }

    #[test]
    fn append_event_not_newer_is_not_inserted() {
        let mut inv = Inventory::new(64);
        inv.append_event_if_newer(Event { key: 9, timestamp: 200, message: "b".into() }, None);
        let last_key = inv.append_event_if_newer(Event { key: 3, timestamp: 50, message: "stale".into() }, Some(9));
        assert_eq!(last_key, 9);
        assert_eq!(inv.events.len(), 1);
    }

    #[test]
    fn deep_copy_reinterns_every_reachable_string() {
        let mut inv = Inventory::new(64);
        inv.insert_datastore(Datastore {
            id: "ds-1".into(),
            name: "datastore1".into(),
            uuid: None,
            capacity: Some(1024),
            free_space: Some(512),
            uncommitted: None,
            hv_uuids: vec!["hv-uuid-1".into()],
        });

        let mut pool = StringPool::new(Arena::reserve(4096));
        let copy = inv.deep_copy_into(&mut pool);

        assert_eq!(copy.datastores.len(), 1);
        assert!(pool.len() >= 3, "id, name, and hv uuid should all be interned");
    }
}
