//! Inventory fetcher (C6): authenticates, walks the folder tree, and
//! builds one complete [`Inventory`] snapshot for a single update cycle.
//!
//! Each step below corresponds to a numbered step in the inventory
//! fetcher design: enumerate managed objects through the property
//! collector (C4), fetch per-type property sets, cross-link datastores
//! and hypervisors, and resolve the `maxQueryMetrics` cap. Failures
//! during any step stop the cycle but do not discard the snapshot built
//! so far — the caller promotes a partial [`Inventory`] with its `error`
//! field set, per the propagation policy.

use std::collections::HashMap;

use vsphere_collector_core::config::{DEFAULT_MAX_QUERY_METRICS, MAX_QUERY_METRICS_UNLIMITED};
use vsphere_collector_core::error::Result;
use vsphere_collector_core::model::{
    Cluster, CounterRegistry, Datastore, Device, DeviceKind, FileSystem, Hypervisor, HypervisorProps, Inventory,
    ServiceType, VirtualMachine, VirtualMachineProps,
};
use vsphere_collector_soap::envelope::{self, MethodCall};
use vsphere_collector_soap::transport::SoapTransport;
use vsphere_collector_soap::xml::{self, Document, Element};

/// vSphere major-version boundary below which `RefreshDatastoreStorageInfo`
/// must be issued before reading a datastore's `summary`. Versions `>= 6`
/// keep their storage-info fresh without an explicit refresh.
const DS_REFRESH_VERSION_BOUNDARY: u32 = 6;

/// A managed-object reference as returned by a property-collection page:
/// the vendor's opaque id string plus its declared moref type.
#[derive(Debug, Clone)]
pub struct MoRef {
    pub id: String,
    pub moref_type: String,
}

/// Fetches `RetrieveServiceContent` once per cycle's first successful
/// authentication: the endpoint version and product full name.
pub fn fetch_service_content(transport: &SoapTransport) -> Result<(String, String)> {
    let body = MethodCall::new("RetrieveServiceContent")
        .moref("_this", "ServiceInstance", "ServiceInstance")
        .finish("RetrieveServiceContent");
    let doc = transport.post(&envelope::wrap(&body))?;
    let version = xml::read_doc_value(&doc, &["Body", "*", "returnval", "about", "version"]).unwrap_or_default();
    let full_name = xml::read_doc_value(&doc, &["Body", "*", "returnval", "about", "fullName"]).unwrap_or_default();
    Ok((version, full_name))
}

/// Fetches the `PerformanceManager` counter catalogue and populates a
/// [`CounterRegistry`] with two keys per counter: `group/name[rollup]`,
/// and `group/name[rollup,stats]` when a `statsType` element is present.
pub fn fetch_counter_registry(transport: &SoapTransport) -> Result<CounterRegistry> {
    let body = MethodCall::new("RetrieveProperties")
        .raw(
            "<ns0:specSet><ns0:propSet><ns0:type>PerformanceManager</ns0:type>\
             <ns0:pathSet>perfCounter</ns0:pathSet></ns0:propSet>\
             <ns0:objectSet><ns0:obj type=\"PerformanceManager\">PerfMgr</ns0:obj></ns0:objectSet></ns0:specSet>",
        )
        .finish("RetrieveProperties");
    let doc = transport.post(&envelope::wrap(&body))?;

    let mut registry = CounterRegistry::new();
    for counter in xml::find_recursive(&doc.root, "PerfCounterInfo") {
        let Some(key) = xml::read_node_value(counter, &["key"]) else { continue };
        let Ok(id) = key.parse::<u64>() else { continue };
        let Some(group) = xml::read_node_value(counter, &["groupInfo", "key"]) else { continue };
        let Some(name) = xml::read_node_value(counter, &["nameInfo", "key"]) else { continue };
        let Some(rollup) = xml::read_node_value(counter, &["rollupType"]) else { continue };

        registry.register(format!("{group}/{name}[{rollup}]"), id);
        if let Some(stats) = xml::read_node_value(counter, &["statsType"]) {
            registry.register(format!("{group}/{name}[{rollup},{stats}]"), id);
        }
    }
    Ok(registry)
}

/// Enumerates every `HostSystem` and `Datastore` managed object reachable
/// from the root folder with a single rooted property-collection query,
/// paging with [`vsphere_collector_soap::PropertyCollectionIterator`]
/// until the continuation token is exhausted (C4).
pub fn enumerate_hosts_and_datastores(transport: &SoapTransport) -> Result<Vec<MoRef>> {
    let body = MethodCall::new("RetrievePropertiesEx")
        .moref("_this", "PropertyCollector", "propertyCollector")
        .raw(retrieve_properties_ex_spec())
        .finish("RetrievePropertiesEx");
    let request = envelope::wrap(&body);

    let (mut iter, first) =
        vsphere_collector_soap::PropertyCollectionIterator::init(transport, "propertyCollector", &request)?;

    let mut morefs = collect_morefs(&first);
    while let Some(doc) = iter.next()? {
        morefs.extend(collect_morefs(&doc));
    }
    Ok(morefs)
}

/// The `PropertyFilterSpec` traversal chain named by the spec:
/// `visitFolders`, `dcToHf`, `dcToVmf`, `crToH`, `crToRp`, `dcToDs`,
/// `hToVm`, `rpToVm`, `rpToRp` — walks folders, datacenters, compute
/// resources and resource pools down to `HostSystem`/`Datastore` morefs.
fn retrieve_properties_ex_spec() -> &'static str {
    "<ns0:specSet><ns0:propSet><ns0:type>HostSystem</ns0:type><ns0:pathSet>name</ns0:pathSet></ns0:propSet>\
     <ns0:propSet><ns0:type>Datastore</ns0:type><ns0:pathSet>name</ns0:pathSet></ns0:propSet>\
     <ns0:objectSet><ns0:obj type=\"Folder\">group-d1</ns0:obj><ns0:skip>false</ns0:skip>\
     <ns0:selectSet><ns0:name>visitFolders</ns0:name></ns0:selectSet>\
     <ns0:selectSet><ns0:name>dcToHf</ns0:name></ns0:selectSet>\
     <ns0:selectSet><ns0:name>dcToVmf</ns0:name></ns0:selectSet>\
     <ns0:selectSet><ns0:name>crToH</ns0:name></ns0:selectSet>\
     <ns0:selectSet><ns0:name>crToRp</ns0:name></ns0:selectSet>\
     <ns0:selectSet><ns0:name>dcToDs</ns0:name></ns0:selectSet>\
     <ns0:selectSet><ns0:name>hToVm</ns0:name></ns0:selectSet>\
     <ns0:selectSet><ns0:name>rpToVm</ns0:name></ns0:selectSet>\
     <ns0:selectSet><ns0:name>rpToRp</ns0:name></ns0:selectSet></ns0:objectSet></ns0:specSet>\
     <ns0:options/>"
}

fn collect_morefs(doc: &Document) -> Vec<MoRef> {
    xml::descend(&doc.root, &["Body", "*", "returnval", "objects"])
        .into_iter()
        .flat_map(|objects| objects.children_named("obj"))
        .filter_map(|obj| {
            let moref_type = obj.attr("type")?.to_string();
            Some(MoRef { id: obj.text.clone(), moref_type })
        })
        .collect()
}

/// Fetches `summary`/`host` for every datastore id. For vSphere endpoints
/// older than version 6, issues `RefreshDatastoreStorageInfo` first so
/// the subsequent read observes fresh capacity figures.
pub fn fetch_datastores(
    transport: &SoapTransport,
    ids: &[String],
    service_type: ServiceType,
    version: &str,
) -> Result<HashMap<String, Datastore>> {
    let needs_refresh = service_type == ServiceType::VSphere && major_version(version) < DS_REFRESH_VERSION_BOUNDARY;

    let mut out = HashMap::new();
    for id in ids {
        if needs_refresh {
            refresh_datastore_storage_info(transport, id)?;
        }
        let ds = fetch_one_datastore(transport, id, service_type)?;
        out.insert(ds.id.clone(), ds);
    }
    Ok(out)
}

fn major_version(version: &str) -> u32 {
    version.split('.').next().and_then(|s| s.parse().ok()).unwrap_or(0)
}

fn refresh_datastore_storage_info(transport: &SoapTransport, id: &str) -> Result<()> {
    let body = MethodCall::new("RefreshDatastoreStorageInfo")
        .moref("_this", "Datastore", id)
        .finish("RefreshDatastoreStorageInfo");
    transport.post(&envelope::wrap(&body))?;
    Ok(())
}

fn fetch_one_datastore(transport: &SoapTransport, id: &str, service_type: ServiceType) -> Result<Datastore> {
    let body = MethodCall::new("RetrieveProperties")
        .raw(&format!(
            "<ns0:specSet><ns0:propSet><ns0:type>Datastore</ns0:type>\
             <ns0:pathSet>summary</ns0:pathSet><ns0:pathSet>host</ns0:pathSet></ns0:propSet>\
             <ns0:objectSet><ns0:obj type=\"Datastore\">{}</ns0:obj></ns0:objectSet></ns0:specSet>",
            envelope::escape(id)
        ))
        .finish("RetrieveProperties");
    let doc = transport.post(&envelope::wrap(&body))?;
    let props = xml::descend(&doc.root, &["Body", "*", "returnval", "propSet"]);

    // `summary`/`host` are requested as whole-object pathSets, so the
    // server echoes back one propSet per path, each holding a nested `val`
    // (`DatastoreSummary`, `DatastoreHostMount[]`) rather than a propSet
    // literally named after the leaf field.
    let name = nested_prop_value(&props, "summary", &["name"]).unwrap_or_else(|| id.to_string());
    let mount_path =
        nested_prop_value(&props, "host", &["DatastoreHostMount", "mountInfo", "path"]).unwrap_or_default();
    let trimmed = mount_path.trim_end_matches('/');
    let uuid = trimmed.rsplit('/').next().filter(|s| !s.is_empty()).map(str::to_string);

    let (capacity, free_space, uncommitted) = if service_type == ServiceType::VCenter {
        (
            nested_prop_value(&props, "summary", &["capacity"]).and_then(|v| v.parse().ok()),
            nested_prop_value(&props, "summary", &["freeSpace"]).and_then(|v| v.parse().ok()),
            nested_prop_value(&props, "summary", &["uncommitted"]).and_then(|v| v.parse().ok()),
        )
    } else {
        (None, None, None)
    };

    Ok(Datastore {
        id: id.to_string(),
        name,
        uuid,
        capacity: Some(capacity.unwrap_or(u64::MAX)),
        free_space: Some(free_space.unwrap_or(u64::MAX)),
        uncommitted: Some(uncommitted.unwrap_or(u64::MAX)),
        hv_uuids: Vec::new(),
    })
}

/// The 15 named hypervisor properties, in the order the spec lists them.
const HV_PROPS: &[&str] = &[
    "name",
    "hardware.systemInfo.uuid",
    "hardware.systemInfo.model",
    "hardware.systemInfo.vendor",
    "hardware.memorySize",
    "hardware.cpuInfo.numCpuCores",
    "hardware.cpuInfo.numCpuThreads",
    "hardware.cpuInfo.numCpuPackages",
    "hardware.cpuInfo.hz",
    "summary.config.product.osType",
    "summary.config.product.name",
    "summary.config.product.version",
    "summary.runtime.healthSystemRuntime.systemHealthInfo.numericSensorInfo",
    "datastore",
    "vm",
];

/// Fetches one hypervisor's property set plus its parent-chain
/// (cluster/folder/datacenter) and cross-links it with the datastore
/// table built by [`fetch_datastores`].
pub fn fetch_hypervisors(
    transport: &SoapTransport,
    ids: &[String],
    datastores: &mut HashMap<String, Datastore>,
    service_type: ServiceType,
) -> Result<HashMap<String, Hypervisor>> {
    let mut out = HashMap::new();
    for id in ids {
        let hv = fetch_one_hypervisor(transport, id, service_type)?;
        for ds_id in hv.datastore_names.iter() {
            if let Some(ds) = datastores.get_mut(ds_id) {
                ds.hv_uuids.push(hv.hw_uuid.clone());
            }
        }
        out.insert(id.clone(), hv);
    }
    // Cross-link datastore display names onto each hypervisor now that
    // every datastore id has been resolved to a name.
    for hv in out.values_mut() {
        hv.datastore_names =
            hv.datastore_names.iter().filter_map(|id| datastores.get(id).map(|d| d.name.clone())).collect();
    }
    Ok(out)
}

fn fetch_one_hypervisor(transport: &SoapTransport, id: &str, service_type: ServiceType) -> Result<Hypervisor> {
    let path_set: String = HV_PROPS.iter().map(|p| format!("<ns0:pathSet>{p}</ns0:pathSet>")).collect();
    let body = MethodCall::new("RetrieveProperties")
        .raw(&format!(
            "<ns0:specSet><ns0:propSet><ns0:type>HostSystem</ns0:type>{path_set}</ns0:propSet>\
             <ns0:objectSet><ns0:obj type=\"HostSystem\">{}</ns0:obj></ns0:objectSet></ns0:specSet>",
            envelope::escape(id)
        ))
        .finish("RetrieveProperties");
    let doc = transport.post(&envelope::wrap(&body))?;
    let props = xml::descend(&doc.root, &["Body", "*", "returnval", "propSet"]);

    let hw_uuid = prop_value(&props, "hardware.systemInfo.uuid").unwrap_or_default();
    let datastore_ids = prop_values(&props, "datastore");
    let vm_ids = prop_values(&props, "vm");

    let parent = fetch_hypervisor_parent(transport, id, service_type)?;

    let hv_props = HypervisorProps {
        name: prop_value(&props, "name").unwrap_or_default(),
        hw_uuid: hw_uuid.clone(),
        hw_model: prop_value(&props, "hardware.systemInfo.model").unwrap_or_default(),
        hw_vendor: prop_value(&props, "hardware.systemInfo.vendor").unwrap_or_default(),
        memory_size: prop_value(&props, "hardware.memorySize").unwrap_or_default(),
        cpu_model: prop_value(&props, "summary.config.product.name").unwrap_or_default(),
        cpu_cores: prop_value(&props, "hardware.cpuInfo.numCpuCores").unwrap_or_default(),
        cpu_threads: prop_value(&props, "hardware.cpuInfo.numCpuThreads").unwrap_or_default(),
        cpu_mhz: prop_value(&props, "hardware.cpuInfo.hz").unwrap_or_default(),
        os_full_name: prop_value(&props, "summary.config.product.osType").unwrap_or_default(),
        product_name: prop_value(&props, "summary.config.product.name").unwrap_or_default(),
        product_version: prop_value(&props, "summary.config.product.version").unwrap_or_default(),
        sensor_status: prop_value(&props, "summary.runtime.healthSystemRuntime.systemHealthInfo.numericSensorInfo")
            .unwrap_or_default(),
    };

    Ok(Hypervisor {
        hw_uuid,
        id: id.to_string(),
        cluster_id: parent.cluster_id,
        datacenter_name: parent.datacenter_name,
        parent_name: parent.parent_name,
        parent_type: parent.parent_type,
        props: hv_props,
        datastore_names: datastore_ids,
        vm_ids,
    })
}

struct ParentChain {
    cluster_id: Option<String>,
    datacenter_name: String,
    parent_name: String,
    parent_type: String,
}

/// Second traversal request resolving the HV's parent chain. Preference
/// order is exact and must not be reordered: `ClusterComputeResource` >
/// containing non-datacenter folder > datacenter itself > a fixed
/// `"Vcenter"`/`"ESXi"` literal, chosen by `service_type` since an ESXi
/// host managed standalone has no vCenter to name.
fn fetch_hypervisor_parent(transport: &SoapTransport, id: &str, service_type: ServiceType) -> Result<ParentChain> {
    let body = MethodCall::new("RetrieveProperties")
        .raw(&format!(
            "<ns0:specSet><ns0:propSet><ns0:type>HostSystem</ns0:type>\
             <ns0:pathSet>parent</ns0:pathSet></ns0:propSet>\
             <ns0:objectSet><ns0:obj type=\"HostSystem\">{}</ns0:obj></ns0:objectSet></ns0:specSet>",
            envelope::escape(id)
        ))
        .finish("RetrieveProperties");
    let doc = transport.post(&envelope::wrap(&body))?;
    let props = xml::descend(&doc.root, &["Body", "*", "returnval", "propSet"]);

    let datacenter_name = prop_value(&props, "datacenter.name").unwrap_or_default();
    let cluster_id = prop_value_typed(&props, "parent", "ClusterComputeResource");
    let folder_name = prop_value_typed_name(&props, "parent", "Folder");

    let (parent_name, parent_type) = if let Some(cluster_id) = &cluster_id {
        (prop_value(&props, "parent.name").unwrap_or_else(|| cluster_id.clone()), "Cluster".to_string())
    } else if let Some(folder) = folder_name {
        (folder, "Folder".to_string())
    } else if !datacenter_name.is_empty() {
        (datacenter_name.clone(), "Datacenter".to_string())
    } else {
        let fixed = if service_type == ServiceType::VCenter { "Vcenter" } else { "ESXi" };
        (fixed.to_string(), fixed.to_string())
    };

    Ok(ParentChain { cluster_id, datacenter_name, parent_name, parent_type })
}

/// Finds a child prop value, cross-referencing by `moref_type` when the
/// tag carries a `type` attribute (used to discriminate `parent` being a
/// cluster vs. a folder).
fn prop_value_typed(props: &[&Element], path: &str, moref_type: &str) -> Option<String> {
    props.iter().find(|p| xml::read_node_value(p, &["name"]).as_deref() == Some(path)).and_then(|p| {
        xml::descend(p, &["val"])
            .into_iter()
            .find(|v| v.attr("type") == Some(moref_type))
            .map(|v| v.text.clone())
    })
}

fn prop_value_typed_name(props: &[&Element], path: &str, moref_type: &str) -> Option<String> {
    prop_value_typed(props, path, moref_type)
}

/// Fetches every VM under `hv_ids`, including device and guest-disk
/// inventory, and returns them keyed by VM id.
pub fn fetch_virtual_machines(
    transport: &SoapTransport,
    hv_ids: &HashMap<String, Vec<String>>,
    service_type: ServiceType,
) -> Result<HashMap<String, VirtualMachine>> {
    let mut out = HashMap::new();
    for vm_ids in hv_ids.values() {
        for vm_id in vm_ids {
            let vm = fetch_one_vm(transport, vm_id, service_type)?;
            out.insert(vm.id.clone(), vm);
        }
    }
    Ok(out)
}

const VM_PROPS: &[&str] = &[
    "name",
    "parentVApp",
    "snapshot",
    "config.hardware.numCPU",
    "config.hardware.numCoresPerSocket",
    "config.hardware.memoryMB",
    "guest.guestFullName",
    "guest.hostName",
    "guest.ipAddress",
    "runtime.powerState",
    "guest.toolsStatus",
    "resourceConfig.cpuAllocation.reservation",
    "resourceConfig.memoryAllocation.reservation",
    "config.template",
    "config.instanceUuid",
    "config.uuid",
];

fn fetch_one_vm(transport: &SoapTransport, id: &str, service_type: ServiceType) -> Result<VirtualMachine> {
    let path_set: String = VM_PROPS.iter().map(|p| format!("<ns0:pathSet>{p}</ns0:pathSet>")).collect();
    let body = MethodCall::new("RetrieveProperties")
        .raw(&format!(
            "<ns0:specSet><ns0:propSet><ns0:type>VirtualMachine</ns0:type>{path_set}\
             <ns0:pathSet>config.hardware.device</ns0:pathSet>\
             <ns0:pathSet>guest.disk</ns0:pathSet></ns0:propSet>\
             <ns0:objectSet><ns0:obj type=\"VirtualMachine\">{}</ns0:obj></ns0:objectSet></ns0:specSet>",
            envelope::escape(id)
        ))
        .finish("RetrieveProperties");
    let doc = transport.post(&envelope::wrap(&body))?;
    let props = xml::descend(&doc.root, &["Body", "*", "returnval", "propSet"]);

    let uuid = if service_type == ServiceType::VCenter {
        prop_value(&props, "config.instanceUuid")
    } else {
        prop_value(&props, "config.uuid")
    }
    .unwrap_or_default();

    let vm_props = VirtualMachineProps {
        name: prop_value(&props, "name").unwrap_or_default(),
        folder: prop_value(&props, "parentVApp").unwrap_or_default(),
        snapshot: prop_value(&props, "snapshot").unwrap_or_default(),
        num_cpu: prop_value(&props, "config.hardware.numCPU").unwrap_or_default(),
        num_cores_per_socket: prop_value(&props, "config.hardware.numCoresPerSocket").unwrap_or_default(),
        memory_size_mb: prop_value(&props, "config.hardware.memoryMB").unwrap_or_default(),
        guest_full_name: prop_value(&props, "guest.guestFullName").unwrap_or_default(),
        guest_host_name: prop_value(&props, "guest.hostName").unwrap_or_default(),
        guest_ip_address: prop_value(&props, "guest.ipAddress").unwrap_or_default(),
        power_state: prop_value(&props, "runtime.powerState").unwrap_or_default(),
        tools_status: prop_value(&props, "guest.toolsStatus").unwrap_or_default(),
        cpu_reservation: prop_value(&props, "resourceConfig.cpuAllocation.reservation").unwrap_or_default(),
        memory_reservation: prop_value(&props, "resourceConfig.memoryAllocation.reservation").unwrap_or_default(),
        template: prop_value(&props, "config.template").as_deref() == Some("true"),
    };

    let devices = parse_devices(&props);
    let file_systems = parse_file_systems(&props);

    Ok(VirtualMachine { uuid, id: id.to_string(), props: vm_props, devices, file_systems })
}

/// NIC devices are hardware entries carrying a `macAddress` child, keyed
/// by their device `key`. Disk devices are `VirtualDisk` entries whose
/// synthetic instance is `{controller-kind}{busNumber}:{unitNumber}`,
/// where controller kind is resolved by looking up the matching
/// controller entry keyed by `controllerKey`.
fn parse_devices(props: &[&Element]) -> Vec<Device> {
    let device_prop = match props.iter().find(|p| xml::read_node_value(p, &["name"]).as_deref() == Some("config.hardware.device"))
    {
        Some(p) => p,
        None => return Vec::new(),
    };
    let devices = xml::descend(device_prop, &["val", "device"]);

    let controller_kind_by_key: HashMap<String, &'static str> = devices
        .iter()
        .filter_map(|d| {
            let key = xml::read_node_value(d, &["key"])?;
            let label = xml::read_node_value(d, &["deviceInfo", "label"]).unwrap_or_default().to_lowercase();
            let kind = if label.contains("sata") {
                "sata"
            } else if label.contains("ide") {
                "ide"
            } else {
                "scsi"
            };
            xml::read_node_value(d, &["scsiCtlrUnitNumber"]).map(|_| (key, kind))
        })
        .collect();

    devices
        .into_iter()
        .filter_map(|d| {
            if let Some(mac) = xml::read_node_value(d, &["macAddress"]) {
                let instance = xml::read_node_value(d, &["key"]).unwrap_or(mac);
                let label = xml::read_node_value(d, &["deviceInfo", "label"]).unwrap_or_default();
                return Some(Device { kind: DeviceKind::Nic, instance, label });
            }
            // VirtualDisk entries carry a `capacityInKB` child; other
            // hardware (controllers themselves, CD-ROMs) does not.
            if xml::read_node_value(d, &["capacityInKB"]).is_some() {
                let controller_key = xml::read_node_value(d, &["controllerKey"])?;
                let bus = xml::read_node_value(d, &["unitNumber"]).unwrap_or_default();
                let kind = controller_kind_by_key.get(&controller_key).copied().unwrap_or("scsi");
                let unit = xml::read_node_value(d, &["key"]).unwrap_or_default();
                let instance = format!("{kind}{bus}:{unit}");
                let label = xml::read_node_value(d, &["deviceInfo", "label"]).unwrap_or_default();
                return Some(Device { kind: DeviceKind::Disk, instance, label });
            }
            None
        })
        .collect()
}

fn parse_file_systems(props: &[&Element]) -> Vec<FileSystem> {
    let disk_prop =
        match props.iter().find(|p| xml::read_node_value(p, &["name"]).as_deref() == Some("guest.disk")) {
            Some(p) => p,
            None => return Vec::new(),
        };
    xml::descend(disk_prop, &["val", "GuestDiskInfo"])
        .into_iter()
        .filter_map(|d| {
            let path = xml::read_node_value(d, &["diskPath"])?;
            let capacity = xml::read_node_value(d, &["capacity"]).and_then(|v| v.parse().ok()).unwrap_or(0);
            let free = xml::read_node_value(d, &["freeSpace"]).and_then(|v| v.parse().ok()).unwrap_or(0);
            Some(FileSystem { path, capacity, free })
        })
        .collect()
}

/// Fetches every `ClusterComputeResource` name, then `summary.overallStatus`
/// per cluster. vCenter only — ESXi has no cluster concept.
pub fn fetch_clusters(transport: &SoapTransport) -> Result<HashMap<String, Cluster>> {
    let body = MethodCall::new("RetrieveProperties")
        .raw(
            "<ns0:specSet><ns0:propSet><ns0:type>ClusterComputeResource</ns0:type>\
             <ns0:pathSet>name</ns0:pathSet><ns0:pathSet>summary.overallStatus</ns0:pathSet></ns0:propSet>\
             <ns0:objectSet><ns0:obj type=\"Folder\">group-d1</ns0:obj><ns0:skip>false</ns0:skip>\
             <ns0:selectSet><ns0:name>visitFolders</ns0:name></ns0:selectSet></ns0:objectSet></ns0:specSet>",
        )
        .finish("RetrieveProperties");
    let doc = transport.post(&envelope::wrap(&body))?;

    let mut out = HashMap::new();
    for object in xml::descend(&doc.root, &["Body", "*", "returnval"]) {
        let Some(id) = xml::read_node_value(object, &["obj"]) else { continue };
        let props = xml::descend(object, &["propSet"]);
        let name = prop_value(&props, "name").unwrap_or_default();
        let status = prop_value(&props, "summary.overallStatus").unwrap_or_default();
        out.insert(id.clone(), Cluster { id, name, status });
    }
    Ok(out)
}

/// Resolves the endpoint's `config.vpxd.stats.maxQueryMetrics`. vCenter
/// only; `None` means the key was absent (caller defaults to
/// [`DEFAULT_MAX_QUERY_METRICS`]), `-1`/`0` are normalized to
/// [`MAX_QUERY_METRICS_UNLIMITED`] by the caller, not here.
pub fn fetch_max_query_metrics(transport: &SoapTransport) -> Result<Option<i32>> {
    let body = MethodCall::new("QueryOptions")
        .moref("_this", "OptionManager", "VpxSettings")
        .field("name", "config.vpxd.stats.maxQueryMetrics")
        .finish("QueryOptions");
    let doc = transport.post(&envelope::wrap(&body))?;
    Ok(xml::read_doc_value(&doc, &["Body", "*", "returnval", "value"]).and_then(|v| v.parse().ok()))
}

/// Resolves the raw `OptionManager` reading into the cap the performance
/// fetcher will actually use: `None` (absent key) falls back to
/// [`DEFAULT_MAX_QUERY_METRICS`]; `<= 0` means unlimited.
pub fn resolve_max_query_metrics(reported: Option<i32>) -> i32 {
    match reported {
        None => DEFAULT_MAX_QUERY_METRICS,
        Some(v) if v <= 0 => MAX_QUERY_METRICS_UNLIMITED,
        Some(v) => v,
    }
}

fn prop_value(props: &[&Element], path: &str) -> Option<String> {
    props
        .iter()
        .find(|p| xml::read_node_value(p, &["name"]).as_deref() == Some(path))
        .and_then(|p| xml::read_node_value(p, &["val"]))
}

/// Finds the propSet named `path` and descends `leaf` inside its nested
/// `val` element, for whole-object pathSets (`"summary"`, `"host"`) whose
/// server-echoed propSet holds a structured value rather than being one
/// propSet per leaf field.
fn nested_prop_value(props: &[&Element], path: &str, leaf: &[&str]) -> Option<String> {
    props
        .iter()
        .find(|p| xml::read_node_value(p, &["name"]).as_deref() == Some(path))
        .and_then(|p| xml::descend(p, &["val"]).into_iter().next())
        .and_then(|val| xml::read_node_value(val, leaf))
}

fn prop_values(props: &[&Element], path: &str) -> Vec<String> {
    props
        .iter()
        .find(|p| xml::read_node_value(p, &["name"]).as_deref() == Some(path))
        .map(|p| xml::descend(p, &["val", "ManagedObjectReference"]).into_iter().map(|e| e.text.clone()).collect())
        .unwrap_or_default()
}

/// Builds an [`Inventory`] from everything a successful cycle gathered.
/// Called once, at the end of the fetch pipeline, before the result is
/// deep-copied into the shared arena.
#[allow(clippy::too_many_arguments)]
pub fn assemble_inventory(
    mut datastores: HashMap<String, Datastore>,
    hypervisors: HashMap<String, Hypervisor>,
    virtual_machines: HashMap<String, VirtualMachine>,
    clusters: HashMap<String, Cluster>,
    max_query_metrics: i32,
) -> Inventory {
    let mut inventory = Inventory::new(max_query_metrics);
    for ds in datastores.drain() {
        inventory.insert_datastore(ds.1);
    }
    inventory.hypervisors = hypervisors;
    inventory.virtual_machines = virtual_machines;
    inventory.clusters = clusters;
    inventory
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn major_version_parses_leading_component() {
        assert_eq!(major_version("5.5.0"), 5);
        assert_eq!(major_version("6.7"), 6);
        assert_eq!(major_version(""), 0);
    }

    #[test]
    fn resolve_max_query_metrics_boundaries() {
        assert_eq!(resolve_max_query_metrics(None), DEFAULT_MAX_QUERY_METRICS);
        assert_eq!(resolve_max_query_metrics(Some(-1)), MAX_QUERY_METRICS_UNLIMITED);
        assert_eq!(resolve_max_query_metrics(Some(0)), MAX_QUERY_METRICS_UNLIMITED);
        assert_eq!(resolve_max_query_metrics(Some(128)), 128);
    }

    #[test]
    fn collect_morefs_extracts_type_and_id() {
        let doc = xml::parse(
            br#"<Envelope><Body><RetrievePropertiesExResponse><returnval><objects>
                <obj type="HostSystem">host-1</obj>
                <obj type="Datastore">datastore-3</obj>
            </objects></returnval></RetrievePropertiesExResponse></Body></Envelope>"#,
        )
        .unwrap();
        let morefs = collect_morefs(&doc);
        assert_eq!(morefs.len(), 2);
        assert_eq!(morefs[0].moref_type, "HostSystem");
        assert_eq!(morefs[1].id, "datastore-3");
    }

    #[test]
    fn datastore_summary_and_mount_values_read_from_nested_val_children() {
        let doc = xml::parse(
            br#"<Envelope><Body><returnval>
                <propSet><name>summary</name><val xsi:type="DatastoreSummary">
                    <name>datastore1</name><capacity>1000</capacity>
                    <freeSpace>400</freeSpace><uncommitted>50</uncommitted>
                </val></propSet>
                <propSet><name>host</name><val>
                    <DatastoreHostMount><key type="HostSystem">host-1</key>
                        <mountInfo><path>/vmfs/volumes/abc-123/</path></mountInfo>
                    </DatastoreHostMount>
                </val></propSet>
            </returnval></Body></Envelope>"#,
        )
        .unwrap();
        let props = xml::descend(&doc.root, &["Body", "returnval", "propSet"]);

        assert_eq!(nested_prop_value(&props, "summary", &["name"]).as_deref(), Some("datastore1"));
        assert_eq!(nested_prop_value(&props, "summary", &["capacity"]).as_deref(), Some("1000"));

        let mount_path = nested_prop_value(&props, "host", &["DatastoreHostMount", "mountInfo", "path"]).unwrap();
        let trimmed = mount_path.trim_end_matches('/');
        assert_eq!(trimmed.rsplit('/').next(), Some("abc-123"));
    }
}
