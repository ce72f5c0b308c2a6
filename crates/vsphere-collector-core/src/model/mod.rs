//! Typed inventory and performance-counter data model (C5, C8).
//!
//! Every type here is built entirely in private memory by the engine crate
//! and only crosses into the shared [`crate::arena`] through
//! [`DeepCopy::deep_copy_into`], which re-interns every string the object
//! reaches and produces an owned copy safe to publish.

pub mod inventory;
pub mod perf;
pub mod service;

pub use inventory::{Cluster, Datastore, Device, DeviceKind, Event, FileSystem, Hypervisor, Inventory, VirtualMachine};
pub use perf::{CounterRegistry, PerfCounter, PerfCounterState, PerfEntity, PerfSample};
pub use service::{Service, ServiceState, ServiceType};

use crate::arena::StringPool;

/// Implemented by every model object that can cross an arena boundary.
/// `deep_copy_into` must re-intern every string the object owns into
/// `dest` and return a structurally-identical copy backed by those new
/// interned offsets.
pub trait DeepCopy {
    fn deep_copy_into(&self, dest: &mut StringPool) -> Self;
}
