//! Service record: one monitored vCenter/ESXi endpoint and its lifecycle
//! state.

use std::time::{Duration, SystemTime};

use super::inventory::Inventory;
use super::perf::PerfEntity;
use std::collections::HashMap;

/// What kind of endpoint a [`Service`] talks to. Resolved once from
/// `RetrieveServiceContent`/`AboutInfo` and never changed afterward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceType {
    Unknown,
    VCenter,
    VSphere,
}

/// A tiny bitflags-style macro kept local to this module: the workspace
/// does not otherwise depend on the `bitflags` crate, and this type needs
/// only `OR`/`AND`/`intersects`.
macro_rules! bitflags_like {
    (
        $(#[$meta:meta])*
        pub struct $name:ident: $repr:ty {
            $(const $variant:ident = $value:expr;)*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub struct $name($repr);

        impl $name {
            $(pub const $variant: Self = Self($value);)*

            pub fn intersects(self, other: Self) -> bool {
                self.0 & other.0 != 0
            }

            pub fn contains(self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }
        }

        impl std::ops::BitOr for $name {
            type Output = Self;
            fn bitor(self, rhs: Self) -> Self {
                Self(self.0 | rhs.0)
            }
        }

        impl std::ops::BitOrAssign for $name {
            fn bitor_assign(&mut self, rhs: Self) {
                self.0 |= rhs.0;
            }
        }

        impl std::ops::BitAnd for $name {
            type Output = Self;
            fn bitand(self, rhs: Self) -> Self {
                Self(self.0 & rhs.0)
            }
        }

        impl std::ops::Not for $name {
            type Output = Self;
            fn not(self) -> Self {
                Self(!self.0)
            }
        }

        impl std::ops::BitAndAssign for $name {
            fn bitand_assign(&mut self, rhs: Self) {
                self.0 &= rhs.0;
            }
        }
    };
}

bitflags_like! {
    /// Scheduler/lifecycle state bits, mirroring the source's
    /// `ZBX_VMWARE_STATE_*` flags. `READY`/`FAILED` are mutually exclusive
    /// outcomes of the last inventory cycle; `UPDATING`/`UPDATING_PERF`/
    /// `REMOVING` mark work in flight so the scheduler never double-books
    /// a service.
    pub struct ServiceState: u32 {
        const NEW = 0;
        const READY = 1 << 0;
        const FAILED = 1 << 1;
        const UPDATING = 1 << 2;
        const UPDATING_PERF = 1 << 3;
        const REMOVING = 1 << 4;
    }
}

impl ServiceState {
    /// True while any exclusive task owns this service.
    pub fn is_busy(self) -> bool {
        self.intersects(Self::UPDATING | Self::UPDATING_PERF | Self::REMOVING)
    }

    /// True once at least one inventory cycle has completed, successfully
    /// or not.
    pub fn has_completed_a_cycle(self) -> bool {
        self.intersects(Self::READY | Self::FAILED)
    }
}

/// One monitored endpoint and everything the scheduler and read API need
/// to track about it.
#[derive(Clone)]
pub struct Service {
    pub url: String,
    pub username: String,
    pub password: String,
    pub tls_verify: bool,
    pub service_type: ServiceType,
    pub version: Option<String>,
    pub full_name: Option<String>,
    pub state: ServiceState,
    pub last_access: SystemTime,
    pub last_inventory: Option<SystemTime>,
    pub last_perf: Option<SystemTime>,
    pub event_last_key: Option<i32>,
    pub event_skip_old: bool,
    pub data: Option<Inventory>,
    pub perf_entities: HashMap<(String, String), PerfEntity>,
    pub counter_ids: HashMap<String, u64>,
}

impl Service {
    pub fn new(
        url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        tls_verify: bool,
    ) -> Self {
        Service {
            url: url.into(),
            username: username.into(),
            password: password.into(),
            tls_verify,
            service_type: ServiceType::Unknown,
            version: None,
            full_name: None,
            state: ServiceState::NEW,
            last_access: SystemTime::now(),
            last_inventory: None,
            last_perf: None,
            event_last_key: None,
            event_skip_old: true,
            data: None,
            perf_entities: HashMap::new(),
            counter_ids: HashMap::new(),
        }
    }

    pub fn touch(&mut self) {
        self.last_access = SystemTime::now();
    }

    /// True once `now - last_access` exceeds `ttl` and no task currently
    /// owns this service.
    pub fn is_idle_past(&self, ttl: Duration, now: SystemTime) -> bool {
        !self.state.is_busy()
            && now.duration_since(self.last_access).map(|age| age > ttl).unwrap_or(false)
    }

    /// Sets the resolved endpoint type. Once set to anything other than
    /// `Unknown`, further calls are ignored.
    pub fn set_service_type(&mut self, service_type: ServiceType) {
        if self.service_type == ServiceType::Unknown {
            self.service_type = service_type;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_service_is_not_busy_and_has_no_completed_cycle() {
        let svc = Service::new("https://vc.example/sdk", "user", "pass", false);
        assert!(!svc.state.is_busy());
        assert!(!svc.state.has_completed_a_cycle());
    }

    #[test]
    fn updating_marks_busy() {
        let mut svc = Service::new("https://vc.example/sdk", "user", "pass", false);
        svc.state |= ServiceState::UPDATING;
        assert!(svc.state.is_busy());
    }

    #[test]
    fn service_type_is_sticky_once_set() {
        let mut svc = Service::new("https://vc.example/sdk", "user", "pass", false);
        svc.set_service_type(ServiceType::VCenter);
        svc.set_service_type(ServiceType::VSphere);
        assert_eq!(svc.service_type, ServiceType::VCenter);
    }

    #[test]
    fn idle_past_ttl_respects_busy_flag() {
        let mut svc = Service::new("https://vc.example/sdk", "user", "pass", false);
        svc.last_access = SystemTime::now() - Duration::from_secs(7200);
        assert!(svc.is_idle_past(Duration::from_secs(3600), SystemTime::now()));

        svc.state |= ServiceState::UPDATING;
        assert!(!svc.is_idle_past(Duration::from_secs(3600), SystemTime::now()));
    }
}
