//! VM lifecycle boundary.
//!
//! Allocation and start of the appliance VM are delegated to a
//! [`VmLifecycle`] implementation. Failures come back as typed
//! [`ElbError`](crate::ElbError)s so the orchestrator can pass them on.

use serde::{Deserialize, Serialize};

use lbgrid_core::{Account, ApplianceVm, ElbSettings, NetworkId, TrafficType, VmTemplate};

use crate::error::ElbResult;

/// Compute offering the appliance VM is allocated with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceOffering {
    pub name: String,
    pub cpu_count: u32,
    pub cpu_mhz: u32,
    pub ram_size_mb: u32,
    pub use_local_storage: bool,
    pub offer_ha: bool,
    pub system_use: bool,
}

impl ServiceOffering {
    pub const ELASTIC_LB_NAME: &'static str = "System Offering For Elastic LB VM";

    /// The elastic LB VM offering sized from settings.
    pub fn elastic_lb(settings: &ElbSettings) -> Self {
        Self {
            name: Self::ELASTIC_LB_NAME.to_string(),
            cpu_count: 1,
            cpu_mhz: settings.cpu_mhz,
            ram_size_mb: settings.ram_size_mb,
            use_local_storage: settings.use_local_storage,
            offer_ha: true,
            system_use: true,
        }
    }
}

/// One NIC to plug into the VM at allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NicSpec {
    pub network_id: NetworkId,
    pub traffic_type: TrafficType,
}

impl NicSpec {
    pub fn guest(network_id: NetworkId) -> Self {
        Self {
            network_id,
            traffic_type: TrafficType::Guest,
        }
    }

    pub fn control(network_id: NetworkId) -> Self {
        Self {
            network_id,
            traffic_type: TrafficType::Control,
        }
    }
}

/// Options for starting a VM.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StartParams {
    /// Reprogram the VM's networks on start.
    pub restart_network: bool,
}

/// Allocates and starts appliance VMs.
pub trait VmLifecycle: Send + Sync {
    /// Reserve resources and create the VM, owned by `owner`.
    ///
    /// Returns the allocated VM, typically in [`VmState::Allocated`](lbgrid_core::VmState).
    fn allocate(
        &self,
        vm: ApplianceVm,
        template: &VmTemplate,
        offering: &ServiceOffering,
        nics: &[NicSpec],
        owner: &Account,
    ) -> ElbResult<ApplianceVm>;

    /// Start the VM on behalf of `caller`, returning its new record.
    fn start(
        &self,
        vm: ApplianceVm,
        params: &StartParams,
        caller: &Account,
    ) -> ElbResult<ApplianceVm>;
}
