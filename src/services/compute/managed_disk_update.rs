//! Applying disk changes that require the owning VM to be stopped.

use super::models::{DiskUpdate, InstanceView};
use crate::arm::api_version::COMPUTE;
use crate::arm::client::{get_as, patch_as, ResourceManager};
use crate::arm::id::{ManagedDiskId, VirtualMachineId, VirtualMachineScaleSetVmId};
use crate::arm::locks::{LockGuard, Locks};
use crate::error::{ProviderError, Result};
use serde_json::Value;
use tracing::debug;

pub(crate) const VM_LOCK_TYPE: &str = "azurerm_virtual_machine";
const SCALE_SET_VM_LOCK_TYPE: &str = "azurerm_virtual_machine_scale_set_instance";

/// The VM a managed disk is attached to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiskOwner {
    /// A standalone virtual machine.
    VirtualMachine(VirtualMachineId),
    /// An instance of a virtual machine scale set.
    ScaleSetVm(VirtualMachineScaleSetVmId),
}

impl DiskOwner {
    /// Parse the disk's `managedBy` ID.
    pub fn parse(managed_by: &str) -> Result<Self> {
        if let Ok(id) = VirtualMachineId::parse(managed_by) {
            return Ok(Self::VirtualMachine(id));
        }
        if let Ok(id) = VirtualMachineScaleSetVmId::parse(managed_by) {
            return Ok(Self::ScaleSetVm(id));
        }
        Err(ProviderError::Validation(format!(
            "cannot parse {:?} as a Virtual Machine ID or Virtual Machine Scale Set VM ID",
            managed_by
        )))
    }

    async fn lock(&self, locks: &Locks) -> LockGuard {
        match self {
            Self::VirtualMachine(id) => locks.by_name(&id.name, VM_LOCK_TYPE).await,
            Self::ScaleSetVm(id) => locks.by_name(&id.name, SCALE_SET_VM_LOCK_TYPE).await,
        }
    }
}

/// What has to happen to a VM around a disk update, given its power state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PowerPlan {
    /// Power the VM off first.
    pub shut_down: bool,
    /// Deallocate the VM before updating.
    pub deallocate: bool,
    /// Start the VM again afterwards.
    pub turn_back_on: bool,
}

impl PowerPlan {
    /// Plan for a VM in `power_state` (lower-case, without the `powerstate/` prefix).
    pub fn for_state(power_state: Option<&str>) -> Self {
        match power_state {
            Some("deallocated") | Some("deallocating") => Self {
                shut_down: false,
                deallocate: false,
                turn_back_on: false,
            },
            Some("stopped") | Some("stopping") => Self {
                shut_down: false,
                deallocate: true,
                turn_back_on: false,
            },
            _ => Self {
                shut_down: true,
                deallocate: true,
                turn_back_on: true,
            },
        }
    }
}

/// PATCH a disk, stopping its VM first when `shut_down` is set.
pub struct ManagedDiskUpdate<'a> {
    pub(crate) arm: &'a dyn ResourceManager,
    pub(crate) locks: &'a Locks,
    pub(crate) disk: &'a ManagedDiskId,
    pub(crate) managed_by: Option<&'a str>,
    pub(crate) shut_down: bool,
}

impl ManagedDiskUpdate<'_> {
    /// Apply `update`.
    pub async fn perform(&self, update: &DiskUpdate) -> Result<()> {
        let owner = match (self.shut_down, self.managed_by.filter(|m| !m.is_empty())) {
            (true, Some(managed_by)) => Some(DiskOwner::parse(managed_by)?),
            _ => None,
        };

        let Some(owner) = owner else {
            return self.update_disk(update).await;
        };

        let _guard = owner.lock(self.locks).await;
        let plan = match &owner {
            DiskOwner::VirtualMachine(vm) => self.shut_down_vm(vm).await?,
            DiskOwner::ScaleSetVm(vm) => {
                debug!(scale_set = %vm.scale_set_name, instance = %vm.name, "leaving scale set instance running");
                PowerPlan::for_state(Some("deallocated"))
            },
        };

        self.update_disk(update).await?;

        if let (true, DiskOwner::VirtualMachine(vm)) = (plan.turn_back_on, &owner) {
            debug!(%vm, "starting virtual machine");
            self.arm.post(&format!("{}/start", vm.id()), COMPUTE, None).await?;
            debug!(%vm, "started virtual machine");
        }
        Ok(())
    }

    async fn update_disk(&self, update: &DiskUpdate) -> Result<()> {
        debug!(disk = %self.disk, "updating managed disk");
        let _: Value = patch_as(self.arm, &self.disk.id(), COMPUTE, update).await?;
        debug!(disk = %self.disk, "updated managed disk");
        Ok(())
    }

    async fn shut_down_vm(&self, vm: &VirtualMachineId) -> Result<PowerPlan> {
        let view: InstanceView =
            get_as(self.arm, &format!("{}/instanceView", vm.id()), COMPUTE).await?;
        let state = view.power_state();
        let plan = PowerPlan::for_state(state.as_deref());
        debug!(%vm, power_state = ?state, ?plan, "planned power transitions");

        if plan.shut_down {
            debug!(%vm, "powering off virtual machine");
            self.arm
                .post(&format!("{}/powerOff?skipShutdown=false", vm.id()), COMPUTE, None)
                .await?;
        }
        if plan.deallocate {
            debug!(%vm, "deallocating virtual machine");
            self.arm
                .post(&format!("{}/deallocate", vm.id()), COMPUTE, None)
                .await?;
        }
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::compute::models::DiskUpdateProperties;
    use crate::testing::FakeResourceManager;
    use serde_json::json;

    const VM: &str = "/subscriptions/sub/resourceGroups/rg/providers/Microsoft.Compute/virtualMachines/vm1";
    const DISK: &str = "/subscriptions/sub/resourceGroups/rg/providers/Microsoft.Compute/disks/disk1";

    fn resize() -> DiskUpdate {
        DiskUpdate {
            properties: DiskUpdateProperties {
                disk_size_gb: Some(128),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn fake_with_power_state(state: &str) -> FakeResourceManager {
        let fake = FakeResourceManager::new();
        fake.seed(DISK, json!({"id": DISK, "managedBy": VM}));
        fake.seed(
            &format!("{}/instanceView", VM),
            json!({"statuses": [{"code": "ProvisioningState/succeeded"}, {"code": format!("PowerState/{}", state)}]}),
        );
        fake
    }

    const SCALE_SET_VM: &str =
        "/subscriptions/sub/resourceGroups/rg/providers/Microsoft.Compute/virtualMachineScaleSets/ss/virtualMachines/ss_0";

    async fn run(fake: &FakeResourceManager) -> Vec<String> {
        run_owned_by(fake, VM).await
    }

    async fn run_owned_by(fake: &FakeResourceManager, managed_by: &str) -> Vec<String> {
        let locks = Locks::new();
        let disk = ManagedDiskId::parse(DISK).unwrap();
        ManagedDiskUpdate {
            arm: fake,
            locks: &locks,
            disk: &disk,
            managed_by: Some(managed_by),
            shut_down: true,
        }
        .perform(&resize())
        .await
        .unwrap();
        fake.calls()
            .into_iter()
            .filter(|c| c.method != "GET")
            .map(|c| {
                format!(
                    "{} {}",
                    c.method,
                    c.id.trim_start_matches(managed_by).trim_start_matches(DISK)
                )
            })
            .collect()
    }

    #[test]
    fn test_owner_parse() {
        assert!(matches!(DiskOwner::parse(VM), Ok(DiskOwner::VirtualMachine(_))));
        assert!(matches!(DiskOwner::parse(SCALE_SET_VM), Ok(DiskOwner::ScaleSetVm(_))));
        assert!(DiskOwner::parse("/subscriptions/sub").is_err());
    }

    #[tokio::test]
    async fn test_running_vm_is_cycled() {
        let fake = fake_with_power_state("running");
        assert_eq!(
            run(&fake).await,
            vec![
                "POST /powerOff?skipShutdown=false",
                "POST /deallocate",
                "PATCH ",
                "POST /start"
            ]
        );
    }

    #[tokio::test]
    async fn test_stopped_vm_is_deallocated_but_not_started() {
        let fake = fake_with_power_state("stopped");
        assert_eq!(run(&fake).await, vec!["POST /deallocate", "PATCH "]);
    }

    #[tokio::test]
    async fn test_stopping_vm_is_deallocated_but_not_started() {
        let fake = fake_with_power_state("stopping");
        assert_eq!(run(&fake).await, vec!["POST /deallocate", "PATCH "]);
    }

    #[tokio::test]
    async fn test_deallocated_vm_is_left_alone() {
        let fake = fake_with_power_state("deallocated");
        assert_eq!(run(&fake).await, vec!["PATCH "]);
    }

    #[tokio::test]
    async fn test_deallocating_vm_is_left_alone() {
        let fake = fake_with_power_state("deallocating");
        assert_eq!(run(&fake).await, vec!["PATCH "]);
    }

    #[tokio::test]
    async fn test_scale_set_instance_is_not_power_cycled() {
        let fake = FakeResourceManager::new();
        fake.seed(DISK, json!({"id": DISK, "managedBy": SCALE_SET_VM}));
        assert_eq!(run_owned_by(&fake, SCALE_SET_VM).await, vec!["PATCH "]);
        assert!(fake.calls().iter().all(|c| !c.id.contains("instanceView")));
        assert_eq!(fake.stored(DISK).unwrap()["properties"]["diskSizeGB"], 128);
    }

    #[tokio::test]
    async fn test_unattached_disk_is_just_patched() {
        let fake = FakeResourceManager::new();
        fake.seed(DISK, json!({"id": DISK}));
        let locks = Locks::new();
        let disk = ManagedDiskId::parse(DISK).unwrap();
        ManagedDiskUpdate {
            arm: &fake,
            locks: &locks,
            disk: &disk,
            managed_by: None,
            shut_down: true,
        }
        .perform(&resize())
        .await
        .unwrap();
        assert_eq!(fake.calls_to("PATCH"), vec![DISK.to_string()]);
        assert_eq!(fake.stored(DISK).unwrap()["properties"]["diskSizeGB"], 128);
    }
}
