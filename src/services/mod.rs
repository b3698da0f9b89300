//! Resource and data source implementations, one submodule per Azure
//! resource provider namespace.

pub mod compute;
pub mod hybridcompute;
pub mod machinelearning;
pub mod msi;
pub mod network;
pub mod policy;

use crate::resource::{DataSource, Resource};
use std::sync::Arc;

/// Every resource the provider serves.
pub fn resources() -> Vec<Arc<dyn Resource>> {
    vec![
        Arc::new(compute::virtual_machine::VirtualMachineResource),
        Arc::new(compute::managed_disk::ManagedDiskResource),
        Arc::new(compute::disk_encryption_set::DiskEncryptionSetResource),
        Arc::new(network::nat_gateway::NatGatewayResource),
        Arc::new(machinelearning::workspace::WorkspaceResource),
        Arc::new(hybridcompute::machine::HybridComputeMachineResource),
        Arc::new(msi::user_assigned_identity::UserAssignedIdentityResource),
        Arc::new(policy::definition::PolicyDefinitionResource),
        Arc::new(policy::set_definition::PolicySetDefinitionResource),
        Arc::new(policy::assignment::PolicyAssignmentResource),
        Arc::new(policy::remediation::PolicyRemediationResource),
    ]
}

/// Every data source the provider serves.
pub fn data_sources() -> Vec<Arc<dyn DataSource>> {
    vec![
        Arc::new(compute::disk_encryption_set::DiskEncryptionSetDataSource),
        Arc::new(network::nat_gateway::NatGatewayDataSource),
        Arc::new(machinelearning::workspace::WorkspaceDataSource),
        Arc::new(hybridcompute::machine::HybridComputeMachineDataSource),
        Arc::new(msi::user_assigned_identity::UserAssignedIdentityDataSource),
    ]
}
