//! `Microsoft.Compute`: virtual machines, managed disks and disk encryption sets.

mod managed_disk_update;
mod models;

/// `azurerm_disk_encryption_set`
pub mod disk_encryption_set;
/// `azurerm_managed_disk`
pub mod managed_disk;
/// `azurerm_virtual_machine`
pub mod virtual_machine;
