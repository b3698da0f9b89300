//! `Microsoft.HybridCompute` (Azure Arc enabled servers)

/// `azurerm_hybrid_compute_machine`
pub mod machine;
