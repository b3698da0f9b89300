//! `Microsoft.Network`

/// `azurerm_nat_gateway`
pub mod nat_gateway;
