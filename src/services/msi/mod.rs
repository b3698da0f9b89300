//! `Microsoft.ManagedIdentity`

/// `azurerm_user_assigned_identity`
pub mod user_assigned_identity;
