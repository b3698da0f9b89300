//! `Microsoft.MachineLearningServices`

/// `azurerm_machine_learning_workspace`
pub mod workspace;
