//! Azure Resource Manager provider.
//!
//! Declarative resources and data sources for a slice of Azure: virtual
//! machines, managed disks and disk encryption sets, NAT gateways, Machine
//! Learning workspaces, Arc hybrid compute machines, user assigned
//! identities, and Azure Policy definitions, assignments and remediations.
//!
//! Every resource implements [`resource::Resource`]: a [`schema::Schema`]
//! plus create/read/update/delete over a [`resource::ResourceData`] bag.
//! [`AzureRmProvider`] registers them all behind the host-facing
//! [`ProviderService`] trait, and talks to Azure through an
//! [`arm::ResourceManager`], normally the reqwest-backed [`arm::ArmClient`].
//!
//! # Quick Start
//!
//! ```no_run
//! use serde_json::json;
//! use terraform_provider_azurerm::{init_logging, AzureRmProvider, ProviderService};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     init_logging();
//!
//!     let provider = AzureRmProvider::new();
//!     provider
//!         .configure(json!({
//!             "subscription_id": "00000000-0000-0000-0000-000000000000",
//!             "tenant_id": "00000000-0000-0000-0000-000000000000",
//!             "client_id": "00000000-0000-0000-0000-000000000000",
//!             "client_secret": "secret",
//!         }))
//!         .await?;
//!
//!     let state = provider
//!         .create(
//!             "azurerm_user_assigned_identity",
//!             json!({"name": "uai1", "resource_group_name": "rg1", "location": "westeurope"}),
//!         )
//!         .await?;
//!     println!("{}", state["principal_id"]);
//!     Ok(())
//! }
//! ```
//!
//! # Configuration
//!
//! Provider configuration may be supplied in the `configure` call or through
//! the usual `ARM_*` environment variables (`ARM_SUBSCRIPTION_ID`,
//! `ARM_TENANT_ID`, `ARM_CLIENT_ID`, `ARM_CLIENT_SECRET`, `ARM_ENVIRONMENT`).
//!
//! # Testing
//!
//! [`testing::FakeResourceManager`] stands in for Azure and
//! [`testing::ProviderTester`] drives a provider the way the host does.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod arm;
pub mod error;
pub mod logging;
pub mod provider;
pub mod resource;
pub mod schema;
pub mod services;
pub mod testing;
pub mod types;
pub mod validation;

// Re-export main types at crate root
pub use error::{ProviderError, Result};
pub use logging::{init_logging, init_logging_with_default, try_init_logging};
pub use provider::{AzureRmProvider, ProviderService};
pub use resource::{Clients, DataSource, Resource, ResourceData};
pub use schema::ProviderSchema;
pub use types::{
    AttributeChange, ImportedResource, PlanResult, ProviderMetadata, ServerCapabilities, Timeouts,
};
pub use validation::{is_valid, validate, validate_result};

// Re-export async_trait for convenience
pub use async_trait::async_trait;

// Re-export commonly used external types
pub use serde_json;
pub use tracing;
