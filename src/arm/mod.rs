//! Azure Resource Manager plumbing shared by every resource: IDs, auth,
//! the REST client and its long-running-operation poller, locks and
//! small expand/flatten helpers.

pub mod auth;
pub mod client;
pub mod config;
pub mod id;
pub mod location;
pub mod locks;
pub mod tags;

pub use client::{ArmClient, ResourceManager};
pub use config::{CloudEnvironment, ProviderConfig, ResolvedConfig};
pub use locks::Locks;

/// API versions per resource provider namespace.
pub mod api_version {
    /// `Microsoft.Compute`
    pub const COMPUTE: &str = "2019-07-01";
    /// `Microsoft.Network`
    pub const NETWORK: &str = "2019-09-01";
    /// `Microsoft.MachineLearningServices`
    pub const MACHINE_LEARNING: &str = "2019-11-01";
    /// `Microsoft.Storage`
    pub const STORAGE: &str = "2019-04-01";
    /// `Microsoft.ContainerRegistry`
    pub const CONTAINER_REGISTRY: &str = "2019-05-01";
    /// `Microsoft.HybridCompute`
    pub const HYBRID_COMPUTE: &str = "2020-08-02";
    /// `Microsoft.ManagedIdentity`
    pub const MANAGED_IDENTITY: &str = "2018-11-30";
    /// `Microsoft.Authorization` policy objects
    pub const POLICY: &str = "2020-03-01-preview";
    /// `Microsoft.PolicyInsights`
    pub const POLICY_INSIGHTS: &str = "2019-10-01";
}
