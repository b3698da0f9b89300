//! Azure Resource Manager resource IDs.
//!
//! A resource ID is a `/`-separated list of key/value pairs:
//!
//! ```text
//! /subscriptions/{sub}/resourceGroups/{rg}/providers/{namespace}/{type}/{name}[/{type}/{name}...]
//! ```
//!
//! [`ResourceId::parse`] splits the generic shape; the typed IDs below pop the
//! segments each resource needs and reject anything left over.

use crate::error::{ProviderError, Result};
use std::collections::HashMap;
use std::fmt;

/// A generic, parsed ARM resource ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceId {
    /// Subscription the resource lives in.
    pub subscription_id: String,
    /// Resource group (empty for subscription-level IDs).
    pub resource_group: String,
    /// Resource provider namespace (e.g. `Microsoft.Compute`).
    pub provider: String,
    /// Remaining key/value segments.
    pub path: HashMap<String, String>,
}

impl ResourceId {
    /// Parse an ID of the form `/subscriptions/.../key/value/...`.
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim_matches('/');
        if trimmed.is_empty() {
            return Err(invalid(input, "cannot parse an empty ID"));
        }

        let components: Vec<&str> = trimmed.split('/').collect();
        if components.len() % 2 != 0 {
            return Err(invalid(
                input,
                "the number of path segments is not divisible by 2",
            ));
        }

        let mut id = ResourceId {
            subscription_id: String::new(),
            resource_group: String::new(),
            provider: String::new(),
            path: HashMap::new(),
        };

        for pair in components.chunks(2) {
            let (key, value) = (pair[0], pair[1]);
            if key.is_empty() || value.is_empty() {
                return Err(invalid(input, "key/value cannot be empty strings"));
            }
            match key {
                "subscriptions" => id.subscription_id = value.to_string(),
                "resourceGroups" => id.resource_group = value.to_string(),
                "providers" => id.provider = value.to_string(),
                _ => {
                    id.path.insert(key.to_string(), value.to_string());
                },
            }
        }

        if id.subscription_id.is_empty() {
            return Err(invalid(input, "no subscription ID found"));
        }

        Ok(id)
    }

    /// Remove and return the value for `name` (case-sensitive).
    pub fn pop_segment(&mut self, name: &str) -> Result<String> {
        self.path
            .remove(name)
            .ok_or_else(|| ProviderError::Validation(format!("ID was missing the `{}` element", name)))
    }

    /// Fail if any path segment was not consumed.
    pub fn validate_no_empty_segments(&self, source: &str) -> Result<()> {
        if self.path.is_empty() {
            return Ok(());
        }
        let mut leftover: Vec<_> = self.path.keys().cloned().collect();
        leftover.sort();
        Err(ProviderError::Validation(format!(
            "ID contained more segments than required: {:?}, {:?}",
            source, leftover
        )))
    }

    fn require_resource_group(&self) -> Result<()> {
        if self.resource_group.is_empty() {
            Err(ProviderError::Validation(
                "ID was missing the `resourceGroups` element".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

fn invalid(input: &str, reason: &str) -> ProviderError {
    ProviderError::Validation(format!("parsing Azure ID {:?}: {}", input, reason))
}

fn rg_scoped(input: &str, what: &str, segment: &str) -> Result<(String, String, String)> {
    let mut id = ResourceId::parse(input)
        .map_err(|e| ProviderError::Validation(format!("parsing {} ID {:?}: {}", what, input, e.message())))?;
    id.require_resource_group()?;
    let name = id.pop_segment(segment)?;
    id.validate_no_empty_segments(input)?;
    Ok((id.subscription_id, id.resource_group, name))
}

/// Declares a `subscription/resourceGroup/provider/type/name` ID type.
macro_rules! resource_group_scoped_id {
    ($(#[$meta:meta])* $name:ident, $what:literal, $namespace:literal, $segment:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub struct $name {
            /// Subscription ID.
            pub subscription_id: String,
            /// Resource group name.
            pub resource_group: String,
            /// Resource name.
            pub name: String,
        }

        impl $name {
            /// Build an ID from its parts.
            pub fn new(
                subscription_id: impl Into<String>,
                resource_group: impl Into<String>,
                name: impl Into<String>,
            ) -> Self {
                Self {
                    subscription_id: subscription_id.into(),
                    resource_group: resource_group.into(),
                    name: name.into(),
                }
            }

            /// Parse and validate an ID string.
            pub fn parse(input: &str) -> Result<Self> {
                let (subscription_id, resource_group, name) = rg_scoped(input, $what, $segment)?;
                Ok(Self {
                    subscription_id,
                    resource_group,
                    name,
                })
            }

            /// Canonical ID string.
            pub fn id(&self) -> String {
                format!(
                    concat!(
                        "/subscriptions/{}/resourceGroups/{}/providers/",
                        $namespace,
                        "/",
                        $segment,
                        "/{}"
                    ),
                    self.subscription_id, self.resource_group, self.name
                )
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(
                    f,
                    "{}: (Name {:?} / Resource Group {:?})",
                    $what, self.name, self.resource_group
                )
            }
        }
    };
}

resource_group_scoped_id!(
    /// `Microsoft.Compute/disks`
    ManagedDiskId,
    "Managed Disk",
    "Microsoft.Compute",
    "disks"
);
resource_group_scoped_id!(
    /// `Microsoft.Compute/virtualMachines`
    VirtualMachineId,
    "Virtual Machine",
    "Microsoft.Compute",
    "virtualMachines"
);
resource_group_scoped_id!(
    /// `Microsoft.Compute/diskEncryptionSets`
    DiskEncryptionSetId,
    "Disk Encryption Set",
    "Microsoft.Compute",
    "diskEncryptionSets"
);
resource_group_scoped_id!(
    /// `Microsoft.Network/natGateways`
    NatGatewayId,
    "NAT Gateway",
    "Microsoft.Network",
    "natGateways"
);
resource_group_scoped_id!(
    /// `Microsoft.MachineLearningServices/workspaces`
    WorkspaceId,
    "Machine Learning Workspace",
    "Microsoft.MachineLearningServices",
    "workspaces"
);
resource_group_scoped_id!(
    /// `Microsoft.Storage/storageAccounts`
    StorageAccountId,
    "Storage Account",
    "Microsoft.Storage",
    "storageAccounts"
);
resource_group_scoped_id!(
    /// `Microsoft.ContainerRegistry/registries`
    ContainerRegistryId,
    "Container Registry",
    "Microsoft.ContainerRegistry",
    "registries"
);
resource_group_scoped_id!(
    /// `Microsoft.HybridCompute/machines`
    HybridComputeMachineId,
    "Hybrid Compute Machine",
    "Microsoft.HybridCompute",
    "machines"
);
resource_group_scoped_id!(
    /// `Microsoft.ManagedIdentity/userAssignedIdentities`
    UserAssignedIdentityId,
    "User Assigned Identity",
    "Microsoft.ManagedIdentity",
    "userAssignedIdentities"
);

impl UserAssignedIdentityId {
    /// Parse an identity ID whose segment keys may use any casing.
    ///
    /// Older state stored IDs as returned by the API
    /// (`/resourcegroups/.../userassignedidentities/...`).
    pub fn parse_insensitively(input: &str) -> Result<Self> {
        let trimmed = input.trim_matches('/');
        let components: Vec<&str> = trimmed.split('/').collect();
        if trimmed.is_empty() || components.len() % 2 != 0 {
            return Err(invalid(input, "the number of path segments is not divisible by 2"));
        }
        let mut subscription_id = None;
        let mut resource_group = None;
        let mut name = None;
        for pair in components.chunks(2) {
            let key = pair[0].to_ascii_lowercase();
            let value = pair[1].to_string();
            match key.as_str() {
                "subscriptions" => subscription_id = Some(value),
                "resourcegroups" => resource_group = Some(value),
                "userassignedidentities" => name = Some(value),
                "providers" => {},
                other => {
                    return Err(invalid(input, &format!("unexpected segment `{}`", other)));
                },
            }
        }
        match (subscription_id, resource_group, name) {
            (Some(s), Some(rg), Some(n)) if !s.is_empty() && !rg.is_empty() && !n.is_empty() => {
                Ok(Self::new(s, rg, n))
            },
            _ => Err(invalid(input, "expected subscription, resource group and identity name")),
        }
    }
}

/// A Virtual Machine Scale Set VM:
/// `.../providers/Microsoft.Compute/virtualMachineScaleSets/{vmss}/virtualMachines/{instance}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualMachineScaleSetVmId {
    /// Subscription ID.
    pub subscription_id: String,
    /// Resource group name.
    pub resource_group: String,
    /// Scale set name.
    pub scale_set_name: String,
    /// Instance name (e.g. `vmss1_0`).
    pub name: String,
}

impl VirtualMachineScaleSetVmId {
    /// Parse and validate a scale set VM ID.
    pub fn parse(input: &str) -> Result<Self> {
        let mut id = ResourceId::parse(input).map_err(|e| {
            ProviderError::Validation(format!(
                "parsing Virtual Machine Scale Set VM ID {:?}: {}",
                input,
                e.message()
            ))
        })?;
        id.require_resource_group()?;
        let scale_set_name = id.pop_segment("virtualMachineScaleSets")?;
        let name = id.pop_segment("virtualMachines")?;
        id.validate_no_empty_segments(input)?;
        Ok(Self {
            subscription_id: id.subscription_id,
            resource_group: id.resource_group,
            scale_set_name,
            name,
        })
    }

    /// Canonical ID string.
    pub fn id(&self) -> String {
        format!(
            "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Compute/virtualMachineScaleSets/{}/virtualMachines/{}",
            self.subscription_id, self.resource_group, self.scale_set_name, self.name
        )
    }
}

/// Splits a scope-relative ID at `marker` (e.g. `/providers/Microsoft.Authorization/policyAssignments/`).
fn split_scoped(input: &str, marker: &str, what: &str) -> Result<(String, String)> {
    let lower = input.to_ascii_lowercase();
    let idx = lower.find(&marker.to_ascii_lowercase()).ok_or_else(|| {
        ProviderError::Validation(format!(
            "{} ID {:?} does not contain {:?}",
            what, input, marker
        ))
    })?;
    let scope = &input[..idx];
    let name = &input[idx + marker.len()..];
    if name.is_empty() || name.contains('/') {
        return Err(ProviderError::Validation(format!(
            "{} ID {:?} has an invalid name segment",
            what, input
        )));
    }
    Ok((scope.to_string(), name.to_string()))
}

/// Where a policy definition or set definition lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyScope {
    /// `/subscriptions/{id}`
    Subscription(String),
    /// `/providers/Microsoft.Management/managementGroups/{name}`
    ManagementGroup(String),
}

impl PolicyScope {
    fn parse(scope: &str, input: &str) -> Result<Self> {
        let segments: Vec<&str> = scope.trim_matches('/').split('/').collect();
        match segments.as_slice() {
            ["subscriptions", sub] if !sub.is_empty() => Ok(Self::Subscription(sub.to_string())),
            ["providers", ns, "managementGroups", mg]
                if ns.eq_ignore_ascii_case("Microsoft.Management") && !mg.is_empty() =>
            {
                Ok(Self::ManagementGroup(mg.to_string()))
            },
            _ => Err(ProviderError::Validation(format!(
                "{:?} must be scoped to a subscription or a management group",
                input
            ))),
        }
    }

    /// The scope prefix used in IDs.
    pub fn prefix(&self) -> String {
        match self {
            Self::Subscription(sub) => format!("/subscriptions/{}", sub),
            Self::ManagementGroup(mg) => {
                format!("/providers/Microsoft.Management/managementGroups/{}", mg)
            },
        }
    }

    /// The management group name, if scoped to one.
    pub fn management_group(&self) -> Option<&str> {
        match self {
            Self::ManagementGroup(mg) => Some(mg),
            Self::Subscription(_) => None,
        }
    }
}

macro_rules! policy_scoped_id {
    ($(#[$meta:meta])* $name:ident, $what:literal, $segment:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub struct $name {
            /// Subscription or management group the object lives in.
            pub scope: PolicyScope,
            /// Object name.
            pub name: String,
        }

        impl $name {
            const MARKER: &'static str =
                concat!("/providers/Microsoft.Authorization/", $segment, "/");

            /// Build an ID from its parts.
            pub fn new(scope: PolicyScope, name: impl Into<String>) -> Self {
                Self {
                    scope,
                    name: name.into(),
                }
            }

            /// Parse and validate an ID string.
            pub fn parse(input: &str) -> Result<Self> {
                let (scope, name) = split_scoped(input, Self::MARKER, $what)?;
                Ok(Self {
                    scope: PolicyScope::parse(&scope, input)?,
                    name,
                })
            }

            /// Canonical ID string.
            pub fn id(&self) -> String {
                format!("{}{}{}", self.scope.prefix(), Self::MARKER, self.name)
            }
        }
    };
}

policy_scoped_id!(
    /// `Microsoft.Authorization/policyDefinitions`
    PolicyDefinitionId,
    "Policy Definition",
    "policyDefinitions"
);
policy_scoped_id!(
    /// `Microsoft.Authorization/policySetDefinitions`
    PolicySetDefinitionId,
    "Policy Set Definition",
    "policySetDefinitions"
);

/// A policy assignment under any scope (subscription, resource group, resource,
/// or management group).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyAssignmentId {
    /// Scope ID the assignment applies to.
    pub scope: String,
    /// Assignment name.
    pub name: String,
}

impl PolicyAssignmentId {
    const MARKER: &'static str = "/providers/Microsoft.Authorization/policyAssignments/";

    /// Build an ID from its parts.
    pub fn new(scope: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            name: name.into(),
        }
    }

    /// Parse and validate an ID string.
    pub fn parse(input: &str) -> Result<Self> {
        let (scope, name) = split_scoped(input, Self::MARKER, "Policy Assignment")?;
        if scope.is_empty() {
            return Err(ProviderError::Validation(format!(
                "Policy Assignment ID {:?} is missing a scope",
                input
            )));
        }
        Ok(Self { scope, name })
    }

    /// Canonical ID string.
    pub fn id(&self) -> String {
        format!("{}{}{}", self.scope, Self::MARKER, self.name)
    }
}

/// A policy remediation under any scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemediationId {
    /// Scope ID the remediation runs against.
    pub scope: String,
    /// Remediation name.
    pub name: String,
}

impl RemediationId {
    const MARKER: &'static str = "/providers/Microsoft.PolicyInsights/remediations/";

    /// Build an ID from its parts.
    pub fn new(scope: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            name: name.into(),
        }
    }

    /// Parse and validate an ID string.
    pub fn parse(input: &str) -> Result<Self> {
        let (scope, name) = split_scoped(input, Self::MARKER, "Policy Remediation")?;
        if scope.is_empty() {
            return Err(ProviderError::Validation(format!(
                "Policy Remediation ID {:?} is missing a scope",
                input
            )));
        }
        Ok(Self { scope, name })
    }

    /// Canonical ID string.
    pub fn id(&self) -> String {
        format!("{}{}{}", self.scope, Self::MARKER, self.name)
    }
}
