//! Testing utilities for the provider and its resources.
//!
//! [`ProviderTester`] drives a [`ProviderService`] the way the host would.
//! [`FakeResourceManager`] is an in-memory Resource Manager: PUT stores,
//! GET returns, DELETE removes, and every call is recorded.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use terraform_provider_azurerm::provider::AzureRmProvider;
//! use terraform_provider_azurerm::resource::Clients;
//! use terraform_provider_azurerm::testing::{FakeResourceManager, ProviderTester};
//!
//! let fake = Arc::new(FakeResourceManager::new());
//! let tester = ProviderTester::new(AzureRmProvider::with_clients(Clients::new(fake, "sub")));
//! let state = tester.lifecycle_create("azurerm_nat_gateway", config).await?;
//! ```

use crate::error::{ProviderError, Result};
use crate::arm::client::ResourceManager;
use crate::provider::ProviderService;
use crate::schema::{Diagnostic, DiagnosticSeverity, ProviderSchema};
use crate::types::{ImportedResource, PlanResult};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Mutex;

/// A test harness wrapping a `ProviderService`.
pub struct ProviderTester<P: ProviderService> {
    provider: P,
}

impl<P: ProviderService> ProviderTester<P> {
    /// Create a new tester for the given provider.
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    /// Get a reference to the underlying provider.
    pub fn provider(&self) -> &P {
        &self.provider
    }

    // =========================================================================
    // Schema & Metadata
    // =========================================================================

    /// Get the provider's schema.
    pub fn schema(&self) -> ProviderSchema {
        self.provider.schema()
    }

    /// Get the list of resource type names.
    pub fn resource_types(&self) -> Vec<String> {
        self.provider.metadata().resources
    }

    /// Get the list of data source type names.
    pub fn data_source_types(&self) -> Vec<String> {
        self.provider.metadata().data_sources
    }

    // =========================================================================
    // Provider Lifecycle
    // =========================================================================

    /// Configure the provider; error diagnostics become a [`TestError`].
    pub async fn configure(&self, config: Value) -> Result<(), TestError> {
        let diagnostics = self.provider.configure(config).await?;
        check_diagnostics(diagnostics)
    }

    // =========================================================================
    // Resource Operations
    // =========================================================================

    /// Validate a resource configuration.
    pub async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<(), TestError> {
        let diagnostics = self
            .provider
            .validate_resource_config(resource_type, config)
            .await?;
        check_diagnostics(diagnostics)
    }

    /// Plan a resource creation (no prior state).
    pub async fn plan_create(&self, resource_type: &str, proposed_state: Value) -> Result<PlanResult> {
        self.provider
            .plan(resource_type, None, proposed_state.clone(), proposed_state)
            .await
    }

    /// Plan a resource update.
    pub async fn plan_update(
        &self,
        resource_type: &str,
        prior_state: Value,
        proposed_state: Value,
    ) -> Result<PlanResult> {
        self.provider
            .plan(resource_type, Some(prior_state), proposed_state.clone(), proposed_state)
            .await
    }

    /// Create a new resource.
    pub async fn create(&self, resource_type: &str, planned_state: Value) -> Result<Value> {
        self.provider.create(resource_type, planned_state).await
    }

    /// Read the current state of a resource.
    pub async fn read(&self, resource_type: &str, current_state: Value) -> Result<Value> {
        self.provider.read(resource_type, current_state).await
    }

    /// Update an existing resource.
    pub async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value> {
        self.provider.update(resource_type, prior_state, planned_state).await
    }

    /// Delete a resource.
    pub async fn delete(&self, resource_type: &str, current_state: Value) -> Result<()> {
        self.provider.delete(resource_type, current_state).await
    }

    /// Import an existing resource.
    pub async fn import_resource(&self, resource_type: &str, id: &str) -> Result<Vec<ImportedResource>> {
        self.provider.import_resource(resource_type, id).await
    }

    /// Read data from a data source.
    pub async fn read_data_source(&self, data_source_type: &str, config: Value) -> Result<Value> {
        self.provider.read_data_source(data_source_type, config).await
    }

    // =========================================================================
    // Lifecycle Helpers
    // =========================================================================

    /// Plan, create, then read back.
    pub async fn lifecycle_create(&self, resource_type: &str, config: Value) -> Result<Value> {
        let plan = self.plan_create(resource_type, config).await?;
        let created = self.create(resource_type, plan.planned_state).await?;
        self.read(resource_type, created).await
    }

    /// Plan, update in place, then read back.
    pub async fn lifecycle_update(
        &self,
        resource_type: &str,
        prior_state: Value,
        proposed_state: Value,
    ) -> Result<Value> {
        let plan = self
            .plan_update(resource_type, prior_state.clone(), proposed_state)
            .await?;
        if plan.requires_replace {
            return Err(ProviderError::FailedPrecondition(format!(
                "{} must be replaced, not updated",
                resource_type
            )));
        }
        let updated = self.update(resource_type, prior_state, plan.planned_state).await?;
        self.read(resource_type, updated).await
    }
}

/// Error type for test operations that may fail with diagnostics.
#[derive(Debug)]
pub enum TestError {
    /// The operation failed with diagnostics.
    Diagnostics(Vec<Diagnostic>),
    /// The operation failed with a provider error.
    Provider(ProviderError),
}

impl std::fmt::Display for TestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TestError::Diagnostics(diags) => {
                writeln!(f, "Operation failed with {} diagnostic(s):", diags.len())?;
                for diag in diags {
                    write!(f, "  [{:?}] {}", diag.severity, diag.summary)?;
                    if let Some(attr) = &diag.attribute {
                        write!(f, " (at {})", attr)?;
                    }
                    writeln!(f)?;
                }
                Ok(())
            },
            TestError::Provider(e) => write!(f, "Provider error: {}", e),
        }
    }
}

impl std::error::Error for TestError {}

impl From<ProviderError> for TestError {
    fn from(e: ProviderError) -> Self {
        TestError::Provider(e)
    }
}

fn check_diagnostics(diagnostics: Vec<Diagnostic>) -> Result<(), TestError> {
    let errors: Vec<_> = diagnostics
        .into_iter()
        .filter(|d| matches!(d.severity, DiagnosticSeverity::Error))
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(TestError::Diagnostics(errors))
    }
}

// =========================================================================
// Assertion Helpers
// =========================================================================

/// Assert that a plan result indicates no changes.
///
/// # Panics
///
/// Panics if the plan has any changes.
pub fn assert_plan_no_changes(plan: &PlanResult) {
    assert!(
        plan.changes.is_empty(),
        "Expected no changes, but got {} change(s): {:?}",
        plan.changes.len(),
        plan.changes.iter().map(|c| &c.path).collect::<Vec<_>>()
    );
}

/// Assert that a plan requires resource replacement.
///
/// # Panics
///
/// Panics if the plan does not require replacement.
pub fn assert_plan_replaces(plan: &PlanResult) {
    assert!(
        plan.requires_replace,
        "Expected plan to require replacement, but it does not"
    );
}

/// Assert that a plan changes something without replacing the resource.
///
/// # Panics
///
/// Panics if the plan has no changes or requires replacement.
pub fn assert_plan_updates_in_place(plan: &PlanResult) {
    assert!(!plan.changes.is_empty(), "Expected plan to have changes, but got none");
    assert!(
        !plan.requires_replace,
        "Expected plan to update in place, but it requires replacement"
    );
}

/// Assert that a plan has a change for a specific attribute path.
///
/// # Panics
///
/// Panics if the plan does not have a change for the given path.
pub fn assert_plan_changes_attribute(plan: &PlanResult, path: &str) {
    let has_change = plan.changes.iter().any(|c| c.path == path);
    assert!(
        has_change,
        "Expected plan to change attribute '{}', but it was not changed. Changed attributes: {:?}",
        path,
        plan.changes.iter().map(|c| &c.path).collect::<Vec<_>>()
    );
}

/// Assert that diagnostics contain an error with the given summary substring.
///
/// # Panics
///
/// Panics if no error diagnostic contains the given substring.
pub fn assert_error_contains(diagnostics: &[Diagnostic], substring: &str) {
    let has_matching_error = diagnostics
        .iter()
        .any(|d| matches!(d.severity, DiagnosticSeverity::Error) && d.summary.contains(substring));

    assert!(
        has_matching_error,
        "Expected an error containing '{}', but no matching error found. Errors: {:?}",
        substring,
        diagnostics
            .iter()
            .filter(|d| matches!(d.severity, DiagnosticSeverity::Error))
            .map(|d| &d.summary)
            .collect::<Vec<_>>()
    );
}

// =========================================================================
// Fake Resource Manager
// =========================================================================

/// A request seen by [`FakeResourceManager`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    /// HTTP verb.
    pub method: &'static str,
    /// ID as passed by the caller, including any action suffix or query.
    pub id: String,
}

/// In-memory stand-in for Azure Resource Manager.
///
/// IDs are matched case-insensitively with any query string dropped.
/// PUT marks the stored resource `Succeeded`; PATCH merges into it.
#[derive(Debug, Default)]
pub struct FakeResourceManager {
    resources: Mutex<BTreeMap<String, Value>>,
    post_responses: Mutex<BTreeMap<String, Value>>,
    calls: Mutex<Vec<Call>>,
}

fn key(id: &str) -> String {
    id.split('?').next().unwrap_or(id).trim_end_matches('/').to_lowercase()
}

fn merge(target: &mut Value, patch: Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (k, v) in patch {
                match target.get_mut(&k) {
                    Some(existing) if existing.is_object() && v.is_object() => merge(existing, v),
                    _ => {
                        target.insert(k, v);
                    },
                }
            }
        },
        (target, patch) => *target = patch,
    }
}

impl FakeResourceManager {
    /// Empty fake.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `body` under `id` as if it already existed.
    pub fn seed(&self, id: &str, body: Value) {
        self.lock_resources().insert(key(id), body);
    }

    /// Canned response for `POST id`.
    pub fn respond_to_post(&self, id: &str, response: Value) {
        self.post_responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key(id), response);
    }

    /// Stored body for `id`, if any.
    pub fn stored(&self, id: &str) -> Option<Value> {
        self.lock_resources().get(&key(id)).cloned()
    }

    /// Every call so far, in order.
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// IDs of calls made with `method`, in order.
    pub fn calls_to(&self, method: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.method == method)
            .map(|c| c.id)
            .collect()
    }

    fn lock_resources(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Value>> {
        self.resources.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record(&self, method: &'static str, id: &str) {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Call {
                method,
                id: id.to_string(),
            });
    }

    fn not_found(id: &str) -> ProviderError {
        ProviderError::NotFound(format!("{} was not found", id))
    }
}

#[async_trait]
impl ResourceManager for FakeResourceManager {
    async fn get(&self, id: &str, _api_version: &str) -> Result<Value> {
        self.record("GET", id);
        self.stored(id).ok_or_else(|| Self::not_found(id))
    }

    async fn put(&self, id: &str, _api_version: &str, body: Value) -> Result<Value> {
        self.record("PUT", id);
        let mut body = match body {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        let path = id.split('?').next().unwrap_or(id);
        body.insert("id".to_string(), Value::String(path.to_string()));
        if let Some(name) = path.rsplit('/').next() {
            body.insert("name".to_string(), Value::String(name.to_string()));
        }
        let properties = body
            .entry("properties")
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(props) = properties {
            props.insert("provisioningState".to_string(), Value::String("Succeeded".to_string()));
        }
        let body = Value::Object(body);
        self.lock_resources().insert(key(id), body.clone());
        Ok(body)
    }

    async fn patch(&self, id: &str, _api_version: &str, body: Value) -> Result<Value> {
        self.record("PATCH", id);
        let mut resources = self.lock_resources();
        let existing = resources.get_mut(&key(id)).ok_or_else(|| Self::not_found(id))?;
        merge(existing, body);
        Ok(existing.clone())
    }

    async fn delete(&self, id: &str, _api_version: &str) -> Result<()> {
        self.record("DELETE", id);
        self.lock_resources()
            .remove(&key(id))
            .map(|_| ())
            .ok_or_else(|| Self::not_found(id))
    }

    async fn post(&self, id: &str, _api_version: &str, _body: Option<Value>) -> Result<Value> {
        self.record("POST", id);
        Ok(self
            .post_responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&key(id))
            .cloned()
            .unwrap_or(Value::Null))
    }
}
