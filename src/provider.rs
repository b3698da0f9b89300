//! The host-facing provider interface and the AzureRM implementation of it.
//!
//! [`ProviderService`] is the CRUD surface the plugin host drives.
//! [`AzureRmProvider`] dispatches each call by type name to the registered
//! [`Resource`] or [`DataSource`], enforces operation timeouts, and computes
//! plans from the resource schemas.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::{debug, error, info, instrument, warn};

use crate::arm::auth::ClientSecretCredential;
use crate::arm::client::ArmClient;
use crate::arm::config::{self, ProviderConfig};
use crate::error::{ProviderError, Result};
use crate::resource::{Clients, DataSource, Features, Resource, ResourceData};
use crate::schema::{Block, BlockNestingMode, Diagnostic, DiagnosticSeverity, ProviderSchema};
use crate::types::{AttributeChange, ImportedResource, PlanResult, ProviderMetadata};
use crate::validation;

/// Interface the plugin host drives.
///
/// Configuration and state travel as `serde_json::Value` objects keyed by
/// attribute name.
#[async_trait::async_trait]
pub trait ProviderService: Send + Sync + 'static {
    // =========================================================================
    // Schema & Metadata
    // =========================================================================

    /// Return the provider's schema including all resources and data sources.
    fn schema(&self) -> ProviderSchema;

    /// Return provider metadata; by default derived from the schema.
    fn metadata(&self) -> ProviderMetadata {
        let schema = self.schema();
        let mut resources: Vec<String> = schema.resources.keys().cloned().collect();
        let mut data_sources: Vec<String> = schema.data_sources.keys().cloned().collect();
        resources.sort();
        data_sources.sort();
        ProviderMetadata {
            resources,
            data_sources,
            capabilities: Default::default(),
        }
    }

    // =========================================================================
    // Provider Lifecycle
    // =========================================================================

    /// Validate the provider configuration before configuring.
    async fn validate_provider_config(&self, config: Value) -> Result<Vec<Diagnostic>> {
        let _ = config;
        Ok(vec![])
    }

    /// Configure the provider with credentials and settings.
    async fn configure(&self, config: Value) -> Result<Vec<Diagnostic>>;

    /// Stop the provider gracefully.
    async fn stop(&self) -> Result<()> {
        Ok(())
    }

    // =========================================================================
    // Resource Operations
    // =========================================================================

    /// Validate a resource's configuration before planning.
    async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>> {
        let _ = (resource_type, config);
        Ok(vec![])
    }

    /// Upgrade resource state from an older schema version.
    async fn upgrade_resource_state(
        &self,
        resource_type: &str,
        version: i64,
        state: Value,
    ) -> Result<Value> {
        let _ = (resource_type, version);
        Ok(state)
    }

    /// Plan changes for a resource.
    async fn plan(
        &self,
        resource_type: &str,
        prior_state: Option<Value>,
        proposed_state: Value,
        config: Value,
    ) -> Result<PlanResult>;

    /// Create a new resource.
    async fn create(&self, resource_type: &str, planned_state: Value) -> Result<Value>;

    /// Read the current state of a resource; `null` means it no longer exists.
    async fn read(&self, resource_type: &str, current_state: Value) -> Result<Value>;

    /// Update an existing resource.
    async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value>;

    /// Delete a resource.
    async fn delete(&self, resource_type: &str, current_state: Value) -> Result<()>;

    /// Import existing infrastructure into management.
    async fn import_resource(&self, resource_type: &str, id: &str) -> Result<Vec<ImportedResource>> {
        let _ = id;
        Err(ProviderError::Unimplemented(format!(
            "Import not supported for resource type: {}",
            resource_type
        )))
    }

    // =========================================================================
    // Data Source Operations
    // =========================================================================

    /// Validate a data source's configuration.
    async fn validate_data_source_config(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>> {
        let _ = (data_source_type, config);
        Ok(vec![])
    }

    /// Read data from an external source.
    async fn read_data_source(&self, data_source_type: &str, config: Value) -> Result<Value> {
        let _ = config;
        Err(ProviderError::UnknownResource(format!(
            "Unknown data source type: {}",
            data_source_type
        )))
    }
}

/// The AzureRM provider.
pub struct AzureRmProvider {
    resources: BTreeMap<&'static str, Arc<dyn Resource>>,
    data_sources: BTreeMap<&'static str, Arc<dyn DataSource>>,
    clients: RwLock<Option<Arc<Clients>>>,
}

impl Default for AzureRmProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl AzureRmProvider {
    /// Provider with every supported resource and data source, not yet configured.
    pub fn new() -> Self {
        Self {
            resources: crate::services::resources()
                .into_iter()
                .map(|r| (r.type_name(), r))
                .collect(),
            data_sources: crate::services::data_sources()
                .into_iter()
                .map(|d| (d.type_name(), d))
                .collect(),
            clients: RwLock::new(None),
        }
    }

    /// Provider that is already configured with `clients`.
    pub fn with_clients(clients: Clients) -> Self {
        let provider = Self::new();
        Self {
            clients: RwLock::new(Some(Arc::new(clients))),
            ..provider
        }
    }

    async fn clients(&self) -> Result<Arc<Clients>> {
        self.clients.read().await.clone().ok_or_else(|| {
            ProviderError::FailedPrecondition("the provider has not been configured".to_string())
        })
    }

    fn resource(&self, resource_type: &str) -> Result<Arc<dyn Resource>> {
        self.resources
            .get(resource_type)
            .cloned()
            .ok_or_else(|| ProviderError::UnknownResource(resource_type.to_string()))
    }

    fn data_source(&self, data_source_type: &str) -> Result<Arc<dyn DataSource>> {
        self.data_sources
            .get(data_source_type)
            .cloned()
            .ok_or_else(|| ProviderError::UnknownResource(data_source_type.to_string()))
    }

    fn build_clients(config: &ProviderConfig) -> Result<Clients> {
        let resolved = config.resolve()?;
        let http = reqwest::Client::builder()
            .user_agent(concat!("terraform-provider-azurerm/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let credential = ClientSecretCredential::new(
            http.clone(),
            &resolved.authority_host,
            &resolved.tenant_id,
            resolved.client_id.clone(),
            resolved.client_secret.clone(),
            &resolved.resource_manager_endpoint,
        );
        let arm = ArmClient::new(http, resolved.resource_manager_endpoint.clone(), Arc::new(credential));
        Ok(Clients::new(Arc::new(arm), resolved.subscription_id).with_features(Features {
            strict: resolved.strict,
        }))
    }
}

async fn with_timeout<T, F>(operation: &str, resource_type: &str, limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(ProviderError::DeadlineExceeded(format!(
            "{} of {} did not finish within {:?}",
            operation, resource_type, limit
        ))),
    }
}

fn error_diagnostics(diagnostics: &[Diagnostic]) -> bool {
    diagnostics
        .iter()
        .any(|d| matches!(d.severity, DiagnosticSeverity::Error))
}

#[async_trait::async_trait]
impl ProviderService for AzureRmProvider {
    fn schema(&self) -> ProviderSchema {
        let mut schema = ProviderSchema::new().with_provider_config(config::schema());
        for (name, resource) in &self.resources {
            schema = schema.with_resource(*name, resource.schema());
        }
        for (name, data_source) in &self.data_sources {
            schema = schema.with_data_source(*name, data_source.schema());
        }
        schema
    }

    #[instrument(skip(self, config), name = "provider.validate_provider_config")]
    async fn validate_provider_config(&self, config: Value) -> Result<Vec<Diagnostic>> {
        let mut diagnostics = validation::validate(&config::schema(), &config);
        if !error_diagnostics(&diagnostics) {
            if let Err(e) = ProviderConfig::from_value(config).and_then(|c| c.resolve()) {
                diagnostics.push(Diagnostic::error(e.to_string()));
            }
        }
        if error_diagnostics(&diagnostics) {
            warn!(diagnostics = diagnostics.len(), "provider configuration is invalid");
        }
        Ok(diagnostics)
    }

    #[instrument(skip(self, config), name = "provider.configure")]
    async fn configure(&self, config: Value) -> Result<Vec<Diagnostic>> {
        let parsed = match ProviderConfig::from_value(config) {
            Ok(parsed) => parsed,
            Err(e) => return Ok(vec![Diagnostic::error(e.to_string())]),
        };
        match Self::build_clients(&parsed) {
            Ok(clients) => {
                info!(
                    subscription_id = %clients.subscription_id,
                    strict = clients.features.strict,
                    "provider configured"
                );
                *self.clients.write().await = Some(Arc::new(clients));
                Ok(vec![])
            },
            Err(e) => {
                error!(error = %e, "configure failed");
                Ok(vec![Diagnostic::error(e.to_string())])
            },
        }
    }

    async fn stop(&self) -> Result<()> {
        info!("provider stopping");
        Ok(())
    }

    #[instrument(skip(self, config), name = "provider.validate_resource_config")]
    async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>> {
        let resource = self.resource(resource_type)?;
        Ok(validation::validate(&resource.schema(), &config))
    }

    #[instrument(skip(self, state), name = "provider.upgrade_resource_state")]
    async fn upgrade_resource_state(
        &self,
        resource_type: &str,
        version: i64,
        state: Value,
    ) -> Result<Value> {
        let resource = self.resource(resource_type)?;
        let current = resource.schema().version;
        let from = u64::try_from(version).map_err(|_| {
            ProviderError::InvalidRequest(format!("invalid schema version {}", version))
        })?;
        if from >= current {
            return Ok(state);
        }
        debug!(from, to = current, "upgrading state");
        resource.upgrade_state(from, state)
    }

    #[instrument(skip(self, prior_state, proposed_state, _config), name = "provider.plan")]
    async fn plan(
        &self,
        resource_type: &str,
        prior_state: Option<Value>,
        proposed_state: Value,
        _config: Value,
    ) -> Result<PlanResult> {
        let resource = self.resource(resource_type)?;
        let schema = resource.schema();
        let result = plan_changes(&schema.block, prior_state, proposed_state);
        debug!(
            changes = result.changes.len(),
            requires_replace = result.requires_replace,
            "plan computed"
        );
        Ok(result)
    }

    #[instrument(skip(self, planned_state), name = "provider.create")]
    async fn create(&self, resource_type: &str, planned_state: Value) -> Result<Value> {
        let resource = self.resource(resource_type)?;
        let clients = self.clients().await?;
        info!("creating");
        let mut d = ResourceData::for_create(planned_state);
        let limit = resource.timeouts().create;
        with_timeout("create", resource_type, limit, resource.create(&clients, &mut d)).await?;
        info!(id = %d.id(), "created");
        Ok(d.into_state())
    }

    #[instrument(skip(self, current_state), name = "provider.read")]
    async fn read(&self, resource_type: &str, current_state: Value) -> Result<Value> {
        let resource = self.resource(resource_type)?;
        let clients = self.clients().await?;
        let mut d = ResourceData::from_state(current_state);
        let limit = resource.timeouts().read;
        with_timeout("read", resource_type, limit, resource.read(&clients, &mut d)).await?;
        if d.id().is_empty() {
            info!("resource no longer exists; removing from state");
        }
        Ok(d.into_state())
    }

    #[instrument(skip(self, prior_state, planned_state), name = "provider.update")]
    async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value> {
        let resource = self.resource(resource_type)?;
        let clients = self.clients().await?;
        let mut d = ResourceData::for_update(prior_state, planned_state);
        info!(id = %d.id(), "updating");
        let limit = resource.timeouts().update;
        with_timeout("update", resource_type, limit, resource.update(&clients, &mut d)).await?;
        Ok(d.into_state())
    }

    #[instrument(skip(self, current_state), name = "provider.delete")]
    async fn delete(&self, resource_type: &str, current_state: Value) -> Result<()> {
        let resource = self.resource(resource_type)?;
        let clients = self.clients().await?;
        let mut d = ResourceData::from_state(current_state);
        info!(id = %d.id(), "deleting");
        let limit = resource.timeouts().delete;
        with_timeout("delete", resource_type, limit, resource.delete(&clients, &mut d)).await
    }

    #[instrument(skip(self), name = "provider.import_resource")]
    async fn import_resource(&self, resource_type: &str, id: &str) -> Result<Vec<ImportedResource>> {
        let resource = self.resource(resource_type)?;
        resource.validate_import_id(id)?;
        let state = self
            .read(resource_type, Value::Object(Map::from_iter([(
                "id".to_string(),
                Value::String(id.to_string()),
            )])))
            .await?;
        if state.is_null() {
            return Err(ProviderError::NotFound(format!(
                "cannot import non-existent remote object {:?}",
                id
            )));
        }
        Ok(vec![ImportedResource::new(resource_type, state)])
    }

    #[instrument(skip(self, config), name = "provider.validate_data_source_config")]
    async fn validate_data_source_config(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>> {
        let data_source = self.data_source(data_source_type)?;
        Ok(validation::validate(&data_source.schema(), &config))
    }

    #[instrument(skip(self, config), name = "provider.read_data_source")]
    async fn read_data_source(&self, data_source_type: &str, config: Value) -> Result<Value> {
        let data_source = self.data_source(data_source_type)?;
        let clients = self.clients().await?;
        let mut d = ResourceData::from_state(config);
        let limit = data_source.timeouts().read;
        with_timeout("read", data_source_type, limit, data_source.read(&clients, &mut d)).await?;
        Ok(d.state())
    }
}

// =========================================================================
// Planning
// =========================================================================

/// Compute the planned state and attribute changes for one resource.
pub fn plan_changes(block: &Block, prior: Option<Value>, proposed: Value) -> PlanResult {
    let prior = prior.filter(|p| !p.is_null());

    if proposed.is_null() {
        let changes = match &prior {
            Some(p) => vec![AttributeChange::removed("id", p.get("id").cloned().unwrap_or(Value::Null))],
            None => vec![],
        };
        return PlanResult::with_changes(Value::Null, changes, false);
    }

    let mut planned = proposed;
    normalize_block(block, &mut planned);

    let Some(prior) = prior else {
        let changes = match &planned {
            Value::Object(map) => {
                let mut keys: Vec<&String> = map.keys().filter(|k| !map[*k].is_null()).collect();
                keys.sort();
                keys.into_iter()
                    .map(|k| AttributeChange::added(k.as_str(), map[k].clone()))
                    .collect()
            },
            _ => vec![],
        };
        return PlanResult::with_changes(planned, changes, false);
    };

    let proposed = planned.clone();
    let mut changes = Vec::new();
    let requires_replace = diff_block(block, &prior, &mut planned, "", &mut changes, true);

    if requires_replace {
        // The replacement starts from configuration only; nothing the old
        // instance was assigned by the server carries over.
        planned = proposed;
        changes.clear();
        diff_block(block, &prior, &mut planned, "", &mut changes, false);
        if let Value::Object(map) = &mut planned {
            map.remove("id");
        }
    } else if let (Some(id), Value::Object(map)) = (prior.get("id"), &mut planned) {
        map.insert("id".to_string(), id.clone());
    }

    if changes.is_empty() {
        PlanResult::no_change(planned)
    } else {
        PlanResult::with_changes(planned, changes, requires_replace)
    }
}

/// Fill defaults and turn bare single blocks into one-element lists.
fn normalize_block(block: &Block, value: &mut Value) {
    let Value::Object(map) = value else {
        return;
    };
    for (name, attr) in &block.attributes {
        if let Some(default) = &attr.default {
            let entry = map.entry(name.clone()).or_insert(Value::Null);
            if entry.is_null() {
                *entry = default.clone();
            }
        }
    }
    for (name, nested) in &block.blocks {
        let Some(entry) = map.get_mut(name) else {
            continue;
        };
        if nested.nesting_mode == BlockNestingMode::Map {
            if let Value::Object(items) = entry {
                for item in items.values_mut() {
                    normalize_block(&nested.block, item);
                }
            }
            continue;
        }
        if entry.is_object() {
            *entry = Value::Array(vec![entry.take()]);
        }
        if let Value::Array(items) = entry {
            for item in items.iter_mut() {
                normalize_block(&nested.block, item);
            }
        }
    }
}

/// Diff `planned` against `prior`. With `carry`, computed values and
/// equivalent prior spellings are copied forward into `planned`.
/// Returns whether any force-new attribute or block changed.
fn diff_block(
    block: &Block,
    prior: &Value,
    planned: &mut Value,
    path: &str,
    changes: &mut Vec<AttributeChange>,
    carry: bool,
) -> bool {
    let Value::Object(planned_map) = planned else {
        return false;
    };
    let mut replace = false;

    let mut names: Vec<&String> = block.attributes.keys().collect();
    names.sort();
    for name in names {
        if name == "id" {
            continue;
        }
        let attr = &block.attributes[name];
        let old = prior.get(name).cloned().unwrap_or(Value::Null);
        let new = planned_map.get(name).cloned().unwrap_or(Value::Null);
        let attr_path = join(path, name);

        if new.is_null() && attr.flags.computed {
            if carry && !old.is_null() {
                planned_map.insert(name.clone(), old);
            }
            continue;
        }
        if attr.values_equal(&old, &new) || (is_unset(&old) && is_unset(&new)) {
            if carry && old != new {
                planned_map.insert(name.clone(), old);
            }
            continue;
        }
        if attr.flags.computed && !attr.flags.optional && !attr.flags.required {
            continue;
        }
        replace |= attr.force_new;
        changes.push(AttributeChange::new(
            attr_path,
            Some(old).filter(|v| !v.is_null()),
            Some(new).filter(|v| !v.is_null()),
        ));
    }

    let mut block_names: Vec<&String> = block.blocks.keys().collect();
    block_names.sort();
    for name in block_names {
        let nested = &block.blocks[name];
        let old = prior.get(name).cloned().unwrap_or(Value::Null);
        let new = planned_map.get(name).cloned().unwrap_or(Value::Null);
        let block_path = join(path, name);
        if is_unset(&new) && nested.computed {
            if carry && !old.is_null() {
                planned_map.insert(name.clone(), old);
            }
            continue;
        }
        if is_unset(&old) && is_unset(&new) {
            continue;
        }

        match (old.as_array(), new.as_array()) {
            (Some(old_items), Some(new_items)) if old_items.len() == new_items.len() => {
                let mut merged = Vec::with_capacity(new_items.len());
                let mut block_changed = false;
                for (i, (o, n)) in old_items.iter().zip(new_items).enumerate() {
                    let mut n = n.clone();
                    let before = changes.len();
                    let item_replace = diff_block(
                        &nested.block,
                        o,
                        &mut n,
                        &format!("{}.{}", block_path, i),
                        changes,
                        carry,
                    );
                    block_changed |= changes.len() > before;
                    replace |= item_replace;
                    merged.push(n);
                }
                if block_changed {
                    replace |= nested.force_new;
                }
                planned_map.insert(name.clone(), Value::Array(merged));
            },
            _ => {
                if old != new {
                    replace |= nested.force_new;
                    changes.push(AttributeChange::new(
                        block_path,
                        Some(old).filter(|v| !is_unset(v)),
                        Some(new).filter(|v| !is_unset(v)),
                    ));
                }
            },
        }
    }

    replace
}

/// Null, `""`, `[]` and `{}` all mean "not set".
fn is_unset(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

fn join(base: &str, name: &str) -> String {
    if base.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", base, name)
    }
}
