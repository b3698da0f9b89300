//! Resource and data source building blocks.
//!
//! Each Azure resource implements [`Resource`] against a [`ResourceData`]
//! bag: Create/Update read configuration out of the bag, build a request
//! body and call the [`ResourceManager`]; Read copies the response back in.
//! Nested blocks are stored the way the host stores them, as lists of
//! objects (`"identity": [{"type": "SystemAssigned"}]`).

use crate::arm::client::{self, ResourceManager};
use crate::arm::locks::Locks;
use crate::error::{ProviderError, Result};
use crate::schema::Schema;
use crate::types::Timeouts;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;

/// Toggles that change provider-wide behavior.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Features {
    /// Refuse to create a resource that already exists remotely.
    pub strict: bool,
}

/// Everything a resource needs to talk to Azure.
#[derive(Clone)]
pub struct Clients {
    /// Resource Manager access.
    pub arm: Arc<dyn ResourceManager>,
    /// Subscription new resources are created in.
    pub subscription_id: String,
    /// Provider-wide toggles.
    pub features: Features,
    /// Named locks shared by all resources.
    pub locks: Locks,
}

impl Clients {
    /// Bundle a resource manager with its subscription.
    pub fn new(arm: Arc<dyn ResourceManager>, subscription_id: impl Into<String>) -> Self {
        Self {
            arm,
            subscription_id: subscription_id.into(),
            features: Features::default(),
            locks: Locks::new(),
        }
    }

    /// Replace the feature toggles.
    pub fn with_features(mut self, features: Features) -> Self {
        self.features = features;
        self
    }

    /// The resource manager as a trait object.
    pub fn arm(&self) -> &dyn ResourceManager {
        self.arm.as_ref()
    }

    /// Fail with "already exists, import it" if `id` is present and strict mode is on.
    pub async fn check_not_exists(&self, resource_type: &str, id: &str, api_version: &str) -> Result<()> {
        if !self.features.strict {
            return Ok(());
        }
        self.ensure_not_exists(resource_type, id, api_version).await
    }

    /// Fail with "already exists, import it" if `id` is present, regardless of strict mode.
    pub async fn ensure_not_exists(&self, resource_type: &str, id: &str, api_version: &str) -> Result<()> {
        if client::exists(self.arm(), id, api_version).await? {
            return Err(ProviderError::import_as_exists(resource_type, id));
        }
        Ok(())
    }
}

/// Turn a "not found" error into success; used by deletes.
pub fn ignore_not_found(result: Result<()>) -> Result<()> {
    match result {
        Err(e) if e.is_not_found() => {
            debug!("resource already gone");
            Ok(())
        },
        other => other,
    }
}

/// State of one resource instance while an operation runs.
#[derive(Debug, Clone, Default)]
pub struct ResourceData {
    values: Map<String, Value>,
    prior: Option<Map<String, Value>>,
    new_resource: bool,
}

fn as_map(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn is_zero(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}

impl ResourceData {
    /// Bag for a resource about to be created from `planned`.
    pub fn for_create(planned: Value) -> Self {
        Self {
            values: as_map(planned),
            prior: None,
            new_resource: true,
        }
    }

    /// Bag for an update from `prior` to `planned`.
    pub fn for_update(prior: Value, planned: Value) -> Self {
        Self {
            values: as_map(planned),
            prior: Some(as_map(prior)),
            new_resource: false,
        }
    }

    /// Bag holding existing state (read, delete, data sources).
    pub fn from_state(state: Value) -> Self {
        Self {
            values: as_map(state),
            prior: None,
            new_resource: false,
        }
    }

    /// Resource ID; empty until set.
    pub fn id(&self) -> &str {
        self.values.get("id").and_then(Value::as_str).unwrap_or("")
    }

    /// Record the resource ID.
    pub fn set_id(&mut self, id: impl Into<String>) {
        self.values.insert("id".to_string(), Value::String(id.into()));
    }

    /// Mark the resource as gone; [`ResourceData::into_state`] then yields `null`.
    pub fn clear_id(&mut self) {
        self.values.remove("id");
    }

    /// Whether this bag is for a create.
    pub fn is_new_resource(&self) -> bool {
        self.new_resource
    }

    /// Raw value, `None` when absent or null.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key).filter(|v| !v.is_null())
    }

    /// Value only when set to something other than its zero value.
    pub fn get_ok(&self, key: &str) -> Option<&Value> {
        self.get(key).filter(|v| !is_zero(v))
    }

    /// Non-empty string value.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
    }

    /// Non-empty string value, owned.
    pub fn get_string(&self, key: &str) -> Option<String> {
        self.get_str(key).map(str::to_string)
    }

    /// String value that configuration must have supplied.
    pub fn required_str(&self, key: &str) -> Result<&str> {
        self.get_str(key)
            .ok_or_else(|| ProviderError::Validation(format!("`{}` is required", key)))
    }

    /// Integer value.
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(Value::as_i64)
    }

    /// Float value.
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(Value::as_f64)
    }

    /// Boolean value.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(Value::as_bool)
    }

    /// List or set of strings; empty when absent.
    pub fn get_string_list(&self, key: &str) -> Vec<String> {
        string_list(self.get(key))
    }

    /// Map value.
    pub fn get_map(&self, key: &str) -> Option<&Value> {
        self.get(key).filter(|v| v.is_object())
    }

    /// First (or only) instance of a nested block.
    pub fn get_block(&self, key: &str) -> Option<&Map<String, Value>> {
        first_block(self.get(key))
    }

    /// All instances of a nested block.
    pub fn get_blocks(&self, key: &str) -> Vec<&Map<String, Value>> {
        blocks(self.get(key))
    }

    /// Whether `key` differs between prior and planned state.
    ///
    /// Everything counts as changed on create.
    pub fn has_change(&self, key: &str) -> bool {
        match &self.prior {
            None => self.new_resource,
            Some(prior) => {
                let old = prior.get(key).unwrap_or(&Value::Null);
                let new = self.values.get(key).unwrap_or(&Value::Null);
                old != new
            },
        }
    }

    /// Whether any of `keys` changed.
    pub fn has_changes(&self, keys: &[&str]) -> bool {
        keys.iter().any(|k| self.has_change(k))
    }

    /// Prior value of `key` during an update.
    pub fn prior(&self, key: &str) -> Option<&Value> {
        self.prior
            .as_ref()
            .and_then(|p| p.get(key))
            .filter(|v| !v.is_null())
    }

    /// Store a value.
    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.values.insert(key.to_string(), value.into());
    }

    /// Store a single nested block, or an empty list when `None`.
    pub fn set_block(&mut self, key: &str, block: Option<Value>) {
        let list = match block {
            Some(v) => vec![v],
            None => Vec::new(),
        };
        self.values.insert(key.to_string(), Value::Array(list));
    }

    /// Current state as JSON.
    pub fn state(&self) -> Value {
        Value::Object(self.values.clone())
    }

    /// Final state; `null` once the ID has been cleared (resource gone).
    pub fn into_state(self) -> Value {
        if self.id().is_empty() {
            Value::Null
        } else {
            Value::Object(self.values)
        }
    }
}

/// Strings from a list value; non-strings and empty strings are skipped.
pub fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// First block of a block value given either as an object or a list of objects.
pub fn first_block(value: Option<&Value>) -> Option<&Map<String, Value>> {
    match value? {
        Value::Object(map) => Some(map),
        Value::Array(items) => items.first().and_then(Value::as_object),
        _ => None,
    }
}

/// Every block of a block value.
pub fn blocks(value: Option<&Value>) -> Vec<&Map<String, Value>> {
    match value {
        Some(Value::Object(map)) => vec![map],
        Some(Value::Array(items)) => items.iter().filter_map(Value::as_object).collect(),
        _ => Vec::new(),
    }
}

/// Typed reads from a nested block.
pub trait BlockExt {
    /// Non-empty string field.
    fn str_field(&self, key: &str) -> Option<&str>;
    /// Integer field.
    fn i64_field(&self, key: &str) -> Option<i64>;
    /// Boolean field, `false` when absent.
    fn bool_field(&self, key: &str) -> bool;
    /// String list field.
    fn string_list_field(&self, key: &str) -> Vec<String>;
}

impl BlockExt for Map<String, Value> {
    fn str_field(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
    }

    fn i64_field(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(Value::as_i64)
    }

    fn bool_field(&self, key: &str) -> bool {
        self.get(key).and_then(Value::as_bool).unwrap_or(false)
    }

    fn string_list_field(&self, key: &str) -> Vec<String> {
        string_list(self.get(key))
    }
}

/// A managed Azure resource type.
#[async_trait]
pub trait Resource: Send + Sync {
    /// Type name, e.g. `azurerm_managed_disk`.
    fn type_name(&self) -> &'static str;

    /// Attribute schema.
    fn schema(&self) -> Schema;

    /// Operation deadlines.
    fn timeouts(&self) -> Timeouts {
        Timeouts::default()
    }

    /// Create the resource and populate state.
    async fn create(&self, clients: &Clients, d: &mut ResourceData) -> Result<()>;

    /// Refresh state; clear the ID if the resource is gone.
    async fn read(&self, clients: &Clients, d: &mut ResourceData) -> Result<()>;

    /// Apply in-place changes.
    async fn update(&self, clients: &Clients, d: &mut ResourceData) -> Result<()> {
        let _ = (clients, d);
        Err(ProviderError::Unimplemented(format!(
            "{} does not support in-place updates",
            self.type_name()
        )))
    }

    /// Delete the resource.
    async fn delete(&self, clients: &Clients, d: &mut ResourceData) -> Result<()>;

    /// Check that `id` is an ID of this resource type.
    fn validate_import_id(&self, id: &str) -> Result<()>;

    /// Migrate state written by an older schema version.
    fn upgrade_state(&self, version: u64, state: Value) -> Result<Value> {
        let _ = version;
        Ok(state)
    }
}

/// A read-only lookup of an existing Azure object.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Type name, e.g. `azurerm_nat_gateway`.
    fn type_name(&self) -> &'static str;

    /// Attribute schema.
    fn schema(&self) -> Schema;

    /// Operation deadlines (only `read` applies).
    fn timeouts(&self) -> Timeouts {
        Timeouts::read_only(5)
    }

    /// Look the object up and populate state.
    async fn read(&self, clients: &Clients, d: &mut ResourceData) -> Result<()>;
}
