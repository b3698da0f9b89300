//! Machine learning workspaces.

use crate::arm::api_version::{CONTAINER_REGISTRY, MACHINE_LEARNING, STORAGE};
use crate::arm::client::{get_as, put_as};
use crate::arm::id::{ContainerRegistryId, StorageAccountId, WorkspaceId};
use crate::arm::{location, tags};
use crate::error::{ProviderError, Result};
use crate::resource::{ignore_not_found, BlockExt, Clients, DataSource, Resource, ResourceData};
use crate::schema::{azure, Attribute, Block, DiffSuppress, NestedBlock, Schema};
use crate::validation::Validator;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::{debug, info};

const SKUS: &[&str] = &["Basic", "Enterprise"];
const IDENTITY_TYPES: &[&str] = &["SystemAssigned"];

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Workspace {
    #[serde(default, skip_serializing)]
    id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    location: Option<String>,
    #[serde(default)]
    tags: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    identity: Option<WorkspaceIdentity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sku: Option<WorkspaceSku>,
    #[serde(default)]
    properties: WorkspaceProperties,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WorkspaceIdentity {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default, skip_serializing)]
    principal_id: Option<String>,
    #[serde(default, skip_serializing)]
    tenant_id: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct WorkspaceSku {
    name: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WorkspaceProperties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    friendly_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    key_vault: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    application_insights: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    container_registry: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    storage_account: Option<String>,
    #[serde(default, rename = "discoveryUrl", skip_serializing_if = "Option::is_none")]
    discovery_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StorageAccount {
    #[serde(default)]
    sku: Option<StorageSku>,
}

#[derive(Debug, Default, Deserialize)]
struct StorageSku {
    #[serde(default)]
    tier: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Registry {
    #[serde(default)]
    properties: RegistryProperties,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegistryProperties {
    #[serde(default)]
    admin_user_enabled: Option<bool>,
}

/// A workspace cannot use a Premium storage account.
async fn validate_storage_account(clients: &Clients, account_id: &str) -> Result<()> {
    let id = StorageAccountId::parse(account_id)?;
    let account: StorageAccount = get_as(clients.arm(), &id.id(), STORAGE)
        .await
        .map_err(|e| {
            ProviderError::Validation(format!("validating {}: {}", id, e.message()))
        })?;
    let tier = account.sku.and_then(|s| s.tier);
    if tier.as_deref().is_some_and(|t| t.eq_ignore_ascii_case("Premium")) {
        return Err(ProviderError::Validation(format!(
            "validating {}: the associated Storage Account must not be Premium",
            id
        )));
    }
    Ok(())
}

/// A workspace's container registry must have the admin user enabled.
async fn validate_container_registry(clients: &Clients, registry_id: &str) -> Result<()> {
    let id = ContainerRegistryId::parse(registry_id)?;
    let registry: Registry = get_as(clients.arm(), &id.id(), CONTAINER_REGISTRY)
        .await
        .map_err(|e| {
            ProviderError::Validation(format!("validating {}: {}", id, e.message()))
        })?;
    if registry.properties.admin_user_enabled != Some(true) {
        return Err(ProviderError::Validation(format!(
            "validating {}: the associated Container Registry must set `admin_enabled` to true",
            id
        )));
    }
    Ok(())
}

fn flatten_identity(identity: Option<&WorkspaceIdentity>) -> Option<Value> {
    identity.map(|i| json!({"type": i.kind, "principal_id": i.principal_id, "tenant_id": i.tenant_id}))
}

fn set_properties(d: &mut ResourceData, props: &WorkspaceProperties) {
    d.set("description", props.description.clone());
    d.set("friendly_name", props.friendly_name.clone());
    d.set("storage_account_id", props.storage_account.clone());
    d.set("discovery_url", props.discovery_url.clone());
    d.set("container_registry_id", props.container_registry.clone());
    d.set("application_insights_id", props.application_insights.clone());
    d.set("key_vault_id", props.key_vault.clone());
}

/// `azurerm_machine_learning_workspace`
pub struct WorkspaceResource;

impl WorkspaceResource {
    async fn create_or_update(&self, clients: &Clients, d: &mut ResourceData) -> Result<()> {
        let id = WorkspaceId::new(
            &clients.subscription_id,
            d.required_str("resource_group_name")?,
            d.required_str("name")?,
        );

        // Workspaces always check for an existing remote object, strict or not.
        if d.is_new_resource() {
            clients
                .ensure_not_exists(self.type_name(), &id.id(), MACHINE_LEARNING)
                .await?;
        }

        let storage_account = d.required_str("storage_account_id")?.to_string();
        let container_registry = d.get_string("container_registry_id");

        validate_storage_account(clients, &storage_account).await?;
        if let Some(registry) = &container_registry {
            validate_container_registry(clients, registry).await?;
        }

        let identity_type = d
            .get_block("identity")
            .and_then(|i| i.str_field("type"))
            .unwrap_or("SystemAssigned")
            .to_string();

        let workspace = Workspace {
            name: Some(id.name.clone()),
            location: d.get_str("location").map(location::normalize),
            tags: tags::expand(d.get("tags")),
            identity: Some(WorkspaceIdentity {
                kind: identity_type,
                ..Default::default()
            }),
            sku: Some(WorkspaceSku {
                name: d.get_str("sku_name").unwrap_or("Basic").to_string(),
            }),
            properties: WorkspaceProperties {
                description: d.get_string("description"),
                friendly_name: d.get_string("friendly_name"),
                key_vault: d.get_string("key_vault_id"),
                application_insights: d.get_string("application_insights_id"),
                container_registry,
                storage_account: Some(storage_account),
                discovery_url: d.get_string("discovery_url"),
            },
            ..Default::default()
        };

        info!(%id, "creating or updating machine learning workspace");
        let created: Workspace = put_as(clients.arm(), &id.id(), MACHINE_LEARNING, &workspace).await?;
        debug!(%id, name = ?created.name, "created machine learning workspace");
        let resource_id = created.id.ok_or_else(|| {
            ProviderError::FailedPrecondition(format!("cannot read {} ID", id))
        })?;
        d.set_id(resource_id);
        self.read(clients, d).await
    }
}

#[async_trait]
impl Resource for WorkspaceResource {
    fn type_name(&self) -> &'static str {
        "azurerm_machine_learning_workspace"
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_attribute("id", Attribute::computed_string())
            .with_attribute("name", Attribute::required_string().with_force_new())
            .with_attribute("location", azure::location())
            .with_attribute("resource_group_name", azure::resource_group_name())
            .with_attribute("description", Attribute::optional_string())
            .with_attribute("friendly_name", Attribute::optional_string())
            .with_attribute(
                "key_vault_id",
                Attribute::required_string()
                    .with_force_new()
                    .with_validator(Validator::ResourceId),
            )
            .with_attribute(
                "application_insights_id",
                Attribute::required_string()
                    .with_force_new()
                    .with_validator(Validator::ResourceId),
            )
            .with_attribute(
                "container_registry_id",
                Attribute::optional_string()
                    .with_force_new()
                    .with_validator(Validator::ResourceId),
            )
            .with_attribute(
                "storage_account_id",
                Attribute::required_string()
                    .with_force_new()
                    .with_validator(Validator::ResourceId),
            )
            .with_attribute("discovery_url", Attribute::optional_string())
            .with_attribute(
                "sku_name",
                Attribute::optional_string()
                    .with_validator(Validator::one_of_ignore_case(SKUS))
                    .with_default(json!("Basic")),
            )
            .with_attribute("tags", azure::tags())
            .with_block(
                "identity",
                NestedBlock::list(
                    Block::new()
                        .with_attribute(
                            "type",
                            Attribute::required_string()
                                .with_validator(Validator::one_of(IDENTITY_TYPES))
                                .with_diff_suppress(DiffSuppress::CaseInsensitive),
                        )
                        .with_attribute("principal_id", Attribute::computed_string())
                        .with_attribute("tenant_id", Attribute::computed_string()),
                )
                .with_max_items(1)
                .computed(),
            )
    }

    async fn create(&self, clients: &Clients, d: &mut ResourceData) -> Result<()> {
        self.create_or_update(clients, d).await
    }

    async fn read(&self, clients: &Clients, d: &mut ResourceData) -> Result<()> {
        let id = WorkspaceId::parse(d.id())?;
        let workspace: Workspace = match get_as(clients.arm(), &id.id(), MACHINE_LEARNING).await {
            Ok(w) => w,
            Err(e) if e.is_not_found() => {
                info!(%id, "machine learning workspace does not exist; removing from state");
                d.clear_id();
                return Ok(());
            },
            Err(e) => return Err(e),
        };

        d.set("name", workspace.name.clone().unwrap_or_else(|| id.name.clone()));
        d.set("resource_group_name", id.resource_group.as_str());
        d.set("location", workspace.location.as_deref().map(location::normalize));
        set_properties(d, &workspace.properties);
        if let Some(sku) = &workspace.sku {
            d.set("sku_name", sku.name.as_str());
        }
        d.set_block("identity", flatten_identity(workspace.identity.as_ref()));
        d.set("tags", tags::flatten(serde_json::to_value(&workspace.tags).ok().as_ref()));
        Ok(())
    }

    async fn update(&self, clients: &Clients, d: &mut ResourceData) -> Result<()> {
        self.create_or_update(clients, d).await
    }

    async fn delete(&self, clients: &Clients, d: &mut ResourceData) -> Result<()> {
        let id = WorkspaceId::parse(d.id())?;
        info!(%id, "deleting machine learning workspace");
        ignore_not_found(clients.arm().delete(&id.id(), MACHINE_LEARNING).await)
    }

    fn validate_import_id(&self, id: &str) -> Result<()> {
        WorkspaceId::parse(id).map(|_| ())
    }
}

/// `azurerm_machine_learning_workspace` data source.
pub struct WorkspaceDataSource;

#[async_trait]
impl DataSource for WorkspaceDataSource {
    fn type_name(&self) -> &'static str {
        "azurerm_machine_learning_workspace"
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_attribute("id", Attribute::computed_string())
            .with_attribute(
                "name",
                Attribute::required_string().with_validator(Validator::NoEmptyStrings),
            )
            .with_attribute("location", azure::location_for_data_source())
            .with_attribute("resource_group_name", azure::resource_group_name_for_data_source())
            .with_attribute("description", Attribute::computed_string())
            .with_attribute("friendly_name", Attribute::computed_string())
            .with_attribute("key_vault_id", Attribute::computed_string())
            .with_attribute("application_insights_id", Attribute::computed_string())
            .with_attribute("container_registry_id", Attribute::computed_string())
            .with_attribute("storage_account_id", Attribute::computed_string())
            .with_attribute("discovery_url", Attribute::computed_string())
            .with_attribute("tags", azure::tags_for_data_source())
            .with_block(
                "identity",
                NestedBlock::list(
                    Block::new()
                        .with_attribute("type", Attribute::computed_string())
                        .with_attribute("principal_id", Attribute::computed_string())
                        .with_attribute("tenant_id", Attribute::computed_string()),
                )
                .computed(),
            )
    }

    async fn read(&self, clients: &Clients, d: &mut ResourceData) -> Result<()> {
        let id = WorkspaceId::new(
            &clients.subscription_id,
            d.required_str("resource_group_name")?,
            d.required_str("name")?,
        );
        let workspace: Workspace = get_as(clients.arm(), &id.id(), MACHINE_LEARNING)
            .await
            .map_err(|e| {
                if e.is_not_found() {
                    ProviderError::NotFound(format!("{} was not found", id))
                } else {
                    e
                }
            })?;
        let resource_id = workspace
            .id
            .clone()
            .filter(|i| !i.is_empty())
            .ok_or_else(|| ProviderError::FailedPrecondition(format!("cannot read {} ID", id)))?;
        d.set_id(resource_id);
        d.set("location", workspace.location.as_deref().map(location::normalize));
        set_properties(d, &workspace.properties);
        d.set_block("identity", flatten_identity(workspace.identity.as_ref()));
        d.set("tags", tags::flatten(serde_json::to_value(&workspace.tags).ok().as_ref()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeResourceManager;
    use std::sync::Arc;

    const ID: &str = "/subscriptions/sub/resourceGroups/rg/providers/Microsoft.MachineLearningServices/workspaces/ws";
    const STORAGE_ID: &str = "/subscriptions/sub/resourceGroups/data-rg/providers/Microsoft.Storage/storageAccounts/acct";
    const ACR_ID: &str = "/subscriptions/sub/resourceGroups/acr-rg/providers/Microsoft.ContainerRegistry/registries/acr";

    fn config() -> Value {
        json!({
            "name": "ws",
            "resource_group_name": "rg",
            "location": "West Europe",
            "key_vault_id": "/subscriptions/sub/resourceGroups/rg/providers/Microsoft.KeyVault/vaults/kv",
            "application_insights_id": "/subscriptions/sub/resourceGroups/rg/providers/Microsoft.Insights/components/ai",
            "storage_account_id": STORAGE_ID,
            "sku_name": "Basic"
        })
    }

    fn fake_with_storage(tier: &str) -> Arc<FakeResourceManager> {
        let fake = Arc::new(FakeResourceManager::new());
        fake.seed(STORAGE_ID, json!({"id": STORAGE_ID, "sku": {"name": "Standard_LRS", "tier": tier}}));
        fake
    }

    #[tokio::test]
    async fn test_create_defaults_identity() {
        let fake = fake_with_storage("Standard");
        let clients = Clients::new(fake.clone(), "sub");
        let mut d = ResourceData::for_create(config());
        WorkspaceResource.create(&clients, &mut d).await.unwrap();

        let stored = fake.stored(ID).unwrap();
        assert_eq!(stored["identity"]["type"], "SystemAssigned");
        assert_eq!(stored["sku"]["name"], "Basic");
        assert_eq!(stored["properties"]["storageAccount"], STORAGE_ID);
        assert_eq!(d.get_str("location"), Some("westeurope"));
        assert_eq!(
            d.get_block("identity").and_then(|i| i.str_field("type")),
            Some("SystemAssigned")
        );
    }

    #[tokio::test]
    async fn test_premium_storage_is_rejected() {
        let fake = fake_with_storage("Premium");
        let clients = Clients::new(fake.clone(), "sub");
        let mut d = ResourceData::for_create(config());
        let err = WorkspaceResource.create(&clients, &mut d).await.unwrap_err();
        assert!(err.to_string().contains("must not be Premium"));
        assert!(fake.calls_to("PUT").is_empty());
    }

    #[tokio::test]
    async fn test_registry_needs_admin_user() {
        let fake = fake_with_storage("Standard");
        fake.seed(ACR_ID, json!({"id": ACR_ID, "properties": {"adminUserEnabled": false}}));
        let clients = Clients::new(fake.clone(), "sub");
        let mut cfg = config();
        cfg["container_registry_id"] = json!(ACR_ID);

        let mut d = ResourceData::for_create(cfg.clone());
        let err = WorkspaceResource.create(&clients, &mut d).await.unwrap_err();
        assert!(err.to_string().contains("admin_enabled"));

        fake.seed(ACR_ID, json!({"id": ACR_ID, "properties": {"adminUserEnabled": true}}));
        let mut d = ResourceData::for_create(cfg);
        WorkspaceResource.create(&clients, &mut d).await.unwrap();
        assert_eq!(d.get_str("container_registry_id"), Some(ACR_ID));
    }

    #[tokio::test]
    async fn test_existing_workspace_must_be_imported() {
        let fake = fake_with_storage("Standard");
        fake.seed(ID, json!({"id": ID}));
        let clients = Clients::new(fake, "sub");
        let mut d = ResourceData::for_create(config());
        let err = WorkspaceResource.create(&clients, &mut d).await.unwrap_err();
        assert!(err.to_string().contains("needs to be imported"));
    }

    #[tokio::test]
    async fn test_data_source_not_found() {
        let fake = Arc::new(FakeResourceManager::new());
        let clients = Clients::new(fake, "sub");
        let mut d = ResourceData::from_state(json!({"name": "ws", "resource_group_name": "rg"}));
        let err = WorkspaceDataSource.read(&clients, &mut d).await.unwrap_err();
        assert!(matches!(err, ProviderError::NotFound(_)));
    }
}
