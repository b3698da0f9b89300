//! Disk encryption sets backed by Key Vault keys.

use super::models::{DiskEncryptionSet, EncryptionSetIdentity, EncryptionSetProperties, KeyVaultKeyReference, ResourceRef};
use crate::arm::api_version::COMPUTE;
use crate::arm::client::{get_as, put_as};
use crate::arm::id::DiskEncryptionSetId;
use crate::arm::{location, tags};
use crate::error::{ProviderError, Result};
use crate::resource::{ignore_not_found, BlockExt, Clients, DataSource, Resource, ResourceData};
use crate::schema::{azure, Attribute, Block, NestedBlock, Schema};
use crate::validation::Validator;
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

const IDENTITY_TYPES: &[&str] = &["SystemAssigned"];

fn key_reference(key: &KeyVaultKeyReference) -> Value {
    json!({
        "key_url": key.key_url,
        "source_vault_id": key.source_vault.id,
    })
}

fn key_block(computed: bool) -> Block {
    if computed {
        Block::new()
            .with_attribute("key_url", Attribute::computed_string())
            .with_attribute("source_vault_id", Attribute::computed_string())
    } else {
        Block::new()
            .with_attribute(
                "key_url",
                Attribute::required_string().with_validator(Validator::NoEmptyStrings),
            )
            .with_attribute("source_vault_id", Attribute::optional_string())
    }
}

/// Fields shared by the resource and the data source.
fn set_common(d: &mut ResourceData, id: &DiskEncryptionSetId, set: &DiskEncryptionSet) {
    d.set("name", id.name.as_str());
    d.set("resource_group_name", id.resource_group.as_str());
    d.set("location", set.location.as_deref().map(location::normalize));
    d.set_block(
        "active_key",
        set.properties.active_key.as_ref().map(key_reference),
    );
    let previous: Vec<Value> = set.properties.previous_keys.iter().map(key_reference).collect();
    d.set("previous_keys", previous);
    d.set("tags", tags::flatten(serde_json::to_value(&set.tags).ok().as_ref()));
}

/// `azurerm_disk_encryption_set`
pub struct DiskEncryptionSetResource;

impl DiskEncryptionSetResource {
    async fn create_or_update(&self, clients: &Clients, d: &mut ResourceData) -> Result<()> {
        let id = DiskEncryptionSetId::new(
            &clients.subscription_id,
            d.required_str("resource_group_name")?,
            d.required_str("name")?,
        );

        if d.is_new_resource() {
            clients
                .check_not_exists(self.type_name(), &id.id(), COMPUTE)
                .await?;
        }

        let body = DiskEncryptionSet {
            location: d.get_str("location").map(location::normalize),
            identity: Some(EncryptionSetIdentity {
                kind: d.get_str("identity_type").unwrap_or("SystemAssigned").to_string(),
                ..Default::default()
            }),
            tags: tags::expand(d.get("tags")),
            properties: EncryptionSetProperties {
                active_key: d.get_block("active_key").map(|k| KeyVaultKeyReference {
                    key_url: k.str_field("key_url").unwrap_or_default().to_string(),
                    source_vault: ResourceRef {
                        id: k.str_field("source_vault_id").map(str::to_string),
                    },
                }),
                previous_keys: Vec::new(),
            },
            ..Default::default()
        };

        info!(%id, "creating or updating disk encryption set");
        let created: DiskEncryptionSet = put_as(clients.arm(), &id.id(), COMPUTE, &body).await?;
        let resource_id = created.id.ok_or_else(|| {
            ProviderError::FailedPrecondition(format!("cannot read {} ID", id))
        })?;
        d.set_id(resource_id);
        self.read(clients, d).await
    }
}

#[async_trait]
impl Resource for DiskEncryptionSetResource {
    fn type_name(&self) -> &'static str {
        "azurerm_disk_encryption_set"
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_attribute("id", Attribute::computed_string())
            .with_attribute(
                "name",
                Attribute::required_string()
                    .with_force_new()
                    .with_validator(Validator::NoEmptyStrings),
            )
            .with_attribute("location", azure::location())
            .with_attribute("resource_group_name", azure::resource_group_name())
            .with_block("active_key", NestedBlock::list(key_block(false)).with_max_items(1))
            .with_attribute(
                "identity_type",
                Attribute::optional_string()
                    .with_validator(Validator::one_of(IDENTITY_TYPES))
                    .with_default(json!("SystemAssigned")),
            )
            .with_block("previous_keys", NestedBlock::list(key_block(true)).computed())
            .with_attribute("tags", azure::tags())
    }

    async fn create(&self, clients: &Clients, d: &mut ResourceData) -> Result<()> {
        self.create_or_update(clients, d).await
    }

    async fn read(&self, clients: &Clients, d: &mut ResourceData) -> Result<()> {
        let id = DiskEncryptionSetId::parse(d.id())?;
        let set: DiskEncryptionSet = match get_as(clients.arm(), &id.id(), COMPUTE).await {
            Ok(set) => set,
            Err(e) if e.is_not_found() => {
                info!(%id, "disk encryption set does not exist; removing from state");
                d.clear_id();
                return Ok(());
            },
            Err(e) => return Err(e),
        };
        set_common(d, &id, &set);
        if let Some(identity) = &set.identity {
            d.set("identity_type", identity.kind.as_str());
        }
        Ok(())
    }

    async fn update(&self, clients: &Clients, d: &mut ResourceData) -> Result<()> {
        self.create_or_update(clients, d).await
    }

    async fn delete(&self, clients: &Clients, d: &mut ResourceData) -> Result<()> {
        let id = DiskEncryptionSetId::parse(d.id())?;
        ignore_not_found(clients.arm().delete(&id.id(), COMPUTE).await)
    }

    fn validate_import_id(&self, id: &str) -> Result<()> {
        DiskEncryptionSetId::parse(id).map(|_| ())
    }
}

/// `azurerm_disk_encryption_set` data source.
pub struct DiskEncryptionSetDataSource;

#[async_trait]
impl DataSource for DiskEncryptionSetDataSource {
    fn type_name(&self) -> &'static str {
        "azurerm_disk_encryption_set"
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
            .with_block("active_key", NestedBlock::list(key_block(true)).computed())
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
            .with_block("previous_keys", NestedBlock::list(key_block(true)).computed())
            .with_attribute("tags", azure::tags_for_data_source())
    }

    async fn read(&self, clients: &Clients, d: &mut ResourceData) -> Result<()> {
        let id = DiskEncryptionSetId::new(
            &clients.subscription_id,
            d.required_str("resource_group_name")?,
            d.required_str("name")?,
        );
        let set: DiskEncryptionSet = get_as(clients.arm(), &id.id(), COMPUTE)
            .await
            .map_err(|e| {
                if e.is_not_found() {
                    ProviderError::NotFound(format!("{} was not found", id))
                } else {
                    e
                }
            })?;
        d.set_id(set.id.clone().unwrap_or_else(|| id.id()));
        set_common(d, &id, &set);
        d.set_block(
            "identity",
            set.identity.as_ref().map(|i| {
                json!({"type": i.kind, "principal_id": i.principal_id, "tenant_id": i.tenant_id})
            }),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeResourceManager;
    use std::sync::Arc;

    const ID: &str =
        "/subscriptions/sub/resourceGroups/rg/providers/Microsoft.Compute/diskEncryptionSets/des";
    const KEY: &str = "https://vault.vault.azure.net/keys/k/1";

    #[tokio::test]
    async fn test_create_and_read() {
        let fake = Arc::new(FakeResourceManager::new());
        let clients = Clients::new(fake.clone(), "sub");
        let mut d = ResourceData::for_create(json!({
            "name": "des",
            "resource_group_name": "rg",
            "location": "eastus",
            "identity_type": "SystemAssigned",
            "active_key": [{"key_url": KEY, "source_vault_id": "vault-id"}]
        }));
        DiskEncryptionSetResource.create(&clients, &mut d).await.unwrap();

        let stored = fake.stored(ID).unwrap();
        assert_eq!(stored["identity"]["type"], "SystemAssigned");
        assert_eq!(stored["properties"]["activeKey"]["keyUrl"], KEY);
        assert_eq!(stored["properties"]["activeKey"]["sourceVault"]["id"], "vault-id");
        assert_eq!(d.get_block("active_key").and_then(|k| k.str_field("key_url")), Some(KEY));
        assert_eq!(d.get("previous_keys"), Some(&json!([])));
    }

    #[tokio::test]
    async fn test_data_source_exposes_identity() {
        let fake = Arc::new(FakeResourceManager::new());
        fake.seed(
            ID,
            json!({
                "id": ID,
                "location": "East US",
                "identity": {"type": "SystemAssigned", "principalId": "p", "tenantId": "t"},
                "properties": {
                    "activeKey": {"keyUrl": KEY, "sourceVault": {"id": "vault-id"}},
                    "previousKeys": [{"keyUrl": "old", "sourceVault": {"id": "vault-id"}}]
                }
            }),
        );
        let clients = Clients::new(fake, "sub");
        let mut d = ResourceData::from_state(json!({"name": "des", "resource_group_name": "rg"}));
        DiskEncryptionSetDataSource.read(&clients, &mut d).await.unwrap();

        assert_eq!(d.id(), ID);
        assert_eq!(d.get_str("location"), Some("eastus"));
        assert_eq!(d.get_block("identity").and_then(|i| i.str_field("principal_id")), Some("p"));
        assert_eq!(d.get_blocks("previous_keys").len(), 1);
    }
}
