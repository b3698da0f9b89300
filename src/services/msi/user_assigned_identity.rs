//! User assigned managed identities.

use crate::arm::api_version::MANAGED_IDENTITY;
use crate::arm::client::{get_as, put_as};
use crate::arm::id::UserAssignedIdentityId;
use crate::arm::{location, tags};
use crate::error::{ProviderError, Result};
use crate::resource::{ignore_not_found, Clients, DataSource, Resource, ResourceData};
use crate::schema::{azure, Attribute, Schema};
use crate::types::Timeouts;
use crate::validation::Validator;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, info};

#[derive(Debug, Default, Serialize, Deserialize)]
struct Identity {
    #[serde(default, skip_serializing)]
    id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    location: Option<String>,
    #[serde(default)]
    tags: BTreeMap<String, String>,
    #[serde(default, skip_serializing)]
    properties: Option<IdentityProperties>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdentityProperties {
    #[serde(default)]
    principal_id: Option<String>,
    #[serde(default)]
    client_id: Option<String>,
    #[serde(default)]
    tenant_id: Option<String>,
}

fn set_identity(d: &mut ResourceData, id: &UserAssignedIdentityId, identity: &Identity) {
    d.set("name", id.name.as_str());
    d.set("resource_group_name", id.resource_group.as_str());
    d.set("location", identity.location.as_deref().map(location::normalize));
    if let Some(props) = &identity.properties {
        if let Some(principal_id) = &props.principal_id {
            d.set("principal_id", principal_id.as_str());
        }
        if let Some(client_id) = &props.client_id {
            d.set("client_id", client_id.as_str());
        }
        if let Some(tenant_id) = &props.tenant_id {
            d.set("tenant_id", tenant_id.as_str());
        }
    }
    d.set("tags", tags::flatten(serde_json::to_value(&identity.tags).ok().as_ref()));
}

/// Rewrite a version 0 state whose `id` used the casing the API returned
/// (`resourcegroups`, `userassignedidentities`).
fn upgrade_v0(mut state: Value) -> Result<Value> {
    let Some(old) = state.get("id").and_then(Value::as_str) else {
        return Ok(state);
    };
    let id = UserAssignedIdentityId::parse_insensitively(old)?;
    debug!(old, new = %id, "updating user assigned identity ID");
    if let Some(obj) = state.as_object_mut() {
        obj.insert("id".to_string(), Value::String(id.id()));
    }
    Ok(state)
}

/// `azurerm_user_assigned_identity`
pub struct UserAssignedIdentityResource;

impl UserAssignedIdentityResource {
    async fn create_or_update(&self, clients: &Clients, d: &mut ResourceData) -> Result<()> {
        let id = UserAssignedIdentityId::new(
            &clients.subscription_id,
            d.required_str("resource_group_name")?,
            d.required_str("name")?,
        );

        if d.is_new_resource() {
            clients
                .ensure_not_exists(self.type_name(), &id.id(), MANAGED_IDENTITY)
                .await?;
        }

        let body = Identity {
            location: d.get_str("location").map(location::normalize),
            tags: tags::expand(d.get("tags")),
            ..Default::default()
        };

        info!(%id, "creating or updating user assigned identity");
        let _: Identity = put_as(clients.arm(), &id.id(), MANAGED_IDENTITY, &body).await?;
        d.set_id(id.id());
        self.read(clients, d).await
    }
}

#[async_trait]
impl Resource for UserAssignedIdentityResource {
    fn type_name(&self) -> &'static str {
        "azurerm_user_assigned_identity"
    }

    fn timeouts(&self) -> Timeouts {
        Timeouts::minutes(30, 5, 30, 30)
    }

    fn schema(&self) -> Schema {
        Schema::new(1)
            .with_attribute("id", Attribute::computed_string())
            .with_attribute(
                "name",
                Attribute::required_string()
                    .with_force_new()
                    .with_validator(Validator::StringLenBetween(3, 128)),
            )
            .with_attribute("resource_group_name", azure::resource_group_name())
            .with_attribute("location", azure::location())
            .with_attribute("tags", azure::tags())
            .with_attribute("principal_id", Attribute::computed_string())
            .with_attribute("client_id", Attribute::computed_string())
            .with_attribute("tenant_id", Attribute::computed_string())
    }

    async fn create(&self, clients: &Clients, d: &mut ResourceData) -> Result<()> {
        self.create_or_update(clients, d).await
    }

    async fn read(&self, clients: &Clients, d: &mut ResourceData) -> Result<()> {
        let id = UserAssignedIdentityId::parse(d.id())?;
        let identity: Identity = match get_as(clients.arm(), &id.id(), MANAGED_IDENTITY).await {
            Ok(identity) => identity,
            Err(e) if e.is_not_found() => {
                info!(%id, "user assigned identity does not exist; removing from state");
                d.clear_id();
                return Ok(());
            },
            Err(e) => return Err(e),
        };
        set_identity(d, &id, &identity);
        Ok(())
    }

    async fn update(&self, clients: &Clients, d: &mut ResourceData) -> Result<()> {
        self.create_or_update(clients, d).await
    }

    async fn delete(&self, clients: &Clients, d: &mut ResourceData) -> Result<()> {
        let id = UserAssignedIdentityId::parse(d.id())?;
        ignore_not_found(clients.arm().delete(&id.id(), MANAGED_IDENTITY).await)
    }

    fn validate_import_id(&self, id: &str) -> Result<()> {
        UserAssignedIdentityId::parse(id).map(|_| ())
    }

    fn upgrade_state(&self, version: u64, state: Value) -> Result<Value> {
        match version {
            0 => upgrade_v0(state),
            _ => Ok(state),
        }
    }
}

/// `azurerm_user_assigned_identity` data source.
pub struct UserAssignedIdentityDataSource;

#[async_trait]
impl DataSource for UserAssignedIdentityDataSource {
    fn type_name(&self) -> &'static str {
        "azurerm_user_assigned_identity"
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_attribute("id", Attribute::computed_string())
            .with_attribute(
                "name",
                Attribute::required_string().with_validator(Validator::StringLenBetween(3, 128)),
            )
            .with_attribute("resource_group_name", azure::resource_group_name_for_data_source())
            .with_attribute("location", azure::location_for_data_source())
            .with_attribute("tags", azure::tags_for_data_source())
            .with_attribute("principal_id", Attribute::computed_string())
            .with_attribute("client_id", Attribute::computed_string())
            .with_attribute("tenant_id", Attribute::computed_string())
    }

    async fn read(&self, clients: &Clients, d: &mut ResourceData) -> Result<()> {
        let id = UserAssignedIdentityId::new(
            &clients.subscription_id,
            d.required_str("resource_group_name")?,
            d.required_str("name")?,
        );
        let identity: Identity = get_as(clients.arm(), &id.id(), MANAGED_IDENTITY)
            .await
            .map_err(|e| {
                if e.is_not_found() {
                    ProviderError::NotFound(format!("{} was not found", id))
                } else {
                    e
                }
            })?;
        d.set_id(id.id());
        set_identity(d, &id, &identity);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeResourceManager;
    use serde_json::json;
    use std::sync::Arc;

    const ID: &str =
        "/subscriptions/sub/resourceGroups/rg/providers/Microsoft.ManagedIdentity/userAssignedIdentities/uai";

    #[tokio::test]
    async fn test_create_reads_back_principal() {
        let fake = Arc::new(FakeResourceManager::new());
        let clients = Clients::new(fake.clone(), "sub");
        let mut d = ResourceData::for_create(json!({
            "name": "uai",
            "resource_group_name": "rg",
            "location": "West US 2",
            "tags": {"env": "test"}
        }));
        UserAssignedIdentityResource.create(&clients, &mut d).await.unwrap();

        let stored = fake.stored(ID).unwrap();
        assert_eq!(stored["location"], "westus2");
        assert_eq!(stored["tags"]["env"], "test");
        assert_eq!(d.id(), ID);
        assert_eq!(d.get_str("name"), Some("uai"));
    }

    #[tokio::test]
    async fn test_create_over_existing_identity_requires_import() {
        let fake = Arc::new(FakeResourceManager::new());
        fake.seed(ID, json!({"id": ID, "location": "westus2"}));
        let clients = Clients::new(fake.clone(), "sub");
        let mut d = ResourceData::for_create(json!({
            "name": "uai",
            "resource_group_name": "rg",
            "location": "westus2"
        }));
        let err = UserAssignedIdentityResource.create(&clients, &mut d).await.unwrap_err();
        assert!(matches!(err, ProviderError::AlreadyExists(_)));
        assert!(fake.calls_to("PUT").is_empty());
    }

    #[tokio::test]
    async fn test_read_sets_computed_ids() {
        let fake = Arc::new(FakeResourceManager::new());
        fake.seed(
            ID,
            json!({
                "id": ID,
                "location": "westus2",
                "properties": {"principalId": "p", "clientId": "c", "tenantId": "t"}
            }),
        );
        let clients = Clients::new(fake, "sub");
        let mut d = ResourceData::from_state(json!({"id": ID}));
        UserAssignedIdentityResource.read(&clients, &mut d).await.unwrap();
        assert_eq!(d.get_str("principal_id"), Some("p"));
        assert_eq!(d.get_str("client_id"), Some("c"));
        assert_eq!(d.get_str("tenant_id"), Some("t"));
        assert_eq!(d.get_str("resource_group_name"), Some("rg"));
    }

    #[tokio::test]
    async fn test_delete_tolerates_missing_identity() {
        let fake = Arc::new(FakeResourceManager::new());
        let clients = Clients::new(fake.clone(), "sub");
        let mut d = ResourceData::from_state(json!({"id": ID}));
        tokio_test::assert_ok!(UserAssignedIdentityResource.delete(&clients, &mut d).await);
        assert_eq!(fake.calls_to("DELETE"), vec![ID.to_string()]);
    }

    #[test]
    fn test_upgrade_v0_canonicalizes_id() {
        let legacy = json!({
            "id": "/subscriptions/sub/resourcegroups/rg/providers/Microsoft.ManagedIdentity/userassignedidentities/uai",
            "name": "uai"
        });
        let upgraded = UserAssignedIdentityResource.upgrade_state(0, legacy).unwrap();
        assert_eq!(upgraded["id"], ID);
        assert_eq!(upgraded["name"], "uai");
    }

    #[test]
    fn test_upgrade_rejects_foreign_id() {
        let state = json!({"id": "/subscriptions/sub/resourceGroups/rg/providers/Microsoft.Compute/disks/d"});
        assert!(UserAssignedIdentityResource.upgrade_state(0, state).is_err());
    }

    #[tokio::test]
    async fn test_data_source_missing_identity() {
        let clients = Clients::new(Arc::new(FakeResourceManager::new()), "sub");
        let mut d = ResourceData::from_state(json!({"name": "uai", "resource_group_name": "rg"}));
        let err = UserAssignedIdentityDataSource.read(&clients, &mut d).await.unwrap_err();
        assert!(matches!(err, ProviderError::NotFound(_)));
    }
}
