//! NAT gateways.

use crate::arm::api_version::NETWORK;
use crate::arm::client::{self, put_as};
use crate::arm::id::NatGatewayId;
use crate::arm::{location, tags};
use crate::error::{ProviderError, Result};
use crate::resource::{string_list, Clients, DataSource, Resource, ResourceData};
use crate::schema::{azure, Attribute, Block, NestedBlock, Schema};
use crate::validation::Validator;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::info;

const SKUS: &[&str] = &["Standard"];

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NatGateway {
    #[serde(default, skip_serializing)]
    id: Option<String>,
    #[serde(default, skip_serializing)]
    name: Option<String>,
    #[serde(default, rename = "type", skip_serializing)]
    kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    location: Option<String>,
    #[serde(default)]
    tags: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    zones: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sku: Option<Sku>,
    #[serde(default)]
    properties: Properties,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Sku {
    name: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Properties {
    #[serde(skip_serializing_if = "Option::is_none")]
    idle_timeout_in_minutes: Option<i64>,
    #[serde(default, rename = "publicIpAddresses")]
    public_ip_addresses: Vec<SubResource>,
    #[serde(default, rename = "publicIpPrefixes")]
    public_ip_prefixes: Vec<SubResource>,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "resourceGuid")]
    resource_guid: Option<String>,
    #[serde(default, skip_serializing)]
    subnets: Vec<SubResource>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SubResource {
    #[serde(default)]
    id: Option<String>,
}

fn expand_sub_resources(ids: Vec<String>) -> Vec<SubResource> {
    ids.into_iter().map(|id| SubResource { id: Some(id) }).collect()
}

fn flatten_sub_resource_ids(items: &[SubResource]) -> Vec<String> {
    items.iter().filter_map(|s| s.id.clone()).collect()
}

/// Copy a gateway response into state; shared by the resource and the data source.
fn set_gateway(d: &mut ResourceData, resource_group: &str, gw: &NatGateway) {
    d.set("name", gw.name.clone());
    d.set("resource_group_name", resource_group);
    d.set("location", gw.location.as_deref().map(location::normalize));
    d.set("sku", gw.sku.as_ref().map(|s| s.name.clone()));
    d.set("idle_timeout_in_minutes", gw.properties.idle_timeout_in_minutes);
    d.set(
        "public_ip_address_ids",
        flatten_sub_resource_ids(&gw.properties.public_ip_addresses),
    );
    d.set(
        "public_ip_prefix_ids",
        flatten_sub_resource_ids(&gw.properties.public_ip_prefixes),
    );
    d.set("resource_guid", gw.properties.resource_guid.clone());
    let subnets: Vec<Value> = gw
        .properties
        .subnets
        .iter()
        .map(|s| json!({ "id": s.id }))
        .collect();
    d.set("subnets", subnets);
    d.set("type", gw.kind.clone());
    d.set("zones", gw.zones.clone());
    d.set("tags", tags::flatten(serde_json::to_value(&gw.tags).ok().as_ref()));
}

/// `azurerm_nat_gateway`
pub struct NatGatewayResource;

impl NatGatewayResource {
    async fn create_or_update(&self, clients: &Clients, d: &mut ResourceData) -> Result<()> {
        let name = d.required_str("name")?.to_string();
        let resource_group = d.required_str("resource_group_name")?.to_string();
        let id = NatGatewayId::new(&clients.subscription_id, &resource_group, &name);

        if d.is_new_resource() {
            clients
                .check_not_exists("azurerm_nat_gateway", &id.id(), NETWORK)
                .await?;
        }

        let body = NatGateway {
            location: d.get_str("location").map(location::normalize),
            tags: tags::expand(d.get("tags")),
            zones: d.get_string_list("zones"),
            sku: Some(Sku {
                name: d.get_str("sku").unwrap_or("Standard").to_string(),
            }),
            properties: Properties {
                idle_timeout_in_minutes: d.get_i64("idle_timeout_in_minutes"),
                public_ip_addresses: expand_sub_resources(d.get_string_list("public_ip_address_ids")),
                public_ip_prefixes: expand_sub_resources(d.get_string_list("public_ip_prefix_ids")),
                resource_guid: d.get_string("resource_guid"),
                subnets: Vec::new(),
            },
            ..Default::default()
        };

        info!(%id, "creating or updating NAT gateway");
        let created: NatGateway = put_as(clients.arm(), &id.id(), NETWORK, &body).await?;
        let resource_id = created.id.ok_or_else(|| {
            ProviderError::FailedPrecondition(format!("cannot read {} ID", id))
        })?;
        d.set_id(resource_id);
        self.read(clients, d).await
    }
}

#[async_trait]
impl Resource for NatGatewayResource {
    fn type_name(&self) -> &'static str {
        "azurerm_nat_gateway"
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
            .with_attribute("idle_timeout_in_minutes", Attribute::optional_int64())
            .with_attribute("public_ip_address_ids", Attribute::optional_string_list())
            .with_attribute("public_ip_prefix_ids", Attribute::optional_string_list())
            .with_attribute("resource_guid", Attribute::optional_computed_string())
            .with_attribute(
                "sku",
                Attribute::optional_string()
                    .with_validator(Validator::one_of(SKUS))
                    .with_default(json!("Standard")),
            )
            .with_attribute("tags", azure::tags())
            .with_attribute("zones", azure::zones())
            .with_attribute("type", Attribute::computed_string())
            .with_block(
                "subnets",
                NestedBlock::list(Block::new().with_attribute("id", Attribute::computed_string()))
                    .computed(),
            )
    }

    async fn create(&self, clients: &Clients, d: &mut ResourceData) -> Result<()> {
        self.create_or_update(clients, d).await
    }

    async fn read(&self, clients: &Clients, d: &mut ResourceData) -> Result<()> {
        let id = NatGatewayId::parse(d.id())?;
        let gw: NatGateway = match client::get_as(clients.arm(), &id.id(), NETWORK).await {
            Ok(gw) => gw,
            Err(e) if e.is_not_found() => {
                info!(%id, "NAT gateway does not exist; removing from state");
                d.clear_id();
                return Ok(());
            },
            Err(e) => return Err(e),
        };
        set_gateway(d, &id.resource_group, &gw);
        Ok(())
    }

    async fn update(&self, clients: &Clients, d: &mut ResourceData) -> Result<()> {
        self.create_or_update(clients, d).await
    }

    async fn delete(&self, clients: &Clients, d: &mut ResourceData) -> Result<()> {
        let id = NatGatewayId::parse(d.id())?;
        info!(%id, "deleting NAT gateway");
        crate::resource::ignore_not_found(clients.arm().delete(&id.id(), NETWORK).await)
    }

    fn validate_import_id(&self, id: &str) -> Result<()> {
        NatGatewayId::parse(id).map(|_| ())
    }
}

/// `azurerm_nat_gateway` data source.
pub struct NatGatewayDataSource;

#[async_trait]
impl DataSource for NatGatewayDataSource {
    fn type_name(&self) -> &'static str {
        "azurerm_nat_gateway"
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
            .with_attribute("idle_timeout_in_minutes", Attribute::computed_int64())
            .with_attribute("public_ip_address_ids", Attribute::optional_string_list())
            .with_attribute("public_ip_prefix_ids", Attribute::optional_string_list())
            .with_attribute("resource_guid", Attribute::computed_string())
            .with_attribute("sku", Attribute::computed_string())
            .with_attribute("tags", azure::tags_for_data_source())
            .with_attribute("type", Attribute::computed_string())
            .with_attribute("zones", azure::zones_for_data_source())
            .with_block(
                "subnets",
                NestedBlock::list(Block::new().with_attribute("id", Attribute::computed_string()))
                    .computed(),
            )
    }

    async fn read(&self, clients: &Clients, d: &mut ResourceData) -> Result<()> {
        let name = d.required_str("name")?.to_string();
        let resource_group = d.required_str("resource_group_name")?.to_string();
        let id = NatGatewayId::new(&clients.subscription_id, &resource_group, &name);

        let gw: NatGateway = client::get_as(clients.arm(), &id.id(), NETWORK)
            .await
            .map_err(|e| {
                if e.is_not_found() {
                    ProviderError::NotFound(format!("{} was not found", id))
                } else {
                    e
                }
            })?;
        d.set_id(gw.id.clone().unwrap_or_else(|| id.id()));
        set_gateway(d, &resource_group, &gw);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::Features;
    use crate::testing::FakeResourceManager;
    use std::sync::Arc;

    const ID: &str = "/subscriptions/sub/resourceGroups/rg/providers/Microsoft.Network/natGateways/gw";

    fn config() -> Value {
        json!({
            "name": "gw",
            "resource_group_name": "rg",
            "location": "West Europe",
            "sku": "Standard",
            "idle_timeout_in_minutes": 10,
            "public_ip_address_ids": ["/subscriptions/sub/resourceGroups/rg/providers/Microsoft.Network/publicIPAddresses/pip"],
            "zones": ["1"],
            "tags": {"env": "test"}
        })
    }

    #[tokio::test]
    async fn test_create_sends_expected_body() {
        let fake = Arc::new(FakeResourceManager::new());
        let clients = Clients::new(fake.clone(), "sub");
        let mut d = ResourceData::for_create(config());

        NatGatewayResource.create(&clients, &mut d).await.unwrap();

        assert_eq!(d.id(), ID);
        let stored = fake.stored(ID).unwrap();
        assert_eq!(stored["location"], "westeurope");
        assert_eq!(stored["sku"]["name"], "Standard");
        assert_eq!(stored["properties"]["idleTimeoutInMinutes"], 10);
        assert_eq!(
            stored["properties"]["publicIpAddresses"][0]["id"],
            "/subscriptions/sub/resourceGroups/rg/providers/Microsoft.Network/publicIPAddresses/pip"
        );
        assert_eq!(d.get_string_list("zones"), vec!["1".to_string()]);
        assert_eq!(d.get("tags"), Some(&json!({"env": "test"})));
    }

    #[tokio::test]
    async fn test_create_requires_import_when_strict() {
        let fake = Arc::new(FakeResourceManager::new());
        fake.seed(ID, json!({"id": ID}));
        let clients = Clients::new(fake, "sub").with_features(Features { strict: true });
        let mut d = ResourceData::for_create(config());

        let err = NatGatewayResource.create(&clients, &mut d).await.unwrap_err();
        assert!(err.to_string().contains("needs to be imported"));
    }

    #[tokio::test]
    async fn test_read_missing_clears_id() {
        let clients = Clients::new(Arc::new(FakeResourceManager::new()), "sub");
        let mut d = ResourceData::from_state(json!({"id": ID}));
        NatGatewayResource.read(&clients, &mut d).await.unwrap();
        assert!(d.id().is_empty());
    }

    #[tokio::test]
    async fn test_read_flattens_subnets() {
        let fake = Arc::new(FakeResourceManager::new());
        fake.seed(
            ID,
            json!({
                "id": ID,
                "name": "gw",
                "type": "Microsoft.Network/natGateways",
                "location": "westeurope",
                "sku": {"name": "Standard"},
                "properties": {
                    "resourceGuid": "guid",
                    "subnets": [{"id": "subnet-1"}]
                }
            }),
        );
        let clients = Clients::new(fake, "sub");
        let mut d = ResourceData::from_state(json!({"id": ID}));
        NatGatewayResource.read(&clients, &mut d).await.unwrap();
        assert_eq!(d.get("subnets"), Some(&json!([{"id": "subnet-1"}])));
        assert_eq!(d.get_str("resource_guid"), Some("guid"));
        assert_eq!(d.get_str("type"), Some("Microsoft.Network/natGateways"));
        assert_eq!(d.get("tags"), Some(&json!({})));
    }

    #[tokio::test]
    async fn test_delete_tolerates_missing() {
        let clients = Clients::new(Arc::new(FakeResourceManager::new()), "sub");
        let mut d = ResourceData::from_state(json!({"id": ID}));
        tokio_test::assert_ok!(NatGatewayResource.delete(&clients, &mut d).await);
    }

    #[tokio::test]
    async fn test_data_source_not_found() {
        let clients = Clients::new(Arc::new(FakeResourceManager::new()), "sub");
        let mut d = ResourceData::from_state(json!({"name": "gw", "resource_group_name": "rg"}));
        let err = NatGatewayDataSource.read(&clients, &mut d).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
