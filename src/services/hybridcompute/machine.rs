//! Azure Arc hybrid compute machines.

use crate::arm::api_version::HYBRID_COMPUTE;
use crate::arm::client::{get_as, patch_as, put_as};
use crate::arm::id::HybridComputeMachineId;
use crate::arm::{location, tags};
use crate::error::{ProviderError, Result};
use crate::resource::{ignore_not_found, BlockExt, Clients, DataSource, Resource, ResourceData};
use crate::schema::{azure, Attribute, Block, NestedBlock, Schema};
use crate::types::Timeouts;
use crate::validation::Validator;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use tracing::{debug, info};

const IDENTITY_TYPES: &[&str] = &["SystemAssigned"];

/// Machine names: 1-54 characters of letters, digits, `-`, `_` and `.`,
/// starting with a letter or digit and not ending in a period.
pub fn validate_machine_name(name: &str) -> std::result::Result<(), String> {
    let len = name.chars().count();
    if !(1..=54).contains(&len) {
        return Err(format!("{:?} must be between 1 and 54 characters long", name));
    }
    if !name.starts_with(|c: char| c.is_ascii_alphanumeric()) {
        return Err(format!("{:?} must start with a letter or digit", name));
    }
    if name.ends_with('.') {
        return Err(format!("{:?} must not end with a period", name));
    }
    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
    {
        return Err(format!("{:?} contains the invalid character {:?}", name, bad));
    }
    Ok(())
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Machine {
    #[serde(default, skip_serializing)]
    id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    identity: Option<MachineIdentity>,
    #[serde(default)]
    tags: BTreeMap<String, String>,
    #[serde(default)]
    properties: MachineProperties,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MachineIdentity {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    kind: Option<String>,
    #[serde(default, skip_serializing)]
    principal_id: Option<String>,
    #[serde(default, skip_serializing)]
    tenant_id: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LocationData {
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    district: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    country_or_region: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MachineProperties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    client_public_key: Option<String>,
    #[serde(default, rename = "vmId", skip_serializing_if = "Option::is_none")]
    vm_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    location_data: Option<LocationData>,
    #[serde(default, skip_serializing)]
    agent_version: Option<String>,
    #[serde(default, skip_serializing)]
    display_name: Option<String>,
    #[serde(default, skip_serializing)]
    machine_fqdn: Option<String>,
    #[serde(default, skip_serializing)]
    dns_fqdn: Option<String>,
    #[serde(default, skip_serializing)]
    domain_name: Option<String>,
    #[serde(default, skip_serializing)]
    ad_fqdn: Option<String>,
    #[serde(default, skip_serializing)]
    os_name: Option<String>,
    #[serde(default, skip_serializing)]
    os_profile: Option<MachineOsProfile>,
    #[serde(default, skip_serializing)]
    os_sku: Option<String>,
    #[serde(default, skip_serializing)]
    os_version: Option<String>,
    #[serde(default, rename = "vmUuid", skip_serializing)]
    vm_uuid: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MachineOsProfile {
    #[serde(default)]
    computer_name: Option<String>,
}

/// PATCH body; unchanged fields are left out.
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct MachineUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    identity: Option<MachineIdentity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tags: Option<BTreeMap<String, String>>,
    properties: MachineUpdateProperties,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct MachineUpdateProperties {
    #[serde(skip_serializing_if = "Option::is_none")]
    location_data: Option<LocationData>,
}

fn expand_identity(block: Option<&Map<String, Value>>) -> Option<MachineIdentity> {
    block.map(|b| MachineIdentity {
        kind: b.str_field("type").map(str::to_string),
        ..Default::default()
    })
}

fn expand_location_data(block: Option<&Map<String, Value>>) -> Option<LocationData> {
    block.map(|b| LocationData {
        name: b.str_field("name").unwrap_or_default().to_string(),
        city: b.str_field("city").map(str::to_string),
        district: b.str_field("district").map(str::to_string),
        country_or_region: b.str_field("country_or_region").map(str::to_string),
    })
}

fn set_machine(d: &mut ResourceData, id: &HybridComputeMachineId, machine: &Machine) {
    d.set("name", id.name.as_str());
    d.set("resource_group_name", id.resource_group.as_str());
    d.set("location", machine.location.as_deref().map(location::normalize));

    let props = &machine.properties;
    d.set("client_public_key", props.client_public_key.clone());
    d.set("virtual_machine_id", props.vm_id.clone());
    d.set_block(
        "location_data",
        props.location_data.as_ref().map(|l| {
            json!({
                "name": l.name,
                "city": l.city.clone().unwrap_or_default(),
                "country_or_region": l.country_or_region.clone().unwrap_or_default(),
                "district": l.district.clone().unwrap_or_default(),
            })
        }),
    );
    d.set("agent_version", props.agent_version.clone());
    d.set("display_name", props.display_name.clone());
    d.set("machine_fqdn", props.machine_fqdn.clone());
    d.set("dns_fqdn", props.dns_fqdn.clone());
    d.set("domain_name", props.domain_name.clone());
    d.set("ad_fqdn", props.ad_fqdn.clone());
    d.set("os_name", props.os_name.clone());
    d.set_block(
        "os_profile",
        props
            .os_profile
            .as_ref()
            .map(|p| json!({"computer_name": p.computer_name.clone().unwrap_or_default()})),
    );
    d.set("os_sku", props.os_sku.clone());
    d.set("os_version", props.os_version.clone());
    d.set("vm_uuid", props.vm_uuid.clone());

    d.set_block(
        "identity",
        machine.identity.as_ref().map(|i| {
            json!({
                "type": i.kind.clone().unwrap_or_default(),
                "principal_id": i.principal_id.clone().unwrap_or_default(),
                "tenant_id": i.tenant_id.clone().unwrap_or_default(),
            })
        }),
    );
    d.set("tags", tags::flatten(serde_json::to_value(&machine.tags).ok().as_ref()));
}

/// Attributes the API fills in, shared by the resource and the data source.
fn with_computed(schema: Schema) -> Schema {
    [
        "agent_version",
        "display_name",
        "machine_fqdn",
        "dns_fqdn",
        "domain_name",
        "ad_fqdn",
        "os_name",
        "os_sku",
        "os_version",
        "vm_uuid",
    ]
    .into_iter()
    .fold(schema, |s, name| s.with_attribute(name, Attribute::computed_string()))
    .with_block(
        "os_profile",
        NestedBlock::list(Block::new().with_attribute("computer_name", Attribute::computed_string()))
            .computed(),
    )
}

/// `azurerm_hybrid_compute_machine`
pub struct HybridComputeMachineResource;

#[async_trait]
impl Resource for HybridComputeMachineResource {
    fn type_name(&self) -> &'static str {
        "azurerm_hybrid_compute_machine"
    }

    fn timeouts(&self) -> Timeouts {
        Timeouts::minutes(30, 5, 30, 30)
    }

    fn schema(&self) -> Schema {
        with_computed(
            Schema::v0()
                .with_attribute("id", Attribute::computed_string())
                .with_attribute(
                    "name",
                    Attribute::required_string()
                        .with_force_new()
                        .with_validator(Validator::Custom(validate_machine_name)),
                )
                .with_attribute("resource_group_name", azure::resource_group_name())
                .with_attribute("location", azure::location())
                .with_attribute("client_public_key", Attribute::optional_string().with_force_new())
                .with_attribute("virtual_machine_id", Attribute::optional_string().with_force_new())
                .with_block(
                    "identity",
                    NestedBlock::list(
                        Block::new()
                            .with_attribute(
                                "type",
                                Attribute::optional_string()
                                    .with_validator(Validator::one_of(IDENTITY_TYPES)),
                            )
                            .with_attribute("principal_id", Attribute::computed_string())
                            .with_attribute("tenant_id", Attribute::computed_string()),
                    )
                    .with_max_items(1),
                )
                .with_block(
                    "location_data",
                    NestedBlock::list(
                        Block::new()
                            .with_attribute("name", Attribute::required_string())
                            .with_attribute("city", Attribute::optional_string())
                            .with_attribute("country_or_region", Attribute::optional_string())
                            .with_attribute("district", Attribute::optional_string()),
                    )
                    .with_max_items(1),
                )
                .with_attribute("tags", azure::tags()),
        )
    }

    async fn create(&self, clients: &Clients, d: &mut ResourceData) -> Result<()> {
        let id = HybridComputeMachineId::new(
            &clients.subscription_id,
            d.required_str("resource_group_name")?,
            d.required_str("name")?,
        );

        clients
            .ensure_not_exists(self.type_name(), &id.id(), HYBRID_COMPUTE)
            .await?;

        let machine = Machine {
            location: d.get_str("location").map(location::normalize),
            identity: expand_identity(d.get_block("identity")),
            tags: tags::expand(d.get("tags")),
            properties: MachineProperties {
                client_public_key: d.get_string("client_public_key"),
                vm_id: d.get_string("virtual_machine_id"),
                location_data: expand_location_data(d.get_block("location_data")),
                ..Default::default()
            },
            ..Default::default()
        };

        info!(%id, "creating hybrid compute machine");
        let created: Machine = put_as(clients.arm(), &id.id(), HYBRID_COMPUTE, &machine).await?;
        if created.id.as_deref().map_or(true, str::is_empty) {
            return Err(ProviderError::FailedPrecondition(format!(
                "empty or nil ID returned for {}",
                id
            )));
        }
        d.set_id(id.id());
        self.read(clients, d).await
    }

    async fn read(&self, clients: &Clients, d: &mut ResourceData) -> Result<()> {
        let id = HybridComputeMachineId::parse(d.id())?;
        let machine: Machine = match get_as(clients.arm(), &id.id(), HYBRID_COMPUTE).await {
            Ok(m) => m,
            Err(e) if e.is_not_found() => {
                info!(%id, "hybrid compute machine does not exist; removing from state");
                d.clear_id();
                return Ok(());
            },
            Err(e) => return Err(e),
        };
        set_machine(d, &id, &machine);
        Ok(())
    }

    async fn update(&self, clients: &Clients, d: &mut ResourceData) -> Result<()> {
        let id = HybridComputeMachineId::parse(d.id())?;
        let mut update = MachineUpdate::default();
        if d.has_change("location_data") {
            update.properties.location_data = expand_location_data(d.get_block("location_data"));
        }
        if d.has_change("identity") {
            update.identity = expand_identity(d.get_block("identity"));
        }
        if d.has_change("tags") {
            update.tags = Some(tags::expand(d.get("tags")));
        }

        debug!(%id, "updating hybrid compute machine");
        let _: Value = patch_as(clients.arm(), &id.id(), HYBRID_COMPUTE, &update).await?;
        self.read(clients, d).await
    }

    async fn delete(&self, clients: &Clients, d: &mut ResourceData) -> Result<()> {
        let id = HybridComputeMachineId::parse(d.id())?;
        info!(%id, "deleting hybrid compute machine");
        ignore_not_found(clients.arm().delete(&id.id(), HYBRID_COMPUTE).await)
    }

    fn validate_import_id(&self, id: &str) -> Result<()> {
        HybridComputeMachineId::parse(id).map(|_| ())
    }
}

/// `azurerm_hybrid_compute_machine` data source.
pub struct HybridComputeMachineDataSource;

#[async_trait]
impl DataSource for HybridComputeMachineDataSource {
    fn type_name(&self) -> &'static str {
        "azurerm_hybrid_compute_machine"
    }

    fn schema(&self) -> Schema {
        with_computed(
            Schema::v0()
                .with_attribute("id", Attribute::computed_string())
                .with_attribute(
                    "name",
                    Attribute::required_string().with_validator(Validator::Custom(validate_machine_name)),
                )
                .with_attribute("resource_group_name", azure::resource_group_name_for_data_source())
                .with_attribute("location", azure::location_for_data_source())
                .with_attribute("client_public_key", Attribute::computed_string())
                .with_attribute("virtual_machine_id", Attribute::computed_string())
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
                .with_block(
                    "location_data",
                    NestedBlock::list(
                        Block::new()
                            .with_attribute("name", Attribute::computed_string())
                            .with_attribute("city", Attribute::computed_string())
                            .with_attribute("country_or_region", Attribute::computed_string())
                            .with_attribute("district", Attribute::computed_string()),
                    )
                    .computed(),
                )
                .with_attribute("tags", azure::tags_for_data_source()),
        )
    }

    async fn read(&self, clients: &Clients, d: &mut ResourceData) -> Result<()> {
        let id = HybridComputeMachineId::new(
            &clients.subscription_id,
            d.required_str("resource_group_name")?,
            d.required_str("name")?,
        );
        let machine: Machine = get_as(clients.arm(), &id.id(), HYBRID_COMPUTE)
            .await
            .map_err(|e| {
                if e.is_not_found() {
                    ProviderError::NotFound(format!("{} was not found", id))
                } else {
                    e
                }
            })?;
        d.set_id(id.id());
        set_machine(d, &id, &machine);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeResourceManager;
    use std::sync::Arc;

    const ID: &str = "/subscriptions/sub/resourceGroups/rg/providers/Microsoft.HybridCompute/machines/hm1";

    fn config() -> Value {
        json!({
            "name": "hm1",
            "resource_group_name": "rg",
            "location": "West Europe",
            "client_public_key": "key",
            "virtual_machine_id": "b7a098cc-b0b8-46e8-a205-62f301a62a8f",
            "identity": [{"type": "SystemAssigned"}],
            "location_data": [{"name": "Redmond"}],
            "tags": {"ENV": "Test"}
        })
    }

    #[test]
    fn test_machine_name_validation() {
        assert!(validate_machine_name("acctest-hm-1").is_ok());
        assert!(validate_machine_name("a.b_c").is_ok());
        assert!(validate_machine_name("").is_err());
        assert!(validate_machine_name("-leading").is_err());
        assert!(validate_machine_name("trailing.").is_err());
        assert!(validate_machine_name("has space").is_err());
        assert!(validate_machine_name(&"a".repeat(55)).is_err());
        assert!(validate_machine_name(&"a".repeat(54)).is_ok());
    }

    #[tokio::test]
    async fn test_create_and_read() {
        let fake = Arc::new(FakeResourceManager::new());
        let clients = Clients::new(fake.clone(), "sub");
        let mut d = ResourceData::for_create(config());
        HybridComputeMachineResource.create(&clients, &mut d).await.unwrap();

        let stored = fake.stored(ID).unwrap();
        assert_eq!(stored["properties"]["vmId"], "b7a098cc-b0b8-46e8-a205-62f301a62a8f");
        assert_eq!(stored["properties"]["locationData"]["name"], "Redmond");
        assert_eq!(d.id(), ID);
        assert_eq!(
            d.get_block("location_data").and_then(|l| l.get("city")),
            Some(&json!(""))
        );
        assert_eq!(d.get_str("location"), Some("westeurope"));
    }

    #[tokio::test]
    async fn test_create_requires_import_of_existing() {
        let fake = Arc::new(FakeResourceManager::new());
        fake.seed(ID, json!({"id": ID}));
        let clients = Clients::new(fake, "sub");
        let mut d = ResourceData::for_create(config());
        let err = HybridComputeMachineResource.create(&clients, &mut d).await.unwrap_err();
        assert!(matches!(err, ProviderError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_update_patches_only_changed_fields() {
        let fake = Arc::new(FakeResourceManager::new());
        fake.seed(
            ID,
            json!({"id": ID, "location": "westeurope", "tags": {"ENV": "Test"},
                   "properties": {"locationData": {"name": "Redmond"}, "agentVersion": "1.0"}}),
        );
        let clients = Clients::new(fake.clone(), "sub");
        let mut prior = config();
        prior["id"] = json!(ID);
        let mut planned = prior.clone();
        planned["location_data"] = json!([{"name": "Seattle", "city": "Seattle"}]);

        let mut d = ResourceData::for_update(prior, planned);
        HybridComputeMachineResource.update(&clients, &mut d).await.unwrap();

        assert_eq!(fake.calls_to("PATCH"), vec![ID.to_string()]);
        let stored = fake.stored(ID).unwrap();
        assert_eq!(stored["properties"]["locationData"]["name"], "Seattle");
        assert_eq!(stored["tags"]["ENV"], "Test");
        assert_eq!(d.get_str("agent_version"), Some("1.0"));
    }

    #[tokio::test]
    async fn test_update_enables_identity_in_place() {
        let fake = Arc::new(FakeResourceManager::new());
        fake.seed(ID, json!({"id": ID, "location": "westeurope"}));
        let clients = Clients::new(fake.clone(), "sub");
        let mut prior = config();
        prior["id"] = json!(ID);
        prior["identity"] = json!([]);
        let mut planned = prior.clone();
        planned["identity"] = json!([{"type": "SystemAssigned"}]);

        let mut d = ResourceData::for_update(prior, planned);
        HybridComputeMachineResource.update(&clients, &mut d).await.unwrap();

        assert!(fake.calls_to("PUT").is_empty());
        let stored = fake.stored(ID).unwrap();
        assert_eq!(stored["identity"]["type"], "SystemAssigned");
        assert!(stored.get("tags").is_none());
    }

    #[tokio::test]
    async fn test_data_source_reads_computed_fields() {
        let fake = Arc::new(FakeResourceManager::new());
        fake.seed(
            ID,
            json!({"id": ID, "location": "West Europe",
                   "properties": {"osName": "windows", "osProfile": {"computerName": "box"}}}),
        );
        let clients = Clients::new(fake, "sub");
        let mut d = ResourceData::from_state(json!({"name": "hm1", "resource_group_name": "rg"}));
        HybridComputeMachineDataSource.read(&clients, &mut d).await.unwrap();
        assert_eq!(d.id(), ID);
        assert_eq!(d.get_str("os_name"), Some("windows"));
        assert_eq!(
            d.get_block("os_profile").and_then(|p| p.str_field("computer_name")),
            Some("box")
        );
    }
}
