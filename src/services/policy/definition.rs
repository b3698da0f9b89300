//! Custom policy definitions.

use super::{definition_scope, expand_json, flatten_json, json_string, POLICY_TYPES};
use crate::arm::api_version::POLICY;
use crate::arm::client::{get_as, put_as};
use crate::arm::id::PolicyDefinitionId;
use crate::error::Result;
use crate::resource::{ignore_not_found, Clients, Resource, ResourceData};
use crate::schema::{Attribute, Schema};
use crate::validation::Validator;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

const MODES: &[&str] = &[
    "All",
    "Indexed",
    "Microsoft.ContainerService.Data",
    "Microsoft.CustomerLockbox.Data",
    "Microsoft.DataCatalog.Data",
    "Microsoft.KeyVault.Data",
    "Microsoft.Kubernetes.Data",
];

#[derive(Debug, Default, Serialize, Deserialize)]
struct PolicyDefinition {
    #[serde(default, skip_serializing)]
    id: Option<String>,
    #[serde(default)]
    properties: DefinitionProperties,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DefinitionProperties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    policy_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    policy_rule: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    metadata: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    parameters: Option<Value>,
}

/// `azurerm_policy_definition`
pub struct PolicyDefinitionResource;

impl PolicyDefinitionResource {
    async fn create_or_update(&self, clients: &Clients, d: &mut ResourceData) -> Result<()> {
        let id = PolicyDefinitionId::new(
            definition_scope(d, &clients.subscription_id),
            d.required_str("name")?,
        );

        if d.is_new_resource() {
            clients.check_not_exists(self.type_name(), &id.id(), POLICY).await?;
        }

        let body = PolicyDefinition {
            properties: DefinitionProperties {
                policy_type: d.get_string("policy_type"),
                mode: d.get_string("mode"),
                display_name: d.get_string("display_name"),
                description: d.get_string("description"),
                policy_rule: expand_json(d, "policy_rule")?,
                metadata: expand_json(d, "metadata")?,
                parameters: expand_json(d, "parameters")?,
            },
            ..Default::default()
        };

        info!(id = %id.id(), "creating or updating policy definition");
        let _: PolicyDefinition = put_as(clients.arm(), &id.id(), POLICY, &body).await?;
        d.set_id(id.id());
        self.read(clients, d).await
    }
}

#[async_trait]
impl Resource for PolicyDefinitionResource {
    fn type_name(&self) -> &'static str {
        "azurerm_policy_definition"
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
            .with_attribute(
                "policy_type",
                Attribute::required_string()
                    .with_force_new()
                    .with_validator(Validator::one_of(POLICY_TYPES)),
            )
            .with_attribute(
                "mode",
                Attribute::required_string().with_validator(Validator::one_of(MODES)),
            )
            .with_attribute(
                "management_group_name",
                Attribute::optional_string().with_force_new(),
            )
            .with_attribute(
                "display_name",
                Attribute::required_string().with_validator(Validator::NoEmptyStrings),
            )
            .with_attribute("description", Attribute::optional_string())
            .with_attribute("policy_rule", json_string())
            .with_attribute("metadata", json_string().computed())
            .with_attribute("parameters", json_string())
    }

    async fn create(&self, clients: &Clients, d: &mut ResourceData) -> Result<()> {
        self.create_or_update(clients, d).await
    }

    async fn read(&self, clients: &Clients, d: &mut ResourceData) -> Result<()> {
        let id = PolicyDefinitionId::parse(d.id())?;
        let definition: PolicyDefinition = match get_as(clients.arm(), &id.id(), POLICY).await {
            Ok(definition) => definition,
            Err(e) if e.is_not_found() => {
                info!(id = %id.id(), "policy definition does not exist; removing from state");
                d.clear_id();
                return Ok(());
            },
            Err(e) => return Err(e),
        };

        d.set("name", id.name.as_str());
        d.set("management_group_name", id.scope.management_group());
        let props = &definition.properties;
        d.set("policy_type", props.policy_type.clone());
        d.set("mode", props.mode.clone());
        d.set("display_name", props.display_name.clone());
        d.set("description", props.description.clone());
        flatten_json(d, "policy_rule", props.policy_rule.as_ref())?;
        flatten_json(d, "metadata", props.metadata.as_ref())?;
        flatten_json(d, "parameters", props.parameters.as_ref())?;
        Ok(())
    }

    async fn update(&self, clients: &Clients, d: &mut ResourceData) -> Result<()> {
        self.create_or_update(clients, d).await
    }

    async fn delete(&self, clients: &Clients, d: &mut ResourceData) -> Result<()> {
        let id = PolicyDefinitionId::parse(d.id())?;
        ignore_not_found(clients.arm().delete(&id.id(), POLICY).await)
    }

    fn validate_import_id(&self, id: &str) -> Result<()> {
        PolicyDefinitionId::parse(id).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeResourceManager;
    use serde_json::json;
    use std::sync::Arc;

    const RULE: &str = r#"{"if": {"not": {"field": "location", "in": "[parameters('allowedLocations')]"}}, "then": {"effect": "audit"}}"#;

    fn config() -> Value {
        json!({
            "name": "allowed-locations",
            "policy_type": "Custom",
            "mode": "All",
            "display_name": "Allowed locations",
            "policy_rule": RULE,
            "parameters": r#"{"allowedLocations": {"type": "Array"}}"#
        })
    }

    #[tokio::test]
    async fn test_create_at_subscription_scope() {
        let fake = Arc::new(FakeResourceManager::new());
        let clients = Clients::new(fake.clone(), "sub");
        let mut d = ResourceData::for_create(config());
        PolicyDefinitionResource.create(&clients, &mut d).await.unwrap();

        let id = "/subscriptions/sub/providers/Microsoft.Authorization/policyDefinitions/allowed-locations";
        assert_eq!(d.id(), id);
        let stored = fake.stored(id).unwrap();
        assert_eq!(stored["properties"]["policyRule"]["then"]["effect"], "audit");
        assert_eq!(stored["properties"]["parameters"]["allowedLocations"]["type"], "Array");

        let rule: Value = serde_json::from_str(d.get_str("policy_rule").unwrap()).unwrap();
        assert_eq!(rule, serde_json::from_str::<Value>(RULE).unwrap());
        assert_eq!(d.get("management_group_name"), None);
        assert_eq!(d.get("metadata"), Some(&json!("")));
    }

    #[tokio::test]
    async fn test_create_in_management_group() {
        let fake = Arc::new(FakeResourceManager::new());
        let clients = Clients::new(fake.clone(), "sub");
        let mut config = config();
        config["management_group_name"] = json!("mg1");
        let mut d = ResourceData::for_create(config);
        PolicyDefinitionResource.create(&clients, &mut d).await.unwrap();

        assert_eq!(
            d.id(),
            "/providers/Microsoft.Management/managementGroups/mg1/providers/Microsoft.Authorization/policyDefinitions/allowed-locations"
        );
        assert_eq!(d.get_str("management_group_name"), Some("mg1"));
    }

    #[tokio::test]
    async fn test_invalid_rule_is_rejected_before_any_call() {
        let fake = Arc::new(FakeResourceManager::new());
        let clients = Clients::new(fake.clone(), "sub");
        let mut config = config();
        config["policy_rule"] = json!("{not json");
        let mut d = ResourceData::for_create(config);
        assert!(PolicyDefinitionResource.create(&clients, &mut d).await.is_err());
        assert!(fake.calls_to("PUT").is_empty());
    }

    #[test]
    fn test_import_id_must_be_a_definition() {
        assert!(PolicyDefinitionResource
            .validate_import_id("/subscriptions/sub/providers/Microsoft.Authorization/policyDefinitions/p")
            .is_ok());
        assert!(PolicyDefinitionResource
            .validate_import_id("/subscriptions/sub/providers/Microsoft.Authorization/policySetDefinitions/p")
            .is_err());
    }
}
