//! Policy set definitions (initiatives).

use super::{definition_scope, expand_json, flatten_json, json_string, POLICY_TYPES};
use crate::arm::api_version::POLICY;
use crate::arm::client::{get_as, put_as};
use crate::arm::id::PolicySetDefinitionId;
use crate::error::{ProviderError, Result};
use crate::resource::{ignore_not_found, BlockExt, Clients, Resource, ResourceData};
use crate::schema::{Attribute, Block, DiffSuppress, NestedBlock, Schema};
use crate::validation::Validator;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

#[derive(Debug, Default, Serialize, Deserialize)]
struct PolicySetDefinition {
    #[serde(default, skip_serializing)]
    id: Option<String>,
    #[serde(default)]
    properties: SetDefinitionProperties,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetDefinitionProperties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    policy_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    metadata: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    parameters: Option<Value>,
    #[serde(default)]
    policy_definitions: Vec<DefinitionReference>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DefinitionReference {
    policy_definition_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    parameters: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    policy_definition_reference_id: Option<String>,
}

const DEFINITION_MARKER: &str = "/providers/microsoft.authorization/policydefinitions/";

/// Built-in definitions live at tenant scope, so any scope prefix is accepted.
fn validate_definition_id(input: &str) -> std::result::Result<(), String> {
    let lower = input.to_ascii_lowercase();
    match lower.find(DEFINITION_MARKER) {
        Some(idx) => {
            let name = &input[idx + DEFINITION_MARKER.len()..];
            if name.is_empty() || name.contains('/') {
                Err(format!("{:?} has an invalid policy definition name", input))
            } else {
                Ok(())
            }
        },
        None => Err(format!("{:?} is not a policy definition ID", input)),
    }
}

fn expand_references(d: &ResourceData) -> Result<Vec<DefinitionReference>> {
    d.get_blocks("policy_definition_reference")
        .into_iter()
        .map(|block| {
            let parameters = match block.str_field("parameter_values") {
                Some(raw) => Some(serde_json::from_str(raw).map_err(|e| {
                    ProviderError::Validation(format!("`parameter_values` is not valid JSON: {}", e))
                })?),
                None => None,
            };
            Ok(DefinitionReference {
                policy_definition_id: block
                    .str_field("policy_definition_id")
                    .unwrap_or_default()
                    .to_string(),
                parameters,
                policy_definition_reference_id: block.str_field("reference_id").map(str::to_string),
            })
        })
        .collect()
}

fn flatten_references(references: &[DefinitionReference]) -> Result<Vec<Value>> {
    references
        .iter()
        .map(|r| {
            let parameter_values = match &r.parameters {
                Some(v) if !v.is_null() => serde_json::to_string(v)?,
                _ => String::new(),
            };
            Ok(json!({
                "policy_definition_id": r.policy_definition_id,
                "parameter_values": parameter_values,
                "reference_id": r.policy_definition_reference_id.clone().unwrap_or_default(),
            }))
        })
        .collect()
}

/// `azurerm_policy_set_definition`
pub struct PolicySetDefinitionResource;

impl PolicySetDefinitionResource {
    async fn create_or_update(&self, clients: &Clients, d: &mut ResourceData) -> Result<()> {
        let id = PolicySetDefinitionId::new(
            definition_scope(d, &clients.subscription_id),
            d.required_str("name")?,
        );

        if d.is_new_resource() {
            clients.check_not_exists(self.type_name(), &id.id(), POLICY).await?;
        }

        let body = PolicySetDefinition {
            properties: SetDefinitionProperties {
                policy_type: d.get_string("policy_type"),
                display_name: d.get_string("display_name"),
                description: d.get_string("description"),
                metadata: expand_json(d, "metadata")?,
                parameters: expand_json(d, "parameters")?,
                policy_definitions: expand_references(d)?,
            },
            ..Default::default()
        };

        info!(id = %id.id(), "creating or updating policy set definition");
        let _: PolicySetDefinition = put_as(clients.arm(), &id.id(), POLICY, &body).await?;
        d.set_id(id.id());
        self.read(clients, d).await
    }
}

#[async_trait]
impl Resource for PolicySetDefinitionResource {
    fn type_name(&self) -> &'static str {
        "azurerm_policy_set_definition"
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
                "management_group_name",
                Attribute::optional_string().with_force_new(),
            )
            .with_attribute(
                "display_name",
                Attribute::required_string().with_validator(Validator::NoEmptyStrings),
            )
            .with_attribute("description", Attribute::optional_string())
            .with_attribute("metadata", json_string().computed())
            .with_attribute("parameters", json_string())
            .with_block(
                "policy_definition_reference",
                NestedBlock::list(
                    Block::new()
                        .with_attribute(
                            "policy_definition_id",
                            Attribute::required_string()
                                .with_validator(Validator::Custom(validate_definition_id))
                                .with_diff_suppress(DiffSuppress::CaseInsensitive),
                        )
                        .with_attribute("parameter_values", json_string())
                        .with_attribute("reference_id", Attribute::optional_computed_string()),
                )
                .with_min_items(1),
            )
    }

    async fn create(&self, clients: &Clients, d: &mut ResourceData) -> Result<()> {
        self.create_or_update(clients, d).await
    }

    async fn read(&self, clients: &Clients, d: &mut ResourceData) -> Result<()> {
        let id = PolicySetDefinitionId::parse(d.id())?;
        let set: PolicySetDefinition = match get_as(clients.arm(), &id.id(), POLICY).await {
            Ok(set) => set,
            Err(e) if e.is_not_found() => {
                info!(id = %id.id(), "policy set definition does not exist; removing from state");
                d.clear_id();
                return Ok(());
            },
            Err(e) => return Err(e),
        };

        d.set("name", id.name.as_str());
        d.set("management_group_name", id.scope.management_group());
        let props = &set.properties;
        d.set("policy_type", props.policy_type.clone());
        d.set("display_name", props.display_name.clone());
        d.set("description", props.description.clone());
        flatten_json(d, "metadata", props.metadata.as_ref())?;
        flatten_json(d, "parameters", props.parameters.as_ref())?;
        d.set(
            "policy_definition_reference",
            flatten_references(&props.policy_definitions)?,
        );
        Ok(())
    }

    async fn update(&self, clients: &Clients, d: &mut ResourceData) -> Result<()> {
        self.create_or_update(clients, d).await
    }

    async fn delete(&self, clients: &Clients, d: &mut ResourceData) -> Result<()> {
        let id = PolicySetDefinitionId::parse(d.id())?;
        ignore_not_found(clients.arm().delete(&id.id(), POLICY).await)
    }

    fn validate_import_id(&self, id: &str) -> Result<()> {
        PolicySetDefinitionId::parse(id).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeResourceManager;
    use std::sync::Arc;

    const DEFINITION: &str =
        "/providers/Microsoft.Authorization/policyDefinitions/e56962a6-4747-49cd-b67b-bf8b01975c4c";

    #[test]
    fn test_reference_must_be_a_definition_id() {
        assert!(validate_definition_id(DEFINITION).is_ok());
        assert!(validate_definition_id(
            "/subscriptions/sub/providers/Microsoft.Authorization/policyDefinitions/p"
        )
        .is_ok());
        assert!(validate_definition_id(
            "/subscriptions/sub/providers/Microsoft.Authorization/policySetDefinitions/p"
        )
        .is_err());
        assert!(validate_definition_id(&format!("{}/extra", DEFINITION)).is_err());
    }

    #[tokio::test]
    async fn test_create_with_references() {
        let definition = "/subscriptions/sub/providers/Microsoft.Authorization/policyDefinitions/allowed";
        let fake = Arc::new(FakeResourceManager::new());
        let clients = Clients::new(fake.clone(), "sub");
        let mut d = ResourceData::for_create(json!({
            "name": "baseline",
            "policy_type": "Custom",
            "display_name": "Baseline",
            "parameters": r#"{"allowedLocations": {"type": "Array"}}"#,
            "policy_definition_reference": [{
                "policy_definition_id": definition,
                "parameter_values": r#"{"listOfAllowedLocations": {"value": "[parameters('allowedLocations')]"}}"#
            }]
        }));
        PolicySetDefinitionResource.create(&clients, &mut d).await.unwrap();

        let id = "/subscriptions/sub/providers/Microsoft.Authorization/policySetDefinitions/baseline";
        assert_eq!(d.id(), id);
        let stored = fake.stored(id).unwrap();
        let refs = stored["properties"]["policyDefinitions"].as_array().unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0]["policyDefinitionId"], definition);
        assert_eq!(
            refs[0]["parameters"]["listOfAllowedLocations"]["value"],
            "[parameters('allowedLocations')]"
        );

        let blocks = d.get_blocks("policy_definition_reference");
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].str_field("policy_definition_id"), Some(definition));
        assert_eq!(blocks[0].get("reference_id"), Some(&json!("")));
    }

    #[tokio::test]
    async fn test_bad_parameter_values() {
        let clients = Clients::new(Arc::new(FakeResourceManager::new()), "sub");
        let mut d = ResourceData::for_create(json!({
            "name": "baseline",
            "policy_type": "Custom",
            "display_name": "Baseline",
            "policy_definition_reference": [{"policy_definition_id": "x", "parameter_values": "{"}]
        }));
        let err = PolicySetDefinitionResource.create(&clients, &mut d).await.unwrap_err();
        assert!(matches!(err, ProviderError::Validation(_)));
    }
}
