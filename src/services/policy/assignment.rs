//! Policy assignments at any scope.

use super::{expand_json, flatten_json, json_string};
use crate::arm::api_version::POLICY;
use crate::arm::client::{get_as, put_as};
use crate::arm::id::PolicyAssignmentId;
use crate::arm::location;
use crate::error::{ProviderError, Result};
use crate::resource::{ignore_not_found, BlockExt, Clients, Resource, ResourceData};
use crate::schema::{Attribute, Block, DiffSuppress, NestedBlock, Schema};
use crate::validation::Validator;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

const IDENTITY_TYPES: &[&str] = &["SystemAssigned", "None"];
const ENFORCE: &str = "Default";
const DO_NOT_ENFORCE: &str = "DoNotEnforce";

#[derive(Debug, Default, Serialize, Deserialize)]
struct PolicyAssignment {
    #[serde(default, skip_serializing)]
    id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    identity: Option<AssignmentIdentity>,
    #[serde(default)]
    properties: AssignmentProperties,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssignmentIdentity {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default, skip_serializing)]
    principal_id: Option<String>,
    #[serde(default, skip_serializing)]
    tenant_id: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssignmentProperties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    policy_definition_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    scope: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    not_scopes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    parameters: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    metadata: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    enforcement_mode: Option<String>,
}

fn expand_identity(d: &ResourceData) -> Result<Option<AssignmentIdentity>> {
    let Some(block) = d.get_block("identity") else {
        return Ok(None);
    };
    let kind = block.str_field("type").unwrap_or("SystemAssigned").to_string();
    if kind == "SystemAssigned" && d.get_str("location").is_none() {
        return Err(ProviderError::Validation(
            "`location` must be set when a system assigned identity is configured".to_string(),
        ));
    }
    Ok(Some(AssignmentIdentity {
        kind,
        ..Default::default()
    }))
}

/// `azurerm_policy_assignment`
pub struct PolicyAssignmentResource;

impl PolicyAssignmentResource {
    async fn create_or_update(&self, clients: &Clients, d: &mut ResourceData) -> Result<()> {
        let id = PolicyAssignmentId::new(d.required_str("scope")?, d.required_str("name")?);

        if d.is_new_resource() {
            clients.check_not_exists(self.type_name(), &id.id(), POLICY).await?;
        }

        let enforcement_mode = if d.get_bool("enforcement_mode").unwrap_or(true) {
            ENFORCE
        } else {
            DO_NOT_ENFORCE
        };
        let body = PolicyAssignment {
            location: d.get_str("location").map(location::normalize),
            identity: expand_identity(d)?,
            properties: AssignmentProperties {
                display_name: d.get_string("display_name"),
                description: d.get_string("description"),
                policy_definition_id: d.get_string("policy_definition_id"),
                scope: Some(id.scope.clone()),
                not_scopes: d.get_string_list("not_scopes"),
                parameters: expand_json(d, "parameters")?,
                metadata: expand_json(d, "metadata")?,
                enforcement_mode: Some(enforcement_mode.to_string()),
            },
            ..Default::default()
        };

        info!(id = %id.id(), "creating or updating policy assignment");
        let _: PolicyAssignment = put_as(clients.arm(), &id.id(), POLICY, &body).await?;
        d.set_id(id.id());
        self.read(clients, d).await
    }
}

#[async_trait]
impl Resource for PolicyAssignmentResource {
    fn type_name(&self) -> &'static str {
        "azurerm_policy_assignment"
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_attribute("id", Attribute::computed_string())
            .with_attribute(
                "name",
                Attribute::required_string()
                    .with_force_new()
                    .with_validator(Validator::StringLenBetween(1, 64)),
            )
            .with_attribute(
                "scope",
                Attribute::required_string()
                    .with_force_new()
                    .with_validator(Validator::NoEmptyStrings),
            )
            .with_attribute(
                "policy_definition_id",
                Attribute::required_string()
                    .with_force_new()
                    .with_validator(Validator::NoEmptyStrings)
                    .with_diff_suppress(DiffSuppress::CaseInsensitive),
            )
            .with_attribute("display_name", Attribute::optional_string())
            .with_attribute("description", Attribute::optional_string())
            .with_attribute(
                "location",
                Attribute::optional_string()
                    .with_force_new()
                    .with_diff_suppress(DiffSuppress::Location),
            )
            .with_block(
                "identity",
                NestedBlock::list(
                    Block::new()
                        .with_attribute(
                            "type",
                            Attribute::optional_string()
                                .with_validator(Validator::one_of(IDENTITY_TYPES))
                                .with_default(json!("SystemAssigned")),
                        )
                        .with_attribute("principal_id", Attribute::computed_string())
                        .with_attribute("tenant_id", Attribute::computed_string()),
                )
                .with_max_items(1)
                .computed(),
            )
            .with_attribute("parameters", json_string())
            .with_attribute("metadata", json_string().computed())
            .with_attribute("not_scopes", Attribute::optional_string_list())
            .with_attribute(
                "enforcement_mode",
                Attribute::optional_bool().with_default(json!(true)),
            )
    }

    async fn create(&self, clients: &Clients, d: &mut ResourceData) -> Result<()> {
        self.create_or_update(clients, d).await
    }

    async fn read(&self, clients: &Clients, d: &mut ResourceData) -> Result<()> {
        let id = PolicyAssignmentId::parse(d.id())?;
        let assignment: PolicyAssignment = match get_as(clients.arm(), &id.id(), POLICY).await {
            Ok(assignment) => assignment,
            Err(e) if e.is_not_found() => {
                info!(id = %id.id(), "policy assignment does not exist; removing from state");
                d.clear_id();
                return Ok(());
            },
            Err(e) => return Err(e),
        };

        d.set("name", id.name.as_str());
        d.set("scope", id.scope.as_str());
        d.set("location", assignment.location.as_deref().map(location::normalize));
        d.set_block(
            "identity",
            assignment.identity.as_ref().map(|i| {
                json!({
                    "type": i.kind,
                    "principal_id": i.principal_id.clone().unwrap_or_default(),
                    "tenant_id": i.tenant_id.clone().unwrap_or_default(),
                })
            }),
        );

        let props = &assignment.properties;
        d.set("policy_definition_id", props.policy_definition_id.clone());
        d.set("display_name", props.display_name.clone());
        d.set("description", props.description.clone());
        d.set("not_scopes", props.not_scopes.clone());
        d.set(
            "enforcement_mode",
            props.enforcement_mode.as_deref() != Some(DO_NOT_ENFORCE),
        );
        flatten_json(d, "parameters", props.parameters.as_ref())?;
        flatten_json(d, "metadata", props.metadata.as_ref())?;
        Ok(())
    }

    async fn update(&self, clients: &Clients, d: &mut ResourceData) -> Result<()> {
        self.create_or_update(clients, d).await
    }

    async fn delete(&self, clients: &Clients, d: &mut ResourceData) -> Result<()> {
        let id = PolicyAssignmentId::parse(d.id())?;
        ignore_not_found(clients.arm().delete(&id.id(), POLICY).await)
    }

    fn validate_import_id(&self, id: &str) -> Result<()> {
        PolicyAssignmentId::parse(id).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeResourceManager;
    use std::sync::Arc;

    const SCOPE: &str = "/subscriptions/sub/resourceGroups/rg";
    const ID: &str = "/subscriptions/sub/resourceGroups/rg/providers/Microsoft.Authorization/policyAssignments/audit-vms";
    const DEFINITION: &str =
        "/providers/Microsoft.Authorization/policyDefinitions/06a78e20-9358-41c9-923c-fb736d382a4d";

    fn config() -> Value {
        json!({
            "name": "audit-vms",
            "scope": SCOPE,
            "policy_definition_id": DEFINITION,
            "not_scopes": ["/subscriptions/sub/resourceGroups/rg/providers/Microsoft.Compute/virtualMachines/vm1"],
            "parameters": r#"{"effect": {"value": "Audit"}}"#,
            "enforcement_mode": false
        })
    }

    #[tokio::test]
    async fn test_create_and_read() {
        let fake = Arc::new(FakeResourceManager::new());
        let clients = Clients::new(fake.clone(), "sub");
        let mut d = ResourceData::for_create(config());
        PolicyAssignmentResource.create(&clients, &mut d).await.unwrap();

        assert_eq!(d.id(), ID);
        let stored = fake.stored(ID).unwrap();
        assert_eq!(stored["properties"]["scope"], SCOPE);
        assert_eq!(stored["properties"]["enforcementMode"], "DoNotEnforce");
        assert_eq!(stored["properties"]["parameters"]["effect"]["value"], "Audit");
        assert!(stored.get("identity").is_none());

        assert_eq!(d.get_bool("enforcement_mode"), Some(false));
        assert_eq!(d.get_string_list("not_scopes").len(), 1);
        assert_eq!(d.get_str("scope"), Some(SCOPE));
        assert_eq!(d.get_blocks("identity").len(), 0);
    }

    #[tokio::test]
    async fn test_identity_requires_location() {
        let fake = Arc::new(FakeResourceManager::new());
        let clients = Clients::new(fake.clone(), "sub");
        let mut config = config();
        config["identity"] = json!([{"type": "SystemAssigned"}]);
        let mut d = ResourceData::for_create(config.clone());
        let err = PolicyAssignmentResource.create(&clients, &mut d).await.unwrap_err();
        assert!(err.message().contains("`location`"));
        assert!(fake.calls_to("PUT").is_empty());

        config["location"] = json!("West Europe");
        let mut d = ResourceData::for_create(config);
        PolicyAssignmentResource.create(&clients, &mut d).await.unwrap();
        let stored = fake.stored(ID).unwrap();
        assert_eq!(stored["identity"]["type"], "SystemAssigned");
        assert_eq!(stored["location"], "westeurope");
    }

    #[tokio::test]
    async fn test_enforcement_defaults_to_enabled_on_read() {
        let fake = Arc::new(FakeResourceManager::new());
        fake.seed(ID, json!({"id": ID, "properties": {"policyDefinitionId": DEFINITION}}));
        let clients = Clients::new(fake, "sub");
        let mut d = ResourceData::from_state(json!({"id": ID}));
        PolicyAssignmentResource.read(&clients, &mut d).await.unwrap();
        assert_eq!(d.get_bool("enforcement_mode"), Some(true));
        assert_eq!(d.get_str("policy_definition_id"), Some(DEFINITION));
        assert_eq!(d.get_str("name"), Some("audit-vms"));
    }

    #[test]
    fn test_import_requires_scope() {
        assert!(PolicyAssignmentResource.validate_import_id(ID).is_ok());
        assert!(PolicyAssignmentResource
            .validate_import_id("/providers/Microsoft.Authorization/policyAssignments/a")
            .is_err());
    }
}
