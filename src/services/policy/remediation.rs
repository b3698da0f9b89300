//! Policy remediation tasks.

use crate::arm::api_version::POLICY_INSIGHTS;
use crate::arm::client::{get_as, put_as};
use crate::arm::id::{PolicyAssignmentId, RemediationId};
use crate::arm::location;
use crate::error::Result;
use crate::resource::{ignore_not_found, Clients, Resource, ResourceData};
use crate::schema::{Attribute, DiffSuppress, Schema};
use crate::validation::Validator;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

const DISCOVERY_MODES: &[&str] = &["ExistingNonCompliant", "ReEvaluateCompliance"];

/// Provisioning states of a remediation that is still deploying.
const RUNNING_STATES: &[&str] = &["Accepted", "Evaluating"];

#[derive(Debug, Default, Serialize, Deserialize)]
struct Remediation {
    #[serde(default, skip_serializing)]
    id: Option<String>,
    #[serde(default)]
    properties: RemediationProperties,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemediationProperties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    policy_assignment_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    policy_definition_reference_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    resource_discovery_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    filters: Option<RemediationFilters>,
    #[serde(default, skip_serializing)]
    provisioning_state: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RemediationFilters {
    #[serde(default)]
    locations: Vec<String>,
}

fn validate_assignment_id(input: &str) -> std::result::Result<(), String> {
    PolicyAssignmentId::parse(input)
        .map(|_| ())
        .map_err(|e| e.message().to_string())
}

/// `azurerm_policy_remediation`
pub struct PolicyRemediationResource;

impl PolicyRemediationResource {
    async fn create_or_update(&self, clients: &Clients, d: &mut ResourceData) -> Result<()> {
        let id = RemediationId::new(d.required_str("scope")?, d.required_str("name")?);

        if d.is_new_resource() {
            clients
                .check_not_exists(self.type_name(), &id.id(), POLICY_INSIGHTS)
                .await?;
        }

        let locations: Vec<String> = d
            .get_string_list("location_filters")
            .iter()
            .map(|l| location::normalize(l))
            .collect();
        let body = Remediation {
            properties: RemediationProperties {
                policy_assignment_id: d.get_string("policy_assignment_id"),
                policy_definition_reference_id: d.get_string("policy_definition_reference_id"),
                resource_discovery_mode: d.get_string("resource_discovery_mode"),
                filters: (!locations.is_empty()).then(|| RemediationFilters { locations }),
                ..Default::default()
            },
            ..Default::default()
        };

        info!(id = %id.id(), "creating or updating policy remediation");
        let _: Remediation = put_as(clients.arm(), &id.id(), POLICY_INSIGHTS, &body).await?;
        d.set_id(id.id());
        self.read(clients, d).await
    }
}

#[async_trait]
impl Resource for PolicyRemediationResource {
    fn type_name(&self) -> &'static str {
        "azurerm_policy_remediation"
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
                "scope",
                Attribute::required_string()
                    .with_force_new()
                    .with_validator(Validator::NoEmptyStrings)
                    .with_diff_suppress(DiffSuppress::CaseInsensitive),
            )
            .with_attribute(
                "policy_assignment_id",
                Attribute::required_string()
                    .with_validator(Validator::Custom(validate_assignment_id))
                    .with_diff_suppress(DiffSuppress::CaseInsensitive),
            )
            .with_attribute(
                "policy_definition_reference_id",
                Attribute::optional_string().with_diff_suppress(DiffSuppress::CaseInsensitive),
            )
            .with_attribute("location_filters", Attribute::optional_string_list())
            .with_attribute(
                "resource_discovery_mode",
                Attribute::optional_string()
                    .with_validator(Validator::one_of(DISCOVERY_MODES))
                    .with_default(json!("ExistingNonCompliant")),
            )
    }

    async fn create(&self, clients: &Clients, d: &mut ResourceData) -> Result<()> {
        self.create_or_update(clients, d).await
    }

    async fn read(&self, clients: &Clients, d: &mut ResourceData) -> Result<()> {
        let id = RemediationId::parse(d.id())?;
        let remediation: Remediation =
            match get_as(clients.arm(), &id.id(), POLICY_INSIGHTS).await {
                Ok(r) => r,
                Err(e) if e.is_not_found() => {
                    info!(id = %id.id(), "policy remediation does not exist; removing from state");
                    d.clear_id();
                    return Ok(());
                },
                Err(e) => return Err(e),
            };

        let props = &remediation.properties;
        d.set("name", id.name.as_str());
        d.set("scope", id.scope.as_str());
        d.set("policy_assignment_id", props.policy_assignment_id.clone());
        d.set(
            "policy_definition_reference_id",
            props.policy_definition_reference_id.clone(),
        );
        d.set(
            "location_filters",
            props
                .filters
                .as_ref()
                .map(|f| f.locations.clone())
                .unwrap_or_default(),
        );
        d.set("resource_discovery_mode", props.resource_discovery_mode.clone());
        Ok(())
    }

    async fn update(&self, clients: &Clients, d: &mut ResourceData) -> Result<()> {
        self.create_or_update(clients, d).await
    }

    async fn delete(&self, clients: &Clients, d: &mut ResourceData) -> Result<()> {
        let id = RemediationId::parse(d.id())?;
        let existing: Remediation = match get_as(clients.arm(), &id.id(), POLICY_INSIGHTS).await {
            Ok(r) => r,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        };

        let state = existing.properties.provisioning_state.as_deref().unwrap_or_default();
        if RUNNING_STATES.contains(&state) {
            info!(id = %id.id(), state, "cancelling running policy remediation");
            clients
                .arm()
                .post(&format!("{}/cancel", id.id()), POLICY_INSIGHTS, None)
                .await?;
        } else {
            debug!(id = %id.id(), state, "policy remediation is not running");
        }

        ignore_not_found(clients.arm().delete(&id.id(), POLICY_INSIGHTS).await)
    }

    fn validate_import_id(&self, id: &str) -> Result<()> {
        RemediationId::parse(id).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeResourceManager;
    use serde_json::Value;
    use std::sync::Arc;

    const SCOPE: &str = "/subscriptions/sub/resourceGroups/rg";
    const ID: &str =
        "/subscriptions/sub/resourceGroups/rg/providers/Microsoft.PolicyInsights/remediations/fix-tags";
    const ASSIGNMENT: &str =
        "/subscriptions/sub/resourceGroups/rg/providers/Microsoft.Authorization/policyAssignments/tags";

    fn config() -> Value {
        json!({
            "name": "fix-tags",
            "scope": SCOPE,
            "policy_assignment_id": ASSIGNMENT,
            "location_filters": ["West Europe"],
            "resource_discovery_mode": "ExistingNonCompliant"
        })
    }

    #[test]
    fn test_assignment_id_validation() {
        assert!(validate_assignment_id(ASSIGNMENT).is_ok());
        assert!(validate_assignment_id("/subscriptions/sub/resourceGroups/rg").is_err());
    }

    #[tokio::test]
    async fn test_create_and_read() {
        let fake = Arc::new(FakeResourceManager::new());
        let clients = Clients::new(fake.clone(), "sub");
        let mut d = ResourceData::for_create(config());
        PolicyRemediationResource.create(&clients, &mut d).await.unwrap();

        assert_eq!(d.id(), ID);
        let stored = fake.stored(ID).unwrap();
        assert_eq!(stored["properties"]["policyAssignmentId"], ASSIGNMENT);
        assert_eq!(stored["properties"]["filters"]["locations"], json!(["westeurope"]));
        assert_eq!(d.get_string_list("location_filters"), vec!["westeurope".to_string()]);
        assert_eq!(d.get_str("scope"), Some(SCOPE));
    }

    #[tokio::test]
    async fn test_delete_cancels_running_remediation() {
        let fake = Arc::new(FakeResourceManager::new());
        fake.seed(
            ID,
            json!({"id": ID, "properties": {"policyAssignmentId": ASSIGNMENT, "provisioningState": "Evaluating"}}),
        );
        let clients = Clients::new(fake.clone(), "sub");
        let mut d = ResourceData::from_state(json!({"id": ID}));
        PolicyRemediationResource.delete(&clients, &mut d).await.unwrap();

        assert_eq!(fake.calls_to("POST"), vec![format!("{}/cancel", ID)]);
        assert_eq!(fake.calls_to("DELETE"), vec![ID.to_string()]);
        assert!(fake.stored(ID).is_none());
    }

    #[tokio::test]
    async fn test_delete_finished_remediation_skips_cancel() {
        let fake = Arc::new(FakeResourceManager::new());
        fake.seed(
            ID,
            json!({"id": ID, "properties": {"provisioningState": "Succeeded"}}),
        );
        let clients = Clients::new(fake.clone(), "sub");
        let mut d = ResourceData::from_state(json!({"id": ID}));
        PolicyRemediationResource.delete(&clients, &mut d).await.unwrap();

        assert!(fake.calls_to("POST").is_empty());
        assert_eq!(fake.calls_to("DELETE").len(), 1);
    }

    #[tokio::test]
    async fn test_delete_missing_remediation() {
        let fake = Arc::new(FakeResourceManager::new());
        let clients = Clients::new(fake.clone(), "sub");
        let mut d = ResourceData::from_state(json!({"id": ID}));
        PolicyRemediationResource.delete(&clients, &mut d).await.unwrap();
        assert!(fake.calls_to("DELETE").is_empty());
    }
}
