//! Azure Policy: definitions, set definitions, assignments and remediations.
//!
//! Policy documents (rules, parameters, metadata) are exchanged with the host
//! as JSON-encoded strings and sent to the API as JSON values.

/// `azurerm_policy_assignment`
pub mod assignment;
/// `azurerm_policy_definition`
pub mod definition;
/// `azurerm_policy_remediation`
pub mod remediation;
/// `azurerm_policy_set_definition`
pub mod set_definition;

use crate::arm::id::PolicyScope;
use crate::error::{ProviderError, Result};
use crate::resource::ResourceData;
use crate::schema::{Attribute, DiffSuppress};
use crate::validation::Validator;
use serde_json::Value;

const POLICY_TYPES: &[&str] = &["BuiltIn", "Custom", "NotSpecified", "Static"];

fn validate_json(input: &str) -> std::result::Result<(), String> {
    serde_json::from_str::<Value>(input)
        .map(|_| ())
        .map_err(|e| format!("invalid JSON: {}", e))
}

/// Optional string attribute holding a JSON document.
fn json_string() -> Attribute {
    Attribute::optional_string()
        .with_validator(Validator::Custom(validate_json))
        .with_diff_suppress(DiffSuppress::JsonEquivalent)
}

/// Parse the JSON string at `key`; unset is `None`.
fn expand_json(d: &ResourceData, key: &str) -> Result<Option<Value>> {
    match d.get_str(key) {
        Some(raw) => serde_json::from_str(raw).map(Some).map_err(|e| {
            ProviderError::Validation(format!("`{}` is not valid JSON: {}", key, e))
        }),
        None => Ok(None),
    }
}

/// Store `value` at `key` as a JSON string, or an empty string when absent.
fn flatten_json(d: &mut ResourceData, key: &str, value: Option<&Value>) -> Result<()> {
    let encoded = match value {
        Some(v) if !v.is_null() => serde_json::to_string(v)?,
        _ => String::new(),
    };
    d.set(key, encoded);
    Ok(())
}

/// Definitions live under the configured management group, or the provider's
/// subscription when none is set.
fn definition_scope(d: &ResourceData, subscription_id: &str) -> PolicyScope {
    match d.get_str("management_group_name") {
        Some(mg) => PolicyScope::ManagementGroup(mg.to_string()),
        None => PolicyScope::Subscription(subscription_id.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_helpers() {
        let d = ResourceData::for_create(json!({"rule": "{\"if\": {}}", "bad": "{"}));
        assert_eq!(expand_json(&d, "rule").unwrap(), Some(json!({"if": {}})));
        assert_eq!(expand_json(&d, "missing").unwrap(), None);
        assert!(matches!(expand_json(&d, "bad"), Err(ProviderError::Validation(_))));

        let mut d = ResourceData::for_create(json!({}));
        flatten_json(&mut d, "rule", Some(&json!({"a": 1}))).unwrap();
        flatten_json(&mut d, "empty", None).unwrap();
        assert_eq!(d.get("rule"), Some(&json!("{\"a\":1}")));
        assert_eq!(d.get("empty"), Some(&json!("")));
    }

    #[test]
    fn test_definition_scope() {
        let d = ResourceData::for_create(json!({"management_group_name": "mg1"}));
        assert_eq!(definition_scope(&d, "sub"), PolicyScope::ManagementGroup("mg1".into()));
        let d = ResourceData::for_create(json!({}));
        assert_eq!(definition_scope(&d, "sub"), PolicyScope::Subscription("sub".into()));
    }
}
