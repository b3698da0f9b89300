//! Provider block configuration.
//!
//! Every credential can come from the provider block or, when omitted, from
//! the usual `ARM_*` environment variables.

use crate::error::{ProviderError, Result};
use crate::schema::{Attribute, Schema};
use crate::validation::Validator;
use serde::Deserialize;

/// Environment variable fallbacks for the provider block.
pub mod env {
    /// Subscription ID.
    pub const SUBSCRIPTION_ID: &str = "ARM_SUBSCRIPTION_ID";
    /// AAD tenant ID.
    pub const TENANT_ID: &str = "ARM_TENANT_ID";
    /// Service principal application ID.
    pub const CLIENT_ID: &str = "ARM_CLIENT_ID";
    /// Service principal secret.
    pub const CLIENT_SECRET: &str = "ARM_CLIENT_SECRET";
    /// Cloud name (`public`, `china`, `usgovernment`, `german`).
    pub const ENVIRONMENT: &str = "ARM_ENVIRONMENT";
    /// Refuse to create resources that already exist.
    pub const STRICT: &str = "ARM_PROVIDER_STRICT";
}

/// Azure cloud the provider talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CloudEnvironment {
    /// Azure public cloud.
    #[default]
    Public,
    /// Azure China (21Vianet).
    China,
    /// Azure US Government.
    UsGovernment,
    /// Azure Germany.
    German,
}

impl CloudEnvironment {
    /// Parse a cloud name as accepted by `environment`.
    pub fn from_name(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "" | "public" => Ok(Self::Public),
            "china" => Ok(Self::China),
            "usgovernment" => Ok(Self::UsGovernment),
            "german" => Ok(Self::German),
            other => Err(ProviderError::Configuration(format!(
                "unknown Azure environment {:?}; expected one of public, china, usgovernment, german",
                other
            ))),
        }
    }

    /// Resource Manager endpoint, without a trailing slash.
    pub fn resource_manager_endpoint(&self) -> &'static str {
        match self {
            Self::Public => "https://management.azure.com",
            Self::China => "https://management.chinacloudapi.cn",
            Self::UsGovernment => "https://management.usgovcloudapi.net",
            Self::German => "https://management.microsoftazure.de",
        }
    }

    /// Azure AD authority host, without a trailing slash.
    pub fn authority_host(&self) -> &'static str {
        match self {
            Self::Public => "https://login.microsoftonline.com",
            Self::China => "https://login.chinacloudapi.cn",
            Self::UsGovernment => "https://login.microsoftonline.us",
            Self::German => "https://login.microsoftonline.de",
        }
    }
}

/// The provider block as written by the user.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Subscription ID.
    pub subscription_id: Option<String>,
    /// AAD tenant ID.
    pub tenant_id: Option<String>,
    /// Service principal application ID.
    pub client_id: Option<String>,
    /// Service principal secret.
    pub client_secret: Option<String>,
    /// Cloud name.
    pub environment: Option<String>,
    /// Refuse to create resources that already exist.
    pub strict: Option<bool>,
    /// Override of the Resource Manager endpoint (sovereign stacks, tests).
    pub resource_manager_endpoint: Option<String>,
    /// Override of the AAD authority host.
    pub authority_host: Option<String>,
}

/// Configuration after environment fallbacks, ready to build clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    /// Subscription ID.
    pub subscription_id: String,
    /// AAD tenant ID.
    pub tenant_id: String,
    /// Service principal application ID.
    pub client_id: String,
    /// Service principal secret.
    pub client_secret: String,
    /// Resource Manager endpoint.
    pub resource_manager_endpoint: String,
    /// AAD authority host.
    pub authority_host: String,
    /// Refuse to create resources that already exist.
    pub strict: bool,
}

impl ProviderConfig {
    /// Deserialize the provider block; `null` means "all from the environment".
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        if value.is_null() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_value(value)?)
    }

    /// Apply `ARM_*` fallbacks from the process environment.
    pub fn resolve(&self) -> Result<ResolvedConfig> {
        self.resolve_with(|key| std::env::var(key).ok())
    }

    /// Apply fallbacks from `lookup` (used by tests instead of the process environment).
    pub fn resolve_with<F>(&self, lookup: F) -> Result<ResolvedConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        let pick = |value: &Option<String>, var: &str| -> Option<String> {
            value
                .clone()
                .filter(|v| !v.is_empty())
                .or_else(|| lookup(var).filter(|v| !v.is_empty()))
        };

        let mut missing = Vec::new();
        let mut required = |value: &Option<String>, name: &str, var: &str| -> String {
            pick(value, var).unwrap_or_else(|| {
                missing.push(format!("{} ({})", name, var));
                String::new()
            })
        };

        let subscription_id = required(&self.subscription_id, "subscription_id", env::SUBSCRIPTION_ID);
        let tenant_id = required(&self.tenant_id, "tenant_id", env::TENANT_ID);
        let client_id = required(&self.client_id, "client_id", env::CLIENT_ID);
        let client_secret = required(&self.client_secret, "client_secret", env::CLIENT_SECRET);

        if !missing.is_empty() {
            return Err(ProviderError::Configuration(format!(
                "missing required provider settings: {}",
                missing.join(", ")
            )));
        }

        let environment = CloudEnvironment::from_name(
            &pick(&self.environment, env::ENVIRONMENT).unwrap_or_default(),
        )?;

        let strict = match self.strict {
            Some(strict) => strict,
            None => match lookup(env::STRICT) {
                Some(v) => parse_bool(&v)?,
                None => false,
            },
        };

        Ok(ResolvedConfig {
            subscription_id,
            tenant_id,
            client_id,
            client_secret,
            resource_manager_endpoint: self
                .resource_manager_endpoint
                .clone()
                .unwrap_or_else(|| environment.resource_manager_endpoint().to_string())
                .trim_end_matches('/')
                .to_string(),
            authority_host: self
                .authority_host
                .clone()
                .unwrap_or_else(|| environment.authority_host().to_string())
                .trim_end_matches('/')
                .to_string(),
            strict,
        })
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "t" => Ok(true),
        "0" | "false" | "f" | "" => Ok(false),
        other => Err(ProviderError::Configuration(format!(
            "{} must be a boolean, got {:?}",
            env::STRICT,
            other
        ))),
    }
}

/// Schema of the provider block.
pub fn schema() -> Schema {
    Schema::v0()
        .with_attribute(
            "subscription_id",
            Attribute::optional_string().with_description("The Subscription ID which should be used."),
        )
        .with_attribute(
            "tenant_id",
            Attribute::optional_string().with_description("The Tenant ID which should be used."),
        )
        .with_attribute(
            "client_id",
            Attribute::optional_string().with_description("The Client ID which should be used."),
        )
        .with_attribute(
            "client_secret",
            Attribute::optional_string()
                .sensitive()
                .with_description("The Client Secret which should be used."),
        )
        .with_attribute(
            "environment",
            Attribute::optional_string()
                .with_validator(Validator::one_of_ignore_case(&[
                    "public",
                    "china",
                    "usgovernment",
                    "german",
                ]))
                .with_description("The Cloud Environment which should be used."),
        )
        .with_attribute(
            "strict",
            Attribute::optional_bool()
                .with_description("Fail when creating a resource that already exists in Azure."),
        )
        .with_attribute("resource_manager_endpoint", Attribute::optional_string())
        .with_attribute("authority_host", Attribute::optional_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_block_values_win_over_environment() {
        let config = ProviderConfig::from_value(json!({
            "subscription_id": "sub-block",
            "tenant_id": "tenant",
            "client_id": "client",
            "client_secret": "secret",
        }))
        .unwrap();
        let resolved = config
            .resolve_with(lookup(&[(env::SUBSCRIPTION_ID, "sub-env")]))
            .unwrap();
        assert_eq!(resolved.subscription_id, "sub-block");
        assert_eq!(resolved.resource_manager_endpoint, "https://management.azure.com");
        assert!(!resolved.strict);
    }

    #[test]
    fn test_environment_fallbacks() {
        let resolved = ProviderConfig::default()
            .resolve_with(lookup(&[
                (env::SUBSCRIPTION_ID, "sub"),
                (env::TENANT_ID, "tenant"),
                (env::CLIENT_ID, "client"),
                (env::CLIENT_SECRET, "secret"),
                (env::ENVIRONMENT, "china"),
                (env::STRICT, "true"),
            ]))
            .unwrap();
        assert_eq!(resolved.tenant_id, "tenant");
        assert_eq!(resolved.authority_host, "https://login.chinacloudapi.cn");
        assert!(resolved.strict);
    }

    #[test]
    fn test_missing_settings_are_listed() {
        let err = ProviderConfig::default()
            .resolve_with(lookup(&[(env::SUBSCRIPTION_ID, "sub")]))
            .unwrap_err();
        let msg = err.message();
        assert!(msg.contains("tenant_id"));
        assert!(msg.contains("client_secret"));
        assert!(!msg.contains("subscription_id"));
    }

    #[test]
    fn test_unknown_environment() {
        assert!(CloudEnvironment::from_name("mars").is_err());
        assert_eq!(
            CloudEnvironment::from_name("USGovernment").unwrap(),
            CloudEnvironment::UsGovernment
        );
    }

    #[test]
    fn test_endpoint_override_is_trimmed() {
        let config = ProviderConfig {
            subscription_id: Some("s".into()),
            tenant_id: Some("t".into()),
            client_id: Some("c".into()),
            client_secret: Some("x".into()),
            resource_manager_endpoint: Some("http://127.0.0.1:8080/".into()),
            ..Default::default()
        };
        let resolved = config.resolve_with(|_| None).unwrap();
        assert_eq!(resolved.resource_manager_endpoint, "http://127.0.0.1:8080");
    }
}
