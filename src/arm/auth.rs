//! Azure AD tokens for Resource Manager requests.

use crate::error::{ProviderError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

/// Tokens are refreshed this long before they expire.
const EXPIRY_MARGIN: Duration = Duration::from_secs(5 * 60);

/// Source of bearer tokens.
#[async_trait]
pub trait TokenCredential: Send + Sync {
    /// Return a valid access token.
    async fn token(&self) -> Result<String>;
}

/// A fixed token. Handy for tests and for tokens minted outside the provider.
#[derive(Debug, Clone)]
pub struct StaticTokenCredential(pub String);

#[async_trait]
impl TokenCredential for StaticTokenCredential {
    async fn token(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    // v1 endpoints return this as a string
    #[serde(default)]
    expires_in: serde_json::Value,
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    refresh_at: Instant,
}

/// Service principal with a client secret (OAuth2 client-credentials grant).
pub struct ClientSecretCredential {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    scope: String,
    cached: RwLock<Option<CachedToken>>,
}

impl ClientSecretCredential {
    /// Create a credential for `tenant_id` that requests tokens for `resource_manager`.
    pub fn new(
        http: reqwest::Client,
        authority_host: &str,
        tenant_id: &str,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        resource_manager: &str,
    ) -> Self {
        Self {
            http,
            token_url: format!(
                "{}/{}/oauth2/v2.0/token",
                authority_host.trim_end_matches('/'),
                tenant_id
            ),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            scope: format!("{}/.default", resource_manager.trim_end_matches('/')),
            cached: RwLock::new(None),
        }
    }

    async fn request_token(&self) -> Result<CachedToken> {
        debug!(url = %self.token_url, "requesting access token");
        let resp = self
            .http
            .post(&self.token_url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("scope", self.scope.as_str()),
            ])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::PermissionDenied(format!(
                "obtaining an access token failed with status {}: {}",
                status, body
            )));
        }

        let token: TokenResponse = resp.json().await?;
        let expires_in = match &token.expires_in {
            serde_json::Value::Number(n) => n.as_u64().unwrap_or(3600),
            serde_json::Value::String(s) => s.parse().unwrap_or(3600),
            _ => 3600,
        };
        let lifetime = Duration::from_secs(expires_in).saturating_sub(EXPIRY_MARGIN);
        Ok(CachedToken {
            access_token: token.access_token,
            refresh_at: Instant::now() + lifetime,
        })
    }
}

#[async_trait]
impl TokenCredential for ClientSecretCredential {
    async fn token(&self) -> Result<String> {
        {
            let cached = self.cached.read().await;
            if let Some(token) = cached.as_ref() {
                if Instant::now() < token.refresh_at {
                    return Ok(token.access_token.clone());
                }
            }
        }

        let mut cached = self.cached.write().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(token.access_token.clone());
            }
        }
        let fresh = self.request_token().await?;
        let access_token = fresh.access_token.clone();
        *cached = Some(fresh);
        Ok(access_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_static_token() {
        let cred = StaticTokenCredential("abc".to_string());
        assert_eq!(cred.token().await.unwrap(), "abc");
    }

    #[tokio::test]
    async fn test_client_secret_token_is_cached() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tenant1/oauth2/v2.0/token"))
            .and(body_string_contains("grant_type=client_credentials"))
            .and(body_string_contains("scope=https%3A%2F%2Fmanagement.azure.com%2F.default"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "token_type": "Bearer",
                "expires_in": 3599,
                "access_token": "token-1"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let cred = ClientSecretCredential::new(
            reqwest::Client::new(),
            &server.uri(),
            "tenant1",
            "client",
            "secret",
            "https://management.azure.com",
        );
        assert_eq!(cred.token().await.unwrap(), "token-1");
        assert_eq!(cred.token().await.unwrap(), "token-1");
    }

    #[tokio::test]
    async fn test_client_secret_token_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid_client"))
            .mount(&server)
            .await;

        let cred = ClientSecretCredential::new(
            reqwest::Client::new(),
            &server.uri(),
            "tenant1",
            "client",
            "wrong",
            "https://management.azure.com",
        );
        let err = cred.token().await.unwrap_err();
        assert!(matches!(err, ProviderError::PermissionDenied(_)));
    }
}
