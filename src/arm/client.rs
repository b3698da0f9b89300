//! Resource Manager REST client.
//!
//! Every resource talks to Azure through the [`ResourceManager`] trait: plain
//! JSON in, JSON out, addressed by ARM ID. [`ArmClient`] is the HTTP
//! implementation; writes block until the long-running operation behind them
//! has finished.
//!
//! # Long-running operations
//!
//! Completion is tracked, in order of preference, through:
//!
//! 1. the `Azure-AsyncOperation` header: poll until `status` is terminal;
//! 2. the `Location` header on a `202`: poll until the response is not `202`;
//! 3. `properties.provisioningState` of the resource itself (PUT/PATCH only).
//!
//! Successful PUT and PATCH calls return a fresh GET of the resource.

use crate::arm::auth::TokenCredential;
use crate::error::{ProviderError, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

const AZURE_ASYNC_OPERATION: &str = "azure-asyncoperation";
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// JSON access to Azure Resource Manager, addressed by resource ID.
///
/// `id` may carry an action suffix (`{vmId}/powerOff`) and extra query
/// parameters (`{vmId}/powerOff?skipShutdown=false`); `api-version` is appended.
#[async_trait]
pub trait ResourceManager: Send + Sync {
    /// GET a resource. A missing resource is [`ProviderError::NotFound`].
    async fn get(&self, id: &str, api_version: &str) -> Result<Value>;

    /// PUT (create or replace) a resource and wait for it to be provisioned.
    async fn put(&self, id: &str, api_version: &str, body: Value) -> Result<Value>;

    /// PATCH a resource and wait for it to be provisioned.
    async fn patch(&self, id: &str, api_version: &str, body: Value) -> Result<Value>;

    /// DELETE a resource and wait for it to be gone.
    async fn delete(&self, id: &str, api_version: &str) -> Result<()>;

    /// POST an action and wait for it to finish.
    async fn post(&self, id: &str, api_version: &str, body: Option<Value>) -> Result<Value>;
}

/// GET and deserialize into `T`.
pub async fn get_as<T: DeserializeOwned>(
    rm: &dyn ResourceManager,
    id: &str,
    api_version: &str,
) -> Result<T> {
    Ok(serde_json::from_value(rm.get(id, api_version).await?)?)
}

/// PUT `body` and deserialize the provisioned resource into `T`.
pub async fn put_as<B: Serialize + Sync, T: DeserializeOwned>(
    rm: &dyn ResourceManager,
    id: &str,
    api_version: &str,
    body: &B,
) -> Result<T> {
    let body = serde_json::to_value(body)?;
    Ok(serde_json::from_value(rm.put(id, api_version, body).await?)?)
}

/// PATCH `body` and deserialize the updated resource into `T`.
pub async fn patch_as<B: Serialize + Sync, T: DeserializeOwned>(
    rm: &dyn ResourceManager,
    id: &str,
    api_version: &str,
    body: &B,
) -> Result<T> {
    let body = serde_json::to_value(body)?;
    Ok(serde_json::from_value(rm.patch(id, api_version, body).await?)?)
}

/// Whether a resource exists. Errors other than "not found" propagate.
pub async fn exists(rm: &dyn ResourceManager, id: &str, api_version: &str) -> Result<bool> {
    match rm.get(id, api_version).await {
        Ok(_) => Ok(true),
        Err(e) if e.is_not_found() => Ok(false),
        Err(e) => Err(e),
    }
}

/// ARM error envelope: `{"error": {"code": "...", "message": "..."}}`.
#[derive(Debug, Default, Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    error: ErrorBody,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

/// Body of an `Azure-AsyncOperation` status URL.
#[derive(Debug, Deserialize)]
struct OperationStatus {
    #[serde(default)]
    status: String,
    #[serde(default)]
    error: Option<ErrorBody>,
}

/// reqwest-backed [`ResourceManager`].
#[derive(Clone)]
pub struct ArmClient {
    http: reqwest::Client,
    endpoint: String,
    credential: Arc<dyn TokenCredential>,
    poll_interval: Duration,
}

impl std::fmt::Debug for ArmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArmClient")
            .field("endpoint", &self.endpoint)
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

impl ArmClient {
    /// Create a client for `endpoint` (e.g. `https://management.azure.com`).
    pub fn new(
        http: reqwest::Client,
        endpoint: impl Into<String>,
        credential: Arc<dyn TokenCredential>,
    ) -> Self {
        Self {
            http,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            credential,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Poll interval used when the service sends no `Retry-After`.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn url(&self, id: &str, api_version: &str) -> String {
        let sep = if id.contains('?') { '&' } else { '?' };
        format!("{}{}{}api-version={}", self.endpoint, id, sep, api_version)
    }

    async fn send(&self, method: Method, url: &str, body: Option<&Value>) -> Result<reqwest::Response> {
        let token = self.credential.token().await?;
        debug!(%method, %url, "sending ARM request");
        let mut req = self.http.request(method, url).bearer_auth(token);
        if let Some(body) = body {
            req = req.json(body);
        }
        Ok(req.send().await?)
    }

    async fn execute(
        &self,
        method: Method,
        id: &str,
        api_version: &str,
        body: Option<&Value>,
    ) -> Result<Value> {
        let resp = self
            .send(method.clone(), &self.url(id, api_version), body)
            .await?;
        let (status, headers, body) = into_parts(resp).await?;
        let body = check_status(status, body)?;

        let is_write = method == Method::PUT || method == Method::PATCH;
        let delay = retry_after(&headers).unwrap_or(self.poll_interval);

        if let Some(operation) = header(&headers, AZURE_ASYNC_OPERATION) {
            self.poll_async_operation(&operation, status, delay).await?;
        } else if let Some(location) =
            header(&headers, "location").filter(|_| status == StatusCode::ACCEPTED)
        {
            let result = self.poll_location(&location, delay).await?;
            if !is_write {
                return Ok(result);
            }
        } else if is_write {
            return match provisioning_state(&body) {
                Some(state) if !is_terminal(&state) => {
                    self.poll_provisioning_state(id, api_version, delay).await
                },
                Some(state) if state.eq_ignore_ascii_case("Failed") || state.eq_ignore_ascii_case("Canceled") => {
                    Err(provisioning_failed(id, &state))
                },
                _ => Ok(body),
            };
        } else {
            return Ok(body);
        }

        if is_write {
            self.get(id, api_version).await
        } else {
            Ok(body)
        }
    }

    /// Wait for an `Azure-AsyncOperation`. A failed operation is reported
    /// with `accepted_status`, the status of the request that started it.
    #[instrument(skip(self), name = "arm.poll_async_operation")]
    async fn poll_async_operation(
        &self,
        url: &str,
        accepted_status: StatusCode,
        mut delay: Duration,
    ) -> Result<()> {
        loop {
            tokio::time::sleep(delay).await;
            let resp = self.send(Method::GET, url, None).await?;
            let (status, headers, body) = into_parts(resp).await?;
            let body = check_status(status, body)?;
            let op: OperationStatus = serde_json::from_value(body)?;
            debug!(status = %op.status, "async operation status");
            match op.status.as_str() {
                s if s.eq_ignore_ascii_case("Succeeded") => return Ok(()),
                s if s.eq_ignore_ascii_case("Failed") || s.eq_ignore_ascii_case("Canceled") => {
                    let err = op.error.unwrap_or_default();
                    return Err(ProviderError::Api {
                        status: accepted_status.as_u16(),
                        code: if err.code.is_empty() { op.status.clone() } else { err.code },
                        message: if err.message.is_empty() {
                            format!("long running operation finished with status {:?}", op.status)
                        } else {
                            err.message
                        },
                    });
                },
                _ => {},
            }
            delay = retry_after(&headers).unwrap_or(self.poll_interval);
        }
    }

    #[instrument(skip(self), name = "arm.poll_location")]
    async fn poll_location(&self, url: &str, mut delay: Duration) -> Result<Value> {
        loop {
            tokio::time::sleep(delay).await;
            let resp = self.send(Method::GET, url, None).await?;
            let (status, headers, body) = into_parts(resp).await?;
            let body = check_status(status, body)?;
            if status != StatusCode::ACCEPTED {
                return Ok(body);
            }
            delay = retry_after(&headers).unwrap_or(self.poll_interval);
        }
    }

    async fn poll_provisioning_state(
        &self,
        id: &str,
        api_version: &str,
        delay: Duration,
    ) -> Result<Value> {
        loop {
            tokio::time::sleep(delay).await;
            let body = self.get(id, api_version).await?;
            match provisioning_state(&body) {
                Some(state) if state.eq_ignore_ascii_case("Succeeded") => return Ok(body),
                Some(state) if is_terminal(&state) => return Err(provisioning_failed(id, &state)),
                Some(state) => debug!(%id, %state, "waiting for provisioning"),
                None => return Ok(body),
            }
        }
    }
}

#[async_trait]
impl ResourceManager for ArmClient {
    async fn get(&self, id: &str, api_version: &str) -> Result<Value> {
        let resp = self
            .send(Method::GET, &self.url(id, api_version), None)
            .await?;
        let (status, _headers, body) = into_parts(resp).await?;
        check_status(status, body)
    }

    async fn put(&self, id: &str, api_version: &str, body: Value) -> Result<Value> {
        self.execute(Method::PUT, id, api_version, Some(&body)).await
    }

    async fn patch(&self, id: &str, api_version: &str, body: Value) -> Result<Value> {
        self.execute(Method::PATCH, id, api_version, Some(&body)).await
    }

    async fn delete(&self, id: &str, api_version: &str) -> Result<()> {
        self.execute(Method::DELETE, id, api_version, None)
            .await
            .map(|_| ())
    }

    async fn post(&self, id: &str, api_version: &str, body: Option<Value>) -> Result<Value> {
        self.execute(Method::POST, id, api_version, body.as_ref())
            .await
    }
}

async fn into_parts(resp: reqwest::Response) -> Result<(StatusCode, HeaderMap, Value)> {
    let status = resp.status();
    let headers = resp.headers().clone();
    let bytes = resp.bytes().await?;
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        match serde_json::from_slice(&bytes) {
            Ok(v) => v,
            Err(_) => Value::String(String::from_utf8_lossy(&bytes).into_owned()),
        }
    };
    Ok((status, headers, body))
}

fn check_status(status: StatusCode, body: Value) -> Result<Value> {
    if status.is_success() {
        return Ok(body);
    }
    let envelope: ErrorEnvelope = serde_json::from_value(body.clone()).unwrap_or_default();
    let message = if envelope.error.message.is_empty() {
        match &body {
            Value::String(s) => s.clone(),
            Value::Null => status.canonical_reason().unwrap_or("request failed").to_string(),
            other => other.to_string(),
        }
    } else {
        envelope.error.message
    };
    warn!(status = status.as_u16(), code = %envelope.error.code, "ARM request failed");
    Err(ProviderError::from_status(
        status.as_u16(),
        envelope.error.code,
        message,
    ))
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn provisioning_state(body: &Value) -> Option<String> {
    body.pointer("/properties/provisioningState")
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn is_terminal(state: &str) -> bool {
    ["Succeeded", "Failed", "Canceled"]
        .iter()
        .any(|s| s.eq_ignore_ascii_case(state))
}

fn provisioning_failed(id: &str, state: &str) -> ProviderError {
    ProviderError::FailedPrecondition(format!(
        "provisioning of {:?} finished in state {:?}",
        id, state
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arm::auth::StaticTokenCredential;
    use serde_json::json;
    use wiremock::matchers::{header as header_eq, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const DISK: &str =
        "/subscriptions/sub1/resourceGroups/rg1/providers/Microsoft.Compute/disks/disk1";

    fn client(server: &MockServer) -> ArmClient {
        ArmClient::new(
            reqwest::Client::new(),
            server.uri(),
            Arc::new(StaticTokenCredential("test-token".to_string())),
        )
        .with_poll_interval(Duration::from_millis(5))
    }

    #[test]
    fn test_url_building() {
        let c = ArmClient::new(
            reqwest::Client::new(),
            "https://management.azure.com/",
            Arc::new(StaticTokenCredential(String::new())),
        );
        assert_eq!(
            c.url("/subscriptions/s/vm1/powerOff", "2019-07-01"),
            "https://management.azure.com/subscriptions/s/vm1/powerOff?api-version=2019-07-01"
        );
        assert_eq!(
            c.url("/subscriptions/s/vm1/powerOff?skipShutdown=false", "2019-07-01"),
            "https://management.azure.com/subscriptions/s/vm1/powerOff?skipShutdown=false&api-version=2019-07-01"
        );
    }

    #[tokio::test]
    async fn test_get_sends_bearer_and_api_version() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(DISK))
            .and(query_param("api-version", "2019-07-01"))
            .and(header_eq("authorization", "Bearer test-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "disk1"})))
            .mount(&server)
            .await;

        let body = client(&server).get(DISK, "2019-07-01").await.unwrap();
        assert_eq!(body["name"], "disk1");
    }

    #[tokio::test]
    async fn test_error_envelope_is_mapped() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(DISK))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "error": {"code": "ResourceNotFound", "message": "disk1 was not found"}
            })))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path(DISK))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": {"code": "InvalidParameter", "message": "bad size"}
            })))
            .mount(&server)
            .await;

        let c = client(&server);
        let err = c.get(DISK, "2019-07-01").await.unwrap_err();
        assert!(err.is_not_found());
        assert!(!exists(&c, DISK, "2019-07-01").await.unwrap());

        let err = c.put(DISK, "2019-07-01", json!({})).await.unwrap_err();
        match err {
            ProviderError::Api { status, code, message } => {
                assert_eq!(status, 400);
                assert_eq!(code, "InvalidParameter");
                assert_eq!(message, "bad size");
            },
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_put_polls_async_operation_then_reads() {
        let server = MockServer::start().await;
        let op_url = format!("{}/operations/op1", server.uri());

        Mock::given(method("PUT"))
            .and(path(DISK))
            .respond_with(
                ResponseTemplate::new(201)
                    .insert_header("Azure-AsyncOperation", op_url.as_str())
                    .insert_header("Retry-After", "0")
                    .set_body_json(json!({"properties": {"provisioningState": "Updating"}})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/operations/op1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "InProgress"})))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/operations/op1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "Succeeded"})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(DISK))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "disk1",
                "properties": {"provisioningState": "Succeeded", "diskSizeGB": 10}
            })))
            .mount(&server)
            .await;

        let body = client(&server)
            .put(DISK, "2019-07-01", json!({"location": "westeurope"}))
            .await
            .unwrap();
        assert_eq!(body["properties"]["diskSizeGB"], 10);
    }

    #[tokio::test]
    async fn test_async_operation_failure() {
        let server = MockServer::start().await;
        let op_url = format!("{}/operations/op2", server.uri());

        Mock::given(method("PUT"))
            .and(path(DISK))
            .respond_with(
                ResponseTemplate::new(201)
                    .insert_header("Azure-AsyncOperation", op_url.as_str())
                    .insert_header("Retry-After", "0"),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/operations/op2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "Failed",
                "error": {"code": "QuotaExceeded", "message": "out of cores"}
            })))
            .mount(&server)
            .await;

        let err = client(&server)
            .put(DISK, "2019-07-01", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProviderError::Api { status: 201, ref code, .. } if code == "QuotaExceeded"
        ));
    }

    #[tokio::test]
    async fn test_delete_polls_location() {
        let server = MockServer::start().await;
        let location = format!("{}/locations/op3", server.uri());

        Mock::given(method("DELETE"))
            .and(path(DISK))
            .respond_with(
                ResponseTemplate::new(202)
                    .insert_header("Location", location.as_str())
                    .insert_header("Retry-After", "0"),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/locations/op3"))
            .respond_with(ResponseTemplate::new(202).insert_header("Retry-After", "0"))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/locations/op3"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        client(&server).delete(DISK, "2019-07-01").await.unwrap();
    }

    #[tokio::test]
    async fn test_put_polls_provisioning_state() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path(DISK))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "properties": {"provisioningState": "Creating"}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(DISK))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "properties": {"provisioningState": "Creating"}
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(DISK))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "properties": {"provisioningState": "Succeeded"}
            })))
            .mount(&server)
            .await;

        let body = client(&server).put(DISK, "2019-07-01", json!({})).await.unwrap();
        assert_eq!(body["properties"]["provisioningState"], "Succeeded");
    }

    #[tokio::test]
    async fn test_post_action_without_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("{}/start", DISK)))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let body = client(&server)
            .post(&format!("{}/start", DISK), "2019-07-01", None)
            .await
            .unwrap();
        assert!(body.is_null());
    }

    #[tokio::test]
    async fn test_typed_helpers() {
        #[derive(Debug, Deserialize)]
        struct Disk {
            name: String,
        }

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(DISK))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "disk1"})))
            .mount(&server)
            .await;

        let disk: Disk = get_as(&client(&server), DISK, "2019-07-01").await.unwrap();
        assert_eq!(disk.name, "disk1");
    }
}
