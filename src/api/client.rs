//! REST client for the direct backend.
//!
//! Resources live under `/api/resources/{group}`. Version tokens travel in
//! the `ETag` response header and the `If-Match` request header.

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode, header};
use serde::Deserialize;
use serde_json::Value as Json;
use std::time::Duration;
use tracing::{debug, trace};

use crate::error::{ApiError, DeckhandError, Result};

use super::types::{RemoteObject, ResourceClient};

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Maximum number of attempts for transient failures.
const MAX_RETRIES: u32 = 3;

/// Delay between retries in milliseconds.
const RETRY_DELAY_MS: u64 = 1000;

/// HTTP implementation of [`ResourceClient`].
#[derive(Debug, Clone)]
pub struct HttpResourceClient {
    /// HTTP client.
    client: Client,
    /// Base URL without trailing slash.
    base_url: String,
    /// Bearer token.
    token: String,
    /// Attempts per request.
    max_retries: u32,
    /// Base delay between attempts.
    retry_delay: Duration,
}

/// One request with the context needed to interpret its errors.
struct Call<'a> {
    method: Method,
    url: String,
    group: &'a str,
    id: Option<&'a str>,
    etag: Option<&'a str>,
    body: Option<&'a Json>,
}

/// Raw successful response.
struct Reply {
    etag: Option<String>,
    body: Json,
}

fn should_retry(error: &DeckhandError) -> bool {
    error.is_retryable()
        || matches!(error, DeckhandError::Api(ApiError::ApiRequestFailed { status, .. }) if *status >= 500)
}

fn id_field(body: &Json) -> Option<String> {
    match body.get("id")? {
        Json::String(id) => Some(id.clone()),
        Json::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

impl HttpResourceClient {
    /// Creates a new client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(base_url: &str, token: &str) -> Result<Self> {
        Self::with_timeout(base_url, token, DEFAULT_TIMEOUT_SECS)
    }

    /// Creates a client with a custom timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn with_timeout(base_url: &str, token: &str, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ApiError::network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            max_retries: MAX_RETRIES,
            retry_delay: Duration::from_millis(RETRY_DELAY_MS),
        })
    }

    /// Overrides the retry policy.
    #[must_use]
    pub fn with_retry(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = max_retries.max(1);
        self.retry_delay = retry_delay;
        self
    }

    fn group_url(&self, group: &str) -> String {
        format!("{}/api/resources/{group}", self.base_url)
    }

    fn object_url(&self, group: &str, id: &str) -> String {
        format!("{}/api/resources/{group}/{id}", self.base_url)
    }

    /// Sends a request, retrying transient failures.
    async fn send(&self, call: &Call<'_>) -> Result<Reply> {
        let mut last_error = None;

        for attempt in 0..self.max_retries {
            if attempt > 0 {
                debug!("Retry attempt {attempt} of {}", self.max_retries);
                tokio::time::sleep(self.retry_delay * attempt).await;
            }

            match self.send_once(call).await {
                Ok(reply) => return Ok(reply),
                Err(e) => {
                    if should_retry(&e) {
                        last_error = Some(e);
                        continue;
                    }
                    return Err(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| ApiError::network("Max retries exceeded").into()))
    }

    /// Sends a single request.
    async fn send_once(&self, call: &Call<'_>) -> Result<Reply> {
        trace!("{} {}", call.method, call.url);

        let mut request = self
            .client
            .request(call.method.clone(), &call.url)
            .header(header::AUTHORIZATION, format!("Bearer {}", self.token));
        if let Some(etag) = call.etag {
            request = request.header(header::IF_MATCH, etag);
        }
        if let Some(body) = call.body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ApiError::network(format!("Request failed: {e}")))?;

        let status = response.status();
        let not_found = || ApiError::NotFound {
            group: call.group.to_string(),
            id: call.id.unwrap_or_default().to_string(),
        };

        match status {
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = response
                    .headers()
                    .get(header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.parse().ok())
                    .unwrap_or_default();
                let retry_after = if retry_after == 0 { 60 } else { retry_after };
                return Err(ApiError::RateLimited {
                    retry_after_secs: retry_after,
                }
                .into());
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(ApiError::AuthenticationFailed {
                    message: String::from("Invalid or expired token"),
                }
                .into());
            }
            StatusCode::NOT_FOUND => return Err(not_found().into()),
            StatusCode::PRECONDITION_FAILED => {
                return Err(ApiError::PreconditionFailed {
                    group: call.group.to_string(),
                    id: call.id.unwrap_or_default().to_string(),
                }
                .into());
            }
            _ => {}
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::api_error(status.as_u16(), body).into());
        }

        let etag = response
            .headers()
            .get(header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string);
        let text = response
            .text()
            .await
            .map_err(|e| ApiError::network(format!("Failed to read response: {e}")))?;
        let body = if text.trim().is_empty() {
            Json::Null
        } else {
            serde_json::from_str(&text).map_err(|e| ApiError::InvalidResponse {
                message: format!("Failed to parse response: {e}"),
            })?
        };

        Ok(Reply { etag, body })
    }

    fn into_object(reply: Reply, fallback_id: Option<&str>) -> Result<RemoteObject> {
        let id = id_field(&reply.body)
            .or_else(|| fallback_id.map(ToString::to_string))
            .ok_or_else(|| ApiError::InvalidResponse {
                message: String::from("Response has no id"),
            })?;
        let etag = reply
            .etag
            .or_else(|| reply.body.get("etag").and_then(Json::as_str).map(ToString::to_string));
        Ok(RemoteObject {
            id,
            etag,
            state: reply.body,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ActiveRuns {
    active_runs: u32,
}

#[async_trait]
impl ResourceClient for HttpResourceClient {
    async fn create(&self, group: &str, config: &Json) -> Result<RemoteObject> {
        let reply = self
            .send(&Call {
                method: Method::POST,
                url: self.group_url(group),
                group,
                id: None,
                etag: None,
                body: Some(config),
            })
            .await?;
        let object = Self::into_object(reply, None)?;
        debug!("Created {group} object {}", object.id);
        Ok(object)
    }

    async fn update(&self, group: &str, id: &str, etag: Option<&str>, config: &Json) -> Result<RemoteObject> {
        let reply = self
            .send(&Call {
                method: Method::PUT,
                url: self.object_url(group, id),
                group,
                id: Some(id),
                etag,
                body: Some(config),
            })
            .await?;
        Self::into_object(reply, Some(id))
    }

    async fn delete(&self, group: &str, id: &str) -> Result<()> {
        let result = self
            .send(&Call {
                method: Method::DELETE,
                url: self.object_url(group, id),
                group,
                id: Some(id),
                etag: None,
                body: None,
            })
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(DeckhandError::Api(ApiError::NotFound { .. })) => {
                debug!("{group} object {id} already gone");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn read(&self, group: &str, id: &str) -> Result<RemoteObject> {
        let reply = self
            .send(&Call {
                method: Method::GET,
                url: self.object_url(group, id),
                group,
                id: Some(id),
                etag: None,
                body: None,
            })
            .await?;
        Self::into_object(reply, Some(id))
    }

    async fn active_runs(&self, group: &str, id: &str) -> Result<u32> {
        let reply = self
            .send(&Call {
                method: Method::GET,
                url: format!("{}/active-runs", self.object_url(group, id)),
                group,
                id: Some(id),
                etag: None,
                body: None,
            })
            .await?;
        let runs = ActiveRuns::deserialize(&reply.body).map_err(|e| ApiError::InvalidResponse {
            message: format!("Failed to parse active runs: {e}"),
        })?;
        Ok(runs.active_runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> HttpResourceClient {
        HttpResourceClient::new(&server.uri(), "secret")
            .expect("client")
            .with_retry(3, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_create_sends_bearer_and_reads_etag() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/resources/jobs"))
            .and(header("authorization", "Bearer secret"))
            .and(body_json(json!({"name": "etl"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("etag", "\"v1\"")
                    .set_body_json(json!({"id": 42, "name": "etl"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let object = client(&server)
            .create("jobs", &json!({"name": "etl"}))
            .await
            .expect("create");
        assert_eq!(object.id, "42");
        assert_eq!(object.etag.as_deref(), Some("\"v1\""));
        assert_eq!(object.state["name"], "etl");
    }

    #[tokio::test]
    async fn test_update_sends_if_match_and_maps_conflict() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/api/resources/apps/7"))
            .and(header("if-match", "\"old\""))
            .respond_with(ResponseTemplate::new(412))
            .mount(&server)
            .await;

        let result = client(&server)
            .update("apps", "7", Some("\"old\""), &json!({"name": "ui"}))
            .await;
        assert!(matches!(
            result,
            Err(DeckhandError::Api(ApiError::PreconditionFailed { ref id, .. })) if id == "7"
        ));
    }

    #[tokio::test]
    async fn test_delete_of_missing_object_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/api/resources/jobs/9"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        client(&server).delete("jobs", "9").await.expect("delete");
    }

    #[tokio::test]
    async fn test_server_errors_are_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/resources/jobs/1"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/resources/jobs/1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "1", "etag": "e2"})))
            .mount(&server)
            .await;

        let object = client(&server).read("jobs", "1").await.expect("read");
        assert_eq!(object.etag.as_deref(), Some("e2"));
    }

    #[tokio::test]
    async fn test_authentication_failure_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let result = client(&server).read("jobs", "1").await;
        assert!(matches!(
            result,
            Err(DeckhandError::Api(ApiError::AuthenticationFailed { .. }))
        ));
    }

    #[tokio::test]
    async fn test_active_runs() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/resources/pipelines/p1/active-runs"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"active_runs": 2})))
            .mount(&server)
            .await;

        assert_eq!(client(&server).active_runs("pipelines", "p1").await.expect("runs"), 2);
    }
}
