//! HTTP clients for the domain service.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Value as JsonValue, json};

use sweep_core::{CollaboratorError, JobName, TenantHandle, TenantOutcome};

use crate::functions::{
    ExpiringToken, PlaceDetails, PlacesClient, RefreshedToken, StaleLocation, TokenRefresher,
};
use crate::jobs::TenantProcessor;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared reqwest client plus base URL.
#[derive(Debug, Clone)]
pub struct DomainServiceClient {
    base_url: String,
    client: reqwest::Client,
}

impl DomainServiceClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            base_url: base_url.into(),
            client,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    /// POST `body` to `path`; returns the JSON response body on 2xx.
    ///
    /// 5xx, 429 and transport errors are transient; other statuses are permanent.
    async fn post(&self, path: &str, body: &JsonValue) -> Result<JsonValue, CollaboratorError> {
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| CollaboratorError::transient(format!("request to {path} failed: {e}")))?;

        let status = response.status();
        let bytes = response.bytes().await.map_err(|e| {
            CollaboratorError::transient(format!("failed reading response from {path}: {e}"))
        })?;
        let parsed = serde_json::from_slice::<JsonValue>(&bytes).ok();

        if status.is_success() {
            return Ok(parsed.unwrap_or(JsonValue::Null));
        }

        let message = parsed
            .as_ref()
            .and_then(|v| v.get("error").or_else(|| v.get("message")))
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| String::from_utf8_lossy(&bytes).to_string());
        let message = format!("{path} returned {status}: {message}");

        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            Err(CollaboratorError::Transient(message))
        } else {
            Err(CollaboratorError::Permanent(message))
        }
    }
}

/// Runs one job for one location via `POST /jobs/{job}/locations/{location_id}`.
///
/// Numeric fields of the response body become outcome counters.
#[derive(Debug, Clone)]
pub struct HttpTenantProcessor {
    job: JobName,
    client: DomainServiceClient,
}

impl HttpTenantProcessor {
    pub fn new(job: JobName, client: DomainServiceClient) -> Self {
        Self { job, client }
    }
}

#[async_trait]
impl TenantProcessor for HttpTenantProcessor {
    async fn process(&self, tenant: &TenantHandle) -> Result<TenantOutcome, CollaboratorError> {
        let path = format!("/jobs/{}/locations/{}", self.job, tenant.location_id);
        let body = json!({
            "tenant_id": tenant.tenant_id,
            "org_id": tenant.org_id,
            "location_id": tenant.location_id,
        });
        let response = self.client.post(&path, &body).await?;
        Ok(counters_from(&response))
    }
}

fn counters_from(response: &JsonValue) -> TenantOutcome {
    let mut outcome = TenantOutcome::new();
    if let Some(fields) = response.as_object() {
        for (name, value) in fields {
            if let Some(n) = value.as_u64() {
                outcome = outcome.with_counter(name.clone(), n);
            }
        }
    }
    outcome
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    expires_at: DateTime<Utc>,
}

/// `POST /connections/{id}/refresh` → `{expires_at}`.
#[derive(Debug, Clone)]
pub struct HttpTokenRefresher {
    client: DomainServiceClient,
}

impl HttpTokenRefresher {
    pub fn new(client: DomainServiceClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TokenRefresher for HttpTokenRefresher {
    async fn refresh(&self, token: &ExpiringToken) -> Result<RefreshedToken, CollaboratorError> {
        let path = format!("/connections/{}/refresh", token.connection_id);
        let body = json!({ "provider": token.provider, "location_id": token.location_id });
        let response = self.client.post(&path, &body).await?;
        let parsed: RefreshResponse = serde_json::from_value(response).map_err(|e| {
            CollaboratorError::permanent(format!("invalid refresh response from {path}: {e}"))
        })?;
        Ok(RefreshedToken {
            expires_at: parsed.expires_at,
        })
    }
}

/// `POST /locations/{id}/places/refresh` → `{place_id, details}`.
#[derive(Debug, Clone)]
pub struct HttpPlacesClient {
    client: DomainServiceClient,
}

impl HttpPlacesClient {
    pub fn new(client: DomainServiceClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PlacesClient for HttpPlacesClient {
    async fn refresh(&self, location: &StaleLocation) -> Result<PlaceDetails, CollaboratorError> {
        let path = format!("/locations/{}/places/refresh", location.location_id);
        let body = json!({ "place_id": location.place_id });
        let response = self.client.post(&path, &body).await?;
        serde_json::from_value(response).map_err(|e| {
            CollaboratorError::permanent(format!("invalid places response from {path}: {e}"))
        })
    }
}
