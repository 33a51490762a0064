//! Stand-in collaborators for deployments without a domain service.
//!
//! They log what would have been done and report success, so schedules,
//! kill switches and the durable ledger can be exercised end to end.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::Value as JsonValue;
use tracing::info;

use sweep_core::{CollaboratorError, JobName, TenantHandle, TenantOutcome};

use crate::functions::{
    ExpiringToken, PlaceDetails, PlacesClient, RefreshedToken, StaleLocation, TokenRefresher,
};
use crate::jobs::TenantProcessor;

#[derive(Debug, Clone, Copy)]
pub struct LoggingProcessor {
    job: JobName,
}

impl LoggingProcessor {
    pub fn new(job: JobName) -> Self {
        Self { job }
    }
}

#[async_trait]
impl TenantProcessor for LoggingProcessor {
    async fn process(&self, tenant: &TenantHandle) -> Result<TenantOutcome, CollaboratorError> {
        info!(job = %self.job, tenant = %tenant.tenant_id, location = %tenant.location_id, "dry-run tenant");
        Ok(TenantOutcome::new())
    }
}

/// Extends every token by one hour.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingTokenRefresher;

#[async_trait]
impl TokenRefresher for LoggingTokenRefresher {
    async fn refresh(&self, token: &ExpiringToken) -> Result<RefreshedToken, CollaboratorError> {
        info!(connection = %token.connection_id, provider = %token.provider, "dry-run token refresh");
        Ok(RefreshedToken {
            expires_at: Utc::now() + ChronoDuration::hours(1),
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingPlacesClient;

#[async_trait]
impl PlacesClient for LoggingPlacesClient {
    async fn refresh(&self, location: &StaleLocation) -> Result<PlaceDetails, CollaboratorError> {
        let Some(place_id) = location.place_id.clone() else {
            return Err(CollaboratorError::permanent("location has no place id"));
        };
        info!(location = %location.location_id, place_id = %place_id, "dry-run places refresh");
        Ok(PlaceDetails {
            place_id,
            details: JsonValue::Null,
        })
    }
}
