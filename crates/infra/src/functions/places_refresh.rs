//! `places-refresh`: re-fetch business-listing details for stale locations.
//!
//! Steps: `select-stale-locations`, then per selected location
//! `fetch-place:{location_id}` (provider call, result pinned in the ledger)
//! followed by `save-place:{location_id}` or, when the provider permanently
//! rejects the location (unknown place, missing place id),
//! `mark-skipped:{location_id}`. A skipped location is stamped as attempted
//! so it does not hold the head of the selection. Transient failures are
//! retried.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};

use sweep_core::{CollaboratorError, LocationId};
use sweep_events::EventEnvelope;
use sweep_events::names::PLACES_REFRESH_REQUESTED;

use crate::durable::{DurableFunction, StepContext, StepError};

use super::StoreError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaleLocation {
    pub location_id: LocationId,
    pub place_id: Option<String>,
    pub last_refreshed_at: Option<DateTime<Utc>>,
}

/// Listing details as returned by the places provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceDetails {
    pub place_id: String,
    #[serde(default)]
    pub details: JsonValue,
}

#[async_trait]
pub trait PlacesStore: Send + Sync {
    /// Locations neither refreshed nor attempted since `older_than`, least
    /// recently touched first.
    async fn select_stale(
        &self,
        older_than: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<StaleLocation>, StoreError>;

    async fn mark_refreshed(
        &self,
        location_id: LocationId,
        details: &PlaceDetails,
        refreshed_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Stamps a location whose refresh was skipped; details are untouched.
    async fn mark_attempted(
        &self,
        location_id: LocationId,
        attempted_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;
}

#[async_trait]
pub trait PlacesClient: Send + Sync {
    async fn refresh(&self, location: &StaleLocation) -> Result<PlaceDetails, CollaboratorError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PlaceStepOutcome {
    Fetched { details: PlaceDetails },
    Skipped { reason: String },
}

#[derive(Debug, Default, Deserialize)]
struct PlacesRefreshPayload {
    stale_after_days: Option<u32>,
    limit: Option<u32>,
}

pub struct PlacesRefreshFunction {
    store: Arc<dyn PlacesStore>,
    client: Arc<dyn PlacesClient>,
    stale_after_days: u32,
    batch_limit: u32,
}

impl PlacesRefreshFunction {
    pub const NAME: &'static str = "places-refresh";

    pub fn new(
        store: Arc<dyn PlacesStore>,
        client: Arc<dyn PlacesClient>,
        stale_after_days: u32,
        batch_limit: u32,
    ) -> Self {
        Self {
            store,
            client,
            stale_after_days,
            batch_limit,
        }
    }
}

#[async_trait]
impl DurableFunction for PlacesRefreshFunction {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn event_name(&self) -> &'static str {
        PLACES_REFRESH_REQUESTED
    }

    async fn run(&self, ctx: &StepContext, event: &EventEnvelope) -> Result<JsonValue, StepError> {
        let payload: PlacesRefreshPayload = if event.payload().is_null() {
            PlacesRefreshPayload::default()
        } else {
            serde_json::from_value(event.payload().clone())
                .map_err(|e| StepError::Invalid(format!("invalid places refresh payload: {e}")))?
        };
        let days = payload.stale_after_days.unwrap_or(self.stale_after_days);
        let limit = payload.limit.unwrap_or(self.batch_limit);

        let store = self.store.clone();
        let stale: Vec<StaleLocation> = ctx
            .run("select-stale-locations", move || {
                let store = store.clone();
                async move {
                    let older_than = Utc::now() - ChronoDuration::days(i64::from(days));
                    store
                        .select_stale(older_than, limit)
                        .await
                        .map_err(CollaboratorError::from)
                }
            })
            .await?;

        let mut refreshed = 0u64;
        let mut skipped = 0u64;
        for location in stale {
            let location_id = location.location_id;
            let client = self.client.clone();
            let outcome: PlaceStepOutcome = ctx
                .run(&format!("fetch-place:{location_id}"), move || {
                    let client = client.clone();
                    let location = location.clone();
                    async move {
                        match client.refresh(&location).await {
                            Ok(details) => Ok(PlaceStepOutcome::Fetched { details }),
                            Err(CollaboratorError::Permanent(reason)) => {
                                Ok(PlaceStepOutcome::Skipped { reason })
                            }
                            Err(e) => Err(e),
                        }
                    }
                })
                .await?;

            let store = self.store.clone();
            match outcome {
                PlaceStepOutcome::Fetched { details } => {
                    let _saved: DateTime<Utc> = ctx
                        .run(&format!("save-place:{location_id}"), move || {
                            let store = store.clone();
                            let details = details.clone();
                            async move {
                                let at = Utc::now();
                                store
                                    .mark_refreshed(location_id, &details, at)
                                    .await
                                    .map_err(CollaboratorError::from)?;
                                Ok(at)
                            }
                        })
                        .await?;
                    refreshed += 1;
                }
                PlaceStepOutcome::Skipped { .. } => {
                    let _stamped: DateTime<Utc> = ctx
                        .run(&format!("mark-skipped:{location_id}"), move || {
                            let store = store.clone();
                            async move {
                                let at = Utc::now();
                                store
                                    .mark_attempted(location_id, at)
                                    .await
                                    .map_err(CollaboratorError::from)?;
                                Ok(at)
                            }
                        })
                        .await?;
                    skipped += 1;
                }
            }
        }

        Ok(json!({ "refreshed": refreshed, "skipped": skipped }))
    }
}

#[derive(Debug, Clone)]
struct PlaceRow {
    place_id: Option<String>,
    details: Option<JsonValue>,
    last_refreshed_at: Option<DateTime<Utc>>,
    last_attempted_at: Option<DateTime<Utc>>,
}

impl PlaceRow {
    fn touched_at(&self) -> Option<DateTime<Utc>> {
        self.last_refreshed_at.max(self.last_attempted_at)
    }
}

/// In-memory `location_places` table for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryPlacesStore {
    rows: RwLock<HashMap<LocationId, PlaceRow>>,
}

impl InMemoryPlacesStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &self,
        location_id: LocationId,
        place_id: Option<String>,
        last_refreshed_at: Option<DateTime<Utc>>,
    ) {
        if let Ok(mut rows) = self.rows.write() {
            rows.insert(
                location_id,
                PlaceRow {
                    place_id,
                    details: None,
                    last_refreshed_at,
                    last_attempted_at: None,
                },
            );
        }
    }

    pub fn details(&self, location_id: LocationId) -> Option<JsonValue> {
        self.rows.read().ok()?.get(&location_id)?.details.clone()
    }

    pub fn last_refreshed_at(&self, location_id: LocationId) -> Option<DateTime<Utc>> {
        self.rows.read().ok()?.get(&location_id)?.last_refreshed_at
    }
}

#[async_trait]
impl PlacesStore for InMemoryPlacesStore {
    async fn select_stale(
        &self,
        older_than: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<StaleLocation>, StoreError> {
        let rows = self
            .rows
            .read()
            .map_err(|_| StoreError::new("places store lock poisoned"))?;
        let mut stale: Vec<_> = rows
            .iter()
            .filter(|(_, row)| row.touched_at().is_none_or(|at| at < older_than))
            .collect();
        // Never-touched first, then oldest.
        stale.sort_by_key(|(location_id, row)| (row.touched_at(), **location_id));
        Ok(stale
            .into_iter()
            .take(limit as usize)
            .map(|(location_id, row)| StaleLocation {
                location_id: *location_id,
                place_id: row.place_id.clone(),
                last_refreshed_at: row.last_refreshed_at,
            })
            .collect())
    }

    async fn mark_refreshed(
        &self,
        location_id: LocationId,
        details: &PlaceDetails,
        refreshed_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut rows = self
            .rows
            .write()
            .map_err(|_| StoreError::new("places store lock poisoned"))?;
        let row = rows.entry(location_id).or_insert(PlaceRow {
            place_id: None,
            details: None,
            last_refreshed_at: None,
            last_attempted_at: None,
        });
        row.place_id = Some(details.place_id.clone());
        row.details = Some(details.details.clone());
        row.last_refreshed_at = Some(refreshed_at);
        Ok(())
    }

    async fn mark_attempted(
        &self,
        location_id: LocationId,
        attempted_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut rows = self
            .rows
            .write()
            .map_err(|_| StoreError::new("places store lock poisoned"))?;
        let row = rows
            .get_mut(&location_id)
            .ok_or_else(|| StoreError::new(format!("unknown location {location_id}")))?;
        row.last_attempted_at = Some(attempted_at);
        Ok(())
    }
}
