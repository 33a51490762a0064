//! `token-refresh`: renew OAuth connections that are about to expire.
//!
//! Steps:
//! 1. `find-expiring-tokens`: select connections expiring within the window.
//!    The selection is pinned in the ledger, so a redelivery works on the same set.
//! 2. `call-provider:{connection_id}` per connection: ask the provider for a
//!    new grant. The result is pinned in the ledger.
//! 3. `save-token:{connection_id}`: upsert the new expiry. Retrying this step
//!    never calls the provider again.
//!
//! A permanent provider error (revoked grant) is recorded as a failed outcome
//! and does not fail the run; a transient one is retried and fails the run once
//! attempts are exhausted.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};

use sweep_core::{CollaboratorError, ConnectionId, LocationId};
use sweep_events::EventEnvelope;
use sweep_events::names::TOKEN_REFRESH_REQUESTED;

use crate::durable::{DurableFunction, StepContext, StepError};

use super::StoreError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpiringToken {
    pub connection_id: ConnectionId,
    pub location_id: LocationId,
    pub provider: String,
    pub expires_at: DateTime<Utc>,
}

/// Result of a provider refresh. Secrets stay with the refresher; only the
/// new expiry travels through the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshedToken {
    pub expires_at: DateTime<Utc>,
}

#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn find_expiring(&self, before: DateTime<Utc>) -> Result<Vec<ExpiringToken>, StoreError>;

    async fn save_refreshed(
        &self,
        connection_id: ConnectionId,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;
}

#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, token: &ExpiringToken) -> Result<RefreshedToken, CollaboratorError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TokenStepOutcome {
    Refreshed { expires_at: DateTime<Utc> },
    Failed { reason: String },
}

#[derive(Debug, Default, Deserialize)]
struct TokenRefreshPayload {
    within_minutes: Option<u32>,
}

pub struct TokenRefreshFunction {
    store: Arc<dyn TokenStore>,
    refresher: Arc<dyn TokenRefresher>,
    default_window_minutes: u32,
}

impl TokenRefreshFunction {
    pub const NAME: &'static str = "token-refresh";

    pub fn new(
        store: Arc<dyn TokenStore>,
        refresher: Arc<dyn TokenRefresher>,
        default_window_minutes: u32,
    ) -> Self {
        Self {
            store,
            refresher,
            default_window_minutes,
        }
    }
}

#[async_trait]
impl DurableFunction for TokenRefreshFunction {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn event_name(&self) -> &'static str {
        TOKEN_REFRESH_REQUESTED
    }

    async fn run(&self, ctx: &StepContext, event: &EventEnvelope) -> Result<JsonValue, StepError> {
        let payload: TokenRefreshPayload = if event.payload().is_null() {
            TokenRefreshPayload::default()
        } else {
            serde_json::from_value(event.payload().clone())
                .map_err(|e| StepError::Invalid(format!("invalid token refresh payload: {e}")))?
        };
        let window = payload.within_minutes.unwrap_or(self.default_window_minutes);

        let store = self.store.clone();
        let tokens: Vec<ExpiringToken> = ctx
            .run("find-expiring-tokens", move || {
                let store = store.clone();
                async move {
                    let before = Utc::now() + ChronoDuration::minutes(i64::from(window));
                    store
                        .find_expiring(before)
                        .await
                        .map_err(CollaboratorError::from)
                }
            })
            .await?;

        let mut refreshed = 0u64;
        let mut failed = 0u64;
        for token in tokens {
            let connection_id = token.connection_id;
            let refresher = self.refresher.clone();
            let outcome: TokenStepOutcome = ctx
                .run(&format!("call-provider:{connection_id}"), move || {
                    let refresher = refresher.clone();
                    let token = token.clone();
                    async move {
                        match refresher.refresh(&token).await {
                            Ok(new) => Ok(TokenStepOutcome::Refreshed {
                                expires_at: new.expires_at,
                            }),
                            Err(CollaboratorError::Permanent(reason)) => {
                                Ok(TokenStepOutcome::Failed { reason })
                            }
                            Err(e) => Err(e),
                        }
                    }
                })
                .await?;

            let expires_at = match outcome {
                TokenStepOutcome::Refreshed { expires_at } => expires_at,
                TokenStepOutcome::Failed { .. } => {
                    failed += 1;
                    continue;
                }
            };

            // Separate step: a retried write replays the provider result above.
            let store = self.store.clone();
            let _saved: DateTime<Utc> = ctx
                .run(&format!("save-token:{connection_id}"), move || {
                    let store = store.clone();
                    async move {
                        store
                            .save_refreshed(connection_id, expires_at)
                            .await
                            .map_err(CollaboratorError::from)?;
                        Ok(expires_at)
                    }
                })
                .await?;
            refreshed += 1;
        }

        Ok(json!({ "refreshed": refreshed, "failed": failed }))
    }
}

/// In-memory token table for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryTokenStore {
    tokens: RwLock<HashMap<ConnectionId, ExpiringToken>>,
}

impl InMemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, token: ExpiringToken) {
        if let Ok(mut tokens) = self.tokens.write() {
            tokens.insert(token.connection_id, token);
        }
    }

    pub fn expires_at(&self, connection_id: ConnectionId) -> Option<DateTime<Utc>> {
        self.tokens
            .read()
            .ok()?
            .get(&connection_id)
            .map(|t| t.expires_at)
    }
}

#[async_trait]
impl TokenStore for InMemoryTokenStore {
    async fn find_expiring(&self, before: DateTime<Utc>) -> Result<Vec<ExpiringToken>, StoreError> {
        let tokens = self
            .tokens
            .read()
            .map_err(|_| StoreError::new("token store lock poisoned"))?;
        let mut expiring: Vec<_> = tokens
            .values()
            .filter(|t| t.expires_at <= before)
            .cloned()
            .collect();
        expiring.sort_by_key(|t| (t.expires_at, t.connection_id));
        Ok(expiring)
    }

    async fn save_refreshed(
        &self,
        connection_id: ConnectionId,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut tokens = self
            .tokens
            .write()
            .map_err(|_| StoreError::new("token store lock poisoned"))?;
        let token = tokens
            .get_mut(&connection_id)
            .ok_or_else(|| StoreError::new(format!("unknown connection {connection_id}")))?;
        token.expires_at = expires_at;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::durable::ledger::StepLedger;
    use crate::durable::{DispatchOutcome, DurableStepExecutor, InMemoryStepLedger};

    /// Grants one hour; fails permanently for connections in `revoked`.
    #[derive(Default)]
    struct FakeRefresher {
        calls: AtomicUsize,
        revoked: Mutex<Vec<ConnectionId>>,
    }

    #[async_trait]
    impl TokenRefresher for FakeRefresher {
        async fn refresh(&self, token: &ExpiringToken) -> Result<RefreshedToken, CollaboratorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.revoked.lock().unwrap().contains(&token.connection_id) {
                return Err(CollaboratorError::permanent("invalid_grant"));
            }
            Ok(RefreshedToken {
                expires_at: Utc::now() + ChronoDuration::hours(1),
            })
        }
    }

    fn token(expires_in_minutes: i64) -> ExpiringToken {
        ExpiringToken {
            connection_id: ConnectionId::new(),
            location_id: LocationId::new(),
            provider: "google".to_string(),
            expires_at: Utc::now() + ChronoDuration::minutes(expires_in_minutes),
        }
    }

    fn setup() -> (DurableStepExecutor, Arc<InMemoryTokenStore>, Arc<FakeRefresher>) {
        let store = Arc::new(InMemoryTokenStore::new());
        let refresher = Arc::new(FakeRefresher::default());
        let function = TokenRefreshFunction::new(store.clone(), refresher.clone(), 30);
        let executor =
            DurableStepExecutor::new(Arc::new(InMemoryStepLedger::new())).with(Arc::new(function));
        (executor, store, refresher)
    }

    #[tokio::test]
    async fn refreshes_expiring_tokens_only() {
        let (executor, store, refresher) = setup();
        let soon = token(10);
        let later = token(600);
        store.insert(soon.clone());
        store.insert(later.clone());

        let event = EventEnvelope::new(TOKEN_REFRESH_REQUESTED, JsonValue::Null);
        let outcome = executor.dispatch(&event).await.unwrap();

        assert_eq!(
            outcome,
            DispatchOutcome::Completed(json!({ "refreshed": 1, "failed": 0 }))
        );
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
        assert!(store.expires_at(soon.connection_id).unwrap() > soon.expires_at);
        assert_eq!(store.expires_at(later.connection_id), Some(later.expires_at));
    }

    #[tokio::test]
    async fn second_run_makes_no_refresh_calls() {
        let (executor, store, refresher) = setup();
        store.insert(token(5));
        store.insert(token(-1));

        let first = EventEnvelope::new(TOKEN_REFRESH_REQUESTED, json!({}));
        executor.dispatch(&first).await.unwrap();
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 2);

        let second = EventEnvelope::new(TOKEN_REFRESH_REQUESTED, json!({}));
        let outcome = executor.dispatch(&second).await.unwrap();
        assert_eq!(
            outcome,
            DispatchOutcome::Completed(json!({ "refreshed": 0, "failed": 0 }))
        );
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn redelivered_event_is_not_refreshed_twice() {
        let (executor, store, refresher) = setup();
        store.insert(token(5));

        let event = EventEnvelope::new(TOKEN_REFRESH_REQUESTED, json!({}));
        executor.dispatch(&event).await.unwrap();
        executor.dispatch(&event).await.unwrap();

        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn revoked_grant_is_counted_not_fatal() {
        let (executor, store, refresher) = setup();
        let revoked = token(5);
        store.insert(revoked.clone());
        store.insert(token(5));
        refresher.revoked.lock().unwrap().push(revoked.connection_id);

        let event = EventEnvelope::new(TOKEN_REFRESH_REQUESTED, json!({ "within_minutes": 15 }));
        let outcome = executor.dispatch(&event).await.unwrap();

        assert_eq!(
            outcome,
            DispatchOutcome::Completed(json!({ "refreshed": 1, "failed": 1 }))
        );
    }

    #[tokio::test]
    async fn window_comes_from_the_payload() {
        let (executor, store, refresher) = setup();
        store.insert(token(90));

        let event = EventEnvelope::new(TOKEN_REFRESH_REQUESTED, json!({ "within_minutes": 120 }));
        executor.dispatch(&event).await.unwrap();
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn malformed_payload_fails_the_run() {
        let (executor, _, _) = setup();
        let event = EventEnvelope::new(TOKEN_REFRESH_REQUESTED, json!({ "within_minutes": "soon" }));
        assert!(matches!(
            executor.dispatch(&event).await.unwrap(),
            DispatchOutcome::Failed(_)
        ));
    }

    /// Fails the first `save_refreshed` with a store error.
    struct FlakySaveStore {
        inner: InMemoryTokenStore,
        failures_left: AtomicUsize,
    }

    #[async_trait]
    impl TokenStore for FlakySaveStore {
        async fn find_expiring(&self, before: DateTime<Utc>) -> Result<Vec<ExpiringToken>, StoreError> {
            self.inner.find_expiring(before).await
        }

        async fn save_refreshed(
            &self,
            connection_id: ConnectionId,
            expires_at: DateTime<Utc>,
        ) -> Result<(), StoreError> {
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(StoreError::new("connection reset"));
            }
            self.inner.save_refreshed(connection_id, expires_at).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failed_save_is_retried_without_a_second_provider_call() {
        let store = Arc::new(FlakySaveStore {
            inner: InMemoryTokenStore::new(),
            failures_left: AtomicUsize::new(1),
        });
        let expiring = token(5);
        store.inner.insert(expiring.clone());
        let refresher = Arc::new(FakeRefresher::default());
        let ledger = Arc::new(InMemoryStepLedger::new());
        let executor = DurableStepExecutor::new(ledger.clone()).with(Arc::new(
            TokenRefreshFunction::new(store.clone(), refresher.clone(), 30),
        ));

        let event = EventEnvelope::new(TOKEN_REFRESH_REQUESTED, json!({}));
        let outcome = executor.dispatch(&event).await.unwrap();

        assert_eq!(
            outcome,
            DispatchOutcome::Completed(json!({ "refreshed": 1, "failed": 0 }))
        );
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
        assert!(store.inner.expires_at(expiring.connection_id).unwrap() > expiring.expires_at);

        let run_id = DurableStepExecutor::run_id_for(&event);
        let steps = ledger.list_steps(run_id).await.unwrap();
        let save = steps
            .iter()
            .find(|s| s.name == format!("save-token:{}", expiring.connection_id))
            .unwrap();
        assert_eq!(save.attempts, 2);
        let call = steps
            .iter()
            .find(|s| s.name == format!("call-provider:{}", expiring.connection_id))
            .unwrap();
        assert_eq!(call.attempts, 1);
    }
}
