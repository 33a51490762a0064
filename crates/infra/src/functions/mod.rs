//! Durable functions triggered from the event bus.

pub mod places_refresh;
pub mod token_refresh;

use thiserror::Error;

use sweep_core::CollaboratorError;

pub use places_refresh::{
    InMemoryPlacesStore, PlaceDetails, PlaceStepOutcome, PlacesClient, PlacesRefreshFunction,
    PlacesStore, StaleLocation,
};
pub use token_refresh::{
    ExpiringToken, InMemoryTokenStore, RefreshedToken, TokenRefreshFunction, TokenRefresher,
    TokenStepOutcome, TokenStore,
};

/// Data-store failure behind a function's selection or write-back.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("store error: {0}")]
pub struct StoreError(pub String);

impl StoreError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Store failures are retried like any other transient step failure.
impl From<StoreError> for CollaboratorError {
    fn from(value: StoreError) -> Self {
        CollaboratorError::Transient(value.to_string())
    }
}
