//! Event names understood by the registered durable functions.

/// Refresh OAuth tokens expiring soon. Payload: `{ "within_minutes"?: u32 }`.
pub const TOKEN_REFRESH_REQUESTED: &str = "connections/token.refresh.requested";

/// Refresh cached place details for stale locations.
/// Payload: `{ "stale_after_days"?: u32, "limit"?: u32 }`.
pub const PLACES_REFRESH_REQUESTED: &str = "locations/places.refresh.requested";
