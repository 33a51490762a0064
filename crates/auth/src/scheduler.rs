use thiserror::Error;

/// Shared deployment secret the external scheduler presents as a bearer token.
///
/// `Debug` is redacted so the secret never reaches logs.
#[derive(Clone, PartialEq, Eq)]
pub struct SchedulerSecret(String);

impl SchedulerSecret {
    /// Returns `None` for an empty secret: an empty secret must never authorize.
    pub fn new(secret: impl Into<String>) -> Option<Self> {
        let secret = secret.into();
        if secret.is_empty() { None } else { Some(Self(secret)) }
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Debug for SchedulerSecret {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("SchedulerSecret(***)")
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    /// No secret configured: every request is rejected.
    #[error("scheduler secret not configured")]
    SecretUnset,

    #[error("missing authorization header")]
    MissingHeader,

    #[error("authorization header mismatch")]
    Mismatch,
}

/// Check a raw `Authorization` header value against the expected secret.
///
/// Equality is exact: no trimming, no case folding of the scheme. Constant-time
/// comparison is not needed for a shared deployment secret.
pub fn check(header_value: Option<&str>, expected_secret: Option<&str>) -> Result<(), AuthFailure> {
    let secret = match expected_secret {
        Some(s) if !s.is_empty() => s,
        _ => return Err(AuthFailure::SecretUnset),
    };
    let header = header_value.ok_or(AuthFailure::MissingHeader)?;

    match header.strip_prefix("Bearer ") {
        Some(token) if token == secret => Ok(()),
        _ => Err(AuthFailure::Mismatch),
    }
}

/// Boolean form of [`check`].
pub fn authorize(header_value: &str, expected_secret: &str) -> bool {
    check(Some(header_value), Some(expected_secret)).is_ok()
}
