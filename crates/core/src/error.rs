//! Error model shared across the orchestration layer.

use thiserror::Error;

/// Failure reported by an external collaborator (domain module, token
/// provider, places provider).
///
/// The split matters to the durable executor: transient failures are retried
/// with backoff, permanent ones are not worth another attempt.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CollaboratorError {
    /// Network blips, 5xx responses, timeouts.
    #[error("{0}")]
    Transient(String),

    /// Bad input, missing upstream record, 4xx responses.
    #[error("{0}")]
    Permanent(String),
}

impl CollaboratorError {
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn permanent(msg: impl Into<String>) -> Self {
        Self::Permanent(msg.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Transient(m) | Self::Permanent(m) => m,
        }
    }
}

/// Invocation-level failure: the whole run is aborted and reported as a
/// server error.
///
/// Tenant-level failures never become an `OrchestrationError`; they are folded
/// into the `BatchResult` instead.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OrchestrationError {
    /// The tenant enumerator could not produce the tenant set.
    #[error("{0}")]
    Enumeration(String),

    /// The requested job is not in the catalog.
    #[error("unknown job: {0}")]
    UnknownJob(String),

    /// No processor is registered for a cataloged job.
    #[error("no processor registered for job: {0}")]
    MissingProcessor(String),

    /// Anything else outside the per-tenant loop.
    #[error("{0}")]
    Internal(String),
}

impl OrchestrationError {
    pub fn enumeration(msg: impl Into<String>) -> Self {
        Self::Enumeration(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

/// Parse failures for identifiers and catalog names.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    #[error("unknown job: {0}")]
    UnknownJob(String),

    #[error("unknown plan tier: {0}")]
    UnknownPlanTier(String),

    #[error("unknown capability: {0}")]
    UnknownCapability(String),
}
