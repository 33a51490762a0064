//! `sweep-core`: orchestration vocabulary shared by every crate.
//!
//! This crate contains **pure** types (no IO, no async): identifiers, the tenant
//! projection used to drive iteration, the static job catalog, and the
//! aggregate `BatchResult` a run produces.

pub mod batch;
pub mod error;
pub mod id;
pub mod job;
pub mod tenant;

pub use batch::{BatchResult, ErrorDetail, TenantOutcome, MAX_ERROR_MESSAGE_LEN};
pub use error::{CollaboratorError, OrchestrationError, ParseError};
pub use id::{ConnectionId, LocationId, OrgId, RunId, TenantId};
pub use job::{Eligibility, IterationUnit, JobDefinition, JobName};
pub use tenant::{Capability, PlanTier, TenantHandle};
