//! Domain collaborators: the per-tenant job work and the provider calls the
//! durable functions make.

pub mod http;
pub mod logging;

use std::sync::Arc;

use sweep_core::JobName;

use crate::jobs::ProcessorRegistry;

pub use http::{DomainServiceClient, HttpPlacesClient, HttpTenantProcessor, HttpTokenRefresher};
pub use logging::{LoggingPlacesClient, LoggingProcessor, LoggingTokenRefresher};

/// One processor per cataloged job: HTTP when a domain service URL is
/// configured, logging stand-ins otherwise.
pub fn processor_registry(domain_service_url: Option<&str>) -> ProcessorRegistry {
    let client = domain_service_url.map(DomainServiceClient::new);
    JobName::ALL
        .into_iter()
        .fold(ProcessorRegistry::new(), |registry, job| match &client {
            Some(client) => registry.with(job, Arc::new(HttpTenantProcessor::new(job, client.clone()))),
            None => registry.with(job, Arc::new(LoggingProcessor::new(job))),
        })
}
