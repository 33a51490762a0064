use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use sweep_auth::SchedulerSecret;
use sweep_events::{EventEnvelope, InMemoryEventBus};
use sweep_infra::{
    collaborators::{
        self, DomainServiceClient, HttpPlacesClient, HttpTokenRefresher, LoggingPlacesClient,
        LoggingTokenRefresher,
    },
    config::{ConfigSource, OrchestratorConfig},
    durable::{DurableStepExecutor, InMemoryStepLedger, StepLedger},
    functions::{
        InMemoryPlacesStore, InMemoryTokenStore, PlacesClient, PlacesRefreshFunction, PlacesStore,
        TokenRefreshFunction, TokenRefresher, TokenStore,
    },
    jobs::{CronService, InMemoryTenantDirectory, ResultReporter, TenantEnumerator, TracingErrorTracker},
    postgres::{
        self, PostgresPlacesStore, PostgresStepLedger, PostgresTenantDirectory, PostgresTokenStore,
    },
};

const POOL_MAX_CONNECTIONS: u32 = 10;

/// Everything the HTTP handlers need.
#[derive(Debug)]
pub struct AppServices {
    pub cron: CronService,
    pub executor: DurableStepExecutor,
    pub bus: Arc<InMemoryEventBus<EventEnvelope>>,
    pub scheduler_secret: Option<SchedulerSecret>,
}

impl AppServices {
    pub fn new(
        cron: CronService,
        executor: DurableStepExecutor,
        bus: Arc<InMemoryEventBus<EventEnvelope>>,
        scheduler_secret: Option<SchedulerSecret>,
    ) -> Self {
        Self {
            cron,
            executor,
            bus,
            scheduler_secret,
        }
    }
}

struct Stores {
    tenants: Arc<dyn TenantEnumerator>,
    ledger: Arc<dyn StepLedger>,
    tokens: Arc<dyn TokenStore>,
    places: Arc<dyn PlacesStore>,
}

impl Stores {
    fn in_memory() -> Self {
        Self {
            tenants: Arc::new(InMemoryTenantDirectory::new()),
            ledger: Arc::new(InMemoryStepLedger::new()),
            tokens: Arc::new(InMemoryTokenStore::new()),
            places: Arc::new(InMemoryPlacesStore::new()),
        }
    }

    async fn postgres(database_url: &str) -> anyhow::Result<Self> {
        let pool = postgres::connect(database_url, POOL_MAX_CONNECTIONS)
            .await
            .context("failed to connect to postgres")?;

        let tenants = PostgresTenantDirectory::new(pool.clone());
        let ledger = PostgresStepLedger::new(pool.clone());
        let tokens = PostgresTokenStore::new(pool.clone());
        let places = PostgresPlacesStore::new(pool);

        tenants.migrate().await.context("tenant directory migration")?;
        ledger.migrate().await.context("step ledger migration")?;
        tokens.migrate().await.context("token store migration")?;
        places.migrate().await.context("places store migration")?;

        Ok(Self {
            tenants: Arc::new(tenants),
            ledger: Arc::new(ledger),
            tokens: Arc::new(tokens),
            places: Arc::new(places),
        })
    }
}

/// Wire stores, collaborators, the cron service and the durable executor from
/// process configuration.
///
/// - `DATABASE_URL` set: Postgres stores (migrated on startup), otherwise in-memory
/// - `DOMAIN_SERVICE_URL` set: HTTP collaborators, otherwise logging stand-ins
pub async fn build_services(
    config: &OrchestratorConfig,
    source: Arc<dyn ConfigSource>,
) -> anyhow::Result<AppServices> {
    let stores = match config.database_url.as_deref() {
        Some(url) => {
            info!("using postgres stores");
            Stores::postgres(url).await?
        }
        None => {
            info!("DATABASE_URL not set; using in-memory stores");
            Stores::in_memory()
        }
    };

    let (refresher, places_client): (Arc<dyn TokenRefresher>, Arc<dyn PlacesClient>) =
        match config.domain_service_url.as_deref() {
            Some(url) => {
                let client = DomainServiceClient::new(url);
                (
                    Arc::new(HttpTokenRefresher::new(client.clone())),
                    Arc::new(HttpPlacesClient::new(client)),
                )
            }
            None => {
                info!("DOMAIN_SERVICE_URL not set; collaborators only log");
                (Arc::new(LoggingTokenRefresher), Arc::new(LoggingPlacesClient))
            }
        };

    let cron = CronService::new(
        stores.tenants,
        collaborators::processor_registry(config.domain_service_url.as_deref()),
        ResultReporter::new(Arc::new(TracingErrorTracker), config.release_tag.clone()),
        source,
        config.runner.clone(),
    );

    let executor = DurableStepExecutor::new(stores.ledger)
        .with(Arc::new(TokenRefreshFunction::new(
            stores.tokens,
            refresher,
            config.token_refresh_window_minutes,
        )))
        .with(Arc::new(PlacesRefreshFunction::new(
            stores.places,
            places_client,
            config.places_stale_after_days,
            config.places_batch_limit,
        )));

    Ok(AppServices::new(
        cron,
        executor,
        Arc::new(InMemoryEventBus::new()),
        config.cron_secret.clone(),
    ))
}
