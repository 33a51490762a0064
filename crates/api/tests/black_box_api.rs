use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use reqwest::StatusCode;
use serde_json::json;

use sweep_api::app::{build_app, AppServices};
use sweep_auth::SchedulerSecret;
use sweep_core::{
    Capability, CollaboratorError, ConnectionId, JobDefinition, JobName, LocationId, OrgId,
    PlanTier, TenantHandle, TenantId, TenantOutcome,
};
use sweep_events::{names::TOKEN_REFRESH_REQUESTED, InMemoryEventBus};
use sweep_infra::{
    collaborators::LoggingTokenRefresher,
    config::MapConfig,
    durable::{DurableStepExecutor, EventWorker, InMemoryStepLedger, WorkerHandle},
    functions::{ExpiringToken, InMemoryTokenStore, TokenRefreshFunction},
    jobs::{
        CronService, EnumerationError, InMemoryErrorTracker, ProcessorRegistry, ResultReporter,
        RunnerConfig, TenantEnumerator, TenantProcessor,
    },
};

const SECRET: &str = "test-cron-secret";

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
    worker: Option<WorkerHandle>,
}

impl TestServer {
    /// Same router as prod, bound to an ephemeral port.
    async fn spawn(services: AppServices) -> Self {
        Self::spawn_inner(services, false).await
    }

    /// Also drains the event bus into the durable executor.
    async fn spawn_with_worker(services: AppServices) -> Self {
        Self::spawn_inner(services, true).await
    }

    async fn spawn_inner(services: AppServices, with_worker: bool) -> Self {
        let worker = with_worker.then(|| {
            EventWorker::spawn(
                "test-worker",
                services.bus.as_ref(),
                services.executor.clone(),
                tokio::runtime::Handle::current(),
            )
            .expect("failed to spawn worker")
        });

        let app = build_app(services);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            handle,
            worker,
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
        if let Some(worker) = self.worker.take() {
            worker.shutdown();
        }
    }
}

/// Counts calls; optionally fails the enumeration.
#[derive(Default)]
struct CountingEnumerator {
    tenants: Vec<TenantHandle>,
    fail_with: Option<&'static str>,
    calls: AtomicUsize,
}

#[async_trait]
impl TenantEnumerator for CountingEnumerator {
    async fn enumerate(&self, _job: &JobDefinition) -> Result<Vec<TenantHandle>, EnumerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.fail_with {
            Some(msg) => Err(EnumerationError::new(msg)),
            None => Ok(self.tenants.clone()),
        }
    }
}

/// Fails for the listed tenants, succeeds with one counter otherwise.
#[derive(Default)]
struct ScriptedProcessor {
    failing: HashSet<TenantId>,
    calls: AtomicUsize,
}

#[async_trait]
impl TenantProcessor for ScriptedProcessor {
    async fn process(&self, tenant: &TenantHandle) -> Result<TenantOutcome, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(&tenant.tenant_id) {
            return Err(CollaboratorError::permanent("profile not found"));
        }
        Ok(TenantOutcome::new().with_counter("locations_synced", 1))
    }
}

struct Harness {
    enumerator: Arc<CountingEnumerator>,
    processor: Arc<ScriptedProcessor>,
    tracker: InMemoryErrorTracker,
    config: Arc<MapConfig>,
    tokens: Arc<InMemoryTokenStore>,
}

impl Harness {
    fn new(enumerator: CountingEnumerator, processor: ScriptedProcessor) -> Self {
        Self {
            enumerator: Arc::new(enumerator),
            processor: Arc::new(processor),
            tracker: InMemoryErrorTracker::new(),
            config: Arc::new(MapConfig::new()),
            tokens: Arc::new(InMemoryTokenStore::new()),
        }
    }

    fn empty() -> Self {
        Self::new(CountingEnumerator::default(), ScriptedProcessor::default())
    }

    fn services(&self) -> AppServices {
        let cron = CronService::new(
            self.enumerator.clone(),
            ProcessorRegistry::new().with(JobName::NapSync, self.processor.clone()),
            ResultReporter::new(Arc::new(self.tracker.clone()), "test"),
            self.config.clone(),
            RunnerConfig::default(),
        );
        let executor = DurableStepExecutor::new(Arc::new(InMemoryStepLedger::new())).with(
            Arc::new(TokenRefreshFunction::new(
                self.tokens.clone(),
                Arc::new(LoggingTokenRefresher),
                30,
            )),
        );
        AppServices::new(
            cron,
            executor,
            Arc::new(InMemoryEventBus::new()),
            SchedulerSecret::new(SECRET),
        )
    }
}

fn profile_tenant() -> TenantHandle {
    TenantHandle::new(TenantId::new(), OrgId::new(), LocationId::new(), PlanTier::Growth)
        .with_capability(Capability::GoogleProfile)
}

async fn get_authorized(client: &reqwest::Client, url: String) -> reqwest::Response {
    client.get(url).bearer_auth(SECRET).send().await.unwrap()
}

#[tokio::test]
async fn health_needs_no_auth() {
    let h = Harness::empty();
    let srv = TestServer::spawn(h.services()).await;

    let res = reqwest::get(format!("{}/health", srv.base_url)).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn bad_auth_is_rejected_before_enumeration() {
    let h = Harness::new(
        CountingEnumerator {
            tenants: vec![profile_tenant()],
            ..Default::default()
        },
        ScriptedProcessor::default(),
    );
    let srv = TestServer::spawn(h.services()).await;
    let client = reqwest::Client::new();
    let url = format!("{}/cron/nap-sync", srv.base_url);

    let missing = client.get(&url).send().await.unwrap();
    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);
    let body: serde_json::Value = missing.json().await.unwrap();
    assert_eq!(body, json!({ "error": "Unauthorized" }));

    let wrong = client.get(&url).bearer_auth("nope").send().await.unwrap();
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);

    let lowercase_scheme = client
        .get(&url)
        .header("Authorization", format!("bearer {SECRET}"))
        .send()
        .await
        .unwrap();
    assert_eq!(lowercase_scheme.status(), StatusCode::UNAUTHORIZED);

    assert_eq!(h.enumerator.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.processor.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unset_secret_rejects_everything() {
    let h = Harness::empty();
    let mut services = h.services();
    services.scheduler_secret = None;
    let srv = TestServer::spawn(services).await;

    let res = reqwest::Client::new()
        .get(format!("{}/cron", srv.base_url))
        .header("Authorization", "Bearer ")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn one_failing_tenant_does_not_stop_the_run() {
    let tenants: Vec<TenantHandle> = (0..10).map(|_| profile_tenant()).collect();
    let failing = HashSet::from([tenants[3].tenant_id]);
    let h = Harness::new(
        CountingEnumerator {
            tenants,
            ..Default::default()
        },
        ScriptedProcessor {
            failing,
            ..Default::default()
        },
    );
    let srv = TestServer::spawn(h.services()).await;

    let res = get_authorized(&reqwest::Client::new(), format!("{}/cron/nap-sync", srv.base_url)).await;
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();

    assert_eq!(body["ok"], json!(true));
    assert_eq!(body["processed"], json!(10));
    assert_eq!(body["errors"], json!(1));
    assert_eq!(body["locations_synced"], json!(9));
    assert!(body["duration_ms"].is_u64());
    assert_eq!(h.processor.calls.load(Ordering::SeqCst), 10);
}

#[tokio::test]
async fn empty_tenant_set_is_a_successful_noop() {
    let h = Harness::empty();
    let srv = TestServer::spawn(h.services()).await;

    let res = get_authorized(&reqwest::Client::new(), format!("{}/cron/nap-sync", srv.base_url)).await;
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["ok"], json!(true));
    assert_eq!(body["processed"], json!(0));
    assert_eq!(body["errors"], json!(0));
}

#[tokio::test]
async fn kill_switch_halts_without_touching_tenants() {
    let h = Harness::new(
        CountingEnumerator {
            tenants: vec![profile_tenant()],
            ..Default::default()
        },
        ScriptedProcessor::default(),
    );
    h.config.set("STOP_NAP_SYNC_CRON", "true");
    let srv = TestServer::spawn(h.services()).await;
    let client = reqwest::Client::new();

    let res = get_authorized(&client, format!("{}/cron/nap-sync", srv.base_url)).await;
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body, json!({ "ok": true, "halted": true }));
    assert_eq!(h.enumerator.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.processor.calls.load(Ordering::SeqCst), 0);

    // Flag is read per invocation, no restart needed.
    h.config.set("STOP_NAP_SYNC_CRON", "false");
    let res = get_authorized(&client, format!("{}/cron/nap-sync", srv.base_url)).await;
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["processed"], json!(1));
}

#[tokio::test]
async fn unknown_job_is_not_found() {
    let h = Harness::empty();
    let srv = TestServer::spawn(h.services()).await;

    let res = get_authorized(&reqwest::Client::new(), format!("{}/cron/nope", srv.base_url)).await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body, json!({ "error": "unknown job: nope" }));
}

#[tokio::test]
async fn enumeration_failure_is_a_500_with_one_capture() {
    let h = Harness::new(
        CountingEnumerator {
            fail_with: Some("db unreachable"),
            ..Default::default()
        },
        ScriptedProcessor::default(),
    );
    let srv = TestServer::spawn(h.services()).await;

    let res = get_authorized(&reqwest::Client::new(), format!("{}/cron/nap-sync", srv.base_url)).await;
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body, json!({ "error": "db unreachable" }));

    let captured = h.tracker.captured();
    assert_eq!(captured.len(), 1);
    assert_eq!(captured[0].tags["job"], "nap-sync");
    assert_eq!(captured[0].tags["release"], "test");
}

#[tokio::test]
async fn catalog_lists_every_job_with_halt_state() {
    let h = Harness::empty();
    h.config.set("STOP_VAIO_CRON", "1");
    let srv = TestServer::spawn(h.services()).await;

    let res = get_authorized(&reqwest::Client::new(), format!("{}/cron", srv.base_url)).await;
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    let jobs = body["jobs"].as_array().unwrap();

    assert_eq!(jobs.len(), JobName::ALL.len());
    let vaio = jobs.iter().find(|j| j["name"] == "vaio").unwrap();
    assert_eq!(vaio["halted"], json!(true));
    assert_eq!(vaio["kill_switch"], json!("STOP_VAIO_CRON"));
    let citations = jobs.iter().find(|j| j["name"] == "citation-intelligence").unwrap();
    assert_eq!(citations["iteration_unit"], json!("organization"));
    assert_eq!(citations["halted"], json!(false));
}

#[tokio::test]
async fn unknown_event_name_is_not_found() {
    let h = Harness::empty();
    let srv = TestServer::spawn(h.services()).await;

    let res = reqwest::Client::new()
        .post(format!("{}/events", srv.base_url))
        .bearer_auth(SECRET)
        .json(&json!({ "name": "nobody/listens" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unknown_run_is_not_found() {
    let h = Harness::empty();
    let srv = TestServer::spawn(h.services()).await;

    let res = get_authorized(
        &reqwest::Client::new(),
        format!("{}/functions/runs/{}", srv.base_url, uuid::Uuid::now_v7()),
    )
    .await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = get_authorized(
        &reqwest::Client::new(),
        format!("{}/functions/runs/not-a-uuid", srv.base_url),
    )
    .await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn published_event_runs_the_durable_function() {
    let h = Harness::empty();
    let connection_id = ConnectionId::new();
    let old_expiry = Utc::now() + ChronoDuration::minutes(5);
    h.tokens.insert(ExpiringToken {
        connection_id,
        location_id: LocationId::new(),
        provider: "google".into(),
        expires_at: old_expiry,
    });
    let srv = TestServer::spawn_with_worker(h.services()).await;
    let client = reqwest::Client::new();

    let res = client
        .post(format!("{}/events", srv.base_url))
        .bearer_auth(SECRET)
        .json(&json!({ "name": TOKEN_REFRESH_REQUESTED }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    let accepted: serde_json::Value = res.json().await.unwrap();
    assert_eq!(accepted["accepted"], json!(true));
    let event_id = accepted["event_id"].as_str().unwrap().to_string();

    // The worker runs the function in the background; poll the run view.
    let mut run = serde_json::Value::Null;
    for _ in 0..100 {
        let res = get_authorized(&client, format!("{}/functions/runs/{}", srv.base_url, event_id)).await;
        if res.status() == StatusCode::OK {
            run = res.json().await.unwrap();
            if run["status"] == "completed" {
                break;
            }
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }

    assert_eq!(run["status"], json!("completed"), "run never completed: {run}");
    assert_eq!(run["function"], json!("token-refresh"));
    assert_eq!(run["output"]["refreshed"], json!(1));
    let steps = run["steps"].as_array().unwrap();
    assert_eq!(steps.len(), 2);
    assert!(steps.iter().all(|s| s["status"] == "completed"));
    assert!(h.tokens.expires_at(connection_id).unwrap() > old_expiry);
}
