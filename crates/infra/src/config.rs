//! Configuration loading and kill-switch snapshots.
//!
//! Configuration is read through a `ConfigSource` so tests (and embedded use)
//! can swap the process environment for an in-memory map. Kill switches are
//! captured into an immutable `KillSwitches` snapshot at the start of each
//! invocation; flipping a flag mid-run has no effect until the next run.

use std::collections::{BTreeSet, HashMap};
use std::str::FromStr;
use std::sync::RwLock;
use std::time::Duration;

use thiserror::Error;

use sweep_auth::SchedulerSecret;
use sweep_core::{JobDefinition, JobName};

use crate::jobs::RunnerConfig;

/// Key/value configuration provider.
pub trait ConfigSource: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
}

/// Reads the process environment.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvConfig;

impl ConfigSource for EnvConfig {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// Mutable in-memory configuration for tests/dev.
#[derive(Debug, Default)]
pub struct MapConfig {
    values: RwLock<HashMap<String, String>>,
}

impl MapConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        if let Ok(mut values) = self.values.write() {
            values.insert(key.into(), value.into());
        }
    }

    pub fn remove(&self, key: &str) {
        if let Ok(mut values) = self.values.write() {
            values.remove(key);
        }
    }
}

impl ConfigSource for MapConfig {
    fn get(&self, key: &str) -> Option<String> {
        self.values.read().ok()?.get(key).cloned()
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

/// `true`, `1`, `yes`, `on` (case-insensitive, surrounding whitespace ignored).
pub fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}

/// Snapshot of every job's kill switch, taken once per invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KillSwitches {
    halted: BTreeSet<JobName>,
}

impl KillSwitches {
    /// Read `STOP_<JOB>_CRON` for every cataloged job.
    pub fn capture(source: &dyn ConfigSource, catalog: &[JobDefinition]) -> Self {
        let halted = catalog
            .iter()
            .filter(|def| {
                source
                    .get(&def.kill_switch_env_key)
                    .is_some_and(|v| is_truthy(&v))
            })
            .map(|def| def.name)
            .collect();
        Self { halted }
    }

    /// A snapshot with every job running.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_halted(&self, job: JobName) -> bool {
        self.halted.contains(&job)
    }

    pub fn halted_jobs(&self) -> impl Iterator<Item = JobName> + '_ {
        self.halted.iter().copied()
    }
}

/// Process-wide settings, read once at startup.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub cron_secret: Option<SchedulerSecret>,
    /// Version tag attached to every captured exception.
    pub release_tag: String,
    pub runner: RunnerConfig,
    pub bind_addr: String,
    pub database_url: Option<String>,
    pub domain_service_url: Option<String>,
    pub token_refresh_window_minutes: u32,
    pub places_stale_after_days: u32,
    pub places_batch_limit: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            cron_secret: None,
            release_tag: env!("CARGO_PKG_VERSION").to_string(),
            runner: RunnerConfig::default(),
            bind_addr: "0.0.0.0:8080".to_string(),
            database_url: None,
            domain_service_url: None,
            token_refresh_window_minutes: 30,
            places_stale_after_days: 7,
            places_batch_limit: 100,
        }
    }
}

impl OrchestratorConfig {
    pub fn from_source(source: &dyn ConfigSource) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let time_budget_secs: u64 = parse_or(
            source,
            "BATCH_TIME_BUDGET_SECS",
            defaults.runner.time_budget.map_or(0, |d| d.as_secs()),
        )?;

        Ok(Self {
            cron_secret: source.get("CRON_SECRET").and_then(SchedulerSecret::new),
            release_tag: non_empty(source, "RELEASE_TAG").unwrap_or(defaults.release_tag),
            runner: RunnerConfig {
                max_concurrency: parse_or(
                    source,
                    "BATCH_MAX_CONCURRENCY",
                    defaults.runner.max_concurrency,
                )?
                .max(1),
                max_error_details: parse_or(
                    source,
                    "BATCH_MAX_ERROR_DETAILS",
                    defaults.runner.max_error_details,
                )?,
                time_budget: (time_budget_secs > 0).then(|| Duration::from_secs(time_budget_secs)),
            },
            bind_addr: non_empty(source, "BIND_ADDR").unwrap_or(defaults.bind_addr),
            database_url: non_empty(source, "DATABASE_URL"),
            domain_service_url: non_empty(source, "DOMAIN_SERVICE_URL"),
            token_refresh_window_minutes: parse_or(
                source,
                "TOKEN_REFRESH_WINDOW_MINUTES",
                defaults.token_refresh_window_minutes,
            )?,
            places_stale_after_days: parse_or(
                source,
                "PLACES_STALE_AFTER_DAYS",
                defaults.places_stale_after_days,
            )?,
            places_batch_limit: parse_or(source, "PLACES_BATCH_LIMIT", defaults.places_batch_limit)?,
        })
    }
}

fn non_empty(source: &dyn ConfigSource, key: &str) -> Option<String> {
    source.get(key).filter(|v| !v.trim().is_empty())
}

fn parse_or<T: FromStr>(
    source: &dyn ConfigSource,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match non_empty(source, key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
    }
}
