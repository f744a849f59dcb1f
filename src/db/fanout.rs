//! Fan-out execution across datasources.
//!
//! `run_on_all` runs one statement on every registered datasource with
//! bounded parallelism and a global deadline, collecting per-datasource
//! outcomes into a success map and a failure map. A failing datasource never
//! takes the whole fan-out down. `run_on_one` and `run_on_default` are the
//! narrower single-target entry points.

use crate::db::executor::{self, QueryOutcome};
use crate::registry::DatasourceRegistry;
use dashmap::DashMap;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Upper bound on concurrently executing datasources.
pub const MAX_FANOUT_WORKERS: usize = 5;

/// Global ceiling on a fan-out; stragglers are aborted past this.
pub const FANOUT_TIMEOUT: Duration = Duration::from_secs(60);

/// Result of a fan-out: per-datasource data plus per-datasource failures.
/// Key sets are disjoint; together they cover every datasource that was
/// attempted.
#[derive(Debug, Default)]
pub struct FanoutReport {
    /// Datasource name to result data (rows array or affected-count object).
    pub results: BTreeMap<String, JsonValue>,
    /// Datasource name to failure reason.
    pub failures: BTreeMap<String, String>,
}

impl FanoutReport {
    pub fn to_json(&self) -> JsonValue {
        serde_json::json!({
            "results": self.results,
            "failures": self.failures,
        })
    }
}

/// Outcome of running on the default datasource. `NoRows` is distinct from
/// `NoDatasource` so the caller can tell "the query matched nothing" from
/// "there is nothing to query" and choose to broaden to a fan-out.
#[derive(Debug)]
pub enum DefaultRun {
    NoDatasource,
    NoRows,
    Outcome(QueryOutcome),
}

/// Run one statement on every datasource.
///
/// Worker cap is `min(MAX_FANOUT_WORKERS, datasource count)`. Per-task
/// failures (including panics) land in the failure map. When the global
/// deadline passes, remaining tasks are aborted and the datasources they
/// covered are reported as timed out.
pub async fn run_on_all(registry: &Arc<DatasourceRegistry>, sql: &str) -> FanoutReport {
    run_on_all_with_deadline(registry, sql, FANOUT_TIMEOUT).await
}

async fn run_on_all_with_deadline(
    registry: &Arc<DatasourceRegistry>,
    sql: &str,
    deadline: Duration,
) -> FanoutReport {
    let targets = registry.pools();
    if targets.is_empty() {
        return FanoutReport::default();
    }

    let workers = MAX_FANOUT_WORKERS.min(targets.len());
    let semaphore = Arc::new(Semaphore::new(workers));
    let successes: Arc<DashMap<String, JsonValue>> = Arc::new(DashMap::new());
    let failures: Arc<DashMap<String, String>> = Arc::new(DashMap::new());
    let all_names: Vec<String> = targets.iter().map(|(n, _)| n.clone()).collect();

    debug!(
        datasources = targets.len(),
        workers,
        "starting fan-out execution"
    );

    let mut join_set = JoinSet::new();
    for (name, pool) in targets {
        let semaphore = Arc::clone(&semaphore);
        let successes = Arc::clone(&successes);
        let failures = Arc::clone(&failures);
        let sql = sql.to_string();
        join_set.spawn(async move {
            // Closing the semaphore is not part of this design; acquire only
            // fails if it were, so treat that as a failure for this target.
            let _permit = match semaphore.acquire().await {
                Ok(p) => p,
                Err(_) => {
                    failures.insert(name, "executor unavailable".to_string());
                    return;
                }
            };
            match executor::execute(&pool, &sql).await {
                QueryOutcome::Failure(msg) => {
                    warn!(datasource = %name, error = %msg, "fan-out target failed");
                    failures.insert(name, msg);
                }
                outcome => {
                    successes.insert(name, outcome.to_json());
                }
            }
        });
    }

    let drained = tokio::time::timeout(deadline, async {
        while let Some(res) = join_set.join_next().await {
            if let Err(e) = res {
                // Panicked or aborted task; its datasource shows up below as
                // unaccounted for.
                warn!(error = %e, "fan-out task did not complete");
            }
        }
    })
    .await;

    if drained.is_err() {
        warn!(
            timeout_secs = deadline.as_secs(),
            "fan-out deadline passed, aborting stragglers"
        );
        join_set.abort_all();
        while join_set.join_next().await.is_some() {}
    }

    let mut report = FanoutReport::default();
    for entry in successes.iter() {
        report.results.insert(entry.key().clone(), entry.value().clone());
    }
    for entry in failures.iter() {
        report.failures.insert(entry.key().clone(), entry.value().clone());
    }
    for name in all_names {
        if !report.results.contains_key(&name) && !report.failures.contains_key(&name) {
            report
                .failures
                .insert(name, "execution did not complete within the deadline".to_string());
        }
    }
    report
}

/// Run one statement on one named datasource (with the registry's name
/// fallback rules). Returns a single-entry report.
pub async fn run_on_one(registry: &DatasourceRegistry, name: &str, sql: &str) -> FanoutReport {
    let mut report = FanoutReport::default();
    // Report under the resolved target so name fallback is visible.
    let (resolved, pool) = match registry.resolve_entry(name) {
        Ok((resolved, pool)) => (resolved.to_string(), pool),
        Err(e) => {
            report.failures.insert(name.to_string(), e.to_string());
            return report;
        }
    };
    match executor::execute(pool, sql).await {
        QueryOutcome::Failure(msg) => {
            report.failures.insert(resolved, msg);
        }
        outcome => {
            report.results.insert(resolved, outcome.to_json());
        }
    }
    report
}

/// Run one statement on the default datasource.
pub async fn run_on_default(registry: &DatasourceRegistry, sql: &str) -> DefaultRun {
    let pool = match registry.default_pool() {
        Ok(pool) => pool,
        Err(_) => return DefaultRun::NoDatasource,
    };
    match executor::execute(pool, sql).await {
        QueryOutcome::Rows(rows) if rows.is_empty() => DefaultRun::NoRows,
        outcome => DefaultRun::Outcome(outcome),
    }
}
