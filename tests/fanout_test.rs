//! Integration tests for fan-out execution across datasources.
//!
//! These tests run one statement over several real SQLite datasources with
//! divergent schemas and verify the report contract: the results and
//! failures maps are keyed by datasource name, their key sets are disjoint,
//! and a failing datasource never takes down the rest.

use multidb_mcp_server::config::FileConfig;
use multidb_mcp_server::db::QueryOutcome;
use multidb_mcp_server::db::fanout::{self, DefaultRun};
use multidb_mcp_server::registry::DatasourceRegistry;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Registry over file-backed SQLite datasources, one per name, with the
/// first name as the default.
async fn sqlite_registry(dir: &TempDir, names: &[&str]) -> Arc<DatasourceRegistry> {
    let mut toml = String::new();
    for name in names {
        toml.push_str(&format!(
            "[[datasources]]\nname = \"{}\"\nurl = \"sqlite:{}/{}.db\"\n\n",
            name,
            dir.path().display(),
            name
        ));
    }
    let config = FileConfig::from_toml(&toml).unwrap();
    Arc::new(
        DatasourceRegistry::build(&config, CONNECT_TIMEOUT)
            .await
            .unwrap(),
    )
}

/// Seed one datasource with a table, via the same execution path the tools
/// use.
async fn seed(registry: &DatasourceRegistry, name: &str, statements: &[&str]) {
    let pool = registry.resolve(name).unwrap();
    for sql in statements {
        let outcome = multidb_mcp_server::db::executor::execute(pool, sql).await;
        assert!(!outcome.is_failure(), "seeding {name} failed: {outcome:?}");
    }
}

// =========================================================================
// Fan-out across all datasources
// =========================================================================

#[tokio::test]
async fn test_fanout_collects_results_from_every_datasource() {
    let dir = TempDir::new().unwrap();
    let registry = sqlite_registry(&dir, &["east", "west", "north"]).await;

    let report = fanout::run_on_all(&registry, "SELECT 1 AS alive").await;

    assert_eq!(report.results.len(), 3);
    assert!(report.failures.is_empty());
    for name in ["east", "west", "north"] {
        assert_eq!(
            report.results[name],
            serde_json::json!([{"alive": 1}]),
            "unexpected result for {name}"
        );
    }
    registry.close_all().await;
}

#[tokio::test]
async fn test_fanout_partial_failure_keeps_other_results() {
    let dir = TempDir::new().unwrap();
    let registry = sqlite_registry(&dir, &["with_table", "without_table"]).await;
    seed(
        &registry,
        "with_table",
        &[
            "CREATE TABLE orders (id INTEGER PRIMARY KEY, total REAL)",
            "INSERT INTO orders (id, total) VALUES (1, 9.5), (2, 20.0)",
        ],
    )
    .await;

    let report = fanout::run_on_all(&registry, "SELECT id, total FROM orders ORDER BY id").await;

    assert!(report.results.contains_key("with_table"));
    assert!(report.failures.contains_key("without_table"));
    assert_eq!(report.results.len() + report.failures.len(), 2);
    assert_eq!(
        report.results["with_table"],
        serde_json::json!([{"id": 1, "total": 9.5}, {"id": 2, "total": 20.0}])
    );
    registry.close_all().await;
}

#[tokio::test]
async fn test_fanout_report_json_shape() {
    let dir = TempDir::new().unwrap();
    let registry = sqlite_registry(&dir, &["only"]).await;

    let report = fanout::run_on_all(&registry, "SELECT 'x' AS v").await;
    let json = report.to_json();

    assert!(json["results"].is_object());
    assert!(json["failures"].is_object());
    assert_eq!(json["results"]["only"], serde_json::json!([{"v": "x"}]));
    registry.close_all().await;
}

#[tokio::test]
async fn test_fanout_exceeding_worker_cap_still_covers_all() {
    let dir = TempDir::new().unwrap();
    // More datasources than MAX_FANOUT_WORKERS so the semaphore actually
    // queues some of them.
    let names = ["d1", "d2", "d3", "d4", "d5", "d6", "d7"];
    assert!(names.len() > fanout::MAX_FANOUT_WORKERS);
    let registry = sqlite_registry(&dir, &names).await;

    let report = fanout::run_on_all(&registry, "SELECT 1 AS n").await;
    assert_eq!(report.results.len(), names.len());
    assert!(report.failures.is_empty());
    registry.close_all().await;
}

// =========================================================================
// Single-target execution
// =========================================================================

#[tokio::test]
async fn test_single_target_write_reports_affected_rows() {
    let dir = TempDir::new().unwrap();
    let registry = sqlite_registry(&dir, &["main"]).await;
    seed(&registry, "main", &["CREATE TABLE t (x INTEGER)"]).await;

    let report = fanout::run_on_one(&registry, "main", "INSERT INTO t VALUES (1), (2)").await;
    assert_eq!(
        report.results["main"],
        serde_json::json!({"affected_rows": 2})
    );
    registry.close_all().await;
}

#[tokio::test]
async fn test_single_target_unknown_name_lands_on_default() {
    let dir = TempDir::new().unwrap();
    let registry = sqlite_registry(&dir, &["main", "replica"]).await;

    let report = fanout::run_on_one(&registry, "misspelled", "SELECT 1 AS n").await;
    // The report is keyed by the resolved target, not the requested name.
    assert!(report.results.contains_key("main"));
    assert!(!report.results.contains_key("misspelled"));
    registry.close_all().await;
}

#[tokio::test]
async fn test_default_run_distinguishes_empty_from_missing() {
    let dir = TempDir::new().unwrap();
    let registry = sqlite_registry(&dir, &["main"]).await;
    seed(&registry, "main", &["CREATE TABLE empty_t (x INTEGER)"]).await;

    match fanout::run_on_default(&registry, "SELECT x FROM empty_t").await {
        DefaultRun::NoRows => {}
        other => panic!("empty result set should be NoRows, got {other:?}"),
    }

    let empty = Arc::new(DatasourceRegistry::from_pools(Vec::new(), "none"));
    match fanout::run_on_default(&empty, "SELECT 1").await {
        DefaultRun::NoDatasource => {}
        other => panic!("no datasources should be NoDatasource, got {other:?}"),
    }
    registry.close_all().await;
}

#[tokio::test]
async fn test_default_run_returns_rows_in_column_order() {
    let dir = TempDir::new().unwrap();
    let registry = sqlite_registry(&dir, &["main"]).await;

    match fanout::run_on_default(&registry, "SELECT 1 AS zulu, 2 AS alpha").await {
        DefaultRun::Outcome(QueryOutcome::Rows(rows)) => {
            let keys: Vec<&String> = rows[0].keys().collect();
            // SELECT order, not alphabetical.
            assert_eq!(keys, ["zulu", "alpha"]);
        }
        other => panic!("expected rows, got {other:?}"),
    }
    registry.close_all().await;
}
