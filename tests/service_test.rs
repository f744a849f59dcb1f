//! End-to-end tests for the MCP tool surface.
//!
//! These tests wire a full GatewayService over real SQLite datasources and
//! call the tools the way the MCP router does: discover datasources, run SQL
//! on the default, fan out across all, and hit the security gate. Blocked
//! statements must come back as diagnostic payloads, not protocol errors.

use multidb_mcp_server::config::{FileConfig, SqlSecurityConfig};
use multidb_mcp_server::extensions::ExtensionRunner;
use multidb_mcp_server::mcp::GatewayService;
use multidb_mcp_server::mcp::service::{RunExtensionInput, SqlInput, SqlOnDatasourceInput};
use multidb_mcp_server::registry::DatasourceRegistry;
use multidb_mcp_server::security::SqlSecurityPolicy;
use rmcp::handler::server::wrapper::{Json, Parameters};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Build a service over file-backed SQLite datasources, seeding the default
/// one with an orders table.
async fn setup_service(dir: &TempDir) -> GatewayService {
    let toml = format!(
        r#"
        [[datasources]]
        name = "sales"
        url = "sqlite:{0}/sales.db"

        [[datasources]]
        name = "archive"
        url = "sqlite:{0}/archive.db"

        [[extensions]]
        name = "shout"
        script = 'input.to_upper()'
        "#,
        dir.path().display()
    );
    let config = FileConfig::from_toml(&toml).unwrap();
    let registry = Arc::new(
        DatasourceRegistry::build(&config, Duration::from_secs(5))
            .await
            .unwrap(),
    );

    // Seed below the tool layer so the dangerous-keyword gate stays out of
    // the way.
    let pool = registry.resolve("sales").unwrap();
    for sql in [
        "CREATE TABLE orders (id INTEGER PRIMARY KEY, item TEXT, total REAL)",
        "INSERT INTO orders (id, item, total) VALUES (1, 'widget', 9.5), (2, 'gadget', 20.0)",
    ] {
        let outcome = multidb_mcp_server::db::executor::execute(pool, sql).await;
        assert!(!outcome.is_failure(), "seed failed: {outcome:?}");
    }

    GatewayService::new(
        registry,
        Arc::new(SqlSecurityPolicy::from_config(&config.sql_security)),
        Arc::new(ExtensionRunner::new(config.extensions)),
    )
}

#[tokio::test]
async fn test_list_datasources_reports_default_and_dialects() {
    let dir = TempDir::new().unwrap();
    let service = setup_service(&dir).await;

    let output = service.list_datasources().await.0;
    assert_eq!(output.count, 2);
    assert_eq!(output.default, "sales");
    // Sorted by name.
    assert_eq!(output.datasources[0].name, "archive");
    assert_eq!(output.datasources[1].name, "sales");
    assert!(output.datasources[1].is_default);
    assert_eq!(output.datasources[1].dialect, "SQLite");
}

#[tokio::test]
async fn test_default_scoped_select_returns_rows() {
    let dir = TempDir::new().unwrap();
    let service = setup_service(&dir).await;

    let value = service
        .execute_sql_on_default(Parameters(SqlInput {
            sql: "SELECT item, total FROM orders ORDER BY id".to_string(),
        }))
        .await
        .0;

    assert_eq!(
        value,
        serde_json::json!([
            {"item": "widget", "total": 9.5},
            {"item": "gadget", "total": 20.0},
        ])
    );
}

#[tokio::test]
async fn test_default_scoped_empty_result_suggests_fanout() {
    let dir = TempDir::new().unwrap();
    let service = setup_service(&dir).await;

    let value = service
        .execute_sql_on_default(Parameters(SqlInput {
            sql: "SELECT * FROM orders WHERE total > 1000".to_string(),
        }))
        .await
        .0;

    assert_eq!(value["rows"], serde_json::json!([]));
    assert!(
        value["message"].as_str().unwrap().contains("execute_sql"),
        "empty default result should point at the fan-out tool"
    );
}

#[tokio::test]
async fn test_fanout_tool_returns_results_and_failures() {
    let dir = TempDir::new().unwrap();
    let service = setup_service(&dir).await;

    // The orders table only exists on "sales"; "archive" must fail without
    // discarding the sales result.
    let value = service
        .execute_sql(Parameters(SqlInput {
            sql: "SELECT count(*) AS n FROM orders".to_string(),
        }))
        .await
        .0;

    assert_eq!(value["results"]["sales"], serde_json::json!([{"n": 2}]));
    assert!(value["failures"]["archive"].is_string());
    assert!(value["results"].get("archive").is_none());
}

#[tokio::test]
async fn test_named_datasource_tool_resolves_aliases() {
    let dir = TempDir::new().unwrap();
    let service = setup_service(&dir).await;

    for requested in ["", "primary", "sales", "no-such-datasource"] {
        let value = service
            .execute_sql_with_datasource(Parameters(SqlOnDatasourceInput {
                datasource_name: requested.to_string(),
                sql: "SELECT 1 AS ok".to_string(),
            }))
            .await
            .0;
        assert_eq!(
            value["results"]["sales"],
            serde_json::json!([{"ok": 1}]),
            "requested {requested:?} should resolve to the default"
        );
    }
}

#[tokio::test]
async fn test_dangerous_statement_blocked_with_diagnostic() {
    let dir = TempDir::new().unwrap();
    let service = setup_service(&dir).await;

    let value = service
        .execute_sql_on_default(Parameters(SqlInput {
            sql: "DROP TABLE orders".to_string(),
        }))
        .await
        .0;

    assert_eq!(value["detected_keyword"], "drop");
    assert_eq!(value["sql_security_enabled"], true);
    assert!(value["error"].as_str().unwrap().contains("drop"));

    // The table is still there.
    let check = service
        .execute_sql_on_default(Parameters(SqlInput {
            sql: "SELECT count(*) AS n FROM orders".to_string(),
        }))
        .await
        .0;
    assert_eq!(check, serde_json::json!([{"n": 2}]));
}

#[tokio::test]
async fn test_gate_applies_to_every_sql_tool() {
    let dir = TempDir::new().unwrap();
    let service = setup_service(&dir).await;

    let fanout = service
        .execute_sql(Parameters(SqlInput {
            sql: "TRUNCATE TABLE orders".to_string(),
        }))
        .await
        .0;
    assert_eq!(fanout["detected_keyword"], "truncate");

    let named = service
        .execute_sql_with_datasource(Parameters(SqlOnDatasourceInput {
            datasource_name: "sales".to_string(),
            sql: "DELETE FROM orders".to_string(),
        }))
        .await
        .0;
    assert_eq!(named["detected_keyword"], "delete");
}

#[tokio::test]
async fn test_extension_listing_and_invocation() {
    let dir = TempDir::new().unwrap();
    let service = setup_service(&dir).await;

    let listed = service.list_extensions().await.0;
    assert_eq!(listed.count, 1);
    assert_eq!(listed.extensions[0].name, "shout");

    let result = service
        .run_extension(Parameters(RunExtensionInput {
            name: "shout".to_string(),
            input: "quiet".to_string(),
        }))
        .await
        .unwrap()
        .0;
    assert_eq!(result, serde_json::json!("QUIET"));
}

#[tokio::test]
async fn test_unknown_extension_is_protocol_error() {
    let dir = TempDir::new().unwrap();
    let service = setup_service(&dir).await;

    let err = service
        .run_extension(Parameters(RunExtensionInput {
            name: "ghost".to_string(),
            input: "x".to_string(),
        }))
        .await
        .map(|Json(value)| value)
        .unwrap_err();
    assert!(err.message.contains("ghost"));
}

#[tokio::test]
async fn test_disabled_gate_lets_writes_through() {
    let dir = TempDir::new().unwrap();
    let toml = format!(
        r#"
        [[datasources]]
        name = "rw"
        url = "sqlite:{}/rw.db"

        [sql_security]
        enabled = false
        "#,
        dir.path().display()
    );
    let config = FileConfig::from_toml(&toml).unwrap();
    let registry = Arc::new(
        DatasourceRegistry::build(&config, Duration::from_secs(5))
            .await
            .unwrap(),
    );
    let service = GatewayService::new(
        registry,
        Arc::new(SqlSecurityPolicy::from_config(&SqlSecurityConfig {
            enabled: false,
            dangerous_keywords: None,
        })),
        Arc::new(ExtensionRunner::new(Vec::new())),
    );

    let created = service
        .execute_sql_on_default(Parameters(SqlInput {
            sql: "CREATE TABLE notes (id INTEGER)".to_string(),
        }))
        .await
        .0;
    assert_eq!(created, serde_json::json!({"affected_rows": 0}));

    let inserted = service
        .execute_sql_on_default(Parameters(SqlInput {
            sql: "INSERT INTO notes VALUES (1), (2)".to_string(),
        }))
        .await
        .0;
    assert_eq!(inserted, serde_json::json!({"affected_rows": 2}));
}
