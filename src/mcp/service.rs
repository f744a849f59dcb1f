//! MCP service implementation using rmcp.
//!
//! This module defines the GatewayService struct with all SQL and extension
//! tools exposed via the MCP protocol using the rmcp framework's macros.
//! Every SQL path goes through the security gate first; a rejected statement
//! returns the gate's diagnostic object in place of execution, never a
//! protocol error.

use crate::db::fanout::{self, DefaultRun};
use crate::extensions::{ExtensionRunner, ExtensionSummary};
use crate::registry::{DatasourceRegistry, DatasourceSummary};
use crate::security::SqlSecurityPolicy;
use rmcp::Json;
use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::tool::ToolRouter,
    handler::server::wrapper::Parameters,
    model::{Implementation, ProtocolVersion, ServerCapabilities, ServerInfo},
    schemars::JsonSchema,
    tool, tool_handler, tool_router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Input for tools that take only a SQL statement.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct SqlInput {
    /// SQL statement to execute (one statement, no parameter placeholders)
    pub sql: String,
}

/// Input for execute_sql_with_datasource.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct SqlOnDatasourceInput {
    /// Target datasource name. Empty, "primary", and unknown names resolve
    /// to the default datasource.
    #[serde(default)]
    pub datasource_name: String,
    /// SQL statement to execute
    pub sql: String,
}

/// Input for run_extension.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct RunExtensionInput {
    /// Extension name as returned by list_extensions
    pub name: String,
    /// Input text handed to the extension
    pub input: String,
}

/// Output for the list_datasources tool.
#[derive(Debug, Serialize, JsonSchema)]
pub struct ListDatasourcesOutput {
    /// Available datasources, sorted by name
    pub datasources: Vec<DatasourceSummary>,
    /// Name of the default datasource
    pub default: String,
    /// Number of datasources
    pub count: usize,
}

/// Output for the list_extensions tool.
#[derive(Debug, Serialize, JsonSchema)]
pub struct ListExtensionsOutput {
    /// Configured extensions in declaration order
    pub extensions: Vec<ExtensionSummary>,
    /// Number of extensions
    pub count: usize,
}

#[derive(Clone)]
pub struct GatewayService {
    /// Immutable datasource registry shared across tool calls
    registry: Arc<DatasourceRegistry>,
    /// SQL security gate applied to every execution path
    security: Arc<SqlSecurityPolicy>,
    /// Extension runner
    extensions: Arc<ExtensionRunner>,
    /// Tool router for MCP tool dispatch (auto-generated)
    tool_router: ToolRouter<Self>,
}

impl GatewayService {
    pub fn new(
        registry: Arc<DatasourceRegistry>,
        security: Arc<SqlSecurityPolicy>,
        extensions: Arc<ExtensionRunner>,
    ) -> Self {
        Self {
            registry,
            security,
            extensions,
            tool_router: Self::tool_router(),
        }
    }

    /// Run the statement through the security gate. `Err` carries the
    /// diagnostic payload to return to the caller in place of execution.
    fn gate(&self, sql: &str) -> Result<(), serde_json::Value> {
        let result = self.security.validate(sql);
        if result.valid {
            Ok(())
        } else {
            Err(self.security.diagnostic(&result))
        }
    }
}

#[tool_router]
impl GatewayService {
    #[tool(
        description = "List all configured datasources.\nReturns names, detected dialects, drivers, and which datasource is the default."
    )]
    pub async fn list_datasources(&self) -> Json<ListDatasourcesOutput> {
        let datasources = self.registry.describe_all();
        let count = datasources.len();
        Json(ListDatasourcesOutput {
            datasources,
            default: self.registry.default_name().to_string(),
            count,
        })
    }

    #[tool(
        description = "Execute a SQL statement on the default datasource.\nReturns rows as JSON objects, or {affected_rows} for statements without a result set.\nBlocked statements return a diagnostic with the detected keyword instead of executing."
    )]
    pub async fn execute_sql_on_default(
        &self,
        Parameters(input): Parameters<SqlInput>,
    ) -> Json<serde_json::Value> {
        if let Err(diagnostic) = self.gate(&input.sql) {
            return Json(diagnostic);
        }
        let value = match fanout::run_on_default(&self.registry, &input.sql).await {
            DefaultRun::NoDatasource => serde_json::json!({
                "error": "No datasources are configured"
            }),
            DefaultRun::NoRows => serde_json::json!({
                "message": "Query matched no rows on the default datasource. \
                            Use execute_sql to query every datasource.",
                "rows": []
            }),
            DefaultRun::Outcome(outcome) => outcome.to_json(),
        };
        Json(value)
    }

    #[tool(
        description = "Execute a SQL statement on every datasource concurrently.\nReturns {results: {name: data}, failures: {name: reason}}. A failing datasource appears in failures; the rest still return data.\nBlocked statements return a diagnostic with the detected keyword instead of executing."
    )]
    pub async fn execute_sql(
        &self,
        Parameters(input): Parameters<SqlInput>,
    ) -> Json<serde_json::Value> {
        if let Err(diagnostic) = self.gate(&input.sql) {
            return Json(diagnostic);
        }
        let report = fanout::run_on_all(&self.registry, &input.sql).await;
        Json(report.to_json())
    }

    #[tool(
        description = "Execute a SQL statement on one named datasource.\nCall list_datasources for valid names; empty, \"primary\", and unknown names resolve to the default.\nReturns a single-entry {results} or {failures} map keyed by the resolved datasource.\nBlocked statements return a diagnostic with the detected keyword instead of executing."
    )]
    pub async fn execute_sql_with_datasource(
        &self,
        Parameters(input): Parameters<SqlOnDatasourceInput>,
    ) -> Json<serde_json::Value> {
        if let Err(diagnostic) = self.gate(&input.sql) {
            return Json(diagnostic);
        }
        let report = fanout::run_on_one(&self.registry, &input.datasource_name, &input.sql).await;
        Json(report.to_json())
    }

    #[tool(
        description = "List all configured extensions.\nReturns names, descriptions, and usage prompts for run_extension."
    )]
    pub async fn list_extensions(&self) -> Json<ListExtensionsOutput> {
        let extensions = self.extensions.list();
        let count = extensions.len();
        Json(ListExtensionsOutput { extensions, count })
    }

    #[tool(
        description = "Run a configured extension over an input string.\nThe extension receives the input and returns a JSON value.\nCall list_extensions first for available names and usage prompts."
    )]
    pub async fn run_extension(
        &self,
        Parameters(input): Parameters<RunExtensionInput>,
    ) -> Result<Json<serde_json::Value>, McpError> {
        self.extensions
            .run(&input.name, &input.input)
            .map(Json)
            .map_err(McpError::from)
    }
}

#[tool_handler]
impl ServerHandler for GatewayService {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2025_03_26,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "multidb-mcp-server".to_owned(),
                title: Some("Multi-Datasource SQL MCP Server".to_owned()),
                version: env!("CARGO_PKG_VERSION").to_owned(),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "SQL tools over multiple configured datasources, plus extension scripts.\n\
                \n\
                ## Workflow\n\
                1. Call `list_datasources` to see available datasources and the default\n\
                2. `execute_sql_on_default` targets the default datasource only\n\
                3. `execute_sql` runs the statement on every datasource concurrently\n\
                4. `execute_sql_with_datasource` targets one datasource by name\n\
                \n\
                ## Results\n\
                - Row-producing statements return arrays of column->value objects\n\
                - Other statements return {affected_rows}\n\
                - Fan-out tools return {results, failures} keyed by datasource name;\n\
                  a failure on one datasource does not discard the others\n\
                \n\
                ## SQL security\n\
                Statements containing configured dangerous keywords (UPDATE, DELETE,\n\
                DROP, ...) are blocked before execution and return\n\
                {error, detected_keyword, sql_security_enabled}. The policy is set in\n\
                the server configuration and needs a restart to change.\n\
                \n\
                ## Extensions\n\
                Call `list_extensions` for available extensions and their usage\n\
                prompts, then `run_extension` with a name and input string."
                    .to_string(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SqlSecurityConfig;

    fn create_test_service() -> GatewayService {
        let registry = Arc::new(DatasourceRegistry::from_pools(Vec::new(), "none"));
        let security = Arc::new(SqlSecurityPolicy::from_config(&SqlSecurityConfig::default()));
        let extensions = Arc::new(ExtensionRunner::new(Vec::new()));
        GatewayService::new(registry, security, extensions)
    }

    #[test]
    fn test_service_creation() {
        let _service = create_test_service();
    }

    #[test]
    fn test_gate_passes_select() {
        let service = create_test_service();
        assert!(service.gate("SELECT 1").is_ok());
    }

    #[test]
    fn test_gate_diagnostic_shape() {
        let service = create_test_service();
        let diagnostic = service.gate("DROP TABLE users").unwrap_err();
        assert_eq!(diagnostic["detected_keyword"], "drop");
        assert_eq!(diagnostic["sql_security_enabled"], true);
    }

    #[test]
    fn test_server_info() {
        let service = create_test_service();
        let info = service.get_info();
        assert!(!info.server_info.name.is_empty());
        assert!(info.capabilities.tools.is_some());
        assert!(info.instructions.unwrap().contains("list_datasources"));
    }
}
