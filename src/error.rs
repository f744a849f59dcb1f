//! Error types for the multi-datasource MCP server.
//!
//! This module defines all error types using `thiserror` for ergonomic error
//! handling. Security rejections and per-datasource execution failures are
//! deliberately *not* represented here: those are structured values returned
//! to the caller (see `security` and `db::executor`). The variants below
//! cover configuration, connection, extension, and internal failures.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Configuration error for datasource '{datasource}': {message}")]
    Config { datasource: String, message: String },

    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Database error: {message}")]
    Database {
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
        suggestion: String,
    },

    #[error("No datasources are configured")]
    NoDatasources,

    #[error("Extension not found: {name}")]
    ExtensionNotFound { name: String },

    #[error("Extension '{name}' evaluation failed: {message}")]
    ExtensionEval { name: String, message: String },

    #[error("Extension '{name}' environment setup failed: {message}")]
    ExtensionEnv { name: String, message: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl ServerError {
    /// Create a configuration error naming the offending datasource.
    pub fn config(datasource: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config {
            datasource: datasource.into(),
            message: message.into(),
        }
    }

    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a database error with optional SQL state.
    pub fn database(
        message: impl Into<String>,
        sql_state: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
            suggestion: suggestion.into(),
        }
    }

    /// Create an extension not-found error (caller error).
    pub fn extension_not_found(name: impl Into<String>) -> Self {
        Self::ExtensionNotFound { name: name.into() }
    }

    /// Create an extension evaluation error (a bug in the extension script).
    pub fn extension_eval(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExtensionEval {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create an extension environment-setup error (deployment problem).
    pub fn extension_env(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExtensionEnv {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Database { suggestion, .. } => Some(suggestion),
            _ => None,
        }
    }
}

/// Convert sqlx errors to ServerError.
impl From<sqlx::Error> for ServerError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => ServerError::connection(
                msg.to_string(),
                "Check the connection string format and credentials",
            ),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                ServerError::database(
                    db_err.message(),
                    code,
                    "Check the SQL syntax and referenced objects",
                )
            }
            sqlx::Error::PoolTimedOut => ServerError::connection(
                "Timed out acquiring a connection from the pool",
                "Check pool sizing and database availability",
            ),
            sqlx::Error::PoolClosed => {
                ServerError::connection("Connection pool is closed", "Restart the server")
            }
            sqlx::Error::Io(io_err) => ServerError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => ServerError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => ServerError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            _ => ServerError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Result type alias for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Build suggestion data as JSON value.
fn suggestion_data(suggestion: Option<&str>) -> Option<serde_json::Value> {
    suggestion.map(|s| serde_json::json!({ "suggestion": s }))
}

/// Convert ServerError to MCP ErrorData for semantic error categorization.
/// Includes the suggestion field in the `data` object when available.
impl From<ServerError> for rmcp::ErrorData {
    fn from(err: ServerError) -> Self {
        match &err {
            // InvalidInput, ExtensionEval -> invalid_params (the caller or the
            // script it asked for is at fault)
            ServerError::InvalidInput { .. } | ServerError::ExtensionEval { .. } => {
                rmcp::ErrorData::invalid_params(err.to_string(), suggestion_data(err.suggestion()))
            }

            // ExtensionNotFound -> resource_not_found, with a pointer at the
            // listing tool so the agent can recover
            ServerError::ExtensionNotFound { .. } => rmcp::ErrorData::resource_not_found(
                err.to_string(),
                suggestion_data(Some("Call list_extensions to see available extensions")),
            ),

            ServerError::NoDatasources => rmcp::ErrorData::resource_not_found(
                err.to_string(),
                suggestion_data(Some("Configure at least one datasource and restart")),
            ),

            // Database errors -> invalid_params with sql_state in message
            ServerError::Database {
                message,
                sql_state,
                suggestion,
            } => {
                let msg = match sql_state {
                    Some(code) => format!("{} (SQLSTATE: {})", message, code),
                    None => message.clone(),
                };
                rmcp::ErrorData::invalid_params(msg, suggestion_data(Some(suggestion)))
            }

            // Config, Connection, ExtensionEnv, Internal -> internal_error
            ServerError::Config { .. }
            | ServerError::Connection { .. }
            | ServerError::ExtensionEnv { .. }
            | ServerError::Internal { .. } => {
                rmcp::ErrorData::internal_error(err.to_string(), suggestion_data(err.suggestion()))
            }
        }
    }
}
