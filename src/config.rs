//! Configuration handling for the multi-datasource MCP server.
//!
//! Two layers: a `clap`-derived CLI surface (transport, bind address, config
//! file path, logging) and a TOML configuration file describing datasources,
//! the SQL security policy, and extensions. Datasources are an array of
//! tables so declaration order is preserved; the first declared datasource is
//! the default unless one carries `default = true`. When no config path is
//! given (or the file is unreadable), a bundled default configuration is
//! used.

use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::error::{ServerError, ServerResult};

pub const DEFAULT_HTTP_HOST: &str = "127.0.0.1";
pub const DEFAULT_HTTP_PORT: u16 = 8080;
pub const DEFAULT_MCP_ENDPOINT: &str = "/";
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

// Pool tuning defaults per datasource
pub const DEFAULT_MAX_POOL_SIZE: u32 = 10;
pub const DEFAULT_MIN_IDLE: u32 = 5;

/// Configuration bundled into the binary, used when no file is supplied.
pub const BUNDLED_DEFAULT_CONFIG: &str = include_str!("../config/default.toml");

/// Transport mode for the MCP server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum TransportMode {
    /// Standard input/output (for CLI integration)
    #[default]
    Stdio,
    /// Streamable HTTP (for web clients)
    Http,
}

impl std::fmt::Display for TransportMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stdio => write!(f, "stdio"),
            Self::Http => write!(f, "http"),
        }
    }
}

/// Command-line configuration for the server process.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "multidb-mcp-server",
    about = "MCP server for multi-datasource SQL access with fan-out queries and script extensions",
    version,
    author
)]
pub struct Cli {
    /// Path to the TOML configuration file. Falls back to the bundled
    /// default configuration when omitted or unreadable.
    #[arg(short, long, value_name = "PATH", env = "MCP_CONFIG")]
    pub config: Option<String>,

    /// Transport mode (stdio or http)
    #[arg(
        short,
        long,
        value_enum,
        default_value = "stdio",
        env = "MCP_TRANSPORT"
    )]
    pub transport: TransportMode,

    /// HTTP host to bind to (only used with http transport)
    #[arg(
        long,
        default_value = DEFAULT_HTTP_HOST,
        env = "MCP_HTTP_HOST"
    )]
    pub http_host: String,

    /// HTTP port to bind to (only used with http transport).
    /// When occupied, the server falls back to an OS-assigned free port.
    #[arg(
        long,
        default_value_t = DEFAULT_HTTP_PORT,
        env = "MCP_HTTP_PORT"
    )]
    pub http_port: u16,

    /// MCP endpoint path (only used with http transport)
    #[arg(
        long,
        default_value = DEFAULT_MCP_ENDPOINT,
        env = "MCP_ENDPOINT"
    )]
    pub mcp_endpoint: String,

    /// Connection timeout in seconds
    #[arg(
        long,
        default_value_t = DEFAULT_CONNECT_TIMEOUT_SECS,
        env = "MCP_CONNECT_TIMEOUT"
    )]
    pub connect_timeout: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "MCP_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "MCP_JSON_LOGS")]
    pub json_logs: bool,

    /// Enable logging output (disabled by default to avoid interfering with stdio transport)
    #[arg(long, env = "MCP_ENABLE_LOGS")]
    pub enable_logs: bool,
}

impl Cli {
    /// Parse configuration from command line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Create a default CLI configuration (useful for testing).
    pub fn default_config() -> Self {
        Self {
            config: None,
            transport: TransportMode::Stdio,
            http_host: DEFAULT_HTTP_HOST.to_string(),
            http_port: DEFAULT_HTTP_PORT,
            mcp_endpoint: DEFAULT_MCP_ENDPOINT.to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT_SECS,
            log_level: "info".to_string(),
            json_logs: false,
            enable_logs: false,
        }
    }

    /// Get the HTTP bind address.
    pub fn http_bind_addr(&self) -> String {
        format!("{}:{}", self.http_host, self.http_port)
    }

    /// Get the connection timeout as a Duration.
    pub fn connect_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }
}

impl Default for Cli {
    fn default() -> Self {
        Self::default_config()
    }
}

/// One configured datasource. Order in the file matters: the first declared
/// datasource is the implicit default.
#[derive(Debug, Clone, Deserialize)]
pub struct DatasourceConfig {
    /// Logical name used by clients to address this datasource.
    pub name: String,
    /// Connection URL (sensitive - not logged).
    pub url: String,
    /// Username, when not embedded in the URL.
    #[serde(default)]
    pub username: Option<String>,
    /// Password, when not embedded in the URL (sensitive - not logged).
    #[serde(default)]
    pub password: Option<String>,
    /// Maximum connections in the pool (default: 10)
    #[serde(default)]
    pub max_pool_size: Option<u32>,
    /// Minimum idle connections kept in the pool (default: 5)
    #[serde(default)]
    pub min_idle: Option<u32>,
    /// Pool-specific tuning, overriding the built-in pool defaults.
    #[serde(default)]
    pub pool: PoolTuningConfig,
    /// Marks this datasource as the default. At most one may set this.
    #[serde(default)]
    pub default: bool,
}

/// Optional per-datasource pool tuning, written as a nested
/// `[datasources.pool]` table. Unset fields keep the built-in defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PoolTuningConfig {
    /// Seconds an idle connection is kept before being closed.
    #[serde(default)]
    pub idle_timeout_secs: Option<u64>,
    /// Seconds to wait for a free connection. Defaults to the connect
    /// timeout when unset.
    #[serde(default)]
    pub acquire_timeout_secs: Option<u64>,
    /// Seconds a connection may live before being recycled. Unset means
    /// connections are kept until they idle out.
    #[serde(default)]
    pub max_lifetime_secs: Option<u64>,
    /// Whether connections are checked for liveness before being handed out.
    #[serde(default)]
    pub test_before_acquire: Option<bool>,
}

impl DatasourceConfig {
    pub fn max_pool_size_or_default(&self) -> u32 {
        self.max_pool_size.unwrap_or(DEFAULT_MAX_POOL_SIZE)
    }

    pub fn min_idle_or_default(&self) -> u32 {
        self.min_idle.unwrap_or(DEFAULT_MIN_IDLE)
    }

    /// Validate the datasource entry and return an error message if invalid.
    fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("datasource name must not be blank".to_string());
        }
        if self.url.trim().is_empty() {
            return Err("datasource url must not be blank".to_string());
        }
        if let Some(max) = self.max_pool_size {
            if max == 0 {
                return Err("max_pool_size must be greater than 0".to_string());
            }
            if let Some(min) = self.min_idle {
                if min > max {
                    return Err(format!(
                        "min_idle ({}) cannot exceed max_pool_size ({})",
                        min, max
                    ));
                }
            }
        }
        Ok(())
    }
}

/// SQL security policy section.
#[derive(Debug, Clone, Deserialize)]
pub struct SqlSecurityConfig {
    /// Whether the keyword gate is applied at all (default: true).
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Keywords rejected when they appear as whole words. Checked in order;
    /// the first hit wins. `None` means the built-in default list.
    #[serde(default)]
    pub dangerous_keywords: Option<Vec<String>>,
}

impl Default for SqlSecurityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dangerous_keywords: None,
        }
    }
}

fn default_true() -> bool {
    true
}

/// One configured extension script.
#[derive(Debug, Clone, Deserialize)]
pub struct ExtensionConfig {
    /// Name clients use to invoke the extension.
    pub name: String,
    /// Inline script body. Mutually exclusive with `script_dir`.
    #[serde(default)]
    pub script: Option<String>,
    /// Directory holding the script entry file.
    #[serde(default)]
    pub script_dir: Option<String>,
    /// Entry file name within `script_dir` (default: main.rhai).
    #[serde(default)]
    pub entry: Option<String>,
    /// Directory of modules the script may import.
    #[serde(default)]
    pub module_dir: Option<String>,
    /// Capability names the script requires from the host.
    #[serde(default)]
    pub requires: Vec<String>,
    /// Human description surfaced through list_extensions.
    #[serde(default)]
    pub description: Option<String>,
    /// Usage prompt surfaced through list_extensions.
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl ExtensionConfig {
    pub const DEFAULT_ENTRY: &'static str = "main.rhai";

    pub fn entry_or_default(&self) -> &str {
        self.entry.as_deref().unwrap_or(Self::DEFAULT_ENTRY)
    }

    fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("extension name must not be blank".to_string());
        }
        match (&self.script, &self.script_dir) {
            (None, None) => Err(format!(
                "extension '{}' needs either 'script' or 'script_dir'",
                self.name
            )),
            (Some(_), Some(_)) => Err(format!(
                "extension '{}' must not set both 'script' and 'script_dir'",
                self.name
            )),
            _ => Ok(()),
        }
    }
}

/// The full file configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub datasources: Vec<DatasourceConfig>,
    #[serde(default)]
    pub sql_security: SqlSecurityConfig,
    #[serde(default)]
    pub extensions: Vec<ExtensionConfig>,
}

impl FileConfig {
    /// Parse a TOML document into a validated configuration.
    pub fn from_toml(text: &str) -> ServerResult<Self> {
        let config: FileConfig = toml::from_str(text)
            .map_err(|e| ServerError::internal(format!("Invalid configuration file: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from an optional path, falling back to the bundled
    /// default when the path is absent or the file cannot be read.
    pub fn load(path: Option<&str>) -> ServerResult<Self> {
        match path {
            Some(p) if Path::new(p).is_file() => {
                let text = std::fs::read_to_string(p).map_err(|e| {
                    ServerError::internal(format!("Cannot read configuration file '{p}': {e}"))
                })?;
                tracing::info!(path = p, "loaded configuration file");
                Self::from_toml(&text)
            }
            Some(p) => {
                tracing::warn!(path = p, "configuration file not found, using bundled default");
                Self::from_toml(BUNDLED_DEFAULT_CONFIG)
            }
            None => {
                tracing::info!("no configuration path given, using bundled default");
                Self::from_toml(BUNDLED_DEFAULT_CONFIG)
            }
        }
    }

    /// Index of the default datasource: the one flagged `default = true`,
    /// otherwise the first in declaration order.
    pub fn default_datasource_index(&self) -> Option<usize> {
        if self.datasources.is_empty() {
            return None;
        }
        Some(
            self.datasources
                .iter()
                .position(|d| d.default)
                .unwrap_or(0),
        )
    }

    fn validate(&self) -> ServerResult<()> {
        for ds in &self.datasources {
            ds.validate()
                .map_err(|msg| ServerError::config(ds.name.clone(), msg))?;
        }
        let flagged = self.datasources.iter().filter(|d| d.default).count();
        if flagged > 1 {
            return Err(ServerError::internal(
                "at most one datasource may set default = true",
            ));
        }
        let mut names: Vec<&str> = self.datasources.iter().map(|d| d.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        if names.len() != self.datasources.len() {
            return Err(ServerError::internal("datasource names must be unique"));
        }
        for ext in &self.extensions {
            ext.validate().map_err(ServerError::internal)?;
        }
        Ok(())
    }
}
