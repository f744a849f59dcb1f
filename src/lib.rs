//! Multi-Datasource SQL MCP Server Library
//!
//! This library provides MCP (Model Context Protocol) tools for AI assistants
//! to run SQL against several configured datasources at once, behind a
//! keyword security gate, and to run small extension scripts over the
//! results.

pub mod config;
pub mod db;
pub mod dialect;
pub mod error;
pub mod extensions;
pub mod mcp;
pub mod registry;
pub mod security;
pub mod transport;

pub use config::{Cli, FileConfig};
pub use error::ServerError;
pub use mcp::GatewayService;
pub use registry::DatasourceRegistry;
