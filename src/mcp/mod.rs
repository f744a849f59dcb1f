//! MCP server integration module.
//!
//! This module wires the datasource registry, security gate, and extension
//! runner into MCP tools using the rmcp framework.

pub mod service;

pub use service::GatewayService;
