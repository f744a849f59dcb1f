//! HTTP transport with Streamable HTTP support for the MCP server.
//!
//! This transport uses HTTP with SSE streaming responses,
//! which is suitable for web-based MCP integrations. When the configured
//! port is already taken, the server falls back to an OS-assigned free port
//! instead of failing, and logs the address it actually bound.

use crate::error::ServerResult;
use crate::mcp::GatewayService;
use crate::registry::DatasourceRegistry;
use crate::transport::Transport;
use rmcp::transport::streamable_http_server::{
    StreamableHttpService, session::local::LocalSessionManager,
};
use std::io::ErrorKind;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};

/// HTTP transport implementation with Streamable HTTP support.
pub struct HttpTransport {
    service: GatewayService,
    registry: Arc<DatasourceRegistry>,
    /// Host to bind to
    host: String,
    /// Preferred port; an occupied port falls back to an OS-assigned one
    port: u16,
    /// MCP endpoint path
    endpoint: String,
}

impl HttpTransport {
    pub fn new(
        service: GatewayService,
        registry: Arc<DatasourceRegistry>,
        host: impl Into<String>,
        port: u16,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            service,
            registry,
            host: host.into(),
            port,
            endpoint: endpoint.into(),
        }
    }

    /// Get the preferred bind address.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Get the MCP endpoint path.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Bind the preferred port, falling back to an OS-assigned port when it
    /// is occupied.
    async fn bind(&self) -> ServerResult<TcpListener> {
        let preferred = self.bind_addr();
        match TcpListener::bind(&preferred).await {
            Ok(listener) => Ok(listener),
            Err(e) if e.kind() == ErrorKind::AddrInUse => {
                let fallback = format!("{}:0", self.host);
                let listener = TcpListener::bind(&fallback).await.map_err(|e| {
                    crate::error::ServerError::connection(
                        format!("Failed to bind to {}: {}", fallback, e),
                        "Check that the host address is valid",
                    )
                })?;
                let actual = listener
                    .local_addr()
                    .map(|a| a.to_string())
                    .unwrap_or(fallback);
                warn!(
                    preferred = %preferred,
                    actual = %actual,
                    "configured port is occupied, bound an OS-assigned port instead"
                );
                Ok(listener)
            }
            Err(e) => Err(crate::error::ServerError::connection(
                format!("Failed to bind to {}: {}", preferred, e),
                "Check that the host address is valid and the port is available",
            )),
        }
    }
}

impl Transport for HttpTransport {
    async fn run(&self) -> ServerResult<()> {
        info!("Starting MCP server with HTTP transport on {}", self.bind_addr());

        let gateway = self.service.clone();
        let service = StreamableHttpService::new(
            move || Ok(gateway.clone()),
            LocalSessionManager::default().into(),
            Default::default(),
        );

        // Note: nest_service doesn't support root path "/", use fallback_service instead
        let app = if self.endpoint == "/" {
            axum::Router::new().fallback_service(service)
        } else {
            axum::Router::new().nest_service(&self.endpoint, service)
        };

        let listener = self.bind().await?;
        if let Ok(addr) = listener.local_addr() {
            info!(addr = %addr, endpoint = %self.endpoint, "MCP endpoint ready");
        }

        // Graceful shutdown: SSE connections may keep the server alive indefinitely,
        // so we force exit after a timeout once shutdown signal is received
        const GRACEFUL_TIMEOUT: Duration = Duration::from_secs(30);

        let shutdown_notify = Arc::new(tokio::sync::Notify::new());
        let shutdown_notify_clone = shutdown_notify.clone();

        let shutdown_signal = async move {
            wait_for_signal().await;
            shutdown_notify_clone.notify_one();
        };

        let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal);

        tokio::select! {
            result = server => {
                match result {
                    Ok(()) => info!("HTTP server stopped"),
                    Err(e) => {
                        error!(error = %e, "HTTP server error");
                        return Err(crate::error::ServerError::internal(format!(
                            "HTTP server error: {}",
                            e
                        )));
                    }
                }
            }
            _ = async {
                // Wait for shutdown signal, then wait for either timeout or second signal
                shutdown_notify.notified().await;
                info!(
                    timeout_secs = GRACEFUL_TIMEOUT.as_secs(),
                    "Waiting for connections to close (send signal again to force exit)..."
                );

                tokio::select! {
                    _ = tokio::time::sleep(GRACEFUL_TIMEOUT) => {
                        warn!("Graceful shutdown timeout, forcing exit");
                    }
                    _ = wait_for_signal() => {
                        warn!("Received second signal, forcing immediate exit");
                    }
                }
            } => {
                // Timeout or second signal reached - server will be dropped
            }
        }

        info!("Closing datasource pools");
        self.registry.close_all().await;

        Ok(())
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// Wait for a shutdown signal (SIGINT or SIGTERM).
async fn wait_for_signal() {
    let ctrl_c = signal::ctrl_c();

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
