//! API Server
//!
//! Router assembly, middleware stack and graceful shutdown.

use super::{
    handlers::AppState,
    middleware::{create_cors_layer, request_id_middleware},
    routes::create_router,
};
use crate::config::WagerConfig;
use crate::ledger::Ledger;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::signal;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::info;

pub struct ApiServer {
    config: WagerConfig,
    ledger: Arc<Ledger>,
}

impl ApiServer {
    pub fn new(config: WagerConfig, ledger: Arc<Ledger>) -> Self {
        Self { config, ledger }
    }

    /// Serve until Ctrl+C or SIGTERM
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        let app = self.create_app();
        let addr = self.get_socket_addr()?;

        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!(%addr, "Wagerbook API listening");
        self.log_server_info();

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("API server stopped gracefully");
        Ok(())
    }

    /// Create the application with its middleware stack
    pub fn create_app(&self) -> axum::Router {
        build_app(self.ledger.clone(), &self.config)
    }

    fn get_socket_addr(&self) -> Result<SocketAddr, Box<dyn std::error::Error>> {
        Ok(SocketAddr::from((
            self.config.api.host.parse::<std::net::IpAddr>()?,
            self.config.api.port,
        )))
    }

    fn log_server_info(&self) {
        info!(
            cors = ?self.config.api.allowed_origins,
            timeout_secs = self.config.api.request_timeout_secs,
            metrics = self.config.monitoring.enable_metrics,
            data_dir = %self.config.storage.data_directory,
            "Server configuration"
        );
    }
}

/// Router with shared state and every layer attached
pub fn build_app(ledger: Arc<Ledger>, config: &WagerConfig) -> axum::Router {
    let request_timeout = Duration::from_secs(config.api.request_timeout_secs);
    let state = Arc::new(AppState {
        ledger,
        version: env!("CARGO_PKG_VERSION").to_string(),
        enable_metrics: config.monitoring.enable_metrics,
        request_timeout,
    });

    create_router(state)
        // Request ID middleware (first for tracing)
        .layer(axum::middleware::from_fn(request_id_middleware))
        // CORS layer (before timeout to handle preflight)
        .layer(create_cors_layer(config.api.allowed_origins.clone()))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }
}
