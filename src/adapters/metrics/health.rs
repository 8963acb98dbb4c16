//! Health Check Server - Liveness, Readiness and Snapshot
//!
//! Exposes /live, /ready and /health via axum 0.7. Readiness and
//! the JSON snapshot come straight from the router's
//! `HealthSnapshot` query: router state plus both sources' health.

use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use tokio::sync::broadcast;
use tracing::{info, instrument};

use crate::usecases::router::{DataSourceRouter, ServiceStatus};

/// Axum-based health check HTTP server.
///
/// Serves liveness (/live), readiness (/ready) and the full health
/// snapshot (/health) for orchestrator probes and dashboards.
pub struct HealthServer {
    /// Router queried for every probe.
    router: Arc<DataSourceRouter>,
    /// Bind port (default 8080 from config).
    port: u16,
}

impl HealthServer {
    /// Create a new health server.
    pub const fn new(router: Arc<DataSourceRouter>, port: u16) -> Self {
        Self { router, port }
    }

    /// Build the route table; separate from `run` so it can be exercised without a socket.
    pub fn app(router: Arc<DataSourceRouter>) -> Router {
        Router::new()
            .route("/live", get(Self::liveness))
            .route("/ready", get(Self::readiness))
            .route("/health", get(Self::snapshot))
            .with_state(router)
    }

    /// Start the health check server in the background.
    #[instrument(skip(self, shutdown_rx))]
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) -> anyhow::Result<()> {
        let app = Self::app(Arc::clone(&self.router));

        let addr = format!("0.0.0.0:{}", self.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;

        info!(address = %addr, "Health server started");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await?;

        Ok(())
    }

    /// Liveness probe: always returns 200 if the process is running.
    async fn liveness() -> impl IntoResponse {
        (StatusCode::OK, "OK")
    }

    /// Readiness probe: 200 unless both sources are unavailable.
    async fn readiness(State(router): State<Arc<DataSourceRouter>>) -> impl IntoResponse {
        match router.health_snapshot().status {
            ServiceStatus::Unavailable => (StatusCode::SERVICE_UNAVAILABLE, "NOT READY"),
            ServiceStatus::Healthy | ServiceStatus::Degraded => (StatusCode::OK, "READY"),
        }
    }

    /// Full snapshot as JSON; status code mirrors readiness.
    async fn snapshot(State(router): State<Arc<DataSourceRouter>>) -> impl IntoResponse {
        let snapshot = router.health_snapshot();
        let code = if snapshot.status == ServiceStatus::Unavailable {
            StatusCode::SERVICE_UNAVAILABLE
        } else {
            StatusCode::OK
        };
        (code, Json(snapshot))
    }
}
