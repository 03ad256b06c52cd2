//! # coachline-observability
//!
//! Observability-Crate fuer den Coachline-Agenten:
//! - Prometheus-kompatible Metriken (`/metrics`)
//! - Health-Check-Endpunkt (`/health`) mit Lebenszyklus-Phase
//! - Structured Logging via tracing-subscriber

pub mod health;
pub mod logging;
pub mod metrics;

pub use health::{health_router, HealthResponse, HealthState, HealthStatus};
pub use logging::logging_initialisieren;
pub use metrics::{metrics_router, CoachlineMetrics, MetrikSnapshot};

use anyhow::Result;
use std::net::SocketAddr;
use tokio::sync::watch;

/// Baut den Router mit `/metrics` und `/health`
pub fn observability_router(metriken: CoachlineMetrics, health: HealthState) -> axum::Router {
    axum::Router::new()
        .merge(metrics_router(metriken))
        .merge(health_router(health))
}

/// Startet den Observability-HTTP-Server (Metriken + Health)
///
/// Endpunkte:
/// - `GET /metrics` – Prometheus scrape format
/// - `GET /health`  – Health-Check JSON
///
/// Laeuft bis das Shutdown-Signal gesetzt wird.
pub async fn observability_server_starten(
    bind_addr: SocketAddr,
    metriken: CoachlineMetrics,
    health: HealthState,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<()> {
    let app = observability_router(metriken, health);

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!(addr = %bind_addr, "Observability-Server gestartet");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.wait_for(|beendet| *beendet).await;
        })
        .await?;
    tracing::debug!("Observability-Server gestoppt");
    Ok(())
}
