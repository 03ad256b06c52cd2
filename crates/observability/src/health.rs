//! Health-Check-Endpunkt des Agenten
//!
//! Endpoint: `GET /health`
//! Response: JSON mit Status, Version, Uptime, Lebenszyklus-Phase und
//! Zustand der Raumverbindung

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Status des Health-Checks
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Antwort des Health-Check-Endpunkts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub version: String,
    pub uptime_seconds: u64,
    pub phase: String,
    pub room_connected: bool,
}

/// Geteilter Zustand fuer den Health-Check-Handler
///
/// Die Sitzung schreibt Phase und Raumverbindung, der Handler liest nur.
#[derive(Clone)]
pub struct HealthState {
    start_time: Arc<Instant>,
    phase: Arc<RwLock<String>>,
    raum_verbunden: Arc<AtomicBool>,
}

impl HealthState {
    pub fn neu() -> Self {
        Self {
            start_time: Arc::new(Instant::now()),
            phase: Arc::new(RwLock::new("active".to_string())),
            raum_verbunden: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn phase(&self) -> String {
        self.phase.read().clone()
    }

    pub fn phase_setzen(&self, phase: &str) {
        let mut aktuell = self.phase.write();
        if *aktuell != phase {
            *aktuell = phase.to_string();
        }
    }

    pub fn raum_verbunden(&self) -> bool {
        self.raum_verbunden.load(Ordering::Relaxed)
    }

    pub fn raum_status_setzen(&self, verbunden: bool) {
        self.raum_verbunden.store(verbunden, Ordering::Relaxed);
    }

    /// Bewertet Phase und Raumverbindung
    pub fn status(&self) -> HealthStatus {
        match self.phase().as_str() {
            "terminating" | "terminated" => HealthStatus::Unhealthy,
            _ if !self.raum_verbunden() => HealthStatus::Degraded,
            _ => HealthStatus::Healthy,
        }
    }
}

impl Default for HealthState {
    fn default() -> Self {
        Self::neu()
    }
}

/// Axum-Router fuer den `/health`-Endpunkt
pub fn health_router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .with_state(state)
}

/// `GET /health` – gibt den Agentenstatus zurueck
async fn health_handler(State(state): State<HealthState>) -> impl IntoResponse {
    let status = state.status();

    let http_status = match status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Degraded => StatusCode::OK, // Failsafe laeuft noch, Probe soll nicht failen
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    let response = HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.uptime_seconds(),
        phase: state.phase(),
        room_connected: state.raum_verbunden(),
    };

    (http_status, Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn neuer_zustand_ist_gesund() {
        let state = HealthState::neu();
        assert!(state.uptime_seconds() < 5);
        assert_eq!(state.phase(), "active");
        assert_eq!(state.status(), HealthStatus::Healthy);
    }

    #[test]
    fn verlorener_raum_ist_degraded() {
        let state = HealthState::neu();
        state.raum_status_setzen(false);
        assert_eq!(state.status(), HealthStatus::Degraded);
        state.raum_status_setzen(true);
        assert_eq!(state.status(), HealthStatus::Healthy);
    }

    #[test]
    fn beendete_sitzung_ist_unhealthy() {
        let state = HealthState::neu();
        state.phase_setzen("draining");
        assert_eq!(state.status(), HealthStatus::Healthy);
        state.phase_setzen("terminating");
        assert_eq!(state.status(), HealthStatus::Unhealthy);
    }

    #[test]
    fn health_response_format() {
        let response = HealthResponse {
            status: HealthStatus::Healthy,
            version: "0.1.0".to_string(),
            uptime_seconds: 3600,
            phase: "draining".to_string(),
            room_connected: true,
        };

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"status\":\"healthy\""));
        assert!(json.contains("\"uptime_seconds\":3600"));
        assert!(json.contains("\"phase\":\"draining\""));
        assert!(json.contains("\"room_connected\":true"));
    }

    #[tokio::test]
    async fn endpunkte_antworten() {
        let metriken = crate::CoachlineMetrics::neu().unwrap();
        let state = HealthState::neu();
        state.phase_setzen("draining");

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = crate::observability_router(metriken, state);
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        let antwort = http_get(addr, "/health").await;
        assert!(antwort.starts_with("HTTP/1.1 200"), "{antwort}");
        assert!(antwort.contains("\"phase\":\"draining\""));

        let antwort = http_get(addr, "/metrics").await;
        assert!(antwort.contains("coachline_humans_present"));
    }

    async fn http_get(addr: std::net::SocketAddr, pfad: &str) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        let anfrage = format!("GET {pfad} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
        stream.write_all(anfrage.as_bytes()).await.unwrap();
        let mut antwort = String::new();
        stream.read_to_string(&mut antwort).await.unwrap();
        antwort
    }
}
