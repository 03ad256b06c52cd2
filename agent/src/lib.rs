//! coachline-agent – Bibliotheks-Root
//!
//! Deklariert die Agent-Module und stellt den oeffentlichen Einstiegspunkt
//! fuer Integrationstests bereit.

pub mod config;
pub mod raum;
pub mod sitzung;

use anyhow::Result;
use coachline_backend::{FunktionsAusfuehrer, HttpFunktionsAusfuehrer, KeineFunktionen, WsVerbinder};
use coachline_observability::{observability_server_starten, CoachlineMetrics, HealthState};
use coachline_voice::Beendigungsgrund;
use config::AgentConfig;
use raum::{BridgeConfig, BridgeRaum};
use sitzung::{Sitzung, SitzungsAbhaengigkeiten};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Haelt die Konfiguration des Agenten zusammen
pub struct Agent {
    pub config: AgentConfig,
}

impl Agent {
    /// Erstellt einen neuen Agenten aus der gegebenen Konfiguration
    pub fn neu(config: AgentConfig) -> Self {
        Self { config }
    }

    /// Startet alle Subsysteme und laeuft bis die Sitzung endet
    ///
    /// Reihenfolge:
    /// 1. Observability-Server (falls aktiviert)
    /// 2. Raum-Bridge verbinden
    /// 3. Sitzung starten (Backends, Wiedergabe)
    /// 4. Auf Sitzungsende oder Ctrl-C / SIGTERM warten
    pub async fn starten(self) -> Result<Beendigungsgrund> {
        let config = self.config;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let metriken = CoachlineMetrics::neu()?;
        let health = HealthState::neu();
        let server = if config.observability.aktiviert {
            let addr: std::net::SocketAddr = config.observability_bind_adresse().parse()?;
            let (m, h) = (metriken.clone(), health.clone());
            Some(tokio::spawn(async move {
                if let Err(e) = observability_server_starten(addr, m, h, shutdown_rx).await {
                    tracing::error!(error = %e, "Observability-Server beendet");
                }
            }))
        } else {
            None
        };

        let bridge = BridgeConfig {
            uri: config.raum.bridge_url.clone(),
            wiederverbindung_basis: Duration::from_millis(config.raum.wiederverbindung_ms),
            ..Default::default()
        };
        let (raum, raum_ereignisse) =
            BridgeRaum::verbinden(bridge, Arc::new(WsVerbinder::neu(None))).await?;

        let schluessel = config
            .backend_schluessel
            .as_ref()
            .map(|g| g.offenlegen().to_string());
        let ausfuehrer: Arc<dyn FunktionsAusfuehrer> = match config.funktionen.endpunkt {
            Some(ref endpunkt) => {
                tracing::info!(endpunkt = %endpunkt, "Funktionsaufrufe per HTTP");
                Arc::new(HttpFunktionsAusfuehrer::neu(
                    endpunkt.clone(),
                    config.funktions_zeitlimit(),
                )?)
            }
            None => Arc::new(KeineFunktionen),
        };

        let sitzung = Sitzung::starten(
            &config,
            SitzungsAbhaengigkeiten {
                backend_verbinder: Arc::new(WsVerbinder::neu(schluessel)),
                raum: Arc::new(raum),
                raum_ereignisse,
                ausfuehrer,
                metriken: Some(metriken),
                health: Some(health),
            },
        );
        let grund = sitzung.laufen(shutdown_signal()).await;

        let _ = shutdown_tx.send(true);
        if let Some(server) = server {
            let _ = tokio::time::timeout(Duration::from_secs(2), server).await;
        }
        Ok(grund)
    }
}

/// Wartet auf Ctrl-C oder SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Ctrl-C-Handler nicht installierbar");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "SIGTERM-Handler nicht installierbar");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
