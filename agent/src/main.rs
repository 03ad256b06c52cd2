//! Coachline-Agent – Einstiegspunkt
//!
//! Laedt die Konfiguration, initialisiert das Logging und betreibt eine
//! Sitzung bis zu ihrem Ende. Der Exit-Code beschreibt den Grund:
//! 0 = regulaer (Grace, endSession, Signal), 1 = Backend nicht erreichbar
//! oder Startfehler, 2 = Failsafe.

use coachline_agent::config::{AgentConfig, CONFIG_ENV, STANDARD_CONFIG_PFAD};
use coachline_agent::Agent;
use coachline_observability::logging_initialisieren;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    // Konfigurationsdatei-Pfad aus Umgebungsvariable oder Standard
    let config_pfad = std::env::var(CONFIG_ENV).unwrap_or_else(|_| STANDARD_CONFIG_PFAD.into());

    let config = match AgentConfig::laden(&config_pfad) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("coachline-agent: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    logging_initialisieren(&config.logging.level, &config.logging.format);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_pfad,
        raum = %config.raum.name,
        "Coachline-Agent wird initialisiert"
    );

    match Agent::neu(config).starten().await {
        Ok(grund) => ExitCode::from(grund.exit_code()),
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "Agent konnte nicht gestartet werden");
            ExitCode::FAILURE
        }
    }
}
