//! Ausfuehrung von Funktionsaufrufen des Konversations-Backends
//!
//! Die eigentliche Ausfuehrung ist ein externer Dienst. Der Agent reicht
//! Name und Argumente weiter und sendet das Ergebnis als
//! `FunctionCallResponse` zurueck. Jeder Aufruf bekommt eine Antwort,
//! auch im Fehlerfall, damit das Backend nie auf ein Ergebnis wartet.

use async_trait::async_trait;
use coachline_core::{CoachlineError, Result};
use serde_json::{json, Value};
use std::time::Duration;

/// Fuehrt einen Funktionsaufruf aus und liefert den Ergebnis-Inhalt
#[async_trait]
pub trait FunktionsAusfuehrer: Send + Sync + 'static {
    async fn ausfuehren(&self, name: &str, argumente: &str) -> Result<String>;
}

/// Fehler-Payload fuer das Backend
pub fn fehler_inhalt(name: &str, detail: &str) -> String {
    json!({ "error": detail, "function": name }).to_string()
}

// ---------------------------------------------------------------------------
// Ohne Funktionen
// ---------------------------------------------------------------------------

/// Ausfuehrer ohne konfigurierten Endpunkt
#[derive(Debug, Default, Clone, Copy)]
pub struct KeineFunktionen;

#[async_trait]
impl FunktionsAusfuehrer for KeineFunktionen {
    async fn ausfuehren(&self, name: &str, _argumente: &str) -> Result<String> {
        tracing::debug!(funktion = %name, "Keine Funktionen konfiguriert");
        Ok(fehler_inhalt(name, "Funktion nicht verfuegbar"))
    }
}

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

/// Reicht Aufrufe per HTTP POST an einen Endpunkt weiter
///
/// Body: `{"name": ..., "arguments": ...}`. Argumente, die gueltiges JSON
/// sind, werden als Objekt gesendet, sonst als String. Der Antwort-Body
/// wird unveraendert als Ergebnis-Inhalt verwendet.
#[derive(Debug, Clone)]
pub struct HttpFunktionsAusfuehrer {
    client: reqwest::Client,
    endpunkt: String,
}

impl HttpFunktionsAusfuehrer {
    pub fn neu(endpunkt: impl Into<String>, zeitlimit: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(zeitlimit)
            .build()
            .map_err(|e| CoachlineError::Konfiguration(format!("HTTP-Client: {e}")))?;
        Ok(Self {
            client,
            endpunkt: endpunkt.into(),
        })
    }

    pub fn endpunkt(&self) -> &str {
        &self.endpunkt
    }
}

#[async_trait]
impl FunktionsAusfuehrer for HttpFunktionsAusfuehrer {
    async fn ausfuehren(&self, name: &str, argumente: &str) -> Result<String> {
        let argumente: Value =
            serde_json::from_str(argumente).unwrap_or_else(|_| Value::String(argumente.into()));

        let antwort = self
            .client
            .post(&self.endpunkt)
            .json(&json!({ "name": name, "arguments": argumente }))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CoachlineError::Zeitlimit(format!("Funktion '{name}': {e}"))
                } else {
                    CoachlineError::Verbindung(format!("Funktion '{name}': {e}"))
                }
            })?;

        let status = antwort.status();
        let body = antwort
            .text()
            .await
            .map_err(|e| CoachlineError::Verbindung(format!("Funktion '{name}': {e}")))?;

        if !status.is_success() {
            return Err(CoachlineError::Verbindung(format!(
                "Funktion '{name}' antwortete mit {status}"
            )));
        }
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn keine_funktionen_antwortet_mit_fehler() {
        let inhalt = KeineFunktionen.ausfuehren("wetter", "{}").await.unwrap();
        let wert: Value = serde_json::from_str(&inhalt).unwrap();
        assert_eq!(wert["function"], "wetter");
        assert!(wert["error"].is_string());
    }

    #[test]
    fn http_ausfuehrer_merkt_endpunkt() {
        let ausfuehrer =
            HttpFunktionsAusfuehrer::neu("http://127.0.0.1:9/funktionen", Duration::from_secs(1))
                .unwrap();
        assert_eq!(ausfuehrer.endpunkt(), "http://127.0.0.1:9/funktionen");
    }
}
