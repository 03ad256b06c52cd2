//! Fehlertypen fuer Coachline
//!
//! Zentraler Fehler-Enum mit der Fehler-Taxonomie des Agenten.
//! Transiente Fehler (Verbindungsversuch laeuft, verworfene Frames) werden
//! lokal behandelt und nur ueber Zaehler und Logs sichtbar. Nur erschoepfte
//! Verbindungsversuche und der Failsafe fuehren zum Prozessende.

use thiserror::Error;

/// Globaler Result-Alias fuer Coachline
pub type Result<T> = std::result::Result<T, CoachlineError>;

/// Alle moeglichen Fehler im Coachline-Agenten
#[derive(Debug, Error)]
pub enum CoachlineError {
    // --- Sprach-Backends ---
    /// Handshake fehlgeschlagen oder Verbindung unerwartet geschlossen
    #[error("Verbindungsfehler: {0}")]
    Verbindung(String),

    /// Eingehende Nachricht passt nicht zum erwarteten Schema
    #[error("Protokollfehler: {0}")]
    Protokoll(String),

    /// Frame mit falscher Abtastrate, Kodierung oder Groesse
    #[error("Audioformat ungueltig: {0}")]
    AudioFormat(String),

    /// Ueberlauf einer Sende-Queue (aeltester Frame verworfen)
    #[error("Sende-Queue voll: {verworfen} Frame(s) verworfen")]
    Backpressure { verworfen: u64 },

    #[error("Zeitlimit ueberschritten: {0}")]
    Zeitlimit(String),

    // --- Lebenszyklus ---
    /// Timer oder Failsafe in inkonsistenter Phase ausgeloest
    #[error("Lebenszyklusfehler: {0}")]
    Lebenszyklus(String),

    // --- Raum ---
    #[error("Raum-Transportfehler: {0}")]
    Raum(String),

    // --- Konfiguration ---
    #[error("Konfigurationsfehler: {0}")]
    Konfiguration(String),

    // --- Intern ---
    #[error("Interner Fehler: {0}")]
    Intern(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl CoachlineError {
    /// Erstellt einen internen Fehler aus einer beliebigen Nachricht
    pub fn intern(msg: impl Into<String>) -> Self {
        Self::Intern(msg.into())
    }

    /// Gibt true zurueck wenn ein erneuter Verbindungsversuch sinnvoll ist
    pub fn ist_wiederholbar(&self) -> bool {
        matches!(self, Self::Verbindung(_) | Self::Zeitlimit(_))
    }

    /// Gibt true zurueck wenn der Fehler lokal behandelt und nur gezaehlt wird
    pub fn ist_transient(&self) -> bool {
        matches!(
            self,
            Self::Protokoll(_) | Self::AudioFormat(_) | Self::Backpressure { .. }
        )
    }

    /// Gibt true zurueck wenn der Fehler nicht lokal behandelt werden kann
    ///
    /// Lebenszyklusfehler sind No-Ops mit Warnung, Verbindungsfehler werden
    /// erst nach erschoepften Versuchen vom Aufrufer eskaliert.
    pub fn ist_fatal(&self) -> bool {
        matches!(
            self,
            Self::Konfiguration(_) | Self::Raum(_) | Self::Intern(_) | Self::Anyhow(_)
        )
    }
}

impl From<serde_json::Error> for CoachlineError {
    fn from(e: serde_json::Error) -> Self {
        Self::Protokoll(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fehler_anzeige() {
        let e = CoachlineError::Verbindung("Handshake abgelehnt".into());
        assert_eq!(e.to_string(), "Verbindungsfehler: Handshake abgelehnt");

        let e = CoachlineError::Backpressure { verworfen: 3 };
        assert!(e.to_string().contains("3 Frame(s)"));
    }

    #[test]
    fn klassifizierung() {
        assert!(CoachlineError::Verbindung("x".into()).ist_wiederholbar());
        assert!(CoachlineError::Zeitlimit("x".into()).ist_wiederholbar());
        assert!(!CoachlineError::Protokoll("x".into()).ist_wiederholbar());

        assert!(CoachlineError::Protokoll("x".into()).ist_transient());
        assert!(CoachlineError::AudioFormat("x".into()).ist_transient());
        assert!(CoachlineError::Backpressure { verworfen: 1 }.ist_transient());
        assert!(!CoachlineError::Lebenszyklus("x".into()).ist_transient());

        assert!(CoachlineError::Konfiguration("x".into()).ist_fatal());
        assert!(!CoachlineError::Lebenszyklus("x".into()).ist_fatal());
        assert!(!CoachlineError::Verbindung("x".into()).ist_fatal());
    }

    #[test]
    fn json_fehler_wird_protokollfehler() {
        let e: CoachlineError = serde_json::from_str::<serde_json::Value>("{kaputt")
            .unwrap_err()
            .into();
        assert!(matches!(e, CoachlineError::Protokoll(_)));
    }
}
