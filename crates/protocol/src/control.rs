//! Steuer-Protokoll ueber den Datenkanal des Raums
//!
//! Coach-Oberflaeche und Agent tauschen JSON-Nachrichten ueber die generische
//! Datenkanal-Funktion des Raums aus.
//!
//! ## Design
//! - Tagged Enums (`type`-Feld) fuer typsichere Nachrichtentypen
//! - Feldnamen in camelCase, wie sie die Web-Oberflaeche sendet
//! - Unbekannte Nachrichtentypen sind Protokollfehler (werden verworfen)

use bytes::Bytes;
use coachline_core::{CoachlineError, Result, Rolle, TeilnehmerId};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Eingehend: Steuernachrichten
// ---------------------------------------------------------------------------

/// Steuernachrichten an den Agenten
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SteuerNachricht {
    /// Gate eines Teilnehmers oeffnen/schliessen
    MuteToggle {
        #[serde(rename = "participantId")]
        teilnehmer: TeilnehmerId,
        muted: bool,
    },
    /// Stiller Kontext-Hinweis an das Konversations-Backend
    Whisper { text: String },
    /// Globaler "KI pausiert"-Modus
    PauseAi { paused: bool },
    /// Sitzung sofort beenden
    EndSession,
}

impl SteuerNachricht {
    /// Parst eine Datenkanal-Nachricht
    ///
    /// # Fehler
    /// `CoachlineError::Protokoll` bei ungueltigem JSON oder unbekanntem Typ.
    pub fn parsen(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload).map_err(|e| {
            CoachlineError::Protokoll(format!("Ungueltige Steuernachricht: {e}"))
        })
    }
}

// ---------------------------------------------------------------------------
// Ausgehend: Nachrichten an die Oberflaeche
// ---------------------------------------------------------------------------

/// Herkunft eines Transkripts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranskriptQuelle {
    Conversation,
    Transcription,
}

/// Nachrichten des Agenten an die Raum-Teilnehmer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AgentNachricht {
    /// Transkript eines Sprecher-Turns
    Transcript {
        source: TranskriptQuelle,
        role: String,
        text: String,
        #[serde(rename = "final")]
        ist_final: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        speaker: Option<TeilnehmerId>,
    },
    /// Aktueller Pausenzustand der KI (Bestaetigung fuer die Oberflaeche)
    AiState { paused: bool },
    /// Gate-Zustand eines Teilnehmers (Bestaetigung fuer die Oberflaeche)
    GateState {
        #[serde(rename = "participantId")]
        teilnehmer: TeilnehmerId,
        muted: bool,
    },
}

impl AgentNachricht {
    /// Erstellt ein Transkript fuer eine Rolle des Raums
    pub fn transkript(
        quelle: TranskriptQuelle,
        rolle: impl Into<String>,
        text: impl Into<String>,
        ist_final: bool,
    ) -> Self {
        Self::Transcript {
            source: quelle,
            role: rolle.into(),
            text: text.into(),
            ist_final,
            speaker: None,
        }
    }

    /// Transkript mit bekanntem Sprecher im Raum
    pub fn transkript_von(
        quelle: TranskriptQuelle,
        rolle: Rolle,
        sprecher: TeilnehmerId,
        text: impl Into<String>,
        ist_final: bool,
    ) -> Self {
        Self::Transcript {
            source: quelle,
            role: rolle.to_string(),
            text: text.into(),
            ist_final,
            speaker: Some(sprecher),
        }
    }

    /// Serialisiert als Datenkanal-Payload
    pub fn als_payload(&self) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }
}
