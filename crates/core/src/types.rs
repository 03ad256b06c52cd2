//! Gemeinsame Identifikations- und Audiotypen fuer Coachline
//!
//! Teilnehmer-Identitaeten sind opake Strings aus dem Raum-Transport.
//! Das Newtype-Pattern verhindert Verwechslungen mit anderen Strings
//! (Raumname, Modell-IDs) zur Compilezeit.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::CoachlineError;

// ---------------------------------------------------------------------------
// TeilnehmerId
// ---------------------------------------------------------------------------

/// Opake Teilnehmer-Identitaet, wie sie der Raum-Transport liefert
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TeilnehmerId(pub String);

impl TeilnehmerId {
    /// Erstellt eine TeilnehmerId aus einem beliebigen String
    pub fn neu(identitaet: impl Into<String>) -> Self {
        Self(identitaet.into())
    }

    /// Gibt die Identitaet als &str zurueck
    pub fn als_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TeilnehmerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TeilnehmerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ---------------------------------------------------------------------------
// Rolle
// ---------------------------------------------------------------------------

/// Rolle eines Teilnehmers im Raum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rolle {
    /// Klient – steuert das Gespraech mit dem Agenten
    #[serde(rename = "client")]
    Klient,
    /// Coach – wird immer transkribiert, erreicht den Agenten nur bei offenem Gate
    Coach,
    /// Der Agent selbst (Echo-Unterdrueckung)
    #[serde(rename = "agent")]
    AgentSelbst,
}

impl Rolle {
    /// Parst die Rolle aus den Teilnehmer-Metadaten des Raums
    ///
    /// Unbekannte Rollen werden als Klient behandelt; der Agent erkennt
    /// sich selbst zusaetzlich ueber seine eigene Identitaet.
    pub fn aus_metadaten(wert: &str) -> Self {
        match wert.trim().to_ascii_lowercase().as_str() {
            "coach" => Self::Coach,
            "agent" | "agent-self" | "agent_self" => Self::AgentSelbst,
            _ => Self::Klient,
        }
    }

    /// Menschlicher Teilnehmer (zaehlt fuer den Lebenszyklus)?
    pub fn ist_mensch(&self) -> bool {
        !matches!(self, Self::AgentSelbst)
    }
}

impl std::fmt::Display for Rolle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Klient => "client",
            Self::Coach => "coach",
            Self::AgentSelbst => "agent",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// GateZustand
// ---------------------------------------------------------------------------

/// Sichtbarkeit der Audiodaten eines Teilnehmers fuer das Konversations-Backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateZustand {
    #[default]
    Offen,
    Geschlossen,
}

impl GateZustand {
    pub fn ist_offen(&self) -> bool {
        matches!(self, Self::Offen)
    }
}

// ---------------------------------------------------------------------------
// AudioFrame
// ---------------------------------------------------------------------------

/// Bytes pro Sample (PCM s16le)
pub const BYTES_PRO_SAMPLE: usize = 2;

/// Ein PCM-Block fester Dauer (s16le, interleaved)
///
/// Kurzlebig: wird innerhalb eines Routing- oder Wiedergabe-Zyklus erzeugt
/// und verbraucht. `pcm` ist ein `Bytes`-Handle, Klone kopieren keine Samples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    /// Rohdaten, PCM signed 16 bit little-endian
    pub pcm: Bytes,
    /// Abtastrate in Hz
    pub sample_rate: u32,
    /// Kanalanzahl
    pub kanaele: u16,
    /// Monoton steigende Sequenznummer (pro Quelle)
    pub sequenz: u64,
    /// Quell-Teilnehmer
    pub quelle: TeilnehmerId,
}

impl AudioFrame {
    pub fn neu(
        pcm: Bytes,
        sample_rate: u32,
        kanaele: u16,
        sequenz: u64,
        quelle: TeilnehmerId,
    ) -> Self {
        Self {
            pcm,
            sample_rate,
            kanaele,
            sequenz,
            quelle,
        }
    }

    /// Erstellt einen Frame aus i16-Samples
    pub fn aus_samples(
        samples: &[i16],
        sample_rate: u32,
        kanaele: u16,
        sequenz: u64,
        quelle: TeilnehmerId,
    ) -> Self {
        let mut pcm = Vec::with_capacity(samples.len() * BYTES_PRO_SAMPLE);
        for s in samples {
            pcm.extend_from_slice(&s.to_le_bytes());
        }
        Self::neu(Bytes::from(pcm), sample_rate, kanaele, sequenz, quelle)
    }

    /// Dekodiert die PCM-Bytes in i16-Samples
    pub fn samples(&self) -> Vec<i16> {
        self.pcm
            .chunks_exact(BYTES_PRO_SAMPLE)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect()
    }

    /// Anzahl Samples pro Kanal
    pub fn samples_pro_kanal(&self) -> usize {
        let kanaele = usize::from(self.kanaele.max(1));
        self.pcm.len() / BYTES_PRO_SAMPLE / kanaele
    }

    /// Abspieldauer des Frames
    pub fn dauer(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples_pro_kanal() as f64 / f64::from(self.sample_rate))
    }

    /// Prueft Abtastrate, Kanalanzahl und Byte-Ausrichtung
    ///
    /// # Fehler
    /// `CoachlineError::AudioFormat` bei jeder Abweichung.
    pub fn format_pruefen(&self, sample_rate: u32, kanaele: u16) -> crate::Result<()> {
        if self.sample_rate != sample_rate {
            return Err(CoachlineError::AudioFormat(format!(
                "Abtastrate {} Hz, erwartet {} Hz",
                self.sample_rate, sample_rate
            )));
        }
        if self.kanaele != kanaele {
            return Err(CoachlineError::AudioFormat(format!(
                "{} Kanaele, erwartet {}",
                self.kanaele, kanaele
            )));
        }
        let block = BYTES_PRO_SAMPLE * usize::from(kanaele.max(1));
        if self.pcm.is_empty() || self.pcm.len() % block != 0 {
            return Err(CoachlineError::AudioFormat(format!(
                "Ungueltige Framegroesse: {} Bytes",
                self.pcm.len()
            )));
        }
        Ok(())
    }
}
