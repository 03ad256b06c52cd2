//! Wire-Protokoll des Transkriptions-Backends (nur Sprache-zu-Text)
//!
//! Es gibt keinen Handshake: alle Parameter stehen in der Query der
//! Verbindungs-URI. Das Backend sendet ausschliesslich JSON-Ereignisse,
//! niemals binaeres Audio.

use coachline_core::{CoachlineError, Result};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Verbindungsparameter
// ---------------------------------------------------------------------------

/// Parameter, die als Query an die Verbindungs-URI angehaengt werden
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenParameter {
    pub encoding: String,
    pub sample_rate: u32,
    pub kanaele: u16,
    pub model: String,
    pub punctuate: bool,
    pub interim_results: bool,
    pub vad_events: bool,
    pub language: Option<String>,
    pub keyterms: Vec<String>,
}

impl Default for ListenParameter {
    fn default() -> Self {
        Self {
            encoding: "linear16".into(),
            sample_rate: 48_000,
            kanaele: 1,
            model: "nova-3".into(),
            punctuate: true,
            interim_results: false,
            vad_events: true,
            language: None,
            keyterms: Vec::new(),
        }
    }
}

impl ListenParameter {
    /// Haengt die Parameter an eine Basis-URI an
    ///
    /// Eine bereits vorhandene Query wird mit `&` fortgesetzt.
    pub fn uri(&self, basis: &str) -> String {
        let mut paare: Vec<(&str, String)> = vec![
            ("encoding", self.encoding.clone()),
            ("sample_rate", self.sample_rate.to_string()),
            ("channels", self.kanaele.to_string()),
            ("model", self.model.clone()),
            ("punctuate", self.punctuate.to_string()),
            ("interim_results", self.interim_results.to_string()),
            ("vad_events", self.vad_events.to_string()),
        ];
        if let Some(ref sprache) = self.language {
            paare.push(("language", sprache.clone()));
        }
        for begriff in &self.keyterms {
            paare.push(("keyterm", begriff.clone()));
        }

        let query = paare
            .iter()
            .map(|(k, v)| format!("{k}={}", prozent_kodieren(v)))
            .collect::<Vec<_>>()
            .join("&");

        let trenner = if basis.contains('?') { '&' } else { '?' };
        format!("{basis}{trenner}{query}")
    }
}

/// Prozent-Kodierung fuer Query-Werte (RFC 3986, unreserved bleibt erhalten)
fn prozent_kodieren(wert: &str) -> String {
    let mut aus = String::with_capacity(wert.len());
    for b in wert.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                aus.push(char::from(b))
            }
            _ => aus.push_str(&format!("%{b:02X}")),
        }
    }
    aus
}

// ---------------------------------------------------------------------------
// Eingehende Ereignisse
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alternative {
    pub transcript: String,
    #[serde(default)]
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Kanal {
    #[serde(default)]
    pub alternatives: Vec<Alternative>,
}

/// JSON-Ereignisse des Transkriptions-Backends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TranskriptionsEreignis {
    Results {
        channel: Kanal,
        #[serde(default)]
        is_final: bool,
        #[serde(default)]
        speech_final: bool,
    },
    Metadata {
        #[serde(default)]
        request_id: Option<String>,
    },
    SpeechStarted {
        #[serde(default)]
        timestamp: Option<f64>,
    },
    UtteranceEnd {
        #[serde(default)]
        last_word_end: Option<f64>,
    },
}

impl TranskriptionsEreignis {
    pub fn parsen(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| {
            CoachlineError::Protokoll(format!("Unbekanntes Transkriptionsereignis: {e}"))
        })
    }

    /// Bester Transkript-Text eines `Results`-Ereignisses (leer = Stille)
    pub fn bester_text(&self) -> Option<&str> {
        match self {
            Self::Results { channel, .. } => channel
                .alternatives
                .first()
                .map(|a| a.transcript.trim())
                .filter(|t| !t.is_empty()),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Ausgehende Steuernachrichten
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TranskriptionsBefehl {
    /// Haelt die Verbindung ohne Audio offen
    KeepAlive,
    /// Verarbeitet Restaudio und schliesst die Verbindung geordnet
    CloseStream,
}

impl TranskriptionsBefehl {
    pub fn als_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
