//! Wire-Protokoll des Konversations-Backends (Sprache rein, Denken, Sprache raus)
//!
//! Nach dem Oeffnen der Verbindung wird genau eine `Settings`-Nachricht
//! gesendet, bevor Audio fliesst. Danach traegt der Kanal zwei Arten von
//! Verkehr: JSON-Steuerereignisse und rohe binaere Audio-Chunks.
//!
//! Das Schema des Backends ist strikt versioniert: unbekannte Felder fuehren
//! zur Ablehnung des gesamten Handshakes. Optionale Felder werden deshalb
//! weggelassen statt als `null` gesendet, und es gibt keine Zusatzfelder.

use coachline_core::{CoachlineError, Result};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Handshake
// ---------------------------------------------------------------------------

/// Audio-Parameter einer Richtung
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub encoding: String,
    pub sample_rate: u32,
    /// Nur fuer die Ausgabe: Container-Format ("none" = roh)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioEinstellungen {
    pub input: AudioFormat,
    pub output: AudioFormat,
}

/// Provider-Block fuer Erkennung, Sprachmodell oder Synthese
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provider {
    #[serde(rename = "type")]
    pub typ: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub keyterms: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listen {
    pub provider: Provider,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Think {
    pub provider: Provider,
    pub prompt: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Speak {
    pub provider: Provider,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentEinstellungen {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    pub listen: Listen,
    pub think: Think,
    pub speak: Speak,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub greeting: Option<String>,
}

/// Die einmalige Konfigurationsnachricht beim Verbindungsaufbau
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "Settings")]
pub struct Settings {
    pub audio: AudioEinstellungen,
    pub agent: AgentEinstellungen,
}

impl Settings {
    pub fn als_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

// ---------------------------------------------------------------------------
// Eingehende Ereignisse
// ---------------------------------------------------------------------------

/// Ein einzelner Funktionsaufruf innerhalb eines `FunctionCallRequest`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunktionsAufruf {
    pub id: String,
    pub name: String,
    /// JSON-kodierte Argumente (als String, so wie das Backend sie liefert)
    pub arguments: String,
    #[serde(default)]
    pub client_side: bool,
}

/// JSON-Steuerereignisse des Konversations-Backends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum KonversationsEreignis {
    /// Verbindung bereit (vor dem Handshake)
    Welcome {
        #[serde(default)]
        request_id: Option<String>,
    },
    /// Handshake bestaetigt
    SettingsApplied,
    /// Turn-Transkript mit Sprecherrolle ("user" / "assistant")
    ConversationText { role: String, content: String },
    /// Sprechbeginn eines Menschen (Barge-in)
    UserStartedSpeaking,
    AgentThinking {
        #[serde(default)]
        content: String,
    },
    AgentStartedSpeaking {
        #[serde(default)]
        total_latency: Option<f64>,
    },
    /// Synthese fuer den aktuellen Turn abgeschlossen
    AgentAudioDone,
    FunctionCallRequest { functions: Vec<FunktionsAufruf> },
    PromptUpdated,
    InjectionRefused {
        #[serde(default)]
        message: String,
    },
    Warning {
        #[serde(default)]
        description: String,
        #[serde(default)]
        code: Option<String>,
    },
    Error {
        #[serde(default)]
        description: String,
        #[serde(default)]
        code: Option<String>,
    },
}

impl KonversationsEreignis {
    /// Parst ein Text-Frame des Backends
    ///
    /// # Fehler
    /// `CoachlineError::Protokoll` wenn die Nachricht nicht zum Schema passt.
    pub fn parsen(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| {
            CoachlineError::Protokoll(format!("Unbekanntes Konversationsereignis: {e}"))
        })
    }
}

// ---------------------------------------------------------------------------
// Ausgehende Steuernachrichten
// ---------------------------------------------------------------------------

/// Steuernachrichten an das Konversations-Backend (nach dem Handshake)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum KonversationsBefehl {
    /// Leerlauf-Keepalive ohne Audio (wird nicht als Sprache abgerechnet)
    KeepAlive,
    /// Stiller Kontext-Hinweis: aendert den Prompt, erzeugt keine Sprachausgabe
    UpdatePrompt { prompt: String },
    FunctionCallResponse {
        id: String,
        name: String,
        content: String,
    },
}

impl KonversationsBefehl {
    pub fn als_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn beispiel_settings(greeting: Option<&str>, keyterms: Vec<String>) -> Settings {
        Settings {
            audio: AudioEinstellungen {
                input: AudioFormat {
                    encoding: "linear16".into(),
                    sample_rate: 48_000,
                    container: None,
                },
                output: AudioFormat {
                    encoding: "linear16".into(),
                    sample_rate: 24_000,
                    container: Some("none".into()),
                },
            },
            agent: AgentEinstellungen {
                language: Some("de".into()),
                listen: Listen {
                    provider: Provider {
                        typ: "deepgram".into(),
                        model: "nova-3".into(),
                        temperature: None,
                        keyterms,
                    },
                },
                think: Think {
                    provider: Provider {
                        typ: "open_ai".into(),
                        model: "gpt-4o-mini".into(),
                        temperature: Some(0.7),
                        keyterms: vec![],
                    },
                    prompt: "Du bist ein Coaching-Assistent.".into(),
                },
                speak: Speak {
                    provider: Provider {
                        typ: "deepgram".into(),
                        model: "aura-2-thalia-en".into(),
                        temperature: None,
                        keyterms: vec![],
                    },
                },
                greeting: greeting.map(str::to_string),
            },
        }
    }

    #[test]
    fn settings_exaktes_schema() {
        let json = beispiel_settings(Some("Hallo!"), vec!["Zielvereinbarung".into()])
            .als_json()
            .unwrap();
        let wert: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(wert["type"], "Settings");
        assert_eq!(wert["audio"]["input"]["encoding"], "linear16");
        assert_eq!(wert["audio"]["input"]["sample_rate"], 48_000);
        assert!(wert["audio"]["input"].get("container").is_none());
        assert_eq!(wert["audio"]["output"]["container"], "none");
        assert_eq!(wert["agent"]["listen"]["provider"]["keyterms"][0], "Zielvereinbarung");
        assert_eq!(wert["agent"]["think"]["provider"]["type"], "open_ai");
        assert!((wert["agent"]["think"]["provider"]["temperature"].as_f64().unwrap() - 0.7).abs() < 1e-6);
        assert_eq!(wert["agent"]["greeting"], "Hallo!");

        let oben: Vec<_> = wert.as_object().unwrap().keys().cloned().collect();
        assert_eq!(oben.len(), 3, "nur type, audio, agent: {oben:?}");
    }

    #[test]
    fn settings_ohne_optionale_felder() {
        let json = beispiel_settings(None, vec![]).als_json().unwrap();
        let wert: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!(wert["agent"].get("greeting").is_none());
        assert!(wert["agent"]["listen"]["provider"].get("keyterms").is_none());
        assert!(wert["agent"]["speak"]["provider"].get("temperature").is_none());
        assert!(!json.contains("null"));
    }

    #[test]
    fn ereignisse_parsen() {
        assert_eq!(
            KonversationsEreignis::parsen(r#"{"type":"SettingsApplied"}"#).unwrap(),
            KonversationsEreignis::SettingsApplied
        );
        assert_eq!(
            KonversationsEreignis::parsen(r#"{"type":"UserStartedSpeaking"}"#).unwrap(),
            KonversationsEreignis::UserStartedSpeaking
        );
        let text = KonversationsEreignis::parsen(
            r#"{"type":"ConversationText","role":"assistant","content":"Wie geht es Ihnen?"}"#,
        )
        .unwrap();
        assert!(matches!(text, KonversationsEreignis::ConversationText { ref role, .. } if role == "assistant"));

        let aufruf = KonversationsEreignis::parsen(
            r#"{"type":"FunctionCallRequest","functions":[{"id":"f1","name":"ziel_speichern","arguments":"{\"ziel\":\"Sport\"}","client_side":true}]}"#,
        )
        .unwrap();
        match aufruf {
            KonversationsEreignis::FunctionCallRequest { functions } => {
                assert_eq!(functions.len(), 1);
                assert_eq!(functions[0].name, "ziel_speichern");
                assert!(functions[0].client_side);
            }
            anders => panic!("Falsches Ereignis: {anders:?}"),
        }
    }

    #[test]
    fn unbekanntes_ereignis_ist_protokollfehler() {
        let err = KonversationsEreignis::parsen(r#"{"type":"History"}"#).unwrap_err();
        assert!(matches!(err, CoachlineError::Protokoll(_)));
        assert!(KonversationsEreignis::parsen("[]").is_err());
    }

    #[test]
    fn befehle_serialisieren() {
        assert_eq!(
            KonversationsBefehl::KeepAlive.als_json().unwrap(),
            r#"{"type":"KeepAlive"}"#
        );
        assert_eq!(
            KonversationsBefehl::UpdatePrompt {
                prompt: "Klient wirkt muede".into()
            }
            .als_json()
            .unwrap(),
            r#"{"type":"UpdatePrompt","prompt":"Klient wirkt muede"}"#
        );
        let antwort = KonversationsBefehl::FunctionCallResponse {
            id: "f1".into(),
            name: "ziel_speichern".into(),
            content: "ok".into(),
        }
        .als_json()
        .unwrap();
        assert!(antwort.starts_with(r#"{"type":"FunctionCallResponse""#));
    }
}
