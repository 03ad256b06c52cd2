//! Agent-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Felder haben
//! sinnvolle Standardwerte, sodass der Agent ohne Konfigurationsdatei
//! lauffaehig ist. Der API-Schluessel der Sprach-Backends kommt
//! ausschliesslich aus der Umgebung (`COACHLINE_BACKEND_KEY`).

use coachline_backend::{ManagerConfig, VerbindungsConfig};
use coachline_protocol::agent::{
    AgentEinstellungen, AudioEinstellungen, AudioFormat, Listen, Provider, Speak, Think,
};
use coachline_protocol::{ListenParameter, Settings};
use coachline_voice::{LebenszyklusConfig, WiedergabeConfig};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Umgebungsvariable fuer den Pfad der Konfigurationsdatei
pub const CONFIG_ENV: &str = "COACHLINE_CONFIG";
pub const STANDARD_CONFIG_PFAD: &str = "coachline.toml";
/// Umgebungsvariable fuer den API-Schluessel der Sprach-Backends
pub const SCHLUESSEL_ENV: &str = "COACHLINE_BACKEND_KEY";

/// Vollstaendige Agent-Konfiguration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Raum und Raum-Bridge
    pub raum: RaumEinstellungen,
    /// Grace-Frist
    pub lebenszyklus: LebenszyklusEinstellungen,
    /// Wiedergabe synthetisierter Sprache
    pub wiedergabe: WiedergabeEinstellungen,
    /// Konversations-Backend (Handshake)
    pub konversation: KonversationsEinstellungen,
    /// Transkriptions-Backend (URI-Parameter)
    pub transkription: TranskriptionsEinstellungen,
    /// Zeitlimits und Grenzen der Backend-Verbindungen
    pub verbindung: VerbindungsEinstellungen,
    /// Endpunkt fuer Funktionsaufrufe
    pub funktionen: FunktionsEinstellungen,
    pub logging: LoggingEinstellungen,
    /// Observability-Einstellungen (Metriken, Health)
    pub observability: ObservabilityEinstellungen,
    /// Nie aus der Datei, nur aus `COACHLINE_BACKEND_KEY`
    #[serde(skip)]
    pub backend_schluessel: Option<Geheimnis>,
}

/// Geheimer Wert, der in `Debug`-Ausgaben nicht erscheint
#[derive(Clone, PartialEq, Eq)]
pub struct Geheimnis(String);

impl Geheimnis {
    pub fn neu(wert: impl Into<String>) -> Self {
        Self(wert.into())
    }

    pub fn offenlegen(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Geheimnis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("<redacted>")
    }
}

/// Raum und Raum-Bridge
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RaumEinstellungen {
    /// WebSocket-URL der Raum-Bridge
    pub bridge_url: String,
    /// Name des Raums (Logs, Health)
    pub name: String,
    /// Identitaet des Agenten im Raum
    pub agent_identitaet: String,
    /// Frist bis zum Beenden, wenn die Raumverbindung nicht zurueckkehrt
    pub failsafe_s: u64,
    /// Erwartetes Format der Teilnehmer-Frames
    pub eingang_sample_rate: u32,
    pub eingang_kanaele: u16,
    /// Basis-Wartezeit zwischen Wiederverbindungsversuchen zur Bridge
    pub wiederverbindung_ms: u64,
}

impl Default for RaumEinstellungen {
    fn default() -> Self {
        Self {
            bridge_url: "ws://127.0.0.1:7881/agent".into(),
            name: "coaching".into(),
            agent_identitaet: "coachline-agent".into(),
            failsafe_s: 300,
            eingang_sample_rate: 48_000,
            eingang_kanaele: 1,
            wiederverbindung_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LebenszyklusEinstellungen {
    /// Wartezeit nach dem Verlassen des letzten Menschen
    pub grace_s: u64,
}

impl Default for LebenszyklusEinstellungen {
    fn default() -> Self {
        Self { grace_s: 60 }
    }
}

/// Wiedergabe synthetisierter Sprache
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WiedergabeEinstellungen {
    pub sample_rate: u32,
    pub kanaele: u16,
    pub frame_ms: u64,
    /// Frames die vor dem Start eines Turns gepuffert werden
    pub vorpuffer_frames: usize,
    pub poll_ms: u64,
    /// Leere Poll-Intervalle bis zum Turn-Ende
    pub stille_intervalle: u32,
    pub hochpass_hz: f32,
}

impl Default for WiedergabeEinstellungen {
    fn default() -> Self {
        Self {
            sample_rate: 24_000,
            kanaele: 1,
            frame_ms: 20,
            vorpuffer_frames: 20,
            poll_ms: 20,
            stille_intervalle: 15,
            hochpass_hz: 10.0,
        }
    }
}

/// Konversations-Backend
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KonversationsEinstellungen {
    pub url: String,
    pub eingang_encoding: String,
    pub eingang_sample_rate: u32,
    pub ausgabe_encoding: String,
    pub ausgabe_sample_rate: u32,
    pub sprache: Option<String>,
    pub listen_provider: String,
    pub listen_modell: String,
    pub think_provider: String,
    pub think_modell: String,
    pub temperatur: Option<f32>,
    pub prompt: String,
    pub speak_provider: String,
    pub stimme: String,
    pub begruessung: Option<String>,
    pub keyterms: Vec<String>,
}

impl Default for KonversationsEinstellungen {
    fn default() -> Self {
        Self {
            url: "wss://agent.deepgram.com/v1/agent/converse".into(),
            eingang_encoding: "linear16".into(),
            eingang_sample_rate: 48_000,
            ausgabe_encoding: "linear16".into(),
            ausgabe_sample_rate: 24_000,
            sprache: None,
            listen_provider: "deepgram".into(),
            listen_modell: "nova-3".into(),
            think_provider: "open_ai".into(),
            think_modell: "gpt-4o-mini".into(),
            temperatur: Some(0.7),
            prompt: "Du bist ein einfuehlsamer Coaching-Assistent.".into(),
            speak_provider: "deepgram".into(),
            stimme: "aura-2-thalia-en".into(),
            begruessung: None,
            keyterms: Vec::new(),
        }
    }
}

/// Transkriptions-Backend
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranskriptionsEinstellungen {
    pub url: String,
    pub encoding: String,
    pub sample_rate: u32,
    pub kanaele: u16,
    pub modell: String,
    pub punctuate: bool,
    pub interim_results: bool,
    pub vad_events: bool,
    pub sprache: Option<String>,
    pub keyterms: Vec<String>,
}

impl Default for TranskriptionsEinstellungen {
    fn default() -> Self {
        let p = ListenParameter::default();
        Self {
            url: "wss://api.deepgram.com/v1/listen".into(),
            encoding: p.encoding,
            sample_rate: p.sample_rate,
            kanaele: p.kanaele,
            modell: p.model,
            punctuate: p.punctuate,
            interim_results: p.interim_results,
            vad_events: p.vad_events,
            sprache: p.language,
            keyterms: p.keyterms,
        }
    }
}

/// Zeitlimits und Grenzen der Backend-Verbindungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerbindungsEinstellungen {
    pub handshake_timeout_ms: u64,
    pub max_versuche: u32,
    pub backoff_basis_ms: u64,
    /// Frames pro Sende-Queue
    pub queue_kapazitaet: usize,
    pub keepalive_s: u64,
    /// Formatfehler in Folge bis zur Eskalation
    pub format_fehler_schwelle: u32,
}

impl Default for VerbindungsEinstellungen {
    fn default() -> Self {
        let v = VerbindungsConfig::default();
        Self {
            handshake_timeout_ms: v.handshake_timeout.as_millis() as u64,
            max_versuche: v.max_versuche,
            backoff_basis_ms: v.backoff_basis.as_millis() as u64,
            queue_kapazitaet: v.queue_kapazitaet,
            keepalive_s: v.keepalive_intervall.as_secs(),
            format_fehler_schwelle: coachline_backend::manager::STANDARD_FORMAT_FEHLER_SCHWELLE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FunktionsEinstellungen {
    /// HTTP-Endpunkt (leer = keine Funktionen)
    pub endpunkt: Option<String>,
    pub zeitlimit_ms: u64,
}

impl Default for FunktionsEinstellungen {
    fn default() -> Self {
        Self {
            endpunkt: None,
            zeitlimit_ms: 10_000,
        }
    }
}

/// Logging-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// Log-Level: "trace", "debug", "info", "warn", "error"
    pub level: String,
    /// Format: "json" oder "text"
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

/// Observability-Einstellungen (Metriken + Health-Check)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityEinstellungen {
    /// Aktiviert den Observability-Server
    pub aktiviert: bool,
    pub bind_adresse: String,
    /// Port fuer Metriken und Health (Standard: 9300)
    pub port: u16,
}

impl Default for ObservabilityEinstellungen {
    fn default() -> Self {
        Self {
            aktiviert: true,
            bind_adresse: "0.0.0.0".into(),
            port: 9300,
        }
    }
}

impl AgentConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei und den Schluessel aus der Umgebung.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &str) -> anyhow::Result<Self> {
        let mut config = match std::fs::read_to_string(pfad) {
            Ok(inhalt) => Self::aus_toml(&inhalt)
                .map_err(|e| anyhow::anyhow!("Konfigurationsfehler in '{pfad}': {e}"))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = pfad,
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Self::default()
            }
            Err(e) => {
                return Err(anyhow::anyhow!(
                    "Konfigurationsdatei '{pfad}' nicht lesbar: {e}"
                ))
            }
        };

        config.backend_schluessel = std::env::var(SCHLUESSEL_ENV)
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(Geheimnis::neu);
        if config.backend_schluessel.is_none() {
            tracing::warn!("{SCHLUESSEL_ENV} nicht gesetzt, Backends werden ohne Schluessel kontaktiert");
        }

        config.pruefen()?;
        Ok(config)
    }

    pub fn aus_toml(inhalt: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(inhalt)?)
    }

    /// Prueft Werte, die spaeter nicht mehr sinnvoll abgefangen werden koennen
    pub fn pruefen(&self) -> anyhow::Result<()> {
        let w = &self.wiedergabe;
        if w.sample_rate == 0 || w.kanaele == 0 || w.frame_ms == 0 {
            anyhow::bail!("[wiedergabe]: sample_rate, kanaele und frame_ms muessen > 0 sein");
        }
        if self.konversation.ausgabe_sample_rate != w.sample_rate {
            anyhow::bail!(
                "[konversation] ausgabe_sample_rate ({}) passt nicht zu [wiedergabe] sample_rate ({})",
                self.konversation.ausgabe_sample_rate,
                w.sample_rate
            );
        }
        // Das Routing prueft gegen [raum], die Backends bekommen ihre eigene Angabe
        let eingang = self.raum.eingang_sample_rate;
        if self.konversation.eingang_sample_rate != eingang || self.transkription.sample_rate != eingang {
            anyhow::bail!(
                "Eingangs-Abtastrate uneinheitlich: [raum] {} Hz, [konversation] {} Hz, [transkription] {} Hz",
                eingang,
                self.konversation.eingang_sample_rate,
                self.transkription.sample_rate
            );
        }
        if self.transkription.kanaele != self.raum.eingang_kanaele {
            anyhow::bail!(
                "[transkription] kanaele ({}) passt nicht zu [raum] eingang_kanaele ({})",
                self.transkription.kanaele,
                self.raum.eingang_kanaele
            );
        }
        if self.verbindung.queue_kapazitaet == 0 {
            anyhow::bail!("[verbindung] queue_kapazitaet muss > 0 sein");
        }
        if self.verbindung.max_versuche == 0 {
            anyhow::bail!("[verbindung] max_versuche muss > 0 sein");
        }
        Ok(())
    }

    /// Handshake-Nachricht des Konversations-Backends
    pub fn settings(&self) -> Settings {
        let k = &self.konversation;
        let provider = |typ: &str, modell: &str| Provider {
            typ: typ.to_string(),
            model: modell.to_string(),
            temperature: None,
            keyterms: Vec::new(),
        };
        Settings {
            audio: AudioEinstellungen {
                input: AudioFormat {
                    encoding: k.eingang_encoding.clone(),
                    sample_rate: k.eingang_sample_rate,
                    container: None,
                },
                output: AudioFormat {
                    encoding: k.ausgabe_encoding.clone(),
                    sample_rate: k.ausgabe_sample_rate,
                    container: Some("none".into()),
                },
            },
            agent: AgentEinstellungen {
                language: k.sprache.clone(),
                listen: Listen {
                    provider: Provider {
                        keyterms: k.keyterms.clone(),
                        ..provider(&k.listen_provider, &k.listen_modell)
                    },
                },
                think: Think {
                    provider: Provider {
                        temperature: k.temperatur,
                        ..provider(&k.think_provider, &k.think_modell)
                    },
                    prompt: k.prompt.clone(),
                },
                speak: Speak {
                    provider: provider(&k.speak_provider, &k.stimme),
                },
                greeting: k.begruessung.clone(),
            },
        }
    }

    /// URI-Parameter des Transkriptions-Backends
    pub fn listen_parameter(&self) -> ListenParameter {
        let t = &self.transkription;
        ListenParameter {
            encoding: t.encoding.clone(),
            sample_rate: t.sample_rate,
            kanaele: t.kanaele,
            model: t.modell.clone(),
            punctuate: t.punctuate,
            interim_results: t.interim_results,
            vad_events: t.vad_events,
            language: t.sprache.clone(),
            keyterms: t.keyterms.clone(),
        }
    }

    pub fn verbindungs_config(&self) -> VerbindungsConfig {
        let v = &self.verbindung;
        VerbindungsConfig {
            handshake_timeout: Duration::from_millis(v.handshake_timeout_ms),
            max_versuche: v.max_versuche,
            backoff_basis: Duration::from_millis(v.backoff_basis_ms),
            queue_kapazitaet: v.queue_kapazitaet,
            keepalive_intervall: Duration::from_secs(v.keepalive_s),
        }
    }

    pub fn wiedergabe_config(&self) -> WiedergabeConfig {
        let w = &self.wiedergabe;
        WiedergabeConfig {
            sample_rate: w.sample_rate,
            kanaele: w.kanaele,
            frame_dauer: Duration::from_millis(w.frame_ms),
            vorpuffer_frames: w.vorpuffer_frames,
            poll_intervall: Duration::from_millis(w.poll_ms),
            stille_intervalle: w.stille_intervalle,
            hochpass_hz: w.hochpass_hz,
        }
    }

    pub fn lebenszyklus_config(&self) -> LebenszyklusConfig {
        LebenszyklusConfig {
            grace: Duration::from_secs(self.lebenszyklus.grace_s),
            failsafe: Duration::from_secs(self.raum.failsafe_s),
        }
    }

    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            eingang_sample_rate: self.raum.eingang_sample_rate,
            eingang_kanaele: self.raum.eingang_kanaele,
            format_fehler_schwelle: self.verbindung.format_fehler_schwelle,
        }
    }

    pub fn funktions_zeitlimit(&self) -> Duration {
        Duration::from_millis(self.funktionen.zeitlimit_ms)
    }

    /// Gibt die Bind-Adresse fuer den Observability-Server zurueck
    pub fn observability_bind_adresse(&self) -> String {
        format!(
            "{}:{}",
            self.observability.bind_adresse, self.observability.port
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_config_ist_valide() {
        let cfg = AgentConfig::default();
        assert!(cfg.pruefen().is_ok());
        assert_eq!(cfg.lebenszyklus.grace_s, 60);
        assert_eq!(cfg.raum.failsafe_s, 300);
        assert_eq!(cfg.wiedergabe.sample_rate, 24_000);
        assert_eq!(cfg.verbindung.format_fehler_schwelle, 50);
        assert_eq!(cfg.verbindung.queue_kapazitaet, 256);
        assert_eq!(cfg.observability_bind_adresse(), "0.0.0.0:9300");
    }

    #[test]
    fn config_aus_toml_string() {
        let toml = r#"
            [raum]
            name = "sitzung-42"

            [lebenszyklus]
            grace_s = 30

            [verbindung]
            max_versuche = 5
        "#;
        let cfg = AgentConfig::aus_toml(toml).unwrap();
        assert_eq!(cfg.raum.name, "sitzung-42");
        assert_eq!(cfg.lebenszyklus_config().grace, Duration::from_secs(30));
        assert_eq!(cfg.verbindungs_config().max_versuche, 5);
        // Nicht angegebene Felder behalten Standardwerte
        assert_eq!(cfg.raum.agent_identitaet, "coachline-agent");
        assert_eq!(cfg.verbindungs_config().keepalive_intervall, Duration::from_secs(8));
    }

    #[test]
    fn schluessel_wird_nicht_aus_der_datei_gelesen() {
        let cfg = AgentConfig::aus_toml("backend_schluessel = \"geheim\"\n").unwrap();
        assert!(cfg.backend_schluessel.is_none());
    }

    #[test]
    fn schluessel_erscheint_nicht_im_debug() {
        let cfg = AgentConfig {
            backend_schluessel: Some(Geheimnis::neu("sk-sehr-geheim")),
            ..Default::default()
        };
        let ausgabe = format!("{cfg:?}");
        assert!(!ausgabe.contains("sk-sehr-geheim"));
        assert!(ausgabe.contains("<redacted>"));
    }

    #[test]
    fn ausgabe_rate_muss_zur_wiedergabe_passen() {
        let mut cfg = AgentConfig::default();
        cfg.konversation.ausgabe_sample_rate = 16_000;
        assert!(cfg.pruefen().is_err());
    }

    #[test]
    fn eingangs_rate_muss_ueberall_gleich_sein() {
        let mut cfg = AgentConfig::default();
        cfg.raum.eingang_sample_rate = 16_000;
        assert!(cfg.pruefen().is_err());

        cfg.konversation.eingang_sample_rate = 16_000;
        assert!(cfg.pruefen().is_err());

        cfg.transkription.sample_rate = 16_000;
        assert!(cfg.pruefen().is_ok());

        cfg.transkription.kanaele = 2;
        assert!(cfg.pruefen().is_err());
    }

    #[test]
    fn settings_uebernehmen_die_konfiguration() {
        let mut cfg = AgentConfig::default();
        cfg.konversation.keyterms = vec!["Achtsamkeit".into()];
        cfg.konversation.begruessung = Some("Hallo!".into());
        let settings = cfg.settings();

        assert_eq!(settings.audio.input.sample_rate, 48_000);
        assert_eq!(settings.audio.output.container.as_deref(), Some("none"));
        assert_eq!(settings.agent.listen.provider.keyterms, vec!["Achtsamkeit"]);
        assert_eq!(settings.agent.think.provider.temperature, Some(0.7));
        assert_eq!(settings.agent.speak.provider.model, "aura-2-thalia-en");
        assert_eq!(settings.agent.greeting.as_deref(), Some("Hallo!"));
    }

    #[test]
    fn listen_parameter_uebernehmen_die_konfiguration() {
        let mut cfg = AgentConfig::default();
        cfg.transkription.interim_results = true;
        let p = cfg.listen_parameter();
        assert_eq!(p.sample_rate, 48_000);
        assert!(p.interim_results);
        assert!(p.uri("wss://x/v1/listen").contains("interim_results=true"));
    }
}
