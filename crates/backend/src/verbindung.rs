//! SprachBackendVerbindung – eine persistente Duplex-Verbindung zu einem Sprach-Backend
//!
//! Beide Backend-Varianten teilen dieselbe Implementierung und unterscheiden
//! sich nur in Handshake und Ereignis-Auswertung (`BackendArt`).
//!
//! Ablauf pro Verbindung:
//! 1. Verbinden und Handshake innerhalb des Zeitlimits (Standard 5s)
//! 2. Sende-Queue leeren, danach Audio, Steuernachrichten und Keepalives senden
//! 3. Bei unerwartetem Schliessen: Wiederverbindung mit exponentiellem Backoff,
//!    nach erschoepften Versuchen `BackendEreignis::Erschoepft`
//!
//! Audio, das vor der Handshake-Bestaetigung eintrifft, wartet in der
//! begrenzten Sende-Queue. Eine Wiederverbindung des Konversations-Backends
//! sendet die Settings erneut und beginnt ohne vorherigen Gespraechskontext.

use bytes::Bytes;
use coachline_core::{CoachlineError, Result};
use coachline_protocol::agent::FunktionsAufruf;
use coachline_protocol::{
    KonversationsBefehl, KonversationsEreignis, ListenParameter, Settings, TranskriptionsBefehl,
    TranskriptionsEreignis,
};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::queue::{SendeQueue, STANDARD_KAPAZITAET};
use crate::transport::{Kanal, NachrichtenEmpfaenger, NachrichtenSender, Verbinder, WsNachricht};

/// Kapazitaet des Ereignis-Kanals zum Verbindungs-Manager
const EREIGNIS_KAPAZITAET: usize = 1024;

/// Wie lange `schliessen` auf das Ende des Verbindungs-Tasks wartet
const SCHLIESSEN_ZEITLIMIT: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// Konfiguration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendArt {
    /// Sprache rein, Denken, Sprache raus
    Konversation,
    /// Nur Sprache-zu-Text
    Transkription,
}

impl BackendArt {
    pub fn als_str(&self) -> &'static str {
        match self {
            Self::Konversation => "conversation",
            Self::Transkription => "transcription",
        }
    }

    /// Nur das Konversations-Backend liefert synthetisierte Sprache
    pub fn liefert_synthese(&self) -> bool {
        matches!(self, Self::Konversation)
    }
}

impl fmt::Display for BackendArt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.als_str())
    }
}

/// Handshake-Variante des Backends
#[derive(Debug, Clone)]
pub enum Handshake {
    /// Genau eine `Settings`-Nachricht, bestaetigt durch `SettingsApplied`
    Konversation(Settings),
    /// Parameter in der URI, Bestaetigung ist das Oeffnen der Verbindung
    Transkription(ListenParameter),
}

/// Unveraenderliche Verbindungseinstellungen (pro Sitzung einmal erzeugt)
#[derive(Debug, Clone)]
pub struct VerbindungsEinstellungen {
    pub basis_uri: String,
    pub handshake: Handshake,
}

impl VerbindungsEinstellungen {
    pub fn konversation(basis_uri: impl Into<String>, settings: Settings) -> Self {
        Self {
            basis_uri: basis_uri.into(),
            handshake: Handshake::Konversation(settings),
        }
    }

    pub fn transkription(basis_uri: impl Into<String>, parameter: ListenParameter) -> Self {
        Self {
            basis_uri: basis_uri.into(),
            handshake: Handshake::Transkription(parameter),
        }
    }

    pub fn art(&self) -> BackendArt {
        match self.handshake {
            Handshake::Konversation(_) => BackendArt::Konversation,
            Handshake::Transkription(_) => BackendArt::Transkription,
        }
    }

    /// Vollstaendige Verbindungs-URI
    pub fn uri(&self) -> String {
        match self.handshake {
            Handshake::Konversation(_) => self.basis_uri.clone(),
            Handshake::Transkription(ref parameter) => parameter.uri(&self.basis_uri),
        }
    }
}

/// Zeitlimits und Grenzen einer Backend-Verbindung
#[derive(Debug, Clone)]
pub struct VerbindungsConfig {
    pub handshake_timeout: Duration,
    /// Verbindungsversuche nach einem Abbruch, bevor aufgegeben wird
    pub max_versuche: u32,
    pub backoff_basis: Duration,
    pub queue_kapazitaet: usize,
    /// Keepalive nach so langer Zeit ohne gesendetes Audio
    pub keepalive_intervall: Duration,
}

impl Default for VerbindungsConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(5),
            max_versuche: 3,
            backoff_basis: Duration::from_millis(500),
            queue_kapazitaet: STANDARD_KAPAZITAET,
            keepalive_intervall: Duration::from_secs(8),
        }
    }
}

impl VerbindungsConfig {
    /// Wartezeit vor dem naechsten Versuch nach `fehlversuche` Fehlschlaegen
    pub fn backoff(&self, fehlversuche: u32) -> Duration {
        self.backoff_basis
            .saturating_mul(1u32 << fehlversuche.min(10))
    }
}

// ---------------------------------------------------------------------------
// Ereignisse und Statistik
// ---------------------------------------------------------------------------

/// Ereignisse einer Backend-Verbindung an den Verbindungs-Manager
#[derive(Debug, Clone, PartialEq)]
pub enum BackendEreignis {
    /// Handshake bestaetigt, Audio fliesst
    Bereit { wiederverbunden: bool },
    /// Transkript eines Turns; `rolle` nur wenn das Backend sie liefert
    Transkript {
        rolle: Option<String>,
        text: String,
        ist_final: bool,
    },
    /// Sprechbeginn eines Menschen (Barge-in)
    SpracheBegonnen,
    /// Synthese des aktuellen Turns abgeschlossen
    SpracheBeendet,
    /// Roh-PCM der synthetisierten Antwort
    SyntheseAudio(Bytes),
    Funktionsaufruf(FunktionsAufruf),
    /// Vom Backend gemeldeter Fehler (Verbindung bleibt bestehen)
    Fehler { art: String, detail: String },
    /// Unerwartet geschlossen, Wiederverbindung laeuft
    Getrennt { grund: String },
    /// Alle Verbindungsversuche fehlgeschlagen
    Erschoepft { detail: String },
    /// Geordnet geschlossen
    Geschlossen,
}

/// Momentaufnahme der Zaehler einer Verbindung
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerbindungsStatistik {
    pub frames_gesendet: u64,
    pub frames_verworfen: u64,
    pub queue_laenge: usize,
    pub verbindungsversuche: u64,
    pub wiederverbindungen: u64,
    pub protokollfehler: u64,
    pub keepalives: u64,
    pub bereit: bool,
}

#[derive(Debug, Default)]
struct Zaehler {
    gesendet: AtomicU64,
    versuche: AtomicU64,
    wiederverbindungen: AtomicU64,
    protokollfehler: AtomicU64,
    keepalives: AtomicU64,
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Handle auf eine laufende Backend-Verbindung
///
/// Clone-bar; alle Klone teilen Queue und Verbindungs-Task.
#[derive(Clone)]
pub struct SprachBackendVerbindung {
    inner: Arc<VerbindungInner>,
}

struct VerbindungInner {
    art: BackendArt,
    audio: SendeQueue<Bytes>,
    steuer_tx: mpsc::UnboundedSender<String>,
    shutdown_tx: watch::Sender<bool>,
    bereit: AtomicBool,
    zaehler: Zaehler,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SprachBackendVerbindung {
    /// Startet den Verbindungs-Task
    ///
    /// Gibt das Handle und den Ereignis-Kanal zurueck. Der Verbindungsaufbau
    /// laeuft im Hintergrund; Audio kann sofort eingereiht werden.
    pub fn starten(
        einstellungen: VerbindungsEinstellungen,
        config: VerbindungsConfig,
        verbinder: Arc<dyn Verbinder>,
    ) -> (Self, mpsc::Receiver<BackendEreignis>) {
        let (ereignis_tx, ereignis_rx) = mpsc::channel(EREIGNIS_KAPAZITAET);
        let (steuer_tx, steuer_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let inner = Arc::new(VerbindungInner {
            art: einstellungen.art(),
            audio: SendeQueue::neu(config.queue_kapazitaet),
            steuer_tx,
            shutdown_tx,
            bereit: AtomicBool::new(false),
            zaehler: Zaehler::default(),
            task: Mutex::new(None),
        });

        let task = VerbindungsTask {
            inner: Arc::clone(&inner),
            einstellungen,
            config,
            verbinder,
            ereignisse: ereignis_tx,
            steuer_rx,
            shutdown_rx,
        };
        let handle = tokio::spawn(task.laufen());
        *inner.task.lock() = Some(handle);

        (Self { inner }, ereignis_rx)
    }

    pub fn art(&self) -> BackendArt {
        self.inner.art
    }

    /// Handshake bestaetigt und Verbindung offen
    pub fn ist_bereit(&self) -> bool {
        self.inner.bereit.load(Ordering::Acquire)
    }

    /// Reiht einen Audio-Frame ein, blockiert nie
    ///
    /// Gibt `false` zurueck wenn dafuer ein aelterer Frame verworfen wurde
    /// oder die Verbindung beendet ist.
    pub fn audio_senden(&self, pcm: Bytes) -> bool {
        let verlustfrei = self.inner.audio.einreihen(pcm);
        if !verlustfrei && !self.inner.audio.ist_geschlossen() {
            tracing::debug!(
                backend = %self.inner.art,
                verworfen = self.inner.audio.verworfen(),
                "Sende-Queue voll, aeltester Frame verworfen"
            );
        }
        verlustfrei
    }

    /// Sendet eine Steuernachricht an das Konversations-Backend
    ///
    /// Wird vor der Handshake-Bestaetigung gepuffert.
    pub fn befehl_senden(&self, befehl: &KonversationsBefehl) -> Result<()> {
        if self.inner.art != BackendArt::Konversation {
            return Err(CoachlineError::Protokoll(format!(
                "Steuerbefehl nicht moeglich fuer Backend '{}'",
                self.inner.art
            )));
        }
        let json = befehl.als_json()?;
        self.inner
            .steuer_tx
            .send(json)
            .map_err(|_| CoachlineError::Verbindung("Verbindung bereits beendet".into()))
    }

    pub fn statistik(&self) -> VerbindungsStatistik {
        let z = &self.inner.zaehler;
        VerbindungsStatistik {
            frames_gesendet: z.gesendet.load(Ordering::Relaxed),
            frames_verworfen: self.inner.audio.verworfen(),
            queue_laenge: self.inner.audio.laenge(),
            verbindungsversuche: z.versuche.load(Ordering::Relaxed),
            wiederverbindungen: z.wiederverbindungen.load(Ordering::Relaxed),
            protokollfehler: z.protokollfehler.load(Ordering::Relaxed),
            keepalives: z.keepalives.load(Ordering::Relaxed),
            bereit: self.ist_bereit(),
        }
    }

    /// Schliesst die Verbindung geordnet und wartet auf das Task-Ende
    pub async fn schliessen(&self) {
        let _ = self.inner.shutdown_tx.send(true);
        let handle = self.inner.task.lock().take();
        if let Some(handle) = handle {
            if tokio::time::timeout(SCHLIESSEN_ZEITLIMIT, handle).await.is_err() {
                tracing::warn!(backend = %self.inner.art, "Verbindungs-Task reagiert nicht auf Shutdown");
            }
        }
        self.inner.audio.schliessen();
    }
}

impl fmt::Debug for SprachBackendVerbindung {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SprachBackendVerbindung")
            .field("art", &self.inner.art)
            .field("bereit", &self.ist_bereit())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Verbindungs-Task
// ---------------------------------------------------------------------------

enum SitzungsEnde {
    Shutdown,
    Getrennt(String),
}

struct VerbindungsTask {
    inner: Arc<VerbindungInner>,
    einstellungen: VerbindungsEinstellungen,
    config: VerbindungsConfig,
    verbinder: Arc<dyn Verbinder>,
    ereignisse: mpsc::Sender<BackendEreignis>,
    steuer_rx: mpsc::UnboundedReceiver<String>,
    shutdown_rx: watch::Receiver<bool>,
}

impl VerbindungsTask {
    async fn laufen(mut self) {
        let art = self.inner.art;
        let uri = self.einstellungen.uri();
        let mut fehlversuche: u32 = 0;
        let mut warten: Option<Duration> = None;
        let mut war_verbunden = false;

        tracing::info!(backend = %art, "Backend-Verbindung wird aufgebaut");

        loop {
            if let Some(wartezeit) = warten.take() {
                tracing::info!(
                    backend = %art,
                    wartezeit_ms = wartezeit.as_millis() as u64,
                    versuch = fehlversuche + 1,
                    "Neuer Verbindungsversuch"
                );
                tokio::select! {
                    biased;
                    _ = shutdown_abwarten(&mut self.shutdown_rx) => break,
                    _ = tokio::time::sleep(wartezeit) => {}
                }
            }
            if *self.shutdown_rx.borrow() {
                break;
            }

            self.inner.zaehler.versuche.fetch_add(1, Ordering::Relaxed);
            let ergebnis = tokio::select! {
                biased;
                _ = shutdown_abwarten(&mut self.shutdown_rx) => break,
                ergebnis = verbinden_mit_handshake(
                    self.verbinder.as_ref(),
                    &uri,
                    &self.einstellungen.handshake,
                    self.config.handshake_timeout,
                ) => ergebnis,
            };

            match ergebnis {
                Ok((sender, empfaenger)) => {
                    fehlversuche = 0;
                    if war_verbunden {
                        self.inner
                            .zaehler
                            .wiederverbindungen
                            .fetch_add(1, Ordering::Relaxed);
                    }
                    self.inner.bereit.store(true, Ordering::Release);
                    tracing::info!(
                        backend = %art,
                        wiederverbunden = war_verbunden,
                        wartend = self.inner.audio.laenge(),
                        "Backend-Handshake bestaetigt"
                    );
                    self.melden(BackendEreignis::Bereit {
                        wiederverbunden: war_verbunden,
                    })
                    .await;
                    war_verbunden = true;

                    let ende = self.sitzung(sender, empfaenger).await;
                    self.inner.bereit.store(false, Ordering::Release);

                    match ende {
                        SitzungsEnde::Shutdown => break,
                        SitzungsEnde::Getrennt(grund) => {
                            tracing::warn!(backend = %art, %grund, "Backend-Verbindung unerwartet geschlossen");
                            self.melden(BackendEreignis::Getrennt { grund }).await;
                            warten = Some(self.config.backoff(0));
                        }
                    }
                }
                Err(e) => {
                    fehlversuche += 1;
                    tracing::warn!(
                        backend = %art,
                        versuch = fehlversuche,
                        max = self.config.max_versuche,
                        error = %e,
                        "Verbindungsaufbau fehlgeschlagen"
                    );
                    if !e.ist_wiederholbar() || fehlversuche >= self.config.max_versuche.max(1) {
                        tracing::error!(backend = %art, versuche = fehlversuche, "Verbindungsversuche erschoepft");
                        self.inner.audio.schliessen();
                        self.melden(BackendEreignis::Erschoepft {
                            detail: e.to_string(),
                        })
                        .await;
                        return;
                    }
                    warten = Some(self.config.backoff(fehlversuche - 1));
                }
            }
        }

        self.inner.audio.schliessen();
        tracing::info!(backend = %art, "Backend-Verbindung geschlossen");
        self.melden(BackendEreignis::Geschlossen).await;
    }

    /// Betrieb einer bestaetigten Verbindung bis Shutdown oder Abbruch
    async fn sitzung(
        &mut self,
        mut sender: Box<dyn NachrichtenSender>,
        mut empfaenger: Box<dyn NachrichtenEmpfaenger>,
    ) -> SitzungsEnde {
        let art = self.inner.art;
        let keepalive = match keepalive_nachricht(art) {
            Ok(json) => json,
            Err(e) => return SitzungsEnde::Getrennt(e.to_string()),
        };
        let mut letzte_aktivitaet = Instant::now();

        loop {
            let keepalive_faellig = letzte_aktivitaet + self.config.keepalive_intervall;

            tokio::select! {
                biased;

                Ok(()) = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        geordnet_schliessen(art, sender.as_mut()).await;
                        return SitzungsEnde::Shutdown;
                    }
                }

                Some(json) = self.steuer_rx.recv() => {
                    tracing::debug!(backend = %art, "Steuernachricht gesendet");
                    if let Err(e) = sender.senden(WsNachricht::Text(json)).await {
                        return SitzungsEnde::Getrennt(e.to_string());
                    }
                }

                Some(pcm) = self.inner.audio.naechstes() => {
                    if let Err(e) = sender.senden(WsNachricht::Binaer(pcm)).await {
                        return SitzungsEnde::Getrennt(e.to_string());
                    }
                    self.inner.zaehler.gesendet.fetch_add(1, Ordering::Relaxed);
                    letzte_aktivitaet = Instant::now();
                }

                _ = tokio::time::sleep_until(keepalive_faellig) => {
                    tracing::trace!(backend = %art, "Keepalive");
                    if let Err(e) = sender.senden(WsNachricht::Text(keepalive.clone())).await {
                        return SitzungsEnde::Getrennt(e.to_string());
                    }
                    self.inner.zaehler.keepalives.fetch_add(1, Ordering::Relaxed);
                    letzte_aktivitaet = Instant::now();
                }

                eingang = empfaenger.empfangen() => match eingang {
                    None => return SitzungsEnde::Getrennt("Gegenseite hat geschlossen".into()),
                    Some(Err(e)) => return SitzungsEnde::Getrennt(e.to_string()),
                    Some(Ok(nachricht)) => self.eingang_verarbeiten(nachricht).await,
                },
            }
        }
    }

    async fn eingang_verarbeiten(&self, nachricht: WsNachricht) {
        match (self.inner.art, nachricht) {
            (BackendArt::Konversation, WsNachricht::Text(text)) => {
                match KonversationsEreignis::parsen(&text) {
                    Ok(ereignis) => self.konversation_verarbeiten(ereignis).await,
                    Err(e) => self.protokollfehler(&e),
                }
            }
            (BackendArt::Konversation, WsNachricht::Binaer(pcm)) => {
                tracing::trace!(bytes = pcm.len(), "Synthese-Chunk empfangen");
                self.melden(BackendEreignis::SyntheseAudio(pcm)).await;
            }
            (BackendArt::Transkription, WsNachricht::Text(text)) => {
                match TranskriptionsEreignis::parsen(&text) {
                    Ok(ereignis) => self.transkription_verarbeiten(ereignis).await,
                    Err(e) => self.protokollfehler(&e),
                }
            }
            (BackendArt::Transkription, WsNachricht::Binaer(daten)) => {
                self.protokollfehler(&CoachlineError::Protokoll(format!(
                    "Unerwartetes Binaer-Frame ({} Bytes)",
                    daten.len()
                )));
            }
        }
    }

    async fn konversation_verarbeiten(&self, ereignis: KonversationsEreignis) {
        match ereignis {
            KonversationsEreignis::ConversationText { role, content } => {
                self.melden(BackendEreignis::Transkript {
                    rolle: Some(role),
                    text: content,
                    ist_final: true,
                })
                .await;
            }
            KonversationsEreignis::UserStartedSpeaking => {
                self.melden(BackendEreignis::SpracheBegonnen).await;
            }
            KonversationsEreignis::AgentAudioDone => {
                self.melden(BackendEreignis::SpracheBeendet).await;
            }
            KonversationsEreignis::FunctionCallRequest { functions } => {
                for aufruf in functions {
                    if aufruf.client_side {
                        self.melden(BackendEreignis::Funktionsaufruf(aufruf)).await;
                    } else {
                        tracing::debug!(funktion = %aufruf.name, "Serverseitige Funktion, nichts zu tun");
                    }
                }
            }
            KonversationsEreignis::Error { description, code } => {
                tracing::warn!(code = ?code, %description, "Konversations-Backend meldet Fehler");
                self.melden(BackendEreignis::Fehler {
                    art: code.unwrap_or_else(|| "error".into()),
                    detail: description,
                })
                .await;
            }
            KonversationsEreignis::Warning { description, code } => {
                tracing::warn!(code = ?code, %description, "Konversations-Backend meldet Warnung");
            }
            KonversationsEreignis::InjectionRefused { message } => {
                tracing::warn!(%message, "Kontext-Hinweis abgelehnt");
            }
            KonversationsEreignis::PromptUpdated => {
                tracing::debug!("Prompt aktualisiert");
            }
            KonversationsEreignis::AgentStartedSpeaking { total_latency } => {
                tracing::debug!(latenz = ?total_latency, "Agent beginnt zu sprechen");
            }
            KonversationsEreignis::AgentThinking { .. }
            | KonversationsEreignis::Welcome { .. }
            | KonversationsEreignis::SettingsApplied => {
                tracing::trace!("Konversationsereignis ohne Aktion");
            }
        }
    }

    async fn transkription_verarbeiten(&self, ereignis: TranskriptionsEreignis) {
        if let Some(text) = ereignis.bester_text() {
            let ist_final = matches!(ereignis, TranskriptionsEreignis::Results { is_final: true, .. });
            self.melden(BackendEreignis::Transkript {
                rolle: None,
                text: text.to_string(),
                ist_final,
            })
            .await;
            return;
        }
        match ereignis {
            TranskriptionsEreignis::Metadata { request_id } => {
                tracing::debug!(request_id = ?request_id, "Transkriptions-Metadaten");
            }
            TranskriptionsEreignis::SpeechStarted { .. }
            | TranskriptionsEreignis::UtteranceEnd { .. }
            | TranskriptionsEreignis::Results { .. } => {
                tracing::trace!("Transkriptionsereignis ohne Text");
            }
        }
    }

    fn protokollfehler(&self, fehler: &CoachlineError) {
        let anzahl = self.inner.zaehler.protokollfehler.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::warn!(backend = %self.inner.art, error = %fehler, anzahl, "Nachricht verworfen");
    }

    async fn melden(&self, ereignis: BackendEreignis) {
        if self.ereignisse.send(ereignis).await.is_err() {
            tracing::trace!(backend = %self.inner.art, "Kein Empfaenger fuer Backend-Ereignisse");
        }
    }
}

// ---------------------------------------------------------------------------
// Hilfsfunktionen
// ---------------------------------------------------------------------------

/// Oeffnet die Verbindung und fuehrt den Handshake innerhalb des Zeitlimits aus
async fn verbinden_mit_handshake(
    verbinder: &dyn Verbinder,
    uri: &str,
    handshake: &Handshake,
    zeitlimit: Duration,
) -> Result<Kanal> {
    let ablauf = async {
        let (mut sender, mut empfaenger) = verbinder.verbinden(uri).await?;

        if let Handshake::Konversation(settings) = handshake {
            sender.senden(WsNachricht::Text(settings.als_json()?)).await?;
            loop {
                let text = match empfaenger.empfangen().await {
                    None => {
                        return Err(CoachlineError::Verbindung(
                            "Geschlossen waehrend des Handshakes".into(),
                        ))
                    }
                    Some(Err(e)) => return Err(e),
                    Some(Ok(WsNachricht::Binaer(_))) => continue,
                    Some(Ok(WsNachricht::Text(text))) => text,
                };
                match KonversationsEreignis::parsen(&text) {
                    Ok(KonversationsEreignis::SettingsApplied) => break,
                    Ok(KonversationsEreignis::Error { description, .. }) => {
                        return Err(CoachlineError::Verbindung(format!(
                            "Handshake abgelehnt: {description}"
                        )))
                    }
                    Ok(_) => continue,
                    Err(e) => tracing::warn!(error = %e, "Nachricht waehrend Handshake verworfen"),
                }
            }
        }
        Ok((sender, empfaenger))
    };

    tokio::time::timeout(zeitlimit, ablauf)
        .await
        .map_err(|_| {
            CoachlineError::Zeitlimit(format!(
                "Keine Handshake-Bestaetigung nach {} ms",
                zeitlimit.as_millis()
            ))
        })?
}

fn keepalive_nachricht(art: BackendArt) -> Result<String> {
    match art {
        BackendArt::Konversation => KonversationsBefehl::KeepAlive.als_json(),
        BackendArt::Transkription => TranskriptionsBefehl::KeepAlive.als_json(),
    }
}

async fn geordnet_schliessen(art: BackendArt, sender: &mut dyn NachrichtenSender) {
    if art == BackendArt::Transkription {
        match TranskriptionsBefehl::CloseStream.als_json() {
            Ok(json) => {
                if let Err(e) = sender.senden(WsNachricht::Text(json)).await {
                    tracing::debug!(error = %e, "CloseStream nicht gesendet");
                }
            }
            Err(e) => tracing::debug!(error = %e, "CloseStream nicht serialisierbar"),
        }
    }
    if let Err(e) = sender.schliessen().await {
        tracing::debug!(backend = %art, error = %e, "Schliessen fehlgeschlagen");
    }
}

/// Wartet bis das Shutdown-Signal gesetzt ist
async fn shutdown_abwarten(rx: &mut watch::Receiver<bool>) {
    let signal_offen = rx.wait_for(|&beenden| beenden).await.is_ok();
    if !signal_offen {
        std::future::pending::<()>().await;
    }
}
