//! VerbindungsManager – Besitzer beider Backend-Verbindungen eines Raums
//!
//! Verantwortlich fuer:
//! - Routing eingehender Frames (Router + Gate + globale KI-Pause)
//! - Stille Kontext-Hinweise (Whisper) an das Konversations-Backend
//! - Barge-in: `SpracheBegonnen` leert die Wiedergabe sofort
//! - Synthese-Chunks in die Wiedergabe, Funktionsaufrufe an den Ausfuehrer
//! - Finale Transkripte beider Backends als Datenkanal-Nachricht in den Raum
//!
//! Das Routing blockiert nie auf Netzwerk-I/O: Frames landen in den
//! Drop-Oldest-Queues der Verbindungen.

use coachline_core::{
    AudioFrame, CoachlineError, RaumTransport, Result, Rolle, TeilnehmerId,
};
use coachline_protocol::agent::FunktionsAufruf;
use coachline_protocol::{AgentNachricht, KonversationsBefehl, TranskriptQuelle};
use coachline_voice::{AudioRouter, SitzungsZustand, Wiedergabe, Ziele};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::funktionen::{fehler_inhalt, FunktionsAusfuehrer};
use crate::verbindung::{BackendArt, BackendEreignis, SprachBackendVerbindung};

/// Standard: so viele fehlerhafte Frames in Folge gelten als Verbindungsfehler
pub const STANDARD_FORMAT_FEHLER_SCHWELLE: u32 = 50;

/// Erwartetes Eingangsformat und Eskalationsgrenze
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub eingang_sample_rate: u32,
    pub eingang_kanaele: u16,
    pub format_fehler_schwelle: u32,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            eingang_sample_rate: 48_000,
            eingang_kanaele: 1,
            format_fehler_schwelle: STANDARD_FORMAT_FEHLER_SCHWELLE,
        }
    }
}

/// Bausteine, die der Manager uebernimmt
pub struct ManagerTeile {
    pub zustand: SitzungsZustand,
    pub konversation: SprachBackendVerbindung,
    pub transkription: SprachBackendVerbindung,
    pub wiedergabe: Wiedergabe,
    pub raum: Arc<dyn RaumTransport>,
    pub ausfuehrer: Arc<dyn FunktionsAusfuehrer>,
}

/// Nicht lokal behandelbare Fehler fuer den Lebenszyklus
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Eskalation {
    VerbindungErschoepft { backend: BackendArt, detail: String },
}

/// Momentaufnahme der Routing-Zaehler
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingStatistik {
    pub zur_konversation: u64,
    pub zur_transkription: u64,
    /// Frames ohne Ziel (Echo des Agenten)
    pub unterdrueckt: u64,
    /// Wegen globaler KI-Pause nicht an die Konversation gesendet
    pub pausiert_zurueckgehalten: u64,
    pub format_fehler: u64,
    pub transkripte_weitergeleitet: u64,
    pub funktionsaufrufe: u64,
}

#[derive(Debug, Default)]
struct RoutingZaehler {
    zur_konversation: AtomicU64,
    zur_transkription: AtomicU64,
    unterdrueckt: AtomicU64,
    pausiert_zurueckgehalten: AtomicU64,
    format_fehler: AtomicU64,
    transkripte_weitergeleitet: AtomicU64,
    funktionsaufrufe: AtomicU64,
}

/// Clone-barer Handle; alle Klone teilen Verbindungen und Zaehler
#[derive(Clone)]
pub struct VerbindungsManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    config: ManagerConfig,
    zustand: SitzungsZustand,
    router: AudioRouter,
    konversation: SprachBackendVerbindung,
    transkription: SprachBackendVerbindung,
    wiedergabe: Wiedergabe,
    raum: Arc<dyn RaumTransport>,
    ausfuehrer: Arc<dyn FunktionsAusfuehrer>,
    format_fehler_folge: AtomicU32,
    zaehler: RoutingZaehler,
}

impl VerbindungsManager {
    pub fn neu(config: ManagerConfig, teile: ManagerTeile) -> Self {
        let router = AudioRouter::neu(teile.zustand.gate().clone());
        Self {
            inner: Arc::new(ManagerInner {
                config,
                zustand: teile.zustand,
                router,
                konversation: teile.konversation,
                transkription: teile.transkription,
                wiedergabe: teile.wiedergabe,
                raum: teile.raum,
                ausfuehrer: teile.ausfuehrer,
                format_fehler_folge: AtomicU32::new(0),
                zaehler: RoutingZaehler::default(),
            }),
        }
    }

    pub fn zustand(&self) -> &SitzungsZustand {
        &self.inner.zustand
    }

    pub fn konversation(&self) -> &SprachBackendVerbindung {
        &self.inner.konversation
    }

    pub fn transkription(&self) -> &SprachBackendVerbindung {
        &self.inner.transkription
    }

    pub fn wiedergabe(&self) -> &Wiedergabe {
        &self.inner.wiedergabe
    }

    // -----------------------------------------------------------------------
    // Routing
    // -----------------------------------------------------------------------

    /// Leitet einen Teilnehmer-Frame an die Ziel-Verbindungen weiter
    ///
    /// # Fehler
    /// - `AudioFormat`: Frame verworfen und gezaehlt
    /// - `Verbindung`: zu viele Formatfehler in Folge (Eskalation)
    pub fn audio_routen(&self, frame: &AudioFrame, rolle: Rolle) -> Result<Ziele> {
        let z = &self.inner.zaehler;

        if rolle == Rolle::AgentSelbst {
            z.unterdrueckt.fetch_add(1, Ordering::Relaxed);
            return Ok(Ziele::KEINE);
        }

        if let Err(e) =
            frame.format_pruefen(self.inner.config.eingang_sample_rate, self.inner.config.eingang_kanaele)
        {
            z.format_fehler.fetch_add(1, Ordering::Relaxed);
            let folge = self.inner.format_fehler_folge.fetch_add(1, Ordering::Relaxed) + 1;
            if folge > self.inner.config.format_fehler_schwelle {
                return Err(CoachlineError::Verbindung(format!(
                    "{folge} fehlerhafte Frames in Folge, zuletzt: {e}"
                )));
            }
            tracing::debug!(quelle = %frame.quelle, folge, error = %e, "Frame verworfen");
            return Err(e);
        }
        self.inner.format_fehler_folge.store(0, Ordering::Relaxed);

        let mut ziele = self.inner.router.route(frame, rolle);
        if ziele.konversation && self.inner.zustand.ist_pausiert() {
            ziele.konversation = false;
            z.pausiert_zurueckgehalten.fetch_add(1, Ordering::Relaxed);
        }

        if ziele.konversation {
            self.inner.konversation.audio_senden(frame.pcm.clone());
            z.zur_konversation.fetch_add(1, Ordering::Relaxed);
        }
        if ziele.transkription {
            self.inner.transkription.audio_senden(frame.pcm.clone());
            z.zur_transkription.fetch_add(1, Ordering::Relaxed);
        }
        if ziele.ist_leer() {
            z.unterdrueckt.fetch_add(1, Ordering::Relaxed);
        }

        tracing::trace!(
            quelle = %frame.quelle,
            sequenz = frame.sequenz,
            konversation = ziele.konversation,
            transkription = ziele.transkription,
            "Frame geroutet"
        );
        Ok(ziele)
    }

    // -----------------------------------------------------------------------
    // Steuerung
    // -----------------------------------------------------------------------

    /// Setzt das Gate eines Teilnehmers; gilt ab dem naechsten Frame
    pub fn stumm_setzen(&self, teilnehmer: &TeilnehmerId, stumm: bool) -> bool {
        let geaendert = self.inner.zustand.gate().stumm_setzen(teilnehmer, stumm);
        if geaendert {
            tracing::info!(teilnehmer = %teilnehmer, stumm, "Gate umgeschaltet");
        }
        geaendert
    }

    /// Haelt alles Audio von der Konversation fern; idempotent
    pub fn pausieren(&self) -> bool {
        let geaendert = self.inner.zustand.pausiert_setzen(true);
        if geaendert {
            tracing::info!("KI pausiert");
        }
        geaendert
    }

    /// Stellt das Routing nach Gate-Zustand wieder her; idempotent
    pub fn fortsetzen(&self) -> bool {
        let geaendert = self.inner.zustand.pausiert_setzen(false);
        if geaendert {
            tracing::info!("KI fortgesetzt");
        }
        geaendert
    }

    /// Stiller Kontext-Hinweis an die Konversation (keine Sprachausgabe)
    ///
    /// Fire-and-forget: das Ergebnis meldet das Backend asynchron
    /// (`PromptUpdated` bzw. `InjectionRefused`). Der Text erscheint nie
    /// im Transkript.
    pub fn whisper_einspeisen(&self, text: &str) -> Result<()> {
        let text = text.trim();
        if text.is_empty() {
            return Err(CoachlineError::Protokoll("Leerer Kontext-Hinweis".into()));
        }
        self.inner
            .konversation
            .befehl_senden(&KonversationsBefehl::UpdatePrompt {
                prompt: text.to_string(),
            })?;
        tracing::info!(zeichen = text.chars().count(), "Kontext-Hinweis eingespeist");
        Ok(())
    }

    /// Barge-in: verwirft den laufenden Turn der Wiedergabe
    pub async fn barge_in(&self) -> usize {
        let verworfen = self.inner.wiedergabe.leeren().await;
        tracing::info!(verworfen, "Barge-in");
        verworfen
    }

    /// Sendet eine Nachricht ueber den Datenkanal des Raums
    pub async fn nachricht_senden(&self, nachricht: &AgentNachricht) -> Result<()> {
        let payload = nachricht.als_payload()?;
        self.inner.raum.daten_veroeffentlichen(payload).await
    }

    // -----------------------------------------------------------------------
    // Backend-Ereignisse
    // -----------------------------------------------------------------------

    /// Verarbeitet die Ereignisse beider Verbindungen bis beide Kanaele enden
    ///
    /// Ereignisse einer Verbindung werden streng nacheinander verarbeitet:
    /// ein Barge-in ist abgeschlossen bevor der erste Chunk des naechsten
    /// Turns in die Wiedergabe gelangt.
    pub async fn ereignisse_verarbeiten(
        &self,
        mut konversation_rx: mpsc::Receiver<BackendEreignis>,
        mut transkription_rx: mpsc::Receiver<BackendEreignis>,
        eskalation_tx: mpsc::UnboundedSender<Eskalation>,
    ) {
        let mut konversation_offen = true;
        let mut transkription_offen = true;

        while konversation_offen || transkription_offen {
            tokio::select! {
                ereignis = konversation_rx.recv(), if konversation_offen => match ereignis {
                    Some(ereignis) => self.konversation_ereignis(ereignis, &eskalation_tx).await,
                    None => konversation_offen = false,
                },
                ereignis = transkription_rx.recv(), if transkription_offen => match ereignis {
                    Some(ereignis) => self.transkription_ereignis(ereignis, &eskalation_tx).await,
                    None => transkription_offen = false,
                },
            }
        }
        tracing::debug!("Ereignis-Verarbeitung beendet");
    }

    async fn konversation_ereignis(
        &self,
        ereignis: BackendEreignis,
        eskalation_tx: &mpsc::UnboundedSender<Eskalation>,
    ) {
        match ereignis {
            BackendEreignis::SyntheseAudio(pcm) => self.inner.wiedergabe.chunk_einreihen(pcm),
            BackendEreignis::SpracheBegonnen => {
                self.barge_in().await;
            }
            BackendEreignis::SpracheBeendet => self.inner.wiedergabe.synthese_fertig(),
            BackendEreignis::Transkript {
                rolle,
                text,
                ist_final,
            } => {
                if ist_final {
                    let rolle = rolle.unwrap_or_else(|| "assistant".into());
                    self.transkript_weiterleiten(TranskriptQuelle::Conversation, rolle, text)
                        .await;
                }
            }
            BackendEreignis::Funktionsaufruf(aufruf) => self.funktion_ausfuehren(aufruf),
            BackendEreignis::Getrennt { grund } => {
                // Der unterbrochene Turn kommt nach der Wiederverbindung nicht zurueck
                let verworfen = self.inner.wiedergabe.leeren().await;
                tracing::warn!(%grund, verworfen, "Konversation getrennt, Wiedergabe geleert");
            }
            ereignis => self.gemeinsames_ereignis(BackendArt::Konversation, ereignis, eskalation_tx),
        }
    }

    async fn transkription_ereignis(
        &self,
        ereignis: BackendEreignis,
        eskalation_tx: &mpsc::UnboundedSender<Eskalation>,
    ) {
        match ereignis {
            BackendEreignis::Transkript {
                rolle,
                text,
                ist_final,
            } => {
                if ist_final {
                    // Das Transkriptions-Backend hoert nur den Coach
                    let rolle = rolle.unwrap_or_else(|| Rolle::Coach.to_string());
                    self.transkript_weiterleiten(TranskriptQuelle::Transcription, rolle, text)
                        .await;
                } else {
                    tracing::trace!("Zwischentranskript ignoriert");
                }
            }
            ereignis => {
                self.gemeinsames_ereignis(BackendArt::Transkription, ereignis, eskalation_tx)
            }
        }
    }

    fn gemeinsames_ereignis(
        &self,
        backend: BackendArt,
        ereignis: BackendEreignis,
        eskalation_tx: &mpsc::UnboundedSender<Eskalation>,
    ) {
        match ereignis {
            BackendEreignis::Bereit { wiederverbunden } => {
                if wiederverbunden {
                    tracing::info!(%backend, "Backend wiederverbunden (neuer Kontext)");
                } else {
                    tracing::debug!(%backend, "Backend bereit");
                }
            }
            BackendEreignis::Fehler { art, detail } => {
                tracing::warn!(%backend, %art, %detail, "Backend-Fehler");
            }
            BackendEreignis::Getrennt { grund } => {
                tracing::warn!(%backend, %grund, "Backend getrennt, Wiederverbindung laeuft");
            }
            BackendEreignis::Erschoepft { detail } => {
                tracing::error!(%backend, %detail, "Backend nicht erreichbar, eskaliere");
                let _ = eskalation_tx.send(Eskalation::VerbindungErschoepft { backend, detail });
            }
            BackendEreignis::Geschlossen => {
                tracing::debug!(%backend, "Backend geschlossen");
            }
            andere => {
                tracing::debug!(%backend, ereignis = ?andere, "Unerwartetes Backend-Ereignis");
            }
        }
    }

    async fn transkript_weiterleiten(&self, quelle: TranskriptQuelle, rolle: String, text: String) {
        let nachricht = AgentNachricht::transkript(quelle, rolle, text, true);
        match self.nachricht_senden(&nachricht).await {
            Ok(()) => {
                self.inner
                    .zaehler
                    .transkripte_weitergeleitet
                    .fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => tracing::warn!(error = %e, "Transkript nicht weitergeleitet"),
        }
    }

    /// Fuehrt einen Funktionsaufruf im Hintergrund aus und antwortet dem Backend
    fn funktion_ausfuehren(&self, aufruf: FunktionsAufruf) {
        self.inner
            .zaehler
            .funktionsaufrufe
            .fetch_add(1, Ordering::Relaxed);
        let manager = self.clone();

        tokio::spawn(async move {
            tracing::debug!(funktion = %aufruf.name, id = %aufruf.id, "Funktionsaufruf");
            let inhalt = match manager
                .inner
                .ausfuehrer
                .ausfuehren(&aufruf.name, &aufruf.arguments)
                .await
            {
                Ok(inhalt) => inhalt,
                Err(e) => {
                    tracing::warn!(funktion = %aufruf.name, error = %e, "Funktionsaufruf fehlgeschlagen");
                    fehler_inhalt(&aufruf.name, &e.to_string())
                }
            };

            let antwort = KonversationsBefehl::FunctionCallResponse {
                id: aufruf.id,
                name: aufruf.name,
                content: inhalt,
            };
            if let Err(e) = manager.inner.konversation.befehl_senden(&antwort) {
                tracing::warn!(error = %e, "Funktionsantwort nicht gesendet");
            }
        });
    }

    // -----------------------------------------------------------------------
    // Abfragen / Ende
    // -----------------------------------------------------------------------

    pub fn statistik(&self) -> RoutingStatistik {
        let z = &self.inner.zaehler;
        RoutingStatistik {
            zur_konversation: z.zur_konversation.load(Ordering::Relaxed),
            zur_transkription: z.zur_transkription.load(Ordering::Relaxed),
            unterdrueckt: z.unterdrueckt.load(Ordering::Relaxed),
            pausiert_zurueckgehalten: z.pausiert_zurueckgehalten.load(Ordering::Relaxed),
            format_fehler: z.format_fehler.load(Ordering::Relaxed),
            transkripte_weitergeleitet: z.transkripte_weitergeleitet.load(Ordering::Relaxed),
            funktionsaufrufe: z.funktionsaufrufe.load(Ordering::Relaxed),
        }
    }

    /// Schliesst beide Backend-Verbindungen geordnet
    pub async fn schliessen(&self) {
        tokio::join!(
            self.inner.konversation.schliessen(),
            self.inner.transkription.schliessen()
        );
        tracing::info!("Backend-Verbindungen geschlossen");
    }
}
