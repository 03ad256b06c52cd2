//! Raum-Transport ueber die Raum-Bridge
//!
//! Die Bridge-Sidecar haelt die eigentliche Raummitgliedschaft. Der Agent
//! spricht mit ihr ueber einen WebSocket: JSON fuer Raumereignisse und
//! Befehle, Binaer-Frames fuer Audio (siehe `coachline_protocol::raum`).
//!
//! Bricht die Verbindung ab, meldet der Adapter `VerbindungVerloren`,
//! verbindet sich im Hintergrund neu und meldet danach
//! `VerbindungWiederhergestellt`. Ob die Sitzung so lange warten darf,
//! entscheidet der Failsafe des Lebenszyklus.

use async_trait::async_trait;
use bytes::Bytes;
use coachline_backend::transport::{Kanal, NachrichtenSender};
use coachline_backend::{SendeQueue, Verbinder, WsNachricht};
use coachline_core::{
    AudioFrame, CoachlineError, RaumEreignis, RaumTransport, Result, Rolle, TeilnehmerId,
};
use coachline_protocol::raum::{audio_dekodieren, audio_kodieren};
use coachline_protocol::{BridgeBefehl, BridgeEreignis};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

const EREIGNIS_KAPAZITAET: usize = 1024;
const TRENNEN_ZEITLIMIT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub uri: String,
    /// Wartezeit vor dem ersten Wiederverbindungsversuch
    pub wiederverbindung_basis: Duration,
    /// Obergrenze der verdoppelten Wartezeit
    pub wiederverbindung_max: Duration,
    /// Ausgehende Audio-Frames, aelteste werden bei Ueberlauf verworfen
    pub audio_kapazitaet: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            uri: "ws://127.0.0.1:7881/agent".into(),
            wiederverbindung_basis: Duration::from_secs(1),
            wiederverbindung_max: Duration::from_secs(30),
            audio_kapazitaet: 50,
        }
    }
}

impl BridgeConfig {
    fn wartezeit(&self, fehlversuche: u32) -> Duration {
        self.wiederverbindung_basis
            .saturating_mul(1u32 << fehlversuche.min(10))
            .min(self.wiederverbindung_max)
    }
}

// ---------------------------------------------------------------------------
// BridgeRaum
// ---------------------------------------------------------------------------

/// `RaumTransport` ueber die Raum-Bridge (Clone-Handle)
#[derive(Clone)]
pub struct BridgeRaum {
    inner: Arc<BridgeRaumInner>,
}

struct BridgeRaumInner {
    audio: SendeQueue<Bytes>,
    befehle: mpsc::UnboundedSender<BridgeBefehl>,
    shutdown_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl BridgeRaum {
    /// Verbindet sich mit der Bridge
    ///
    /// Der erste Verbindungsaufbau muss gelingen, spaetere Abbrueche werden
    /// im Hintergrund behandelt.
    pub async fn verbinden(
        config: BridgeConfig,
        verbinder: Arc<dyn Verbinder>,
    ) -> Result<(Self, mpsc::Receiver<RaumEreignis>)> {
        let kanal = verbinder.verbinden(&config.uri).await.map_err(|e| {
            CoachlineError::Raum(format!("Bridge '{}' nicht erreichbar: {e}", config.uri))
        })?;
        tracing::info!(uri = %config.uri, "Mit der Raum-Bridge verbunden");

        let (ereignis_tx, ereignis_rx) = mpsc::channel(EREIGNIS_KAPAZITAET);
        let (befehl_tx, befehl_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let audio = SendeQueue::neu(config.audio_kapazitaet);

        let task = BridgeTask {
            config,
            verbinder,
            audio: audio.clone(),
            befehle: befehl_rx,
            ereignisse: ereignis_tx,
            shutdown_rx,
        };
        let handle = tokio::spawn(task.laufen(kanal));

        let raum = Self {
            inner: Arc::new(BridgeRaumInner {
                audio,
                befehle: befehl_tx,
                shutdown_tx,
                task: Mutex::new(Some(handle)),
            }),
        };
        Ok((raum, ereignis_rx))
    }

    /// Anzahl verworfener Audio-Frames (Bridge zu langsam oder getrennt)
    pub fn audio_verworfen(&self) -> u64 {
        self.inner.audio.verworfen()
    }
}

#[async_trait]
impl RaumTransport for BridgeRaum {
    async fn audio_veroeffentlichen(&self, frame: AudioFrame) -> Result<()> {
        if self.inner.audio.ist_geschlossen() {
            return Err(CoachlineError::Raum("Bridge getrennt".into()));
        }
        let daten = audio_kodieren(&frame)?;
        if !self.inner.audio.einreihen(daten) {
            tracing::trace!(sequenz = frame.sequenz, "Bridge-Audio-Queue voll, aeltester Frame verworfen");
        }
        Ok(())
    }

    async fn daten_veroeffentlichen(&self, payload: Bytes) -> Result<()> {
        let payload = String::from_utf8(payload.to_vec())
            .map_err(|e| CoachlineError::Protokoll(format!("Datennachricht ist kein UTF-8: {e}")))?;
        self.inner
            .befehle
            .send(BridgeBefehl::PublishData { payload })
            .map_err(|_| CoachlineError::Raum("Bridge getrennt".into()))
    }

    async fn trennen(&self) -> Result<()> {
        let handle = self.inner.task.lock().await.take();
        let Some(handle) = handle else {
            return Ok(());
        };

        let _ = self.inner.befehle.send(BridgeBefehl::Disconnect);
        let _ = self.inner.shutdown_tx.send(true);
        if tokio::time::timeout(TRENNEN_ZEITLIMIT, handle).await.is_err() {
            tracing::warn!("Bridge-Task hat sich nicht rechtzeitig beendet");
        }
        self.inner.audio.schliessen();
        tracing::info!("Raum verlassen");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Hintergrund-Task
// ---------------------------------------------------------------------------

enum SitzungsEnde {
    Beendet,
    Verloren(String),
}

struct BridgeTask {
    config: BridgeConfig,
    verbinder: Arc<dyn Verbinder>,
    audio: SendeQueue<Bytes>,
    befehle: mpsc::UnboundedReceiver<BridgeBefehl>,
    ereignisse: mpsc::Sender<RaumEreignis>,
    shutdown_rx: watch::Receiver<bool>,
}

impl BridgeTask {
    async fn laufen(mut self, mut kanal: Kanal) {
        loop {
            let grund = match self.sitzung(&mut kanal).await {
                SitzungsEnde::Beendet => break,
                SitzungsEnde::Verloren(grund) => grund,
            };

            tracing::warn!(grund = %grund, "Verbindung zur Raum-Bridge verloren");
            if !self.melden(RaumEreignis::VerbindungVerloren { grund }).await {
                break;
            }

            match self.wiederverbinden().await {
                Some(neu) => {
                    kanal = neu;
                    // Veraltetes Audio nicht nachliefern
                    while self.audio.entnehmen().is_some() {}
                    tracing::info!(uri = %self.config.uri, "Raum-Bridge wieder verbunden");
                    if !self.melden(RaumEreignis::VerbindungWiederhergestellt).await {
                        break;
                    }
                }
                None => break,
            }
        }
        self.audio.schliessen();
        tracing::debug!("Bridge-Task beendet");
    }

    async fn sitzung(&mut self, kanal: &mut Kanal) -> SitzungsEnde {
        let (sender, empfaenger) = kanal;
        loop {
            tokio::select! {
                biased;

                Ok(()) = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        self.abschliessen(&mut **sender).await;
                        return SitzungsEnde::Beendet;
                    }
                }

                befehl = self.befehle.recv() => {
                    let Some(befehl) = befehl else {
                        self.abschliessen(&mut **sender).await;
                        return SitzungsEnde::Beendet;
                    };
                    if let Err(e) = befehl_senden(&mut **sender, &befehl).await {
                        return SitzungsEnde::Verloren(e.to_string());
                    }
                }

                Some(daten) = self.audio.naechstes() => {
                    if let Err(e) = sender.senden(WsNachricht::Binaer(daten)).await {
                        return SitzungsEnde::Verloren(e.to_string());
                    }
                }

                nachricht = empfaenger.empfangen() => match nachricht {
                    Some(Ok(nachricht)) => {
                        if let Some(ereignis) = ereignis_aus(nachricht) {
                            if !self.melden(ereignis).await {
                                return SitzungsEnde::Beendet;
                            }
                        }
                    }
                    Some(Err(e)) => return SitzungsEnde::Verloren(e.to_string()),
                    None => return SitzungsEnde::Verloren("Bridge hat die Verbindung geschlossen".into()),
                },
            }
        }
    }

    /// Sendet noch ausstehende Befehle (inkl. `disconnect`) und schliesst
    async fn abschliessen(&mut self, sender: &mut dyn NachrichtenSender) {
        while let Ok(befehl) = self.befehle.try_recv() {
            if befehl_senden(sender, &befehl).await.is_err() {
                break;
            }
        }
        if let Err(e) = sender.schliessen().await {
            tracing::debug!(fehler = %e, "Schliessen der Bridge-Verbindung fehlgeschlagen");
        }
    }

    async fn wiederverbinden(&mut self) -> Option<Kanal> {
        let mut fehlversuche: u32 = 0;
        loop {
            let wartezeit = self.config.wartezeit(fehlversuche);
            tokio::select! {
                biased;
                _ = shutdown_abwarten(&mut self.shutdown_rx) => return None,
                _ = tokio::time::sleep(wartezeit) => {}
            }

            let ergebnis = tokio::select! {
                biased;
                _ = shutdown_abwarten(&mut self.shutdown_rx) => return None,
                ergebnis = self.verbinder.verbinden(&self.config.uri) => ergebnis,
            };
            match ergebnis {
                Ok(kanal) => return Some(kanal),
                Err(e) => {
                    fehlversuche = fehlversuche.saturating_add(1);
                    tracing::warn!(
                        fehler = %e,
                        versuch = fehlversuche,
                        "Wiederverbindung zur Raum-Bridge fehlgeschlagen"
                    );
                }
            }
        }
    }

    /// `false` wenn die Sitzung die Ereignisse nicht mehr liest
    async fn melden(&self, ereignis: RaumEreignis) -> bool {
        self.ereignisse.send(ereignis).await.is_ok()
    }
}

async fn befehl_senden(sender: &mut dyn NachrichtenSender, befehl: &BridgeBefehl) -> Result<()> {
    let text = befehl.als_json()?;
    sender.senden(WsNachricht::Text(text)).await
}

/// Uebersetzt einen Bridge-Frame; unlesbare Frames werden verworfen
fn ereignis_aus(nachricht: WsNachricht) -> Option<RaumEreignis> {
    match nachricht {
        WsNachricht::Text(text) => match BridgeEreignis::parsen(&text) {
            Ok(BridgeEreignis::ParticipantJoined { identity, role }) => {
                Some(RaumEreignis::TeilnehmerBeigetreten {
                    identitaet: TeilnehmerId::neu(identity),
                    rolle: Rolle::aus_metadaten(&role),
                })
            }
            Ok(BridgeEreignis::ParticipantLeft { identity }) => {
                Some(RaumEreignis::TeilnehmerVerlassen {
                    identitaet: TeilnehmerId::neu(identity),
                })
            }
            Ok(BridgeEreignis::DataMessage { identity, payload }) => {
                Some(RaumEreignis::DatenNachricht {
                    absender: TeilnehmerId::neu(identity),
                    payload: Bytes::from(payload),
                })
            }
            Err(e) => {
                tracing::warn!(fehler = %e, "Bridge-Nachricht verworfen");
                None
            }
        },
        WsNachricht::Binaer(daten) => match audio_dekodieren(daten) {
            Ok(frame) => Some(RaumEreignis::Audio(frame)),
            Err(e) => {
                tracing::debug!(fehler = %e, "Bridge-Audio-Frame verworfen");
                None
            }
        },
    }
}

async fn shutdown_abwarten(rx: &mut watch::Receiver<bool>) {
    let signal_offen = rx.wait_for(|&beenden| beenden).await.is_ok();
    if !signal_offen {
        std::future::pending::<()>().await;
    }
}
