//! Sitzungs-Loop eines Raums
//!
//! Eine `Sitzung` verbindet Raum, Lebenszyklus und Backend-Verbindungen:
//! - Raumereignisse (Beitritt, Verlassen, Audio, Datenkanal) werden in
//!   Reihenfolge verarbeitet
//! - Grace- und Failsafe-Fristen werden per `sleep_until` abgewartet
//! - Eskalationen der Backends und das Prozess-Signal beenden die Sitzung
//!
//! Beendet wird immer ueber denselben Pfad: Wiedergabe stoppen, Backends
//! schliessen, Raum verlassen.

use crate::config::AgentConfig;
use coachline_backend::{
    Eskalation, FunktionsAusfuehrer, ManagerTeile, SprachBackendVerbindung, Verbinder,
    VerbindungsEinstellungen, VerbindungsManager,
};
use coachline_core::{CoachlineError, RaumEreignis, RaumTransport, Rolle, TeilnehmerId};
use coachline_observability::{CoachlineMetrics, HealthState, MetrikSnapshot};
use coachline_protocol::{AgentNachricht, SteuerNachricht};
use coachline_voice::{Beendigungsgrund, LebenszyklusManager, SitzungsZustand, Wiedergabe};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Abstand der Metrik-Aktualisierung
const METRIK_INTERVALL: Duration = Duration::from_secs(5);
/// Maximale Wartezeit auf Hintergrund-Tasks beim Beenden
const AUFRAEUMEN_ZEITLIMIT: Duration = Duration::from_secs(3);

/// Externe Gegenstellen einer Sitzung
pub struct SitzungsAbhaengigkeiten {
    /// Oeffnet die Verbindungen zu beiden Sprach-Backends
    pub backend_verbinder: Arc<dyn Verbinder>,
    pub raum: Arc<dyn RaumTransport>,
    pub raum_ereignisse: mpsc::Receiver<RaumEreignis>,
    pub ausfuehrer: Arc<dyn FunktionsAusfuehrer>,
    pub metriken: Option<CoachlineMetrics>,
    pub health: Option<HealthState>,
}

pub struct Sitzung {
    agent: TeilnehmerId,
    lebenszyklus: LebenszyklusManager,
    manager: VerbindungsManager,
    raum: Arc<dyn RaumTransport>,
    raum_ereignisse: mpsc::Receiver<RaumEreignis>,
    eskalationen: mpsc::UnboundedReceiver<Eskalation>,
    metriken: Option<CoachlineMetrics>,
    health: Option<HealthState>,
    shutdown_tx: watch::Sender<bool>,
    aufgaben: Vec<JoinHandle<()>>,
}

impl Sitzung {
    /// Baut alle Komponenten auf und startet Backends und Wiedergabe
    ///
    /// Muss innerhalb einer Tokio-Runtime aufgerufen werden.
    pub fn starten(config: &AgentConfig, abh: SitzungsAbhaengigkeiten) -> Self {
        let agent = TeilnehmerId::neu(config.raum.agent_identitaet.clone());
        let zustand = SitzungsZustand::neu(config.raum.name.clone(), agent.clone());
        let lebenszyklus = LebenszyklusManager::neu(config.lebenszyklus_config(), zustand.clone());

        let (konversation, konversation_rx) = SprachBackendVerbindung::starten(
            VerbindungsEinstellungen::konversation(config.konversation.url.clone(), config.settings()),
            config.verbindungs_config(),
            abh.backend_verbinder.clone(),
        );
        let (transkription, transkription_rx) = SprachBackendVerbindung::starten(
            VerbindungsEinstellungen::transkription(
                config.transkription.url.clone(),
                config.listen_parameter(),
            ),
            config.verbindungs_config(),
            abh.backend_verbinder,
        );

        let wiedergabe = Wiedergabe::neu(config.wiedergabe_config(), agent.clone(), abh.raum.clone());
        let manager = VerbindungsManager::neu(
            config.manager_config(),
            ManagerTeile {
                zustand,
                konversation,
                transkription,
                wiedergabe: wiedergabe.clone(),
                raum: abh.raum.clone(),
                ausfuehrer: abh.ausfuehrer,
            },
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (eskalation_tx, eskalationen) = mpsc::unbounded_channel();

        let verarbeiter = manager.clone();
        let aufgaben = vec![
            wiedergabe.starten(shutdown_rx),
            tokio::spawn(async move {
                verarbeiter
                    .ereignisse_verarbeiten(konversation_rx, transkription_rx, eskalation_tx)
                    .await
            }),
        ];

        tracing::info!(
            raum = %config.raum.name,
            agent = %agent,
            grace_s = config.lebenszyklus.grace_s,
            failsafe_s = config.raum.failsafe_s,
            "Sitzung gestartet"
        );

        Self {
            agent,
            lebenszyklus,
            manager,
            raum: abh.raum,
            raum_ereignisse: abh.raum_ereignisse,
            eskalationen,
            metriken: abh.metriken,
            health: abh.health,
            shutdown_tx,
            aufgaben,
        }
    }

    pub fn lebenszyklus(&self) -> &LebenszyklusManager {
        &self.lebenszyklus
    }

    pub fn manager(&self) -> &VerbindungsManager {
        &self.manager
    }

    /// Laeuft bis die Sitzung beendet ist und gibt den Grund zurueck
    ///
    /// `signal` ist das Prozess-Signal (Ctrl-C / SIGTERM); es fuehrt auf
    /// denselben geordneten Pfad wie `endSession`.
    pub async fn laufen(mut self, signal: impl Future<Output = ()>) -> Beendigungsgrund {
        tokio::pin!(signal);
        let mut metrik_takt = tokio::time::interval(METRIK_INTERVALL);
        metrik_takt.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut raum_offen = true;

        let grund = loop {
            let frist = self.lebenszyklus.naechste_frist();
            let frist_zeit = frist.map(|(_, t)| t).unwrap_or_else(Instant::now);

            tokio::select! {
                biased;

                _ = &mut signal => {
                    tracing::info!("Shutdown-Signal empfangen");
                    break self.erzwingen(Beendigungsgrund::Signal);
                }

                Some(eskalation) = self.eskalationen.recv() => {
                    let Eskalation::VerbindungErschoepft { backend, detail } = eskalation;
                    tracing::error!(backend = %backend, detail = %detail, "Backend nicht erreichbar");
                    break self.erzwingen(Beendigungsgrund::VerbindungErschoepft);
                }

                _ = tokio::time::sleep_until(frist_zeit), if frist.is_some() => {
                    if let Some((art, _)) = frist {
                        match self.lebenszyklus.frist_abgelaufen(art, Instant::now()) {
                            Ok(grund) => break grund,
                            Err(e) => tracing::warn!(frist = ?art, error = %e, "Frist ignoriert"),
                        }
                    }
                }

                ereignis = self.raum_ereignisse.recv(), if raum_offen => match ereignis {
                    Some(ereignis) => {
                        if let Some(grund) = self.raum_ereignis(ereignis).await {
                            break grund;
                        }
                    }
                    None => {
                        raum_offen = false;
                        self.lebenszyklus.raum_verloren(Instant::now());
                        self.health_raum(false);
                    }
                },

                _ = metrik_takt.tick() => self.metriken_aktualisieren(),
            }

            self.health_phase();
        };

        self.beenden(grund).await
    }

    // -----------------------------------------------------------------------
    // Raumereignisse
    // -----------------------------------------------------------------------

    async fn raum_ereignis(&self, ereignis: RaumEreignis) -> Option<Beendigungsgrund> {
        match ereignis {
            RaumEreignis::TeilnehmerBeigetreten { identitaet, rolle } => {
                self.lebenszyklus.beitreten(identitaet, rolle);
            }
            RaumEreignis::TeilnehmerVerlassen { identitaet } => {
                self.lebenszyklus.verlassen(&identitaet, Instant::now());
            }
            RaumEreignis::Audio(frame) => {
                let Some(rolle) = self.rolle_von(&frame.quelle) else {
                    tracing::trace!(quelle = %frame.quelle, "Frame eines unbekannten Teilnehmers verworfen");
                    return None;
                };
                match self.manager.audio_routen(&frame, rolle) {
                    Ok(_) => {}
                    Err(CoachlineError::AudioFormat(_)) => {}
                    Err(e) => {
                        tracing::error!(quelle = %frame.quelle, error = %e, "Eingangsaudio dauerhaft unbrauchbar");
                        return Some(self.erzwingen(Beendigungsgrund::VerbindungErschoepft));
                    }
                }
            }
            RaumEreignis::DatenNachricht { absender, payload } => {
                return self.steuern(&absender, &payload).await;
            }
            RaumEreignis::VerbindungVerloren { grund } => {
                tracing::warn!(grund = %grund, "Raumverbindung verloren");
                self.lebenszyklus.raum_verloren(Instant::now());
                self.health_raum(false);
            }
            RaumEreignis::VerbindungWiederhergestellt => {
                self.lebenszyklus.raum_wiederhergestellt();
                self.health_raum(true);
            }
        }
        None
    }

    fn rolle_von(&self, quelle: &TeilnehmerId) -> Option<Rolle> {
        if *quelle == self.agent {
            return Some(Rolle::AgentSelbst);
        }
        self.lebenszyklus.zustand().rolle(quelle)
    }

    /// Verarbeitet eine Steuernachricht des Datenkanals
    async fn steuern(&self, absender: &TeilnehmerId, payload: &[u8]) -> Option<Beendigungsgrund> {
        let nachricht = match SteuerNachricht::parsen(payload) {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(absender = %absender, error = %e, "Datennachricht verworfen");
                return None;
            }
        };

        match nachricht {
            SteuerNachricht::MuteToggle { teilnehmer, muted } => {
                self.manager.stumm_setzen(&teilnehmer, muted);
                self.bestaetigen(AgentNachricht::GateState { teilnehmer, muted }).await;
            }
            SteuerNachricht::Whisper { text } => {
                if let Err(e) = self.manager.whisper_einspeisen(&text) {
                    tracing::warn!(absender = %absender, error = %e, "Kontext-Hinweis nicht eingespeist");
                }
            }
            SteuerNachricht::PauseAi { paused } => {
                if paused {
                    self.manager.pausieren();
                } else {
                    self.manager.fortsetzen();
                }
                let paused = self.lebenszyklus.zustand().ist_pausiert();
                self.bestaetigen(AgentNachricht::AiState { paused }).await;
            }
            SteuerNachricht::EndSession => {
                tracing::info!(absender = %absender, "endSession empfangen");
                return Some(self.erzwingen(Beendigungsgrund::SitzungBeendet));
            }
        }
        None
    }

    async fn bestaetigen(&self, nachricht: AgentNachricht) {
        if let Err(e) = self.manager.nachricht_senden(&nachricht).await {
            tracing::warn!(error = %e, "Bestaetigung nicht gesendet");
        }
    }

    // -----------------------------------------------------------------------
    // Beenden
    // -----------------------------------------------------------------------

    fn erzwingen(&self, grund: Beendigungsgrund) -> Beendigungsgrund {
        match self.lebenszyklus.beenden(grund) {
            Ok(grund) => grund,
            Err(e) => {
                tracing::warn!(error = %e, "Sitzung wird bereits beendet");
                self.lebenszyklus.zustand().beendigungsgrund().unwrap_or(grund)
            }
        }
    }

    async fn beenden(mut self, grund: Beendigungsgrund) -> Beendigungsgrund {
        self.health_phase();
        let _ = self.shutdown_tx.send(true);

        self.manager.schliessen().await;
        if let Err(e) = self.raum.trennen().await {
            tracing::warn!(error = %e, "Raum konnte nicht sauber verlassen werden");
        }

        for aufgabe in self.aufgaben.drain(..) {
            if tokio::time::timeout(AUFRAEUMEN_ZEITLIMIT, aufgabe).await.is_err() {
                tracing::warn!("Hintergrund-Task hat sich nicht rechtzeitig beendet");
            }
        }

        self.lebenszyklus.abgeschlossen();
        self.health_phase();
        self.metriken_aktualisieren();

        let statistik = self.manager.statistik();
        tracing::info!(
            grund = ?grund,
            exit_code = grund.exit_code(),
            zur_konversation = statistik.zur_konversation,
            zur_transkription = statistik.zur_transkription,
            wiedergabe = %self.manager.wiedergabe().diagnose().zusammenfassung(),
            "Sitzung abgeschlossen"
        );
        grund
    }

    // -----------------------------------------------------------------------
    // Observability
    // -----------------------------------------------------------------------

    fn metriken_aktualisieren(&self) {
        let Some(ref metriken) = self.metriken else {
            return;
        };
        metriken.aktualisieren(&metrik_snapshot(&self.manager, &self.lebenszyklus));
    }

    fn health_phase(&self) {
        if let Some(ref health) = self.health {
            health.phase_setzen(self.lebenszyklus.phase().als_str());
        }
    }

    fn health_raum(&self, verbunden: bool) {
        if let Some(ref health) = self.health {
            health.raum_status_setzen(verbunden);
        }
    }
}

/// Fasst Routing-, Verbindungs- und Wiedergabe-Zaehler zusammen
pub fn metrik_snapshot(manager: &VerbindungsManager, lebenszyklus: &LebenszyklusManager) -> MetrikSnapshot {
    let routing = manager.statistik();
    let konversation = manager.konversation().statistik();
    let transkription = manager.transkription().statistik();
    let diagnose = manager.wiedergabe().diagnose();

    MetrikSnapshot {
        zur_konversation: routing.zur_konversation,
        zur_transkription: routing.zur_transkription,
        unterdrueckt: routing.unterdrueckt,
        format_fehler: routing.format_fehler,
        konversation_verworfen: konversation.frames_verworfen,
        transkription_verworfen: transkription.frames_verworfen,
        konversation_protokollfehler: konversation.protokollfehler,
        transkription_protokollfehler: transkription.protokollfehler,
        konversation_wiederverbindungen: konversation.wiederverbindungen,
        transkription_wiederverbindungen: transkription.wiederverbindungen,
        barge_ins: diagnose.barge_ins,
        wiedergabe_frames: diagnose.frames_ausgegeben,
        frames_nahe_clipping: diagnose.frames_nahe_clipping,
        menschen: lebenszyklus.menschen_anzahl(),
    }
}
