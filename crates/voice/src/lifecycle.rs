//! Lebenszyklus des Agenten in einem Raum
//!
//! ```text
//! Aktiv ──(0 Menschen)──> Draining ──(Grace abgelaufen)──> Terminating ──> Terminated
//!   ^                        │
//!   └──────(>0 Menschen)─────┘
//!
//! Failsafe (Raumverbindung verloren und nicht zurueck) : jede Phase ──> Terminating
//! ```
//!
//! Der Manager ist synchron: er rechnet nur Zustandsuebergaenge und Fristen aus.
//! Die Sitzungs-Loop wartet per `sleep_until` auf [`LebenszyklusManager::naechste_frist`]
//! und meldet den Ablauf ueber [`LebenszyklusManager::frist_abgelaufen`].

use coachline_core::{CoachlineError, Result, Rolle, TeilnehmerId};
use std::time::Duration;
use tokio::time::Instant;

use crate::state::SitzungsZustand;

// ---------------------------------------------------------------------------
// Konfiguration
// ---------------------------------------------------------------------------

/// Standard-Grace-Periode nach dem Verlassen des letzten Menschen
pub const STANDARD_GRACE: Duration = Duration::from_secs(60);

/// Standard-Frist bis der Failsafe nach Verlust der Raumverbindung greift
pub const STANDARD_FAILSAFE: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LebenszyklusConfig {
    pub grace: Duration,
    pub failsafe: Duration,
}

impl Default for LebenszyklusConfig {
    fn default() -> Self {
        Self {
            grace: STANDARD_GRACE,
            failsafe: STANDARD_FAILSAFE,
        }
    }
}

// ---------------------------------------------------------------------------
// Phasen und Uebergaenge
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Mindestens ein Mensch im Raum (oder noch keiner beigetreten)
    Aktiv,
    /// Kein Mensch mehr im Raum, Grace-Frist laeuft
    Draining,
    /// Verbindungen werden geschlossen, Raum wird verlassen
    Terminating,
    Terminated,
}

impl Phase {
    pub fn als_str(&self) -> &'static str {
        match self {
            Self::Aktiv => "active",
            Self::Draining => "draining",
            Self::Terminating => "terminating",
            Self::Terminated => "terminated",
        }
    }

    pub fn ist_beendet(&self) -> bool {
        matches!(self, Self::Terminating | Self::Terminated)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.als_str())
    }
}

/// Warum die Sitzung beendet wird
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Beendigungsgrund {
    /// Grace-Frist ohne Wiederbeitritt abgelaufen
    GraceAbgelaufen,
    /// Raumverbindung innerhalb der Failsafe-Frist nicht zurueckgekehrt
    Failsafe,
    /// `endSession` ueber den Datenkanal
    SitzungBeendet,
    /// SIGINT / SIGTERM
    Signal,
    /// Sprach-Backend nach allen Verbindungsversuchen nicht erreichbar
    VerbindungErschoepft,
}

impl Beendigungsgrund {
    /// Exit-Code des Prozesses fuer diesen Grund
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::GraceAbgelaufen | Self::SitzungBeendet | Self::Signal => 0,
            Self::VerbindungErschoepft => 1,
            Self::Failsafe => 2,
        }
    }
}

/// Welche Frist abgelaufen ist
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frist {
    Grace,
    Failsafe,
}

/// Ergebnis eines Beitritts oder Verlassens
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Uebergang {
    Keiner,
    /// Aktiv -> Draining, Frist laeuft bis zum angegebenen Zeitpunkt
    GraceGestartet(Instant),
    /// Draining -> Aktiv
    GraceAbgebrochen,
}

// ---------------------------------------------------------------------------
// LebenszyklusManager
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct LebenszyklusManager {
    config: LebenszyklusConfig,
    zustand: SitzungsZustand,
}

impl LebenszyklusManager {
    pub fn neu(config: LebenszyklusConfig, zustand: SitzungsZustand) -> Self {
        Self { config, zustand }
    }

    pub fn zustand(&self) -> &SitzungsZustand {
        &self.zustand
    }

    pub fn phase(&self) -> Phase {
        self.zustand.phase()
    }

    pub fn menschen_anzahl(&self) -> usize {
        self.zustand.menschen_anzahl()
    }

    /// Verarbeitet einen Beitritt und gibt die tatsaechliche Rolle zurueck
    pub fn beitreten(&self, identitaet: TeilnehmerId, rolle: Rolle) -> (Rolle, Uebergang) {
        let mut lz = self.zustand.lebenszyklus();
        let vorher = self.zustand.menschen_anzahl();
        let rolle = self.zustand.teilnehmer_hinzufuegen(identitaet.clone(), rolle);
        let nachher = self.zustand.menschen_anzahl();

        tracing::info!(teilnehmer = %identitaet, rolle = %rolle, menschen = nachher, "Teilnehmer beigetreten");

        let uebergang = if lz.phase == Phase::Draining && vorher == 0 && nachher > 0 {
            lz.phase = Phase::Aktiv;
            lz.grace_frist = None;
            tracing::info!(raum = %self.zustand.raum(), "Wiederbeitritt – Grace-Frist abgebrochen");
            Uebergang::GraceAbgebrochen
        } else {
            Uebergang::Keiner
        };
        (rolle, uebergang)
    }

    /// Verarbeitet ein Verlassen des Raums
    pub fn verlassen(&self, identitaet: &TeilnehmerId, jetzt: Instant) -> Uebergang {
        let mut lz = self.zustand.lebenszyklus();
        let vorher = self.zustand.menschen_anzahl();
        if self.zustand.teilnehmer_entfernen(identitaet).is_none() {
            tracing::debug!(teilnehmer = %identitaet, "Verlassen eines unbekannten Teilnehmers ignoriert");
            return Uebergang::Keiner;
        }
        let nachher = self.zustand.menschen_anzahl();

        tracing::info!(teilnehmer = %identitaet, menschen = nachher, "Teilnehmer hat den Raum verlassen");

        if lz.phase == Phase::Aktiv && vorher > 0 && nachher == 0 {
            let frist = jetzt + self.config.grace;
            lz.phase = Phase::Draining;
            lz.grace_frist = Some(frist);
            tracing::info!(
                raum = %self.zustand.raum(),
                grace_s = self.config.grace.as_secs(),
                "Letzter Mensch gegangen – Grace-Frist gestartet"
            );
            Uebergang::GraceGestartet(frist)
        } else {
            Uebergang::Keiner
        }
    }

    /// Raumverbindung verloren: startet den Failsafe (falls nicht schon laufend)
    pub fn raum_verloren(&self, jetzt: Instant) -> Option<Instant> {
        let mut lz = self.zustand.lebenszyklus();
        if lz.phase.ist_beendet() {
            return None;
        }
        if lz.failsafe_frist.is_none() {
            lz.failsafe_frist = Some(jetzt + self.config.failsafe);
            tracing::warn!(
                raum = %self.zustand.raum(),
                failsafe_s = self.config.failsafe.as_secs(),
                "Raumverbindung verloren – Failsafe gestartet"
            );
        }
        lz.failsafe_frist
    }

    pub fn raum_wiederhergestellt(&self) {
        let mut lz = self.zustand.lebenszyklus();
        if lz.failsafe_frist.take().is_some() {
            tracing::info!(raum = %self.zustand.raum(), "Raumverbindung wiederhergestellt – Failsafe aufgehoben");
        }
    }

    /// Naechste abzuwartende Frist (frueheste zuerst)
    pub fn naechste_frist(&self) -> Option<(Frist, Instant)> {
        let lz = self.zustand.lebenszyklus();
        if lz.phase.ist_beendet() {
            return None;
        }
        let grace = lz.grace_frist.map(|t| (Frist::Grace, t));
        let failsafe = lz.failsafe_frist.map(|t| (Frist::Failsafe, t));
        match (grace, failsafe) {
            (Some(g), Some(f)) => Some(if f.1 < g.1 { f } else { g }),
            (g, f) => g.or(f),
        }
    }

    /// Meldet den Ablauf einer Frist
    ///
    /// # Fehler
    /// `CoachlineError::Lebenszyklus` wenn die Frist in der aktuellen Phase
    /// nicht (mehr) gilt. Der Aufrufer behandelt das als No-Op mit Warnung.
    pub fn frist_abgelaufen(&self, frist: Frist, jetzt: Instant) -> Result<Beendigungsgrund> {
        let mut lz = self.zustand.lebenszyklus();
        match frist {
            Frist::Grace => match (lz.phase, lz.grace_frist) {
                (Phase::Draining, Some(t)) if jetzt >= t => {
                    lz.grace_frist = None;
                    Ok(Self::terminieren(&mut lz, Beendigungsgrund::GraceAbgelaufen))
                }
                (phase, _) => Err(CoachlineError::Lebenszyklus(format!(
                    "Grace-Timer in Phase {phase} ausgeloest"
                ))),
            },
            Frist::Failsafe => match (lz.phase, lz.failsafe_frist) {
                (phase, Some(t)) if !phase.ist_beendet() && jetzt >= t => {
                    lz.failsafe_frist = None;
                    lz.grace_frist = None;
                    Ok(Self::terminieren(&mut lz, Beendigungsgrund::Failsafe))
                }
                (phase, _) => Err(CoachlineError::Lebenszyklus(format!(
                    "Failsafe in Phase {phase} ausgeloest"
                ))),
            },
        }
    }

    /// Erzwingt Terminating (endSession, Signal, erschoepfte Verbindung)
    ///
    /// # Fehler
    /// `CoachlineError::Lebenszyklus` wenn die Sitzung bereits beendet wird.
    pub fn beenden(&self, grund: Beendigungsgrund) -> Result<Beendigungsgrund> {
        let mut lz = self.zustand.lebenszyklus();
        if lz.phase.ist_beendet() {
            return Err(CoachlineError::Lebenszyklus(format!(
                "Beenden ({grund:?}) in Phase {} ignoriert",
                lz.phase
            )));
        }
        lz.grace_frist = None;
        lz.failsafe_frist = None;
        Ok(Self::terminieren(&mut lz, grund))
    }

    /// Terminating -> Terminated (Verbindungen geschlossen, Raum verlassen)
    pub fn abgeschlossen(&self) {
        let mut lz = self.zustand.lebenszyklus();
        if lz.phase == Phase::Terminating {
            lz.phase = Phase::Terminated;
            tracing::info!(raum = %self.zustand.raum(), "Sitzung beendet");
        }
    }

    fn terminieren(
        lz: &mut crate::state::LebenszyklusDaten,
        grund: Beendigungsgrund,
    ) -> Beendigungsgrund {
        lz.phase = Phase::Terminating;
        lz.grund = Some(grund);
        tracing::info!(grund = ?grund, "Sitzung wird beendet");
        grund
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn manager() -> LebenszyklusManager {
        LebenszyklusManager::neu(
            LebenszyklusConfig::default(),
            SitzungsZustand::neu("raum-1", "agent".into()),
        )
    }

    #[test]
    fn grace_start_und_abbruch() {
        let m = manager();
        let t0 = Instant::now();

        assert_eq!(m.beitreten("k".into(), Rolle::Klient).1, Uebergang::Keiner);
        assert_eq!(m.phase(), Phase::Aktiv);

        let u = m.verlassen(&"k".into(), t0);
        assert_eq!(u, Uebergang::GraceGestartet(t0 + STANDARD_GRACE));
        assert_eq!(m.phase(), Phase::Draining);
        assert_eq!(m.naechste_frist(), Some((Frist::Grace, t0 + STANDARD_GRACE)));

        assert_eq!(m.beitreten("k".into(), Rolle::Klient).1, Uebergang::GraceAbgebrochen);
        assert_eq!(m.phase(), Phase::Aktiv);
        assert_eq!(m.naechste_frist(), None);
    }

    #[test]
    fn agent_beitritt_beeinflusst_grace_nicht() {
        let m = manager();
        let t0 = Instant::now();
        m.beitreten("k".into(), Rolle::Klient);
        m.verlassen(&"k".into(), t0);

        let (rolle, u) = m.beitreten("agent".into(), Rolle::Klient);
        assert_eq!(rolle, Rolle::AgentSelbst);
        assert_eq!(u, Uebergang::Keiner);
        assert_eq!(m.phase(), Phase::Draining);
    }

    #[test]
    fn grace_ablauf_beendet() {
        let m = manager();
        let t0 = Instant::now();
        m.beitreten("k".into(), Rolle::Klient);
        m.verlassen(&"k".into(), t0);

        // Zu frueh
        assert!(m.frist_abgelaufen(Frist::Grace, t0).is_err());

        let grund = m.frist_abgelaufen(Frist::Grace, t0 + STANDARD_GRACE).unwrap();
        assert_eq!(grund, Beendigungsgrund::GraceAbgelaufen);
        assert_eq!(grund.exit_code(), 0);
        assert_eq!(m.phase(), Phase::Terminating);

        // Erneuter Ablauf in Terminating ist ein Lebenszyklusfehler (No-Op)
        let err = m.frist_abgelaufen(Frist::Grace, t0 + STANDARD_GRACE).unwrap_err();
        assert!(matches!(err, CoachlineError::Lebenszyklus(_)));
        assert_eq!(m.phase(), Phase::Terminating);

        m.abgeschlossen();
        assert_eq!(m.phase(), Phase::Terminated);
    }

    #[test]
    fn failsafe_unabhaengig_von_phase() {
        let m = manager();
        let t0 = Instant::now();
        m.beitreten("k".into(), Rolle::Klient);

        let frist = m.raum_verloren(t0).unwrap();
        assert_eq!(frist, t0 + STANDARD_FAILSAFE);
        // Zweiter Verlust verschiebt die Frist nicht
        assert_eq!(m.raum_verloren(t0 + Duration::from_secs(10)), Some(frist));
        assert_eq!(m.naechste_frist(), Some((Frist::Failsafe, frist)));

        let grund = m.frist_abgelaufen(Frist::Failsafe, frist).unwrap();
        assert_eq!(grund, Beendigungsgrund::Failsafe);
        assert_ne!(grund.exit_code(), 0);
        assert_eq!(m.phase(), Phase::Terminating);
        assert!(m.beenden(Beendigungsgrund::Signal).is_err());
    }

    #[test]
    fn failsafe_aufgehoben_bei_wiederherstellung() {
        let m = manager();
        let t0 = Instant::now();
        m.raum_verloren(t0);
        m.raum_wiederhergestellt();
        assert_eq!(m.naechste_frist(), None);
        assert!(m.frist_abgelaufen(Frist::Failsafe, t0 + STANDARD_FAILSAFE).is_err());
        assert_eq!(m.phase(), Phase::Aktiv);
    }

    #[test]
    fn fruehere_frist_zuerst() {
        let m = LebenszyklusManager::neu(
            LebenszyklusConfig {
                grace: Duration::from_secs(60),
                failsafe: Duration::from_secs(30),
            },
            SitzungsZustand::neu("raum-1", "agent".into()),
        );
        let t0 = Instant::now();
        m.beitreten("k".into(), Rolle::Klient);
        m.verlassen(&"k".into(), t0);
        m.raum_verloren(t0);
        assert_eq!(m.naechste_frist().map(|f| f.0), Some(Frist::Failsafe));
    }

    #[test]
    fn beenden_per_steuernachricht() {
        let m = manager();
        let grund = m.beenden(Beendigungsgrund::SitzungBeendet).unwrap();
        assert_eq!(grund.exit_code(), 0);
        assert_eq!(m.zustand().beendigungsgrund(), Some(Beendigungsgrund::SitzungBeendet));
        assert_eq!(m.naechste_frist(), None);
    }

    /// Einfacher xorshift-Generator fuer reproduzierbare Ereignisfolgen
    struct XorShift(u64);

    impl XorShift {
        fn naechste(&mut self) -> u64 {
            let mut x = self.0;
            x ^= x << 13;
            x ^= x >> 7;
            x ^= x << 17;
            self.0 = x;
            x
        }
    }

    #[test]
    fn menschenzahl_und_grace_fuer_zufaellige_folgen() {
        let identitaeten = ["agent", "k1", "k2", "c1", "c2"];
        let rollen = [
            Rolle::AgentSelbst,
            Rolle::Klient,
            Rolle::Klient,
            Rolle::Coach,
            Rolle::Coach,
        ];

        for seed in 1..=50u64 {
            let m = manager();
            let mut rng = XorShift(seed.wrapping_mul(0x9E37_79B9_7F4A_7C15) | 1);
            let mut wahrheit: HashMap<&str, Rolle> = HashMap::new();
            let t0 = Instant::now();

            for _ in 0..200 {
                let i = (rng.naechste() % identitaeten.len() as u64) as usize;
                let id = identitaeten[i];
                let vorher = wahrheit.values().filter(|r| r.ist_mensch()).count();
                let frist_vorher = m.zustand().grace_frist().is_some();

                let uebergang = if rng.naechste() % 2 == 0 {
                    wahrheit.insert(id, rollen[i]);
                    m.beitreten(id.into(), rollen[i]).1
                } else {
                    wahrheit.remove(id);
                    m.verlassen(&id.into(), t0)
                };

                let nachher = wahrheit.values().filter(|r| r.ist_mensch()).count();
                assert_eq!(m.menschen_anzahl(), nachher, "seed {seed}");

                let soll_start = vorher > 0 && nachher == 0;
                let soll_abbruch = vorher == 0 && nachher > 0 && frist_vorher;
                assert_eq!(
                    matches!(uebergang, Uebergang::GraceGestartet(_)),
                    soll_start,
                    "seed {seed}"
                );
                assert_eq!(uebergang == Uebergang::GraceAbgebrochen, soll_abbruch, "seed {seed}");
                assert_eq!(m.zustand().grace_frist().is_some(), nachher == 0 && (frist_vorher || soll_start));
            }
        }
    }
}
