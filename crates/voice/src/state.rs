//! Sitzungs-Zustand – genau ein Zustand pro Raum und Agent-Prozess
//!
//! Haelt pro Raum:
//! - Teilnehmer-Zustaende (Identitaet, Rolle)
//! - Gate-Zustaende (ueber [`AudioGate`])
//! - Pausen-Flag ("KI pausiert")
//! - Lebenszyklus-Phase und Fristen (Grace, Failsafe)
//!
//! Timer tragen keinen eigenen Zustand: Fristen sind Zeitpunkte in diesem
//! Struct und werden von der Sitzungs-Loop abgewartet.

use coachline_core::{Rolle, TeilnehmerId};
use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::Instant;

use crate::gate::AudioGate;
use crate::lifecycle::{Beendigungsgrund, Phase};

// ---------------------------------------------------------------------------
// TeilnehmerZustand
// ---------------------------------------------------------------------------

/// Zustand eines Teilnehmers im Raum
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeilnehmerZustand {
    pub identitaet: TeilnehmerId,
    pub rolle: Rolle,
}

impl TeilnehmerZustand {
    pub fn neu(identitaet: TeilnehmerId, rolle: Rolle) -> Self {
        Self { identitaet, rolle }
    }

    /// Zaehlt fuer den Lebenszyklus? Der Eintrag existiert nur, solange der
    /// Teilnehmer verbunden ist.
    pub fn zaehlt_als_mensch(&self) -> bool {
        self.rolle.ist_mensch()
    }
}

// ---------------------------------------------------------------------------
// Lebenszyklus-Daten (nur ueber den LebenszyklusManager veraendert)
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub(crate) struct LebenszyklusDaten {
    pub(crate) phase: Phase,
    /// Hoechstens eine Grace-Frist pro Sitzung
    pub(crate) grace_frist: Option<Instant>,
    pub(crate) failsafe_frist: Option<Instant>,
    pub(crate) grund: Option<Beendigungsgrund>,
}

// ---------------------------------------------------------------------------
// SitzungsZustand
// ---------------------------------------------------------------------------

/// Zustand einer Raum-Sitzung
///
/// Thread-safe und `Clone`-faehig (innerer Arc).
#[derive(Clone)]
pub struct SitzungsZustand {
    inner: Arc<SitzungsZustandInner>,
}

struct SitzungsZustandInner {
    raum: String,
    /// Eigene Identitaet des Agenten (wird immer als AgentSelbst gefuehrt)
    agent: TeilnehmerId,
    teilnehmer: DashMap<TeilnehmerId, TeilnehmerZustand>,
    gate: AudioGate,
    pausiert: AtomicBool,
    lebenszyklus: Mutex<LebenszyklusDaten>,
}

impl SitzungsZustand {
    pub fn neu(raum: impl Into<String>, agent: TeilnehmerId) -> Self {
        Self {
            inner: Arc::new(SitzungsZustandInner {
                raum: raum.into(),
                agent,
                teilnehmer: DashMap::new(),
                gate: AudioGate::neu(),
                pausiert: AtomicBool::new(false),
                lebenszyklus: Mutex::new(LebenszyklusDaten {
                    phase: Phase::Aktiv,
                    grace_frist: None,
                    failsafe_frist: None,
                    grund: None,
                }),
            }),
        }
    }

    pub fn raum(&self) -> &str {
        &self.inner.raum
    }

    pub fn agent_identitaet(&self) -> &TeilnehmerId {
        &self.inner.agent
    }

    pub fn gate(&self) -> &AudioGate {
        &self.inner.gate
    }

    // --- Teilnehmer ---

    /// Registriert einen Teilnehmer (ein erneuter Beitritt ueberschreibt den Eintrag)
    ///
    /// Die eigene Identitaet des Agenten wird unabhaengig von den Metadaten
    /// als `AgentSelbst` gefuehrt.
    pub fn teilnehmer_hinzufuegen(&self, identitaet: TeilnehmerId, rolle: Rolle) -> Rolle {
        let rolle = if identitaet == self.inner.agent {
            Rolle::AgentSelbst
        } else {
            rolle
        };
        self.inner
            .teilnehmer
            .insert(identitaet.clone(), TeilnehmerZustand::neu(identitaet, rolle));
        rolle
    }

    /// Entfernt einen Teilnehmer samt Gate-Eintrag
    pub fn teilnehmer_entfernen(&self, identitaet: &TeilnehmerId) -> Option<TeilnehmerZustand> {
        self.inner.gate.entfernen(identitaet);
        self.inner.teilnehmer.remove(identitaet).map(|(_, z)| z)
    }

    /// Rolle eines Teilnehmers (Hot Path beim Routing)
    pub fn rolle(&self, identitaet: &TeilnehmerId) -> Option<Rolle> {
        if identitaet == &self.inner.agent {
            return Some(Rolle::AgentSelbst);
        }
        self.inner.teilnehmer.get(identitaet).map(|z| z.rolle)
    }

    pub fn teilnehmer(&self, identitaet: &TeilnehmerId) -> Option<TeilnehmerZustand> {
        self.inner.teilnehmer.get(identitaet).map(|z| z.clone())
    }

    /// Anzahl verbundener menschlicher Teilnehmer
    pub fn menschen_anzahl(&self) -> usize {
        self.inner
            .teilnehmer
            .iter()
            .filter(|e| e.zaehlt_als_mensch())
            .count()
    }

    pub fn teilnehmer_anzahl(&self) -> usize {
        self.inner.teilnehmer.len()
    }

    // --- Pause ---

    pub fn ist_pausiert(&self) -> bool {
        self.inner.pausiert.load(Ordering::Acquire)
    }

    /// Setzt das Pausen-Flag; gibt `true` zurueck wenn es sich geaendert hat
    pub fn pausiert_setzen(&self, pausiert: bool) -> bool {
        self.inner.pausiert.swap(pausiert, Ordering::AcqRel) != pausiert
    }

    // --- Lebenszyklus ---

    pub fn phase(&self) -> Phase {
        self.inner.lebenszyklus.lock().phase
    }

    pub fn beendigungsgrund(&self) -> Option<Beendigungsgrund> {
        self.inner.lebenszyklus.lock().grund
    }

    pub fn grace_frist(&self) -> Option<Instant> {
        self.inner.lebenszyklus.lock().grace_frist
    }

    pub fn failsafe_frist(&self) -> Option<Instant> {
        self.inner.lebenszyklus.lock().failsafe_frist
    }

    pub(crate) fn lebenszyklus(&self) -> MutexGuard<'_, LebenszyklusDaten> {
        self.inner.lebenszyklus.lock()
    }
}
