//! Audio-Gate – Sichtbarkeit pro Teilnehmer fuer das Konversations-Backend
//!
//! Zustaende: `Offen` (Standard) und `Geschlossen`. Ein Uebergang passiert nur
//! durch eine explizite `muteToggle`-Steuernachricht, es gibt keinen Timeout.
//! Ein Umschalten wirkt nur auf nachfolgende Frames.

use coachline_core::{GateZustand, TeilnehmerId};
use dashmap::DashMap;
use std::sync::Arc;

/// Gate-Zustaende aller Teilnehmer eines Raums
///
/// Thread-safe und `Clone`-faehig (innerer Arc). Teilnehmer ohne Eintrag
/// gelten als offen.
#[derive(Clone, Default)]
pub struct AudioGate {
    inner: Arc<DashMap<TeilnehmerId, GateZustand>>,
}

impl AudioGate {
    pub fn neu() -> Self {
        Self::default()
    }

    /// Setzt den Stumm-Zustand eines Teilnehmers
    ///
    /// Idempotent: gibt `true` zurueck wenn sich der Zustand geaendert hat.
    pub fn stumm_setzen(&self, teilnehmer: &TeilnehmerId, stumm: bool) -> bool {
        let neu = if stumm {
            GateZustand::Geschlossen
        } else {
            GateZustand::Offen
        };
        let alt = self
            .inner
            .insert(teilnehmer.clone(), neu)
            .unwrap_or_default();

        if alt != neu {
            tracing::info!(teilnehmer = %teilnehmer, gate = ?neu, "Gate umgeschaltet");
            true
        } else {
            false
        }
    }

    pub fn zustand(&self, teilnehmer: &TeilnehmerId) -> GateZustand {
        self.inner
            .get(teilnehmer)
            .map(|z| *z)
            .unwrap_or_default()
    }

    pub fn ist_offen(&self, teilnehmer: &TeilnehmerId) -> bool {
        self.zustand(teilnehmer).ist_offen()
    }

    /// Entfernt den Eintrag (beim Verlassen des Raums)
    pub fn entfernen(&self, teilnehmer: &TeilnehmerId) {
        self.inner.remove(teilnehmer);
    }

    /// Anzahl geschlossener Gates
    pub fn geschlossen_anzahl(&self) -> usize {
        self.inner.iter().filter(|e| !e.value().ist_offen()).count()
    }
}
