//! Audio-Router – Routing-Politik fuer eingehende Teilnehmer-Frames
//!
//! | Rolle   | Gate        | Ziele                          |
//! |---------|-------------|--------------------------------|
//! | Klient  | beliebig    | Konversation                   |
//! | Coach   | Offen       | Konversation + Transkription   |
//! | Coach   | Geschlossen | nur Transkription              |
//! | Agent   | –           | nie (Echo-Unterdrueckung)      |
//!
//! Der Klient steuert immer das Gespraech. Der Coach wird immer
//! mitgeschrieben, erreicht die KI aber nur bei offenem Gate.

use coachline_core::{AudioFrame, GateZustand, Rolle};

use crate::gate::AudioGate;

/// Zielmenge eines Frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Ziele {
    pub konversation: bool,
    pub transkription: bool,
}

impl Ziele {
    pub const KEINE: Self = Self {
        konversation: false,
        transkription: false,
    };

    pub fn ist_leer(&self) -> bool {
        !self.konversation && !self.transkription
    }
}

/// Reine Routing-Funktion (Rolle, Gate) -> Ziele
pub fn ziele_bestimmen(rolle: Rolle, gate: GateZustand) -> Ziele {
    match rolle {
        Rolle::Klient => Ziele {
            konversation: true,
            transkription: false,
        },
        Rolle::Coach => Ziele {
            konversation: gate.ist_offen(),
            transkription: true,
        },
        Rolle::AgentSelbst => Ziele::KEINE,
    }
}

/// Router eines Raums: verbindet die Routing-Funktion mit dem Gate-Zustand
#[derive(Clone, Default)]
pub struct AudioRouter {
    gate: AudioGate,
}

impl AudioRouter {
    pub fn neu(gate: AudioGate) -> Self {
        Self { gate }
    }

    /// Bestimmt die Ziele eines Frames anhand der Quelle und ihrer Rolle
    pub fn route(&self, frame: &AudioFrame, rolle: Rolle) -> Ziele {
        if rolle == Rolle::AgentSelbst {
            return Ziele::KEINE;
        }
        ziele_bestimmen(rolle, self.gate.zustand(&frame.quelle))
    }

    pub fn gate(&self) -> &AudioGate {
        &self.gate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ziele(konversation: bool, transkription: bool) -> Ziele {
        Ziele {
            konversation,
            transkription,
        }
    }

    #[test]
    fn politik_tabelle_vollstaendig() {
        let erwartet = [
            (Rolle::Klient, GateZustand::Offen, ziele(true, false)),
            (Rolle::Klient, GateZustand::Geschlossen, ziele(true, false)),
            (Rolle::Coach, GateZustand::Offen, ziele(true, true)),
            (Rolle::Coach, GateZustand::Geschlossen, ziele(false, true)),
            (Rolle::AgentSelbst, GateZustand::Offen, Ziele::KEINE),
            (Rolle::AgentSelbst, GateZustand::Geschlossen, Ziele::KEINE),
        ];
        for (rolle, gate, soll) in erwartet {
            assert_eq!(ziele_bestimmen(rolle, gate), soll, "{rolle:?} / {gate:?}");
        }
    }

    #[test]
    fn router_nutzt_gate_der_quelle() {
        let gate = AudioGate::neu();
        let router = AudioRouter::neu(gate.clone());
        let frame = AudioFrame::aus_samples(&[0; 8], 48_000, 1, 0, "coach".into());

        assert_eq!(router.route(&frame, Rolle::Coach), ziele(true, true));
        gate.stumm_setzen(&"coach".into(), true);
        assert_eq!(router.route(&frame, Rolle::Coach), ziele(false, true));

        // Gate eines anderen Teilnehmers hat keinen Einfluss
        gate.stumm_setzen(&"klient".into(), true);
        let frame = AudioFrame::aus_samples(&[0; 8], 48_000, 1, 0, "klient".into());
        assert_eq!(router.route(&frame, Rolle::Klient), ziele(true, false));
    }

    #[test]
    fn agent_wird_nie_geroutet() {
        let router = AudioRouter::default();
        let frame = AudioFrame::aus_samples(&[0; 8], 24_000, 1, 0, "agent".into());
        assert!(router.route(&frame, Rolle::AgentSelbst).ist_leer());
    }
}
