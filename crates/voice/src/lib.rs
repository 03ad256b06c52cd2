//! coachline-voice – Audio-Engine eines Raums
//!
//! ## Module
//! - [`gate`] – Gate-Zustand pro Teilnehmer (Offen/Geschlossen)
//! - [`router`] – Routing-Politik (Rolle, Gate) -> Backend-Ziele
//! - [`state`] – Sitzungs-Zustand eines Raums
//! - [`lifecycle`] – Lebenszyklus (Grace-Frist, Failsafe, Beenden)
//! - [`playback`] – Wiedergabe synthetisierter Sprache mit Vorpuffer
//! - [`dsp`] – DC-Filter fuer die Wiedergabe
//! - [`telemetry`] – Wiedergabe-Diagnose

pub mod dsp;
pub mod gate;
pub mod lifecycle;
pub mod playback;
pub mod router;
pub mod state;
pub mod telemetry;

pub use gate::AudioGate;
pub use lifecycle::{Beendigungsgrund, Frist, LebenszyklusConfig, LebenszyklusManager, Phase, Uebergang};
pub use playback::{Wiedergabe, WiedergabeConfig};
pub use router::{AudioRouter, Ziele};
pub use state::SitzungsZustand;
pub use telemetry::DiagnoseSnapshot;
