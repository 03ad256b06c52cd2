//! coachline-core – Gemeinsame Typen, Fehler und Raum-Schnittstellen
//!
//! Dieses Crate stellt die Bausteine bereit, die von allen anderen
//! Coachline-Crates gemeinsam genutzt werden.

pub mod error;
pub mod event;
pub mod types;

// Re-Exporte fuer bequemen Zugriff
pub use error::{CoachlineError, Result};
pub use event::{RaumEreignis, RaumTransport};
pub use types::{AudioFrame, GateZustand, Rolle, TeilnehmerId, BYTES_PRO_SAMPLE};
