//! coachline-backend – Verbindungen zu den Sprach-Backends
//!
//! - `queue`: Drop-Oldest-Sende-Queue (Routing blockiert nie)
//! - `transport`: WebSocket- und Speicher-Transport
//! - `verbindung`: Handshake, Keepalive, Wiederverbindung pro Backend
//! - `manager`: Routing, Pause, Whisper, Barge-in, Transkripte
//! - `funktionen`: Ausfuehrung von Funktionsaufrufen

pub mod funktionen;
pub mod manager;
pub mod queue;
pub mod transport;
pub mod verbindung;

pub use funktionen::{FunktionsAusfuehrer, HttpFunktionsAusfuehrer, KeineFunktionen};
pub use manager::{Eskalation, ManagerConfig, ManagerTeile, RoutingStatistik, VerbindungsManager};
pub use queue::SendeQueue;
pub use transport::{Verbinder, WsNachricht, WsVerbinder};
pub use verbindung::{
    BackendArt, BackendEreignis, SprachBackendVerbindung, VerbindungsConfig,
    VerbindungsEinstellungen, VerbindungsStatistik,
};
