//! coachline-protocol – Protokoll-Definitionen
//!
//! Dieses Crate definiert alle Nachrichten, die der Agent mit seinen drei
//! Gegenstellen austauscht: dem Raum (Datenkanal + Bridge-Frames), dem
//! Konversations-Backend und dem Transkriptions-Backend.

pub mod agent;
pub mod control;
pub mod raum;
pub mod transkription;

pub use agent::{KonversationsBefehl, KonversationsEreignis, Settings};
pub use control::{AgentNachricht, SteuerNachricht, TranskriptQuelle};
pub use raum::{BridgeBefehl, BridgeEreignis};
pub use transkription::{ListenParameter, TranskriptionsBefehl, TranskriptionsEreignis};
