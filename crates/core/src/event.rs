//! Raum-Ereignisse und Raum-Transport-Schnittstelle
//!
//! Der Medien-Transport (Raummitgliedschaft, Track-Abonnements, Frame-Zustellung)
//! ist ein externer Dienst. Dieses Modul beschreibt nur, was der Agent davon
//! sieht (`RaumEreignis`) und was er dort ausloest (`RaumTransport`).

use async_trait::async_trait;
use bytes::Bytes;

use crate::types::{AudioFrame, Rolle, TeilnehmerId};

/// Alle Ereignisse die der Raum-Transport an den Agenten liefert
#[derive(Debug, Clone)]
pub enum RaumEreignis {
    /// Ein Teilnehmer hat den Raum betreten
    TeilnehmerBeigetreten {
        identitaet: TeilnehmerId,
        rolle: Rolle,
    },
    /// Ein Teilnehmer hat den Raum verlassen
    TeilnehmerVerlassen { identitaet: TeilnehmerId },
    /// Audio-Frame eines Teilnehmers (Quelle steht im Frame)
    Audio(AudioFrame),
    /// Anwendungsnachricht ueber den Datenkanal des Raums
    DatenNachricht {
        absender: TeilnehmerId,
        payload: Bytes,
    },
    /// Verbindung zum Raum verloren (Failsafe beginnt zu laufen)
    VerbindungVerloren { grund: String },
    /// Verbindung zum Raum wiederhergestellt
    VerbindungWiederhergestellt,
}

/// Operationen, die der Agent auf dem Raum ausfuehrt
///
/// Implementierungen muessen Send + Sync sein, da Wiedergabe-Task und
/// Sitzungs-Loop denselben Transport teilen.
#[async_trait]
pub trait RaumTransport: Send + Sync + 'static {
    /// Veroeffentlicht einen synthetisierten Audio-Frame im Raum
    async fn audio_veroeffentlichen(&self, frame: AudioFrame) -> crate::Result<()>;

    /// Sendet eine Datenkanal-Nachricht an alle Teilnehmer
    async fn daten_veroeffentlichen(&self, payload: Bytes) -> crate::Result<()>;

    /// Verlaesst den Raum
    async fn trennen(&self) -> crate::Result<()>;
}
