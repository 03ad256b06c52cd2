//! Raum-Bridge-Protokoll (WebSocket zur Raum-Sidecar)
//!
//! Der Medien-Transport laeuft in einer Sidecar, die Raumereignisse und
//! Audio-Frames ueber eine WebSocket-Verbindung an den Agenten liefert.
//!
//! ## Textnachrichten (JSON, `type`-getaggt)
//! - eingehend: `participant_joined`, `participant_left`, `data_message`
//! - ausgehend: `publish_data`, `disconnect`
//!
//! ## Binaere Audio-Frames (Header = 16 Bytes + Identitaet, kein serde)
//!
//! ```text
//! Offset  Len  Beschreibung
//! ------  ---  -----------
//!  0       1   Version
//!  1       1   Kanalanzahl
//!  2       2   Laenge der Identitaet in Bytes (big-endian)
//!  4       4   Abtastrate in Hz (big-endian)
//!  8       8   Sequenznummer (big-endian)
//! 16       N   Identitaet (UTF-8)
//! 16+N     M   PCM s16le
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use coachline_core::{AudioFrame, CoachlineError, Result, TeilnehmerId};
use serde::{Deserialize, Serialize};

/// Aktuelle Version des Bridge-Frame-Formats
pub const BRIDGE_VERSION: u8 = 1;

/// Maximale Laenge einer Teilnehmer-Identitaet
pub const MAX_IDENTITAET_LAENGE: usize = 256;

// ---------------------------------------------------------------------------
// Textnachrichten
// ---------------------------------------------------------------------------

/// Von der Bridge gemeldete Raumereignisse
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeEreignis {
    ParticipantJoined {
        identity: String,
        #[serde(default)]
        role: String,
    },
    ParticipantLeft {
        identity: String,
    },
    DataMessage {
        identity: String,
        payload: String,
    },
}

impl BridgeEreignis {
    pub fn parsen(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| {
            CoachlineError::Protokoll(format!("Ungueltiges Bridge-Ereignis: {e}"))
        })
    }
}

/// Befehle des Agenten an die Bridge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeBefehl {
    PublishData { payload: String },
    Disconnect,
}

impl BridgeBefehl {
    pub fn als_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

// ---------------------------------------------------------------------------
// Binaerer Frame-Header
// ---------------------------------------------------------------------------

/// Fester Teil des Bridge-Audio-Headers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeAudioKopf {
    pub version: u8,
    pub kanaele: u8,
    pub identitaet_laenge: u16,
    pub sample_rate: u32,
    pub sequenz: u64,
}

impl BridgeAudioKopf {
    /// Groesse des festen Header-Teils in Bytes
    pub const SIZE: usize = 16;

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0] = self.version;
        buf[1] = self.kanaele;
        buf[2..4].copy_from_slice(&self.identitaet_laenge.to_be_bytes());
        buf[4..8].copy_from_slice(&self.sample_rate.to_be_bytes());
        buf[8..16].copy_from_slice(&self.sequenz.to_be_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::SIZE {
            return Err(CoachlineError::Protokoll(format!(
                "Bridge-Header zu kurz: {} Bytes (erwartet {})",
                buf.len(),
                Self::SIZE
            )));
        }
        if buf[0] != BRIDGE_VERSION {
            return Err(CoachlineError::Protokoll(format!(
                "Ungueltige Bridge-Version: {} (erwartet {})",
                buf[0], BRIDGE_VERSION
            )));
        }
        let mut seq = [0u8; 8];
        seq.copy_from_slice(&buf[8..16]);
        Ok(Self {
            version: buf[0],
            kanaele: buf[1],
            identitaet_laenge: u16::from_be_bytes([buf[2], buf[3]]),
            sample_rate: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
            sequenz: u64::from_be_bytes(seq),
        })
    }
}

/// Serialisiert einen Audio-Frame fuer die Bridge
pub fn audio_kodieren(frame: &AudioFrame) -> Result<Bytes> {
    let identitaet = frame.quelle.als_str().as_bytes();
    if identitaet.len() > MAX_IDENTITAET_LAENGE {
        return Err(CoachlineError::Protokoll(format!(
            "Identitaet zu lang: {} Bytes",
            identitaet.len()
        )));
    }
    let kanaele = u8::try_from(frame.kanaele)
        .map_err(|_| CoachlineError::AudioFormat(format!("{} Kanaele", frame.kanaele)))?;

    let kopf = BridgeAudioKopf {
        version: BRIDGE_VERSION,
        kanaele,
        identitaet_laenge: identitaet.len() as u16,
        sample_rate: frame.sample_rate,
        sequenz: frame.sequenz,
    };

    let mut buf =
        BytesMut::with_capacity(BridgeAudioKopf::SIZE + identitaet.len() + frame.pcm.len());
    buf.put_slice(&kopf.encode());
    buf.put_slice(identitaet);
    buf.put_slice(&frame.pcm);
    Ok(buf.freeze())
}

/// Deserialisiert einen Bridge-Audio-Frame
///
/// Die PCM-Nutzdaten werden als Slice des Eingangspuffers uebernommen (kein Memcpy).
pub fn audio_dekodieren(daten: Bytes) -> Result<AudioFrame> {
    let kopf = BridgeAudioKopf::decode(&daten)?;
    let id_ende = BridgeAudioKopf::SIZE + usize::from(kopf.identitaet_laenge);
    if usize::from(kopf.identitaet_laenge) > MAX_IDENTITAET_LAENGE || daten.len() < id_ende {
        return Err(CoachlineError::Protokoll(format!(
            "Identitaet abgeschnitten: {} Bytes angekuendigt",
            kopf.identitaet_laenge
        )));
    }
    let identitaet = std::str::from_utf8(&daten[BridgeAudioKopf::SIZE..id_ende])
        .map_err(|e| CoachlineError::Protokoll(format!("Identitaet kein UTF-8: {e}")))?
        .to_string();

    Ok(AudioFrame::neu(
        daten.slice(id_ende..),
        kopf.sample_rate,
        u16::from(kopf.kanaele),
        kopf.sequenz,
        TeilnehmerId(identitaet),
    ))
}
