//! Wiedergabe-Diagnose – Timing- und Pegelmetriken pro Sitzung
//!
//! Gesammelte Werte:
//! - Abstaende zwischen ausgegebenen Frames (min/max/Mittel)
//! - Spitzenpegel und Anzahl Frames nahe der Vollaussteuerung (> 97 %)
//! - Rest-DC nach dem Hochpass (Mittelwert der ausgegebenen Samples)
//! - Verworfene Frames durch Barge-in
//!
//! Snapshots werden von der Sitzung periodisch in die Prometheus-Metriken
//! uebernommen.

use std::time::Duration;
use tokio::time::Instant;

/// Ab diesem Betrag gilt ein Sample als nahe der Vollaussteuerung
pub const CLIPPING_SCHWELLE: i32 = (i16::MAX as i32 * 97) / 100;

/// Momentaufnahme der Wiedergabe-Diagnose
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiagnoseSnapshot {
    pub frames_ausgegeben: u64,
    pub turns: u64,
    pub barge_ins: u64,
    pub frames_verworfen: u64,
    pub unterlaeufe: u64,
    pub abstand_min: Option<Duration>,
    pub abstand_max: Option<Duration>,
    pub abstand_mittel: Option<Duration>,
    /// Groesster Sample-Betrag seit Sitzungsbeginn
    pub spitzenwert: u16,
    pub frames_nahe_clipping: u64,
    /// Mittelwert der ausgegebenen Samples im aktuellen bzw. letzten Turn
    pub rest_dc: f64,
}

impl DiagnoseSnapshot {
    pub fn zusammenfassung(&self) -> String {
        format!(
            "Frames={} Turns={} Barge-ins={} Verworfen={} Unterlaeufe={} Abstand={:?}/{:?}/{:?} Spitze={} Clipping={} DC={:.2}",
            self.frames_ausgegeben,
            self.turns,
            self.barge_ins,
            self.frames_verworfen,
            self.unterlaeufe,
            self.abstand_min,
            self.abstand_mittel,
            self.abstand_max,
            self.spitzenwert,
            self.frames_nahe_clipping,
            self.rest_dc,
        )
    }
}

/// Akkumulierte Diagnose einer Sitzung
#[derive(Debug, Default)]
pub struct WiedergabeDiagnose {
    frames_ausgegeben: u64,
    turns: u64,
    barge_ins: u64,
    frames_verworfen: u64,
    unterlaeufe: u64,
    letzte_ausgabe: Option<Instant>,
    abstand_min: Option<Duration>,
    abstand_max: Option<Duration>,
    abstand_summe: Duration,
    abstand_anzahl: u32,
    spitzenwert: u16,
    frames_nahe_clipping: u64,
    turn_summe: i64,
    turn_samples: u64,
}

impl WiedergabeDiagnose {
    pub fn neu() -> Self {
        Self::default()
    }

    /// Beginn eines neuen Turns: Abstaende ueber Turn-Grenzen zaehlen nicht
    pub fn turn_begonnen(&mut self) {
        self.turns += 1;
        self.letzte_ausgabe = None;
        self.turn_summe = 0;
        self.turn_samples = 0;
    }

    /// Erfasst einen ausgegebenen (bereits gefilterten) Frame
    pub fn frame_erfasst(&mut self, samples: &[i16], zeitpunkt: Instant) {
        self.frames_ausgegeben += 1;

        if let Some(vorher) = self.letzte_ausgabe {
            let abstand = zeitpunkt.saturating_duration_since(vorher);
            self.abstand_min = Some(self.abstand_min.map_or(abstand, |m| m.min(abstand)));
            self.abstand_max = Some(self.abstand_max.map_or(abstand, |m| m.max(abstand)));
            self.abstand_summe += abstand;
            self.abstand_anzahl = self.abstand_anzahl.saturating_add(1);
        }
        self.letzte_ausgabe = Some(zeitpunkt);

        let spitze = samples.iter().map(|s| s.unsigned_abs()).max().unwrap_or(0);
        self.spitzenwert = self.spitzenwert.max(spitze);
        if i32::from(spitze) > CLIPPING_SCHWELLE {
            self.frames_nahe_clipping += 1;
            tracing::debug!(spitze, "Frame nahe Vollaussteuerung");
        }

        self.turn_summe += samples.iter().map(|&s| i64::from(s)).sum::<i64>();
        self.turn_samples += samples.len() as u64;
    }

    pub fn barge_in(&mut self, verworfen: usize) {
        self.barge_ins += 1;
        self.frames_verworfen += verworfen as u64;
    }

    pub fn unterlauf(&mut self) {
        self.unterlaeufe += 1;
    }

    pub fn snapshot(&self) -> DiagnoseSnapshot {
        let abstand_mittel = (self.abstand_anzahl > 0)
            .then(|| self.abstand_summe / self.abstand_anzahl);
        let rest_dc = if self.turn_samples == 0 {
            0.0
        } else {
            self.turn_summe as f64 / self.turn_samples as f64
        };
        DiagnoseSnapshot {
            frames_ausgegeben: self.frames_ausgegeben,
            turns: self.turns,
            barge_ins: self.barge_ins,
            frames_verworfen: self.frames_verworfen,
            unterlaeufe: self.unterlaeufe,
            abstand_min: self.abstand_min,
            abstand_max: self.abstand_max,
            abstand_mittel,
            spitzenwert: self.spitzenwert,
            frames_nahe_clipping: self.frames_nahe_clipping,
            rest_dc,
        }
    }
}
