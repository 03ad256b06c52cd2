//! Prometheus-kompatible Metriken des Agenten
//!
//! Registrierte Metriken:
//! - `coachline_frames_routed_total` – Counter: Geroutete Frames (ziel)
//! - `coachline_frames_dropped_total` – Counter: Wegen Backpressure verworfene Frames (backend)
//! - `coachline_audio_format_errors_total` – Counter: Frames mit falschem Format
//! - `coachline_protocol_errors_total` – Counter: Unlesbare Backend-Nachrichten (backend)
//! - `coachline_reconnects_total` – Counter: Wiederverbindungen (backend)
//! - `coachline_barge_ins_total` – Counter: Unterbrochene Turns
//! - `coachline_playback_frames_total` – Counter: Ausgegebene Wiedergabe-Frames
//! - `coachline_playback_near_clipping_total` – Counter: Frames nahe Vollaussteuerung
//! - `coachline_humans_present` – Gauge: Menschen im Raum
//!
//! Die Zaehler werden aus kumulativen Statistiken nachgezogen
//! ([`CoachlineMetrics::aktualisieren`]), nicht pro Frame inkrementiert.

use anyhow::Result;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::sync::Arc;

pub const BACKEND_KONVERSATION: &str = "conversation";
pub const BACKEND_TRANSKRIPTION: &str = "transcription";

/// Kumulative Zaehlerstaende einer Sitzung
///
/// Wird vom Agenten aus Routing-, Verbindungs- und Wiedergabe-Statistik
/// zusammengesetzt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetrikSnapshot {
    pub zur_konversation: u64,
    pub zur_transkription: u64,
    pub unterdrueckt: u64,
    pub format_fehler: u64,
    pub konversation_verworfen: u64,
    pub transkription_verworfen: u64,
    pub konversation_protokollfehler: u64,
    pub transkription_protokollfehler: u64,
    pub konversation_wiederverbindungen: u64,
    pub transkription_wiederverbindungen: u64,
    pub barge_ins: u64,
    pub wiedergabe_frames: u64,
    pub frames_nahe_clipping: u64,
    pub menschen: usize,
}

/// Alle Coachline-Prometheus-Metriken
#[derive(Clone)]
pub struct CoachlineMetrics {
    pub registry: Arc<Registry>,

    // Routing
    pub frames_routed: IntCounterVec,
    pub frames_dropped: IntCounterVec,
    pub format_errors: IntCounter,

    // Backends
    pub protocol_errors: IntCounterVec,
    pub reconnects: IntCounterVec,

    // Wiedergabe
    pub barge_ins: IntCounter,
    pub playback_frames: IntCounter,
    pub near_clipping: IntCounter,

    // Raum
    pub humans_present: IntGauge,
}

impl CoachlineMetrics {
    /// Erstellt und registriert alle Metriken in einer neuen Registry
    pub fn neu() -> Result<Self> {
        let registry = Registry::new();

        // --- Routing ---
        let frames_routed = IntCounterVec::new(
            Opts::new("coachline_frames_routed_total", "Geroutete Audio-Frames pro Ziel"),
            &["ziel"],
        )?;
        registry.register(Box::new(frames_routed.clone()))?;

        let frames_dropped = IntCounterVec::new(
            Opts::new(
                "coachline_frames_dropped_total",
                "Wegen voller Sende-Queue verworfene Frames",
            ),
            &["backend"],
        )?;
        registry.register(Box::new(frames_dropped.clone()))?;

        let format_errors = IntCounter::with_opts(Opts::new(
            "coachline_audio_format_errors_total",
            "Eingangs-Frames mit unerwarteter Sample-Rate oder Kanalzahl",
        ))?;
        registry.register(Box::new(format_errors.clone()))?;

        // --- Backends ---
        let protocol_errors = IntCounterVec::new(
            Opts::new(
                "coachline_protocol_errors_total",
                "Verworfene, nicht lesbare Backend-Nachrichten",
            ),
            &["backend"],
        )?;
        registry.register(Box::new(protocol_errors.clone()))?;

        let reconnects = IntCounterVec::new(
            Opts::new("coachline_reconnects_total", "Wiederverbindungen zu einem Backend"),
            &["backend"],
        )?;
        registry.register(Box::new(reconnects.clone()))?;

        // --- Wiedergabe ---
        let barge_ins = IntCounter::with_opts(Opts::new(
            "coachline_barge_ins_total",
            "Durch Nutzersprache abgebrochene Wiedergabe-Turns",
        ))?;
        registry.register(Box::new(barge_ins.clone()))?;

        let playback_frames = IntCounter::with_opts(Opts::new(
            "coachline_playback_frames_total",
            "In den Raum ausgegebene Wiedergabe-Frames",
        ))?;
        registry.register(Box::new(playback_frames.clone()))?;

        let near_clipping = IntCounter::with_opts(Opts::new(
            "coachline_playback_near_clipping_total",
            "Wiedergabe-Frames nahe der Vollaussteuerung",
        ))?;
        registry.register(Box::new(near_clipping.clone()))?;

        // --- Raum ---
        let humans_present = IntGauge::with_opts(Opts::new(
            "coachline_humans_present",
            "Anzahl menschlicher Teilnehmer im Raum",
        ))?;
        registry.register(Box::new(humans_present.clone()))?;

        // Label-Werte vorbelegen, damit alle Reihen ab dem ersten Scrape existieren
        for ziel in [BACKEND_KONVERSATION, BACKEND_TRANSKRIPTION, "suppressed"] {
            frames_routed.with_label_values(&[ziel]);
        }
        for backend in [BACKEND_KONVERSATION, BACKEND_TRANSKRIPTION] {
            frames_dropped.with_label_values(&[backend]);
            protocol_errors.with_label_values(&[backend]);
            reconnects.with_label_values(&[backend]);
        }

        Ok(Self {
            registry: Arc::new(registry),
            frames_routed,
            frames_dropped,
            format_errors,
            protocol_errors,
            reconnects,
            barge_ins,
            playback_frames,
            near_clipping,
            humans_present,
        })
    }

    /// Zieht alle Zaehler auf die Staende des Snapshots nach
    pub fn aktualisieren(&self, s: &MetrikSnapshot) {
        nachziehen(&self.frames_routed.with_label_values(&[BACKEND_KONVERSATION]), s.zur_konversation);
        nachziehen(&self.frames_routed.with_label_values(&[BACKEND_TRANSKRIPTION]), s.zur_transkription);
        nachziehen(&self.frames_routed.with_label_values(&["suppressed"]), s.unterdrueckt);
        nachziehen(&self.format_errors, s.format_fehler);

        nachziehen(&self.frames_dropped.with_label_values(&[BACKEND_KONVERSATION]), s.konversation_verworfen);
        nachziehen(&self.frames_dropped.with_label_values(&[BACKEND_TRANSKRIPTION]), s.transkription_verworfen);
        nachziehen(
            &self.protocol_errors.with_label_values(&[BACKEND_KONVERSATION]),
            s.konversation_protokollfehler,
        );
        nachziehen(
            &self.protocol_errors.with_label_values(&[BACKEND_TRANSKRIPTION]),
            s.transkription_protokollfehler,
        );
        nachziehen(
            &self.reconnects.with_label_values(&[BACKEND_KONVERSATION]),
            s.konversation_wiederverbindungen,
        );
        nachziehen(
            &self.reconnects.with_label_values(&[BACKEND_TRANSKRIPTION]),
            s.transkription_wiederverbindungen,
        );

        nachziehen(&self.barge_ins, s.barge_ins);
        nachziehen(&self.playback_frames, s.wiedergabe_frames);
        nachziehen(&self.near_clipping, s.frames_nahe_clipping);

        self.humans_present.set(s.menschen as i64);
    }

    /// Exportiert alle Metriken im Prometheus-Textformat
    pub fn exportieren(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Counter duerfen nur steigen: nur die Differenz wird addiert
fn nachziehen(zaehler: &IntCounter, gesamt: u64) {
    let bisher = zaehler.get();
    if gesamt > bisher {
        zaehler.inc_by(gesamt - bisher);
    }
}

/// Axum-Router fuer den `/metrics`-Endpunkt
pub fn metrics_router(metriken: CoachlineMetrics) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metriken)
}

async fn metrics_handler(State(metriken): State<CoachlineMetrics>) -> impl IntoResponse {
    match metriken.exportieren() {
        Ok(text) => (
            StatusCode::OK,
            [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(err) => {
            tracing::error!("Metriken-Export fehlgeschlagen: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
