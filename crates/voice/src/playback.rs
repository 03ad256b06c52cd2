//! Wiedergabe synthetisierter Sprache in den Raum
//!
//! Eine einzige periodische Task pro Raum:
//! 1. Chunks beliebiger Laenge werden in Frames fester Dauer zerlegt
//! 2. Ein Vorpuffer von N Frames faengt Liefer-Jitter des Backends ab
//! 3. Frame k wird zum Zeitpunkt `turn_start + k * frame_dauer` ausgegeben
//!    (selbstkorrigierend, kein kumulativer Drift)
//! 4. Vor der Ausgabe entfernt ein Hochpass den DC-Versatz
//!
//! ## Barge-in
//! Jeder Turn gehoert zu einer Epoche. `leeren()` verwirft den Puffer und
//! erhoeht die Epoche unter derselben Sperre, unter der neue Chunks
//! eingereiht werden. Danach wartet es auf eine eventuell laufende Ausgabe.
//! Frames einer alten Epoche werden nie mehr ausgegeben.

use bytes::{Bytes, BytesMut};
use coachline_core::{AudioFrame, RaumTransport, TeilnehmerId, BYTES_PRO_SAMPLE};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::time::Instant;

use crate::dsp::{AudioProcessor, Hochpass, STANDARD_GRENZFREQUENZ_HZ};
use crate::telemetry::{DiagnoseSnapshot, WiedergabeDiagnose};

// ---------------------------------------------------------------------------
// Konfiguration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct WiedergabeConfig {
    /// Abtastrate der Synthese-Ausgabe in Hz
    pub sample_rate: u32,
    pub kanaele: u16,
    pub frame_dauer: Duration,
    /// Frames, die vor dem Start eines Turns gepuffert werden
    pub vorpuffer_frames: usize,
    pub poll_intervall: Duration,
    /// Poll-Intervalle ohne neuen Chunk, nach denen ein Turn als beendet gilt
    pub stille_intervalle: u32,
    /// Grenzfrequenz des DC-Filters (0 = aus)
    pub hochpass_hz: f32,
}

impl Default for WiedergabeConfig {
    fn default() -> Self {
        Self {
            sample_rate: 24_000,
            kanaele: 1,
            frame_dauer: Duration::from_millis(20),
            vorpuffer_frames: 20,
            poll_intervall: Duration::from_millis(20),
            stille_intervalle: 15,
            hochpass_hz: STANDARD_GRENZFREQUENZ_HZ,
        }
    }
}

impl WiedergabeConfig {
    pub fn samples_pro_frame(&self) -> usize {
        (u128::from(self.sample_rate) * self.frame_dauer.as_micros() / 1_000_000) as usize
            * usize::from(self.kanaele.max(1))
    }

    pub fn frame_bytes(&self) -> usize {
        self.samples_pro_frame() * BYTES_PRO_SAMPLE
    }

    /// Zeit ohne neuen Chunk, nach der ein Turn als beendet gilt
    pub fn stille_fenster(&self) -> Duration {
        self.poll_intervall * self.stille_intervalle
    }
}

// ---------------------------------------------------------------------------
// Puffer
// ---------------------------------------------------------------------------

/// Warteschlange des aktuellen Turns
#[derive(Debug, Default)]
struct Puffer {
    /// Fertige Frames in Ankunftsreihenfolge
    frames: VecDeque<Bytes>,
    /// Angefangener Frame (wartet auf weitere Bytes)
    rest: BytesMut,
    synthese_fertig: bool,
    letzter_chunk: Option<Instant>,
}

impl Puffer {
    fn ist_leer(&self) -> bool {
        self.frames.is_empty() && self.rest.is_empty()
    }

    fn still_seit(&self, jetzt: Instant, fenster: Duration) -> bool {
        self.letzter_chunk
            .map_or(true, |t| jetzt.saturating_duration_since(t) >= fenster)
    }

    /// Fuellt den angefangenen Frame mit Stille auf und reiht ihn ein
    fn rest_auffuellen(&mut self, frame_bytes: usize) {
        if self.rest.is_empty() {
            return;
        }
        self.rest.resize(frame_bytes, 0);
        let frame = self.rest.split().freeze();
        self.frames.push_back(frame);
    }
}

enum Naechster {
    Frame(Bytes),
    Warten,
    TurnEnde,
    Verworfen,
}

// ---------------------------------------------------------------------------
// Wiedergabe
// ---------------------------------------------------------------------------

/// Wiedergabe-Engine eines Raums
///
/// Thread-safe und `Clone`-faehig (innerer Arc).
#[derive(Clone)]
pub struct Wiedergabe {
    inner: Arc<WiedergabeInner>,
}

struct WiedergabeInner {
    config: WiedergabeConfig,
    /// Identitaet, unter der die Frames veroeffentlicht werden
    quelle: TeilnehmerId,
    transport: Arc<dyn RaumTransport>,
    puffer: Mutex<Puffer>,
    /// Wird nur unter der Puffer-Sperre erhoeht
    epoche: AtomicU64,
    /// Serialisiert Ausgabe und Barge-in
    ausgabe: tokio::sync::Mutex<()>,
    neue_daten: Notify,
    diagnose: Mutex<WiedergabeDiagnose>,
}

impl Wiedergabe {
    pub fn neu(
        config: WiedergabeConfig,
        quelle: TeilnehmerId,
        transport: Arc<dyn RaumTransport>,
    ) -> Self {
        Self {
            inner: Arc::new(WiedergabeInner {
                config,
                quelle,
                transport,
                puffer: Mutex::new(Puffer::default()),
                epoche: AtomicU64::new(0),
                ausgabe: tokio::sync::Mutex::new(()),
                neue_daten: Notify::new(),
                diagnose: Mutex::new(WiedergabeDiagnose::neu()),
            }),
        }
    }

    pub fn config(&self) -> &WiedergabeConfig {
        &self.inner.config
    }

    /// Startet die Wiedergabe-Task (laeuft bis `shutdown_rx` `true` meldet)
    pub fn starten(&self, shutdown_rx: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move { engine.wiedergabe_loop(shutdown_rx).await })
    }

    // -----------------------------------------------------------------------
    // Eingang
    // -----------------------------------------------------------------------

    /// Reiht einen synthetisierten Chunk ein (PCM s16le, beliebige Laenge)
    pub fn chunk_einreihen(&self, pcm: Bytes) {
        if pcm.is_empty() {
            return;
        }
        let frame_bytes = self.inner.config.frame_bytes();
        {
            let mut p = self.inner.puffer.lock();
            p.letzter_chunk = Some(Instant::now());
            p.rest.extend_from_slice(&pcm);
            while p.rest.len() >= frame_bytes {
                let frame = p.rest.split_to(frame_bytes).freeze();
                p.frames.push_back(frame);
            }
            tracing::trace!(bytes = pcm.len(), frames = p.frames.len(), "Chunk eingereiht");
        }
        self.inner.neue_daten.notify_one();
    }

    /// Das Backend hat die Synthese des aktuellen Turns abgeschlossen
    ///
    /// Kurze Antworten unterhalb des Vorpuffers starten dadurch sofort.
    pub fn synthese_fertig(&self) {
        {
            let mut p = self.inner.puffer.lock();
            if p.ist_leer() {
                return;
            }
            p.synthese_fertig = true;
        }
        self.inner.neue_daten.notify_one();
    }

    /// Barge-in: verwirft alle gepufferten und laufenden Frames des Turns
    ///
    /// Nach der Rueckkehr wird kein Frame des unterbrochenen Turns mehr
    /// ausgegeben. Gibt die Anzahl verworfener Frames zurueck.
    pub async fn leeren(&self) -> usize {
        let verworfen = {
            let mut p = self.inner.puffer.lock();
            let n = p.frames.len() + usize::from(!p.rest.is_empty());
            *p = Puffer::default();
            self.inner.epoche.fetch_add(1, Ordering::SeqCst);
            n
        };
        // Eine bereits begonnene Ausgabe abwarten
        drop(self.inner.ausgabe.lock().await);

        self.inner.diagnose.lock().barge_in(verworfen);
        self.inner.neue_daten.notify_one();
        tracing::debug!(verworfen, "Wiedergabe geleert (Barge-in)");
        verworfen
    }

    // -----------------------------------------------------------------------
    // Abfragen
    // -----------------------------------------------------------------------

    /// Anzahl gepufferter Frames (ein angefangener Frame zaehlt mit)
    pub fn puffer_laenge(&self) -> usize {
        let p = self.inner.puffer.lock();
        p.frames.len() + usize::from(!p.rest.is_empty())
    }

    pub fn ist_leer(&self) -> bool {
        self.inner.puffer.lock().ist_leer()
    }

    pub fn diagnose(&self) -> DiagnoseSnapshot {
        self.inner.diagnose.lock().snapshot()
    }

    // -----------------------------------------------------------------------
    // Scheduler
    // -----------------------------------------------------------------------

    async fn wiedergabe_loop(self, mut shutdown_rx: watch::Receiver<bool>) {
        let config = self.inner.config.clone();
        let mut filter = Hochpass::neu(config.hochpass_hz, config.sample_rate);
        let mut sequenz: u64 = 0;

        tracing::info!(
            sample_rate = config.sample_rate,
            frame_ms = config.frame_dauer.as_millis() as u64,
            vorpuffer = config.vorpuffer_frames,
            "Wiedergabe-Loop gestartet"
        );

        'sitzung: loop {
            // --- Leerlauf: auf den Beginn eines Turns warten ---
            let epoche = loop {
                if let Some(epoche) = self.turn_bereit() {
                    break epoche;
                }
                tokio::select! {
                    _ = self.inner.neue_daten.notified() => {}
                    _ = tokio::time::sleep(config.poll_intervall) => {}
                    Ok(()) = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break 'sitzung;
                        }
                    }
                }
            };

            filter.reset();
            self.inner.diagnose.lock().turn_begonnen();
            let mut anker = Instant::now();
            let mut k: u32 = 0;
            let mut im_unterlauf = false;
            tracing::debug!(epoche, "Turn gestartet");

            // --- Turn ---
            loop {
                let soll = anker + config.frame_dauer * k;
                tokio::select! {
                    _ = tokio::time::sleep_until(soll) => {}
                    Ok(()) = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break 'sitzung;
                        }
                        continue;
                    }
                }

                match self.naechster_frame(epoche) {
                    Naechster::Frame(pcm) => {
                        if im_unterlauf {
                            // Neu verankern statt aufzuholen
                            anker = Instant::now();
                            k = 0;
                            im_unterlauf = false;
                        }
                        self.ausgeben(pcm, epoche, &mut filter, &mut sequenz).await;
                        k += 1;
                    }
                    Naechster::Warten => {
                        if !im_unterlauf {
                            im_unterlauf = true;
                            self.inner.diagnose.lock().unterlauf();
                            tracing::trace!(epoche, "Puffer-Unterlauf");
                        }
                        tokio::select! {
                            _ = self.inner.neue_daten.notified() => {}
                            _ = tokio::time::sleep(config.poll_intervall) => {}
                        }
                    }
                    Naechster::TurnEnde => {
                        self.turn_abschliessen(epoche);
                        tracing::debug!(epoche, frames = k, "Turn beendet");
                        break;
                    }
                    Naechster::Verworfen => {
                        tracing::debug!(epoche, "Turn durch Barge-in abgebrochen");
                        break;
                    }
                }
            }
        }

        tracing::info!("Wiedergabe-Loop beendet");
    }

    /// Prueft ob ein Turn starten kann; gibt dessen Epoche zurueck
    fn turn_bereit(&self) -> Option<u64> {
        let config = &self.inner.config;
        let mut p = self.inner.puffer.lock();
        if p.ist_leer() {
            return None;
        }
        let still = p.still_seit(Instant::now(), config.stille_fenster());
        if p.frames.len() >= config.vorpuffer_frames || p.synthese_fertig || still {
            if p.synthese_fertig || still {
                p.rest_auffuellen(config.frame_bytes());
            }
            Some(self.inner.epoche.load(Ordering::SeqCst))
        } else {
            None
        }
    }

    fn naechster_frame(&self, epoche: u64) -> Naechster {
        let config = &self.inner.config;
        let mut p = self.inner.puffer.lock();
        if self.inner.epoche.load(Ordering::SeqCst) != epoche {
            return Naechster::Verworfen;
        }
        if let Some(frame) = p.frames.pop_front() {
            return Naechster::Frame(frame);
        }
        let still = p.still_seit(Instant::now(), config.stille_fenster());
        if !p.rest.is_empty() && (p.synthese_fertig || still) {
            p.rest_auffuellen(config.frame_bytes());
            return match p.frames.pop_front() {
                Some(frame) => Naechster::Frame(frame),
                None => Naechster::Warten,
            };
        }
        if p.rest.is_empty() && (p.synthese_fertig || still) {
            Naechster::TurnEnde
        } else {
            Naechster::Warten
        }
    }

    fn turn_abschliessen(&self, epoche: u64) {
        let mut p = self.inner.puffer.lock();
        if self.inner.epoche.load(Ordering::SeqCst) == epoche && p.ist_leer() {
            p.synthese_fertig = false;
            p.letzter_chunk = None;
        }
    }

    async fn ausgeben(
        &self,
        pcm: Bytes,
        epoche: u64,
        filter: &mut Hochpass,
        sequenz: &mut u64,
    ) {
        let config = &self.inner.config;
        let mut samples: Vec<i16> = pcm
            .chunks_exact(BYTES_PRO_SAMPLE)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect();
        filter.process(&mut samples);

        let frame = AudioFrame::aus_samples(
            &samples,
            config.sample_rate,
            config.kanaele,
            *sequenz,
            self.inner.quelle.clone(),
        );

        let _ausgabe = self.inner.ausgabe.lock().await;
        if self.inner.epoche.load(Ordering::SeqCst) != epoche {
            return;
        }
        self.inner
            .diagnose
            .lock()
            .frame_erfasst(&samples, Instant::now());
        *sequenz += 1;

        if let Err(e) = self.inner.transport.audio_veroeffentlichen(frame).await {
            tracing::warn!(fehler = %e, sequenz = *sequenz - 1, "Frame konnte nicht veroeffentlicht werden");
        }
    }
}
