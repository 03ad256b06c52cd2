//! Integration-Tests fuer VerbindungsManager (Routing, Pause, Whisper, Barge-in)

use async_trait::async_trait;
use bytes::Bytes;
use coachline_backend::transport::speicher::{SpeicherGegenstelle, SpeicherVerbinder};
use coachline_backend::{
    BackendArt, Eskalation, FunktionsAusfuehrer, KeineFunktionen, ManagerConfig, ManagerTeile,
    SprachBackendVerbindung, VerbindungsConfig, VerbindungsEinstellungen, VerbindungsManager,
    WsNachricht,
};
use coachline_core::{AudioFrame, CoachlineError, RaumTransport, Rolle, TeilnehmerId};
use coachline_protocol::agent::{
    AgentEinstellungen, AudioEinstellungen, AudioFormat, Listen, Provider, Speak, Think,
};
use coachline_protocol::{ListenParameter, Settings};
use coachline_voice::{SitzungsZustand, Wiedergabe, WiedergabeConfig};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

// ---------------------------------------------------------------------------
// Aufbau
// ---------------------------------------------------------------------------

#[derive(Default)]
struct AufnahmeRaum {
    audio: Mutex<Vec<AudioFrame>>,
    daten: Mutex<Vec<serde_json::Value>>,
}

impl AufnahmeRaum {
    fn audio(&self) -> Vec<AudioFrame> {
        self.audio.lock().clone()
    }

    fn daten(&self) -> Vec<serde_json::Value> {
        self.daten.lock().clone()
    }
}

#[async_trait]
impl RaumTransport for AufnahmeRaum {
    async fn audio_veroeffentlichen(&self, frame: AudioFrame) -> coachline_core::Result<()> {
        self.audio.lock().push(frame);
        Ok(())
    }

    async fn daten_veroeffentlichen(&self, payload: Bytes) -> coachline_core::Result<()> {
        let wert = serde_json::from_slice(&payload)?;
        self.daten.lock().push(wert);
        Ok(())
    }

    async fn trennen(&self) -> coachline_core::Result<()> {
        Ok(())
    }
}

struct Aufbau {
    manager: VerbindungsManager,
    konversation: SpeicherGegenstelle,
    transkription: SpeicherGegenstelle,
    konversation_verbinder: Arc<SpeicherVerbinder>,
    raum: Arc<AufnahmeRaum>,
    eskalationen: mpsc::UnboundedReceiver<Eskalation>,
}

fn klient() -> TeilnehmerId {
    TeilnehmerId::neu("klient-1")
}

fn coach() -> TeilnehmerId {
    TeilnehmerId::neu("coach-1")
}

fn settings() -> Settings {
    let provider = |typ: &str, model: &str| Provider {
        typ: typ.into(),
        model: model.into(),
        temperature: None,
        keyterms: Vec::new(),
    };
    Settings {
        audio: AudioEinstellungen {
            input: AudioFormat {
                encoding: "linear16".into(),
                sample_rate: 48_000,
                container: None,
            },
            output: AudioFormat {
                encoding: "linear16".into(),
                sample_rate: 24_000,
                container: Some("none".into()),
            },
        },
        agent: AgentEinstellungen {
            language: None,
            listen: Listen {
                provider: provider("deepgram", "nova-3"),
            },
            think: Think {
                provider: provider("open_ai", "gpt-4o-mini"),
                prompt: "Coaching".into(),
            },
            speak: Speak {
                provider: provider("deepgram", "aura-2-thalia-en"),
            },
            greeting: None,
        },
    }
}

async fn aufbauen(ausfuehrer: Arc<dyn FunktionsAusfuehrer>) -> Aufbau {
    let zustand = SitzungsZustand::neu("raum-1", TeilnehmerId::neu("agent"));
    zustand.teilnehmer_hinzufuegen(klient(), Rolle::Klient);
    zustand.teilnehmer_hinzufuegen(coach(), Rolle::Coach);

    let (konversation_verbinder, mut konversation_gegenstellen) = SpeicherVerbinder::neu();
    let (transkription_verbinder, mut transkription_gegenstellen) = SpeicherVerbinder::neu();

    let (konversation, konversation_rx) = SprachBackendVerbindung::starten(
        VerbindungsEinstellungen::konversation("mem://konversation", settings()),
        VerbindungsConfig::default(),
        konversation_verbinder.clone(),
    );
    let (transkription, transkription_rx) = SprachBackendVerbindung::starten(
        VerbindungsEinstellungen::transkription("mem://transkription", ListenParameter::default()),
        VerbindungsConfig::default(),
        transkription_verbinder,
    );

    let raum = Arc::new(AufnahmeRaum::default());
    let wiedergabe = Wiedergabe::neu(
        WiedergabeConfig::default(),
        TeilnehmerId::neu("agent"),
        raum.clone(),
    );

    let manager = VerbindungsManager::neu(
        ManagerConfig::default(),
        ManagerTeile {
            zustand,
            konversation,
            transkription,
            wiedergabe,
            raum: raum.clone(),
            ausfuehrer,
        },
    );

    let (eskalation_tx, eskalationen) = mpsc::unbounded_channel();
    let verarbeiter = manager.clone();
    tokio::spawn(async move {
        verarbeiter
            .ereignisse_verarbeiten(konversation_rx, transkription_rx, eskalation_tx)
            .await
    });

    let mut konv = konversation_gegenstellen.recv().await.unwrap();
    konv.naechster_text().await.unwrap();
    konv.text_senden(r#"{"type":"SettingsApplied"}"#);
    let trans = transkription_gegenstellen.recv().await.unwrap();

    let aufbau = Aufbau {
        manager,
        konversation: konv,
        transkription: trans,
        konversation_verbinder,
        raum,
        eskalationen,
    };
    warten_bis(|| {
        aufbau.manager.konversation().ist_bereit() && aufbau.manager.transkription().ist_bereit()
    })
    .await;
    aufbau
}

/// Wartet (in pausierter Zeit) bis die Bedingung gilt
async fn warten_bis(bedingung: impl Fn() -> bool) {
    for _ in 0..10_000 {
        if bedingung() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("Bedingung nicht erfuellt");
}

/// Eingangsframe (48 kHz mono, 10 ms), erkennbar am Markierungswert
fn frame(quelle: TeilnehmerId, markierung: i16, sequenz: u64) -> AudioFrame {
    AudioFrame::aus_samples(&[markierung; 480], 48_000, 1, sequenz, quelle)
}

/// Markierungen der bis jetzt empfangenen Audio-Frames einer Gegenstelle
async fn empfangene_markierungen(g: &mut SpeicherGegenstelle) -> Vec<i16> {
    tokio::time::sleep(Duration::from_millis(50)).await;
    g.eingegangen()
        .into_iter()
        .filter_map(|n| match n {
            WsNachricht::Binaer(pcm) => Some(i16::from_le_bytes([pcm[0], pcm[1]])),
            WsNachricht::Text(_) => None,
        })
        .collect()
}

fn texte(g: &mut SpeicherGegenstelle) -> Vec<serde_json::Value> {
    g.eingegangen()
        .into_iter()
        .filter_map(|n| match n {
            WsNachricht::Text(t) => serde_json::from_str(&t).ok(),
            WsNachricht::Binaer(_) => None,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Szenario B: Coach-Gate
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn szenario_b_coach_gate_umschalten() {
    let mut a = aufbauen(Arc::new(KeineFunktionen)).await;
    let m = &a.manager;

    for s in 0..3 {
        let ziele = m.audio_routen(&frame(coach(), 1, s), Rolle::Coach).unwrap();
        assert!(ziele.konversation && ziele.transkription);
    }

    assert!(m.stumm_setzen(&coach(), true));
    for s in 3..6 {
        let ziele = m.audio_routen(&frame(coach(), 2, s), Rolle::Coach).unwrap();
        assert!(!ziele.konversation && ziele.transkription);
    }

    assert!(m.stumm_setzen(&coach(), false));
    for s in 6..9 {
        m.audio_routen(&frame(coach(), 3, s), Rolle::Coach).unwrap();
    }

    assert_eq!(
        empfangene_markierungen(&mut a.konversation).await,
        vec![1, 1, 1, 3, 3, 3]
    );
    assert_eq!(
        empfangene_markierungen(&mut a.transkription).await,
        vec![1, 1, 1, 2, 2, 2, 3, 3, 3]
    );
}

// ---------------------------------------------------------------------------
// Szenario C: globale KI-Pause
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn szenario_c_pause_haelt_alles_von_der_konversation_fern() {
    let mut a = aufbauen(Arc::new(KeineFunktionen)).await;
    let m = &a.manager;

    m.audio_routen(&frame(klient(), 1, 0), Rolle::Klient).unwrap();
    m.audio_routen(&frame(coach(), 2, 0), Rolle::Coach).unwrap();

    assert!(m.pausieren());
    assert!(!m.pausieren(), "Pause ist idempotent");
    m.audio_routen(&frame(klient(), 3, 1), Rolle::Klient).unwrap();
    m.audio_routen(&frame(coach(), 4, 1), Rolle::Coach).unwrap();
    // Auch ein Gate-Wechsel waehrend der Pause oeffnet die Konversation nicht
    m.stumm_setzen(&coach(), true);
    m.stumm_setzen(&coach(), false);
    m.audio_routen(&frame(coach(), 5, 2), Rolle::Coach).unwrap();
    // Coach bleibt nach der Pause stummgeschaltet
    m.stumm_setzen(&coach(), true);

    assert!(m.fortsetzen());
    assert!(!m.fortsetzen());
    m.audio_routen(&frame(klient(), 6, 3), Rolle::Klient).unwrap();
    m.audio_routen(&frame(coach(), 7, 3), Rolle::Coach).unwrap();

    assert_eq!(
        empfangene_markierungen(&mut a.konversation).await,
        vec![1, 2, 6]
    );
    assert_eq!(
        empfangene_markierungen(&mut a.transkription).await,
        vec![2, 4, 5, 7]
    );
    assert_eq!(m.statistik().pausiert_zurueckgehalten, 3);
}

// ---------------------------------------------------------------------------
// Routing-Randfaelle
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn agent_audio_wird_nie_geroutet() {
    let mut a = aufbauen(Arc::new(KeineFunktionen)).await;
    let echo = frame(TeilnehmerId::neu("agent"), 9, 0);
    let ziele = a.manager.audio_routen(&echo, Rolle::AgentSelbst).unwrap();
    assert!(ziele.ist_leer());

    assert!(empfangene_markierungen(&mut a.konversation).await.is_empty());
    assert!(empfangene_markierungen(&mut a.transkription).await.is_empty());
    assert_eq!(a.manager.statistik().unterdrueckt, 1);
}

#[tokio::test(start_paused = true)]
async fn formatfehler_in_folge_eskalieren() {
    let a = aufbauen(Arc::new(KeineFunktionen)).await;
    let falsch = AudioFrame::aus_samples(&[0; 160], 16_000, 1, 0, klient());

    for _ in 0..10 {
        assert!(matches!(
            a.manager.audio_routen(&falsch, Rolle::Klient),
            Err(CoachlineError::AudioFormat(_))
        ));
    }
    // Ein gueltiger Frame setzt die Folge zurueck
    a.manager
        .audio_routen(&frame(klient(), 1, 1), Rolle::Klient)
        .unwrap();

    for _ in 0..50 {
        assert!(matches!(
            a.manager.audio_routen(&falsch, Rolle::Klient),
            Err(CoachlineError::AudioFormat(_))
        ));
    }
    assert!(matches!(
        a.manager.audio_routen(&falsch, Rolle::Klient),
        Err(CoachlineError::Verbindung(_))
    ));
    assert_eq!(a.manager.statistik().format_fehler, 61);
}

// ---------------------------------------------------------------------------
// Whisper
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn whisper_wird_still_eingespeist() {
    let mut a = aufbauen(Arc::new(KeineFunktionen)).await;

    a.manager
        .whisper_einspeisen("  Klient wirkt angespannt, langsamer sprechen  ")
        .unwrap();
    assert!(a.manager.whisper_einspeisen("   ").is_err());

    a.konversation.text_senden(r#"{"type":"PromptUpdated"}"#);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let gesendet = texte(&mut a.konversation);
    assert_eq!(gesendet.len(), 1);
    assert_eq!(gesendet[0]["type"], "UpdatePrompt");
    assert_eq!(
        gesendet[0]["prompt"],
        "Klient wirkt angespannt, langsamer sprechen"
    );

    // Nie im Transkript, nie an die Transkription, keine Sprachausgabe
    assert!(a.raum.daten().is_empty());
    assert!(texte(&mut a.transkription).is_empty());
    assert!(a.manager.wiedergabe().ist_leer());
}

// ---------------------------------------------------------------------------
// Transkripte
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn finale_transkripte_werden_weitergeleitet() {
    let a = aufbauen(Arc::new(KeineFunktionen)).await;

    a.konversation
        .text_senden(r#"{"type":"ConversationText","role":"user","content":"Mir geht es gut."}"#);
    a.transkription.text_senden(
        r#"{"type":"Results","channel":{"alternatives":[{"transcript":"Das klingt"}]},"is_final":false}"#,
    );
    a.transkription.text_senden(
        r#"{"type":"Results","channel":{"alternatives":[{"transcript":"Das klingt gut."}]},"is_final":true}"#,
    );

    warten_bis(|| a.raum.daten().len() >= 2).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut daten = a.raum.daten();
    daten.sort_by_key(|d| d["source"].as_str().map(str::to_string));
    assert_eq!(daten.len(), 2);

    assert_eq!(daten[0]["type"], "transcript");
    assert_eq!(daten[0]["source"], "conversation");
    assert_eq!(daten[0]["role"], "user");
    assert_eq!(daten[0]["text"], "Mir geht es gut.");
    assert_eq!(daten[0]["final"], true);

    assert_eq!(daten[1]["source"], "transcription");
    assert_eq!(daten[1]["role"], "coach");
    assert_eq!(daten[1]["text"], "Das klingt gut.");
    assert_eq!(a.manager.statistik().transkripte_weitergeleitet, 2);
}

// ---------------------------------------------------------------------------
// Funktionsaufrufe
// ---------------------------------------------------------------------------

#[derive(Default)]
struct AufnahmeAusfuehrer {
    aufrufe: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl FunktionsAusfuehrer for AufnahmeAusfuehrer {
    async fn ausfuehren(&self, name: &str, argumente: &str) -> coachline_core::Result<String> {
        self.aufrufe.lock().push((name.into(), argumente.into()));
        if name == "kaputt" {
            return Err(CoachlineError::Verbindung("Dienst nicht erreichbar".into()));
        }
        Ok(r#"{"frei":"Montag 10 Uhr"}"#.into())
    }
}

#[tokio::test(start_paused = true)]
async fn funktionsaufruf_wird_beantwortet() {
    let ausfuehrer = Arc::new(AufnahmeAusfuehrer::default());
    let mut a = aufbauen(ausfuehrer.clone()).await;

    a.konversation.text_senden(
        r#"{"type":"FunctionCallRequest","functions":[{"id":"call-1","name":"termin_suchen","arguments":"{\"tag\":\"montag\"}","client_side":true}]}"#,
    );
    a.konversation.text_senden(
        r#"{"type":"FunctionCallRequest","functions":[{"id":"call-2","name":"kaputt","arguments":"{}","client_side":true}]}"#,
    );

    let erste: serde_json::Value =
        serde_json::from_str(&a.konversation.naechster_text().await.unwrap()).unwrap();
    let zweite: serde_json::Value =
        serde_json::from_str(&a.konversation.naechster_text().await.unwrap()).unwrap();
    let mut antworten = vec![erste, zweite];
    antworten.sort_by_key(|v| v["id"].as_str().map(str::to_string));

    assert_eq!(antworten[0]["type"], "FunctionCallResponse");
    assert_eq!(antworten[0]["id"], "call-1");
    assert_eq!(antworten[0]["name"], "termin_suchen");
    assert_eq!(antworten[0]["content"], r#"{"frei":"Montag 10 Uhr"}"#);

    assert_eq!(antworten[1]["id"], "call-2");
    let inhalt: serde_json::Value =
        serde_json::from_str(antworten[1]["content"].as_str().unwrap()).unwrap();
    assert!(inhalt["error"].as_str().unwrap().contains("nicht erreichbar"));

    let aufrufe = ausfuehrer.aufrufe.lock().clone();
    assert!(aufrufe.contains(&("termin_suchen".into(), r#"{"tag":"montag"}"#.into())));
    assert_eq!(a.manager.statistik().funktionsaufrufe, 2);
}

// ---------------------------------------------------------------------------
// Barge-in
// ---------------------------------------------------------------------------

/// Synthese-Chunk (24 kHz, 20 ms) mit alternierendem Vorzeichen
fn synthese_chunk(amplitude: i16) -> Bytes {
    let mut pcm = Vec::with_capacity(960);
    for i in 0..480 {
        let s = if i % 2 == 0 { amplitude } else { -amplitude };
        pcm.extend_from_slice(&s.to_le_bytes());
    }
    Bytes::from(pcm)
}

fn spitze(frame: &AudioFrame) -> i32 {
    frame
        .samples()
        .iter()
        .map(|s| i32::from(*s).abs())
        .max()
        .unwrap_or(0)
}

#[tokio::test(start_paused = true)]
async fn barge_in_verwirft_den_laufenden_turn() {
    let a = aufbauen(Arc::new(KeineFunktionen)).await;
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let _wiedergabe_task = a.manager.wiedergabe().starten(shutdown_rx);

    for _ in 0..40 {
        a.konversation.binaer_senden(synthese_chunk(1000));
    }
    warten_bis(|| a.raum.audio().len() >= 5).await;

    a.konversation.text_senden(r#"{"type":"UserStartedSpeaking"}"#);
    warten_bis(|| a.manager.wiedergabe().diagnose().barge_ins == 1).await;
    assert!(a.manager.wiedergabe().ist_leer());
    let vorher = a.raum.audio().len();
    assert!(vorher < 40);

    for _ in 0..25 {
        a.konversation.binaer_senden(synthese_chunk(3000));
    }
    a.konversation.text_senden(r#"{"type":"AgentAudioDone"}"#);
    tokio::time::sleep(Duration::from_secs(2)).await;

    let audio = a.raum.audio();
    assert!(audio[..vorher].iter().all(|f| spitze(f) < 2500));
    assert_eq!(audio.len() - vorher, 25);
    assert!(
        audio[vorher..].iter().all(|f| spitze(f) > 2500),
        "Frame des unterbrochenen Turns nach dem Barge-in ausgegeben"
    );
}

// ---------------------------------------------------------------------------
// Eskalation
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn erschoepfte_konversation_eskaliert() {
    let a = aufbauen(Arc::new(KeineFunktionen)).await;
    a.konversation_verbinder.naechste_fehlschlagen(3);

    // Backend schliesst unerwartet; alle Wiederverbindungen schlagen fehl
    let Aufbau {
        konversation,
        mut eskalationen,
        ..
    } = a;
    drop(konversation);

    let eskalation = tokio::time::timeout(Duration::from_secs(30), eskalationen.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(
        eskalation,
        Eskalation::VerbindungErschoepft {
            backend: BackendArt::Konversation,
            ..
        }
    ));
}
