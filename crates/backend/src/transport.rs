//! Transport-Schicht der Sprach-Backends
//!
//! Eine Backend-Verbindung ist ein Duplex-Kanal aus Text- und Binaer-Frames.
//! `Verbinder` oeffnet ihn, `NachrichtenSender` und `NachrichtenEmpfaenger`
//! sind die beiden Haelften. Produktiv ist das ein WebSocket
//! (`WsVerbinder`), in Tests ein Kanal-Paar (`speicher::SpeicherVerbinder`).

use async_trait::async_trait;
use bytes::Bytes;
use coachline_core::{CoachlineError, Result};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// Ein Frame auf dem Backend-Kanal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsNachricht {
    Text(String),
    Binaer(Bytes),
}

/// Sende-Haelfte einer Backend-Verbindung
#[async_trait]
pub trait NachrichtenSender: Send + 'static {
    async fn senden(&mut self, nachricht: WsNachricht) -> Result<()>;

    /// Schliesst die Verbindung geordnet
    async fn schliessen(&mut self) -> Result<()>;
}

/// Empfangs-Haelfte einer Backend-Verbindung
#[async_trait]
pub trait NachrichtenEmpfaenger: Send + 'static {
    /// Naechster Daten-Frame; `None` wenn die Gegenseite geschlossen hat
    ///
    /// Muss abbruchsicher sein (wird in `select!` verwendet).
    async fn empfangen(&mut self) -> Option<Result<WsNachricht>>;
}

/// Beide Haelften einer geoeffneten Verbindung
pub type Kanal = (Box<dyn NachrichtenSender>, Box<dyn NachrichtenEmpfaenger>);

/// Oeffnet Backend-Verbindungen
#[async_trait]
pub trait Verbinder: Send + Sync + 'static {
    async fn verbinden(&self, uri: &str) -> Result<Kanal>;
}

// ---------------------------------------------------------------------------
// WebSocket
// ---------------------------------------------------------------------------

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket-Verbinder mit optionalem API-Schluessel (`Authorization: Token ...`)
pub struct WsVerbinder {
    api_schluessel: Option<String>,
}

impl WsVerbinder {
    pub fn neu(api_schluessel: Option<String>) -> Self {
        Self { api_schluessel }
    }
}

impl std::fmt::Debug for WsVerbinder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsVerbinder")
            .field(
                "api_schluessel",
                &self.api_schluessel.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

#[async_trait]
impl Verbinder for WsVerbinder {
    async fn verbinden(&self, uri: &str) -> Result<Kanal> {
        let mut anfrage = uri
            .into_client_request()
            .map_err(|e| CoachlineError::Konfiguration(format!("Ungueltige URI '{uri}': {e}")))?;

        if let Some(ref schluessel) = self.api_schluessel {
            let wert = HeaderValue::from_str(&format!("Token {schluessel}")).map_err(|_| {
                CoachlineError::Konfiguration("API-Schluessel enthaelt ungueltige Zeichen".into())
            })?;
            anfrage.headers_mut().insert(AUTHORIZATION, wert);
        }

        let (stream, antwort) = connect_async(anfrage)
            .await
            .map_err(|e| CoachlineError::Verbindung(format!("WebSocket-Verbindung: {e}")))?;
        tracing::debug!(status = %antwort.status(), "WebSocket geoeffnet");

        let (sink, stream) = stream.split();
        Ok((Box::new(WsSender(sink)), Box::new(WsEmpfaenger(stream))))
    }
}

struct WsSender(SplitSink<WsStream, WsMessage>);

#[async_trait]
impl NachrichtenSender for WsSender {
    async fn senden(&mut self, nachricht: WsNachricht) -> Result<()> {
        let msg = match nachricht {
            WsNachricht::Text(text) => WsMessage::Text(text.into()),
            WsNachricht::Binaer(daten) => WsMessage::Binary(daten),
        };
        self.0
            .send(msg)
            .await
            .map_err(|e| CoachlineError::Verbindung(format!("Senden fehlgeschlagen: {e}")))
    }

    async fn schliessen(&mut self) -> Result<()> {
        self.0
            .close()
            .await
            .map_err(|e| CoachlineError::Verbindung(format!("Schliessen fehlgeschlagen: {e}")))
    }
}

struct WsEmpfaenger(SplitStream<WsStream>);

#[async_trait]
impl NachrichtenEmpfaenger for WsEmpfaenger {
    async fn empfangen(&mut self) -> Option<Result<WsNachricht>> {
        loop {
            match self.0.next().await? {
                Ok(WsMessage::Text(text)) => return Some(Ok(WsNachricht::Text(text.to_string()))),
                Ok(WsMessage::Binary(daten)) => return Some(Ok(WsNachricht::Binaer(daten))),
                Ok(WsMessage::Close(rahmen)) => {
                    tracing::debug!(?rahmen, "Gegenseite hat geschlossen");
                    return None;
                }
                // Ping/Pong beantwortet tungstenite selbst
                Ok(_) => continue,
                Err(e) => {
                    return Some(Err(CoachlineError::Verbindung(format!(
                        "Empfang fehlgeschlagen: {e}"
                    ))))
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Speicher-Transport
// ---------------------------------------------------------------------------

/// Kanal-basierter Transport ohne Netzwerk
///
/// Jeder Verbindungsaufbau erzeugt eine `SpeicherGegenstelle`, ueber die ein
/// Test die Rolle des Backends uebernimmt.
pub mod speicher {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    pub struct SpeicherVerbinder {
        gegenstellen: mpsc::UnboundedSender<SpeicherGegenstelle>,
        fehlschlaege: AtomicU32,
        uris: Mutex<Vec<String>>,
    }

    impl SpeicherVerbinder {
        pub fn neu() -> (Arc<Self>, mpsc::UnboundedReceiver<SpeicherGegenstelle>) {
            let (tx, rx) = mpsc::unbounded_channel();
            let verbinder = Arc::new(Self {
                gegenstellen: tx,
                fehlschlaege: AtomicU32::new(0),
                uris: Mutex::new(Vec::new()),
            });
            (verbinder, rx)
        }

        /// Die naechsten `anzahl` Verbindungsversuche schlagen fehl
        pub fn naechste_fehlschlagen(&self, anzahl: u32) {
            self.fehlschlaege.store(anzahl, Ordering::SeqCst);
        }

        /// Alle bisher angefragten URIs (auch fehlgeschlagene)
        pub fn uris(&self) -> Vec<String> {
            self.uris.lock().clone()
        }
    }

    #[async_trait]
    impl Verbinder for SpeicherVerbinder {
        async fn verbinden(&self, uri: &str) -> Result<Kanal> {
            self.uris.lock().push(uri.to_string());

            let fehlschlagen = self
                .fehlschlaege
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if fehlschlagen {
                return Err(CoachlineError::Verbindung("Verbindung abgelehnt".into()));
            }

            let (zum_backend_tx, zum_backend_rx) = mpsc::unbounded_channel();
            let (zum_client_tx, zum_client_rx) = mpsc::unbounded_channel();
            let gegenstelle = SpeicherGegenstelle {
                uri: uri.to_string(),
                vom_client: zum_backend_rx,
                zum_client: zum_client_tx,
            };
            self.gegenstellen
                .send(gegenstelle)
                .map_err(|_| CoachlineError::Verbindung("Keine Gegenstelle".into()))?;

            Ok((
                Box::new(SpeicherSender(Some(zum_backend_tx))),
                Box::new(SpeicherEmpfaenger(zum_client_rx)),
            ))
        }
    }

    /// Backend-Seite einer Speicher-Verbindung
    ///
    /// Wird sie fallen gelassen, sieht der Client ein unerwartetes Schliessen.
    pub struct SpeicherGegenstelle {
        pub uri: String,
        pub vom_client: mpsc::UnboundedReceiver<WsNachricht>,
        pub zum_client: mpsc::UnboundedSender<WsNachricht>,
    }

    impl SpeicherGegenstelle {
        pub async fn naechste(&mut self) -> Option<WsNachricht> {
            self.vom_client.recv().await
        }

        /// Naechster Text-Frame, Binaer-Frames werden uebersprungen
        pub async fn naechster_text(&mut self) -> Option<String> {
            loop {
                match self.vom_client.recv().await? {
                    WsNachricht::Text(text) => return Some(text),
                    WsNachricht::Binaer(_) => continue,
                }
            }
        }

        /// Alle bereits eingetroffenen Frames ohne zu warten
        pub fn eingegangen(&mut self) -> Vec<WsNachricht> {
            let mut alle = Vec::new();
            while let Ok(n) = self.vom_client.try_recv() {
                alle.push(n);
            }
            alle
        }

        pub fn text_senden(&self, text: impl Into<String>) -> bool {
            self.zum_client.send(WsNachricht::Text(text.into())).is_ok()
        }

        pub fn binaer_senden(&self, daten: Bytes) -> bool {
            self.zum_client.send(WsNachricht::Binaer(daten)).is_ok()
        }
    }

    struct SpeicherSender(Option<mpsc::UnboundedSender<WsNachricht>>);

    #[async_trait]
    impl NachrichtenSender for SpeicherSender {
        async fn senden(&mut self, nachricht: WsNachricht) -> Result<()> {
            match self.0 {
                Some(ref tx) => tx
                    .send(nachricht)
                    .map_err(|_| CoachlineError::Verbindung("Gegenstelle geschlossen".into())),
                None => Err(CoachlineError::Verbindung("Bereits geschlossen".into())),
            }
        }

        async fn schliessen(&mut self) -> Result<()> {
            self.0.take();
            Ok(())
        }
    }

    struct SpeicherEmpfaenger(mpsc::UnboundedReceiver<WsNachricht>);

    #[async_trait]
    impl NachrichtenEmpfaenger for SpeicherEmpfaenger {
        async fn empfangen(&mut self) -> Option<Result<WsNachricht>> {
            self.0.recv().await.map(Ok)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::speicher::SpeicherVerbinder;
    use super::*;

    #[tokio::test]
    async fn speicher_verbindung_in_beide_richtungen() {
        let (verbinder, mut gegenstellen) = SpeicherVerbinder::neu();
        let (mut tx, mut rx) = verbinder.verbinden("mem://backend").await.unwrap();
        let mut gegenstelle = gegenstellen.recv().await.unwrap();
        assert_eq!(gegenstelle.uri, "mem://backend");

        tx.senden(WsNachricht::Text("hallo".into())).await.unwrap();
        assert_eq!(gegenstelle.naechster_text().await.as_deref(), Some("hallo"));

        gegenstelle.binaer_senden(Bytes::from_static(&[1, 2]));
        let empfangen = rx.empfangen().await.unwrap().unwrap();
        assert_eq!(empfangen, WsNachricht::Binaer(Bytes::from_static(&[1, 2])));

        drop(gegenstelle);
        assert!(rx.empfangen().await.is_none());
    }

    #[tokio::test]
    async fn speicher_fehlschlaege_werden_verbraucht() {
        let (verbinder, _gegenstellen) = SpeicherVerbinder::neu();
        verbinder.naechste_fehlschlagen(2);

        assert!(verbinder.verbinden("mem://a").await.is_err());
        assert!(verbinder.verbinden("mem://a").await.is_err());
        assert!(verbinder.verbinden("mem://a").await.is_ok());
        assert_eq!(verbinder.uris().len(), 3);
    }

    #[tokio::test]
    async fn ws_verbinder_lehnt_ungueltige_uri_ab() {
        let verbinder = WsVerbinder::neu(None);
        let ergebnis = verbinder.verbinden("kein uri").await;
        assert!(matches!(ergebnis, Err(CoachlineError::Konfiguration(_))));
    }

    #[test]
    fn ws_verbinder_debug_verbirgt_schluessel() {
        let verbinder = WsVerbinder::neu(Some("geheim".into()));
        let ausgabe = format!("{verbinder:?}");
        assert!(!ausgabe.contains("geheim"));
    }
}
