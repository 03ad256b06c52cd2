//! Integration-Tests fuer HttpFunktionsAusfuehrer gegen einen lokalen Axum-Server

use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use coachline_backend::{FunktionsAusfuehrer, HttpFunktionsAusfuehrer};
use coachline_core::CoachlineError;
use serde_json::{json, Value};
use std::time::Duration;

async fn server_starten(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let adresse = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{adresse}/funktionen")
}

fn echo_app() -> Router {
    Router::new().route(
        "/funktionen",
        post(|Json(body): Json<Value>| async move { Json(json!({ "empfangen": body })) }),
    )
}

#[tokio::test]
async fn aufruf_sendet_name_und_argumente() {
    let url = server_starten(echo_app()).await;
    let ausfuehrer = HttpFunktionsAusfuehrer::neu(url, Duration::from_secs(5)).unwrap();

    let inhalt = ausfuehrer
        .ausfuehren("termin_suchen", r#"{"tag":"montag"}"#)
        .await
        .unwrap();
    let wert: Value = serde_json::from_str(&inhalt).unwrap();
    assert_eq!(wert["empfangen"]["name"], "termin_suchen");
    assert_eq!(wert["empfangen"]["arguments"]["tag"], "montag");
}

#[tokio::test]
async fn ungueltige_argumente_werden_als_string_gesendet() {
    let url = server_starten(echo_app()).await;
    let ausfuehrer = HttpFunktionsAusfuehrer::neu(url, Duration::from_secs(5)).unwrap();

    let inhalt = ausfuehrer.ausfuehren("notiz", "kein json").await.unwrap();
    let wert: Value = serde_json::from_str(&inhalt).unwrap();
    assert_eq!(wert["empfangen"]["arguments"], "kein json");
}

#[tokio::test]
async fn fehlerstatus_wird_verbindungsfehler() {
    let app = Router::new().route(
        "/funktionen",
        post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "kaputt") }),
    );
    let url = server_starten(app).await;
    let ausfuehrer = HttpFunktionsAusfuehrer::neu(url, Duration::from_secs(5)).unwrap();

    let ergebnis = ausfuehrer.ausfuehren("notiz", "{}").await;
    match ergebnis {
        Err(CoachlineError::Verbindung(detail)) => assert!(detail.contains("500"), "{detail}"),
        anderes => panic!("Erwartet Verbindungsfehler, erhalten {anderes:?}"),
    }
}

#[tokio::test]
async fn langsamer_endpunkt_ueberschreitet_zeitlimit() {
    let app = Router::new().route(
        "/funktionen",
        post(|| async {
            tokio::time::sleep(Duration::from_secs(2)).await;
            "zu spaet"
        }),
    );
    let url = server_starten(app).await;
    let ausfuehrer = HttpFunktionsAusfuehrer::neu(url, Duration::from_millis(100)).unwrap();

    let ergebnis = ausfuehrer.ausfuehren("notiz", "{}").await;
    assert!(matches!(ergebnis, Err(CoachlineError::Zeitlimit(_))));
}
