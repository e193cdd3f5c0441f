use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use jpaserver::{AppConfig, AppState, build_app};
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

async fn start_server() -> (String, tokio::sync::oneshot::Sender<()>, JoinHandle<()>) {
    let mut cfg = AppConfig::default();
    cfg.subscriptions.poll_interval_ms = 50;
    let app = build_app(AppState::new(cfg));

    // Bind to an ephemeral port
    let listener = tokio::net::TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0))
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();

    let server = tokio::spawn(async move {
        let _ = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = rx.await;
            })
            .await;
    });

    (format!("127.0.0.1:{}", addr.port()), tx, server)
}

async fn next_text<S>(socket: &mut S) -> String
where
    S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    let message = tokio::time::timeout(Duration::from_secs(5), socket.next())
        .await
        .expect("frame in time")
        .expect("open socket")
        .expect("valid frame");
    match message {
        Message::Text(text) => text,
        other => panic!("expected text frame, got {other:?}"),
    }
}

#[tokio::test]
async fn server_endpoints_work() {
    let (host, shutdown_tx, handle) = start_server().await;
    let client = reqwest::Client::new();
    let base = format!("http://{host}");
    let fhir_base = format!("{base}/fhir");

    let resp = client.get(format!("{base}/health")).send().await.unwrap();
    assert!(resp.status().is_success());
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");

    // Create
    let resp = client
        .post(format!("{fhir_base}/Patient"))
        .json(&json!({
            "resourceType": "Patient",
            "name": [{"family": "Smith", "given": ["Anna"]}],
            "gender": "female",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    assert!(resp.headers().contains_key("location"));
    let created: Value = resp.json().await.unwrap();
    let id = created["id"].as_str().unwrap().to_string();
    assert_eq!(created["meta"]["versionId"], "1");

    // Update to a known id creates it
    let resp = client
        .put(format!("{fhir_base}/Patient/p2"))
        .json(&json!({
            "resourceType": "Patient",
            "id": "p2",
            "name": [{"family": "Jones"}],
            "gender": "male",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);

    // Read
    let resp = client
        .get(format!("{fhir_base}/Patient/{id}"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(
        resp.headers()["content-type"].to_str().unwrap(),
        "application/fhir+json"
    );

    // Search
    let resp = client
        .get(format!("{fhir_base}/Patient?name=smi"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let bundle: Value = resp.json().await.unwrap();
    assert_eq!(bundle["resourceType"], "Bundle");
    assert_eq!(bundle["total"], 1);
    assert_eq!(bundle["entry"][0]["resource"]["id"], id.as_str());

    let bundle: Value = client
        .get(format!("{fhir_base}/Patient?gender:not=female"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(bundle["total"], 1);
    assert_eq!(bundle["entry"][0]["resource"]["id"], "p2");

    // Unknown search parameter
    let resp = client
        .get(format!("{fhir_base}/Patient?shoe-size=9"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let outcome: Value = resp.json().await.unwrap();
    assert_eq!(outcome["resourceType"], "OperationOutcome");

    // Mismatched body type
    let resp = client
        .post(format!("{fhir_base}/Patient"))
        .json(&json!({"resourceType": "Observation"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    // Delete, then read is gone
    let resp = client
        .delete(format!("{fhir_base}/Patient/{id}"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 204);
    let resp = client
        .get(format!("{fhir_base}/Patient/{id}"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 410);
    let resp = client
        .get(format!("{fhir_base}/Patient/missing"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let _ = shutdown_tx.send(());
    let _ = handle.await;
}

#[tokio::test]
async fn subscription_requires_valid_criteria() {
    let (host, shutdown_tx, handle) = start_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("http://{host}/fhir/Subscription"))
        .json(&json!({
            "resourceType": "Subscription",
            "status": "active",
            "criteria": "Patient",
            "channel": {"type": "websocket"},
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = client
        .post(format!("http://{host}/fhir/Subscription"))
        .json(&json!({
            "resourceType": "Subscription",
            "status": "active",
            "criteria": "Patient?name=Smith",
            "channel": {"type": "websocket"},
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);

    let _ = shutdown_tx.send(());
    let _ = handle.await;
}

#[tokio::test]
async fn subscription_update_is_validated() {
    let (host, shutdown_tx, handle) = start_server().await;
    let client = reqwest::Client::new();
    let url = format!("http://{host}/fhir/Subscription/s1");

    let resp = client
        .put(&url)
        .json(&json!({
            "resourceType": "Subscription",
            "id": "s1",
            "status": "active",
            "criteria": "Spaceship?x=1",
            "channel": {"type": "websocket"},
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let outcome: Value = resp.json().await.unwrap();
    assert_eq!(outcome["resourceType"], "OperationOutcome");

    let resp = client
        .put(&url)
        .json(&json!({
            "resourceType": "Subscription",
            "id": "s1",
            "status": "active",
            "criteria": "Patient?name=Smith",
            "channel": {"type": "rest-hook"},
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    // Nothing was stored by the rejected writes
    let resp = client.get(&url).send().await.unwrap();
    assert_eq!(resp.status(), 404);

    let resp = client
        .put(&url)
        .json(&json!({
            "resourceType": "Subscription",
            "id": "s1",
            "status": "active",
            "criteria": "Patient?name=Smith",
            "channel": {"type": "websocket"},
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let stored: Value = resp.json().await.unwrap();
    assert_eq!(stored["criteria"], "Patient?name=Smith");

    let _ = shutdown_tx.send(());
    let _ = handle.await;
}

#[tokio::test]
async fn websocket_dynamic_bind_delivers_matches() {
    let (host, shutdown_tx, handle) = start_server().await;
    let client = reqwest::Client::new();

    let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{host}/websocket"))
        .await
        .expect("connect");
    socket
        .send(Message::Text("bind Patient?name=Smith".into()))
        .await
        .unwrap();
    let bound = next_text(&mut socket).await;
    let sub_id = bound.strip_prefix("bound ").expect("bound frame").to_string();

    let created: Value = client
        .post(format!("http://{host}/fhir/Patient"))
        .json(&json!({"resourceType": "Patient", "name": [{"family": "Smith"}]}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let frame = next_text(&mut socket).await;
    let (header, body) = frame.split_once('\n').expect("add frame");
    assert_eq!(header, format!("add {sub_id}"));
    let delivered: Value = serde_json::from_str(body).unwrap();
    assert_eq!(delivered["id"], created["id"]);

    socket
        .send(Message::Text("hello".into()))
        .await
        .unwrap();
    assert_eq!(
        next_text(&mut socket).await,
        "Unexpected client message: hello"
    );

    let _ = socket.close(None).await;
    let _ = shutdown_tx.send(());
    let _ = handle.await;
}

#[tokio::test]
async fn websocket_unknown_subscription_is_closed() {
    let (host, shutdown_tx, handle) = start_server().await;

    let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{host}/websocket"))
        .await
        .expect("connect");
    socket
        .send(Message::Text("bind Subscription/123".into()))
        .await
        .unwrap();

    let message = tokio::time::timeout(Duration::from_secs(5), socket.next())
        .await
        .expect("frame in time")
        .expect("open socket")
        .expect("valid frame");
    let Message::Close(Some(frame)) = message else {
        panic!("expected close frame, got {message:?}");
    };
    assert_eq!(u16::from(frame.code), 1002);
    assert_eq!(
        frame.reason,
        "Invalid bind request - Unknown subscription: Subscription/123"
    );

    drop(socket);
    let _ = shutdown_tx.send(());
    let _ = handle.await;
}
