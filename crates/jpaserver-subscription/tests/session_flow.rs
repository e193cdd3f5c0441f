//! Bind, poll and close flows against the in-memory subscription DAO.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use jpaserver_core::IdType;
use jpaserver_search::{ResourceDao, SearchConfig, SearchParamRegistry};
use jpaserver_subscription::{
    CloseStatus, InMemorySubscriptionDao, SessionState, SubscriptionDao, SubscriptionError,
    SubscriptionSession, Transport, TransportWriteError, spawn_poller,
};
use parking_lot::Mutex;
use serde_json::{Value, json};

#[derive(Debug, Clone, PartialEq)]
enum Frame {
    Text(String),
    Close(CloseStatus),
}

#[derive(Default)]
struct RecordingTransport {
    frames: Mutex<Vec<Frame>>,
}

impl RecordingTransport {
    fn frames(&self) -> Vec<Frame> {
        self.frames.lock().clone()
    }

    fn texts(&self) -> Vec<String> {
        self.frames()
            .into_iter()
            .filter_map(|f| match f {
                Frame::Text(t) => Some(t),
                Frame::Close(_) => None,
            })
            .collect()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send_text(&self, text: String) -> Result<(), TransportWriteError> {
        self.frames.lock().push(Frame::Text(text));
        Ok(())
    }

    async fn close(&self, status: CloseStatus) -> Result<(), TransportWriteError> {
        self.frames.lock().push(Frame::Close(status));
        Ok(())
    }
}

struct Fixture {
    dao: Arc<InMemorySubscriptionDao>,
    transport: Arc<RecordingTransport>,
    session: Arc<SubscriptionSession>,
}

impl Fixture {
    fn new() -> Self {
        let resources = ResourceDao::new(
            Arc::new(SearchParamRegistry::with_defaults()),
            SearchConfig::default(),
        );
        let dao = Arc::new(InMemorySubscriptionDao::new(Arc::new(resources)));
        let transport = Arc::new(RecordingTransport::default());
        let session = Arc::new(SubscriptionSession::new(dao.clone(), transport.clone()));
        Self {
            dao,
            transport,
            session,
        }
    }

    /// Store a resource and notify subscriptions, as the REST layer does.
    async fn write(&self, resource: Value) -> Value {
        let stored = self.dao.resources().create(resource).expect("create");
        self.dao
            .resource_changed(&stored.resource)
            .await
            .expect("notify");
        stored.resource
    }

    async fn existing_subscription(&self, criteria: &str) -> String {
        let subscription = self
            .write(json!({
                "resourceType": "Subscription",
                "status": "active",
                "criteria": criteria,
                "channel": {"type": "websocket"},
            }))
            .await;
        subscription["id"].as_str().expect("id").to_string()
    }
}

fn patient(family: &str) -> Value {
    json!({"resourceType": "Patient", "name": [{"family": family}]})
}

fn bound_id(frame: &str) -> &str {
    frame.strip_prefix("bound ").expect("bound frame")
}

#[tokio::test]
async fn static_bind_pings_on_changes() {
    let fx = Fixture::new();
    let id = fx.existing_subscription("Patient?name=Smith").await;

    fx.session
        .handle_text_message(&format!("bind Subscription/{id}"))
        .await
        .expect("bind");
    assert_eq!(fx.transport.texts(), vec![format!("bound {id}")]);
    assert!(matches!(*fx.session.state(), SessionState::BoundStatic(_)));

    fx.write(patient("Smith")).await;
    fx.write(patient("Smith")).await;
    assert_eq!(fx.session.poll_once().await.expect("poll"), 2);
    // One ping per poll regardless of how many resources matched
    assert_eq!(fx.transport.texts()[1..], [format!("ping {id}")]);

    assert_eq!(fx.session.poll_once().await.expect("poll"), 0);
    assert_eq!(fx.transport.texts().len(), 2);
}

#[tokio::test]
async fn static_bind_accepts_bare_id() {
    let fx = Fixture::new();
    let id = fx.existing_subscription("Patient?gender=male").await;

    fx.session
        .handle_text_message(&format!("bind {id}"))
        .await
        .expect("bind");
    assert_eq!(fx.transport.texts(), vec![format!("bound {id}")]);
}

#[tokio::test]
async fn unknown_subscription_closes_with_protocol_error() {
    let fx = Fixture::new();
    fx.session
        .handle_text_message("bind Subscription/123")
        .await
        .expect("bind");

    assert_eq!(
        fx.transport.frames(),
        vec![Frame::Close(CloseStatus {
            code: 1002,
            reason: "Invalid bind request - Unknown subscription: Subscription/123".into(),
        })]
    );
    assert_eq!(*fx.session.state(), SessionState::Initial);
}

#[tokio::test]
async fn dynamic_bind_streams_matching_resources_in_order() {
    let fx = Fixture::new();
    fx.session
        .handle_text_message("bind Patient?name=Smith")
        .await
        .expect("bind");

    let texts = fx.transport.texts();
    assert_eq!(texts.len(), 1);
    let sub_id = bound_id(&texts[0]).to_string();
    let SessionState::BoundDynamic { binding, .. } = &*fx.session.state() else {
        panic!("expected dynamic binding");
    };
    assert_eq!(binding.id_part(), sub_id);

    let first = fx.write(patient("Smith")).await;
    fx.write(patient("Jones")).await;
    let second = fx.write(patient("Smithers")).await;

    assert_eq!(fx.session.poll_once().await.expect("poll"), 2);
    let texts = fx.transport.texts();
    assert_eq!(texts.len(), 3);
    for (frame, expected) in texts[1..].iter().zip([&first, &second]) {
        let (header, body) = frame.split_once('\n').expect("add frame");
        assert_eq!(header, format!("add {sub_id}"));
        let decoded: Value = serde_json::from_str(body).expect("json body");
        assert_eq!(decoded["id"], expected["id"]);
    }
}

#[tokio::test]
async fn dynamic_bind_honours_format() {
    let fx = Fixture::new();
    fx.session
        .handle_text_message("bind Patient?name=Smith&_format=xml")
        .await
        .expect("bind");
    let first = fx.write(patient("Smith")).await;
    let second = fx.write(patient("Smithers")).await;
    fx.session.poll_once().await.expect("poll");

    let texts = fx.transport.texts();
    assert_eq!(texts.len(), 3);
    for (text, expected) in texts[1..].iter().zip([&first, &second]) {
        let (_, body) = text.split_once('\n').expect("add frame");
        assert_eq!(root_element(body), "Patient", "{body}");
        assert!(body.contains("http://hl7.org/fhir"));
        let id = expected["id"].as_str().expect("id");
        assert!(body.contains(&format!(r#"<id value="{id}"/>"#)), "{body}");
    }
}

/// Reads a whole XML document and returns the name of its root element.
fn root_element(xml: &str) -> String {
    use quick_xml::Reader;
    use quick_xml::events::Event;

    let mut reader = Reader::from_str(xml);
    let mut root = None;
    loop {
        match reader.read_event().expect("well-formed xml") {
            Event::Start(e) | Event::Empty(e) if root.is_none() => {
                root = Some(String::from_utf8_lossy(e.name().as_ref()).into_owned());
            }
            Event::Eof => break,
            _ => {}
        }
    }
    root.expect("root element")
}

#[tokio::test]
async fn dynamic_bind_validation_failure_closes() {
    let fx = Fixture::new();
    fx.session
        .handle_text_message("bind Patient?shoe-size=9")
        .await
        .expect("bind");

    let frames = fx.transport.frames();
    assert_eq!(frames.len(), 1);
    let Frame::Close(status) = &frames[0] else {
        panic!("expected close");
    };
    assert_eq!(status.code, 1002);
    assert!(
        status
            .reason
            .starts_with("Invalid bind request - Invalid Subscription.criteria"),
        "{}",
        status.reason
    );
    assert_eq!(fx.dao.row_count(), 0);
}

#[tokio::test]
async fn bound_session_rejects_further_messages() {
    let fx = Fixture::new();
    fx.session
        .handle_text_message("bind Patient?name=Smith")
        .await
        .expect("bind");
    fx.session
        .handle_text_message("bind Patient?name=Jones")
        .await
        .expect("message");

    assert_eq!(
        fx.transport.texts()[1],
        "Unexpected client message: bind Patient?name=Jones"
    );
    assert_eq!(fx.dao.row_count(), 1);
}

#[tokio::test]
async fn close_deletes_only_dynamic_subscriptions() {
    let fx = Fixture::new();
    let static_id = fx.existing_subscription("Patient?name=Smith").await;
    fx.session
        .handle_text_message(&format!("bind {static_id}"))
        .await
        .expect("bind");
    fx.session.close().await;
    assert!(
        fx.dao
            .read(&IdType::new("Subscription", static_id.as_str()))
            .await
            .is_ok()
    );

    let dynamic = Fixture::new();
    dynamic
        .session
        .handle_text_message("bind Patient?name=Smith")
        .await
        .expect("bind");
    let sub_id = bound_id(&dynamic.transport.texts()[0]).to_string();
    dynamic.session.close().await;
    dynamic.session.close().await;
    assert!(matches!(
        dynamic.dao.read(&IdType::new("Subscription", sub_id)).await,
        Err(SubscriptionError::UnknownSubscription(_))
    ));
    assert_eq!(dynamic.dao.row_count(), 0);

    // A closed session stays bound and ignores further traffic
    assert!(matches!(
        *dynamic.session.state(),
        SessionState::BoundDynamic { .. }
    ));
    assert_eq!(dynamic.session.poll_once().await.expect("poll"), 0);
}

#[tokio::test(start_paused = true)]
async fn poller_delivers_on_schedule() {
    let fx = Fixture::new();
    fx.session
        .handle_text_message("bind Patient?name=Smith")
        .await
        .expect("bind");

    let poller = spawn_poller(
        &tokio::runtime::Handle::current(),
        fx.session.clone(),
        Duration::from_secs(1),
    );

    fx.write(patient("Smith")).await;
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(fx.transport.texts().len(), 1, "nothing before the first tick");

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(fx.transport.texts().len(), 2);

    fx.write(patient("Smithson")).await;
    fx.write(patient("Smythe")).await;
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(fx.transport.texts().len(), 3);

    poller.cancel();
    fx.write(patient("Smith")).await;
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(fx.transport.texts().len(), 3);
}
