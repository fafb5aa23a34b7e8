mod common;

use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;

use common::{button, fast_policy, page, registry, Accepted, DuplexConnector, FakeRenderer};
use uisync::identity::Identity;
use uisync::model::{Observable, Value};
use uisync::patch::Mirror;
use uisync::protocol::Message;
use uisync::pubsub::Hub;
use uisync::session::{Session, SessionError, SessionOptions};
use uisync::transport::{ReconnectingTransport, TransportError};

struct Harness {
    session: Session<DuplexConnector>,
    connector: DuplexConnector,
    accepted: Accepted,
    button: Observable,
}

fn options() -> SessionOptions {
    SessionOptions {
        method_timeout: Duration::from_secs(2),
        resync_on_reconnect: true,
    }
}

fn harness(options: SessionOptions) -> Harness {
    let root = page("home");
    let button = button("ok", 0);
    root.list("controls").unwrap().push(&button).unwrap();

    let (connector, accepted) = DuplexConnector::pair();
    let transport = ReconnectingTransport::new(connector.clone(), fast_policy(), 1 << 20);
    Harness {
        session: Session::new(root, transport, options),
        connector,
        accepted,
        button,
    }
}

/// Accepts the next connection and checks it opens with `Register` and a
/// full patch of the root.
async fn accept_synced(h: &mut Harness) -> FakeRenderer {
    let mut renderer = h.accepted.accept().await;
    match renderer.recv().await {
        Message::Register { session_id } => assert_eq!(session_id, h.session.id()),
        other => panic!("expected register, got {}", other.kind()),
    }
    let doc = renderer.recv_patch().await;
    assert_eq!(doc.root.type_name.as_deref(), Some("Page"));
    assert!(renderer.mirror.root().unwrap().structural_eq(h.session.root()));
    renderer
}

async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..400 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached within 2s");
}

fn identity(h: &Harness, obj: &Observable) -> Identity {
    h.session.index().identity_of(obj).unwrap()
}

#[tokio::test]
async fn test_connect_registers_and_sends_full_state() {
    let mut h = harness(options());
    h.session.start().unwrap();
    let renderer = accept_synced(&mut h).await;
    let remote = renderer.mirror.resolve(identity(&h, &h.button)).unwrap();
    assert_eq!(remote.get("text").unwrap(), Value::Text("ok".into()));
}

#[tokio::test]
async fn test_update_sends_only_changes() {
    let mut h = harness(options());
    h.session.start().unwrap();
    let mut renderer = accept_synced(&mut h).await;

    h.button.set_field("count", 3).unwrap();
    h.session
        .root()
        .list("controls")
        .unwrap()
        .push(button("new", 1))
        .unwrap();
    assert_eq!(h.session.update().await.unwrap(), 2);

    let doc = renderer.recv_patch().await;
    assert!(doc.root.type_name.is_none());
    assert_eq!(doc.op_count(), 2);
    assert!(renderer.mirror.root().unwrap().structural_eq(h.session.root()));

    assert_eq!(h.session.update().await.unwrap(), 0);
    assert!(renderer.is_quiet(Duration::from_millis(50)).await);
}

#[tokio::test]
async fn test_removed_controls_are_forgotten() {
    let mut h = harness(options());
    h.session.start().unwrap();
    let mut renderer = accept_synced(&mut h).await;
    let id = identity(&h, &h.button);

    h.session.root().list("controls").unwrap().clear().unwrap();
    h.session.update().await.unwrap();
    let doc = renderer.recv_patch().await;
    assert_eq!(doc.disposed, vec![id]);
    assert!(h.session.index().resolve(id).is_none());
    assert!(renderer.mirror.resolve(id).is_none());

    // Events for a disposed control are dropped.
    assert!(!h.session.dispatch_event(id, "click", json!(null)));
}

#[tokio::test]
async fn test_events_reach_handlers() {
    let mut h = harness(options());
    let (tx, mut rx) = mpsc::unbounded_channel();
    h.button.on_event("click", move |event| {
        let count = event.target.get("count").unwrap().as_int().unwrap();
        event.target.set_field("count", count + 1).unwrap();
        let _ = tx.send(event.payload.clone());
    });
    h.session.start().unwrap();
    let mut renderer = accept_synced(&mut h).await;
    let target = identity(&h, &h.button);

    // Unknown targets are dropped without disturbing later events.
    renderer
        .send(&Message::Event {
            target: Identity::new(999, 3),
            name: "click".into(),
            payload: json!({}),
        })
        .await;
    renderer
        .send(&Message::Event {
            target,
            name: "click".into(),
            payload: json!({"x": 4}),
        })
        .await;

    let payload = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(payload, json!({"x": 4}));
    assert_eq!(h.button.get("count").unwrap(), Value::Int(1));

    // The handler's mutation goes out with the next update.
    assert_eq!(h.session.update().await.unwrap(), 1);
    renderer.recv_patch().await;
    let remote = renderer.mirror.resolve(target).unwrap();
    assert_eq!(remote.get("count").unwrap(), Value::Int(1));
}

#[tokio::test]
async fn test_panicking_handler_reports_crash() {
    let mut h = harness(options());
    h.button.on_event("click", |_| panic!("boom"));
    h.session.start().unwrap();
    let mut renderer = accept_synced(&mut h).await;
    let target = identity(&h, &h.button);

    renderer
        .send(&Message::Event {
            target,
            name: "click".into(),
            payload: json!(null),
        })
        .await;
    match renderer.recv().await {
        Message::SessionCrashed { message } => assert!(message.contains("boom"), "{message}"),
        other => panic!("expected crash report, got {}", other.kind()),
    }
    assert!(!h.session.is_closed());
}

#[tokio::test]
async fn test_renderer_props_are_applied_without_echo() {
    let mut h = harness(options());
    h.session.start().unwrap();
    let mut renderer = accept_synced(&mut h).await;
    let target = identity(&h, &h.button);

    let props = BTreeMap::from([
        ("text".to_string(), json!("typed")),
        ("enabled".to_string(), json!(true)),
        ("count".to_string(), json!("not a number")),
        ("missing".to_string(), json!(1)),
    ]);
    renderer
        .send(&Message::UpdateProps {
            target,
            props: props.clone(),
        })
        .await;

    let button = h.button.clone();
    eventually(move || button.get("text").unwrap() == Value::Text("typed".into())).await;
    assert_eq!(h.button.get("enabled").unwrap(), Value::Bool(true));
    assert_eq!(h.button.get("count").unwrap(), Value::Int(0));

    assert_eq!(h.session.update().await.unwrap(), 0);
    assert!(renderer.is_quiet(Duration::from_millis(50)).await);

    // Applying the same edits directly reports how many were accepted.
    assert_eq!(h.session.apply_props(target, &props), 2);
}

#[tokio::test]
async fn test_method_call_round_trip() {
    let mut h = harness(options());
    h.session.start().unwrap();
    let mut renderer = accept_synced(&mut h).await;
    let target = identity(&h, &h.button);

    let session = h.session.clone();
    let call = tokio::spawn(async move {
        session
            .invoke_method(target, "measure", json!({"unit": "px"}), None)
            .await
    });
    let seq = match renderer.recv().await {
        Message::MethodCall {
            seq,
            target: called,
            name,
            args,
        } => {
            assert_eq!(called, target);
            assert_eq!(name, "measure");
            assert_eq!(args, json!({"unit": "px"}));
            seq
        }
        other => panic!("expected method call, got {}", other.kind()),
    };
    renderer
        .send(&Message::MethodResult {
            seq,
            result: json!({"width": 120}),
            error: None,
        })
        .await;
    assert_eq!(call.await.unwrap().unwrap(), json!({"width": 120}));

    let session = h.session.clone();
    let failing = tokio::spawn(async move {
        session
            .invoke_method(target, "focus", json!([]), None)
            .await
    });
    let Message::MethodCall { seq, .. } = renderer.recv().await else {
        panic!("expected method call");
    };
    renderer
        .send(&Message::MethodResult {
            seq,
            result: json!(null),
            error: Some("not focusable".into()),
        })
        .await;
    match failing.await.unwrap() {
        Err(SessionError::Remote(message)) => assert_eq!(message, "not focusable"),
        other => panic!("unexpected outcome {other:?}"),
    }
}

#[tokio::test]
async fn test_method_call_times_out_and_late_result_is_dropped() {
    let mut h = harness(options());
    h.session.start().unwrap();
    let mut renderer = accept_synced(&mut h).await;
    let target = identity(&h, &h.button);

    let outcome = h
        .session
        .invoke_method(target, "slow", json!(null), Some(Duration::from_millis(50)))
        .await;
    match outcome {
        Err(SessionError::Timeout { method, timeout }) => {
            assert_eq!(method, "slow");
            assert_eq!(timeout, Duration::from_millis(50));
        }
        other => panic!("unexpected outcome {other:?}"),
    }

    let Message::MethodCall { seq, .. } = renderer.recv().await else {
        panic!("expected method call");
    };
    renderer
        .send(&Message::MethodResult {
            seq,
            result: json!("late"),
            error: None,
        })
        .await;
    // The session keeps working after the stray result.
    h.button.set_field("text", "still alive").unwrap();
    assert_eq!(h.session.update().await.unwrap(), 1);
    renderer.recv_patch().await;
}

#[tokio::test]
async fn test_close_fails_pending_calls_and_leaves_hubs() {
    let mut h = harness(options());
    let hub: Hub<String> = Hub::new();
    let client = h.session.pubsub(&hub);
    client.subscribe(|_msg| {});
    client.subscribe_topic("news", |_topic, _msg| {});
    assert_eq!(hub.session_count(), 1);

    h.session.start().unwrap();
    let mut renderer = accept_synced(&mut h).await;
    let target = identity(&h, &h.button);

    let session = h.session.clone();
    let call = tokio::spawn(async move {
        session
            .invoke_method(target, "wait", json!(null), Some(Duration::from_secs(30)))
            .await
    });
    assert!(matches!(renderer.recv().await, Message::MethodCall { .. }));

    h.session.close();
    assert!(matches!(call.await.unwrap(), Err(SessionError::ConnectionClosed)));
    assert!(h.session.is_closed());
    assert_eq!(hub.session_count(), 0);
    assert_eq!(hub.topic_subscriber_count("news"), 0);

    assert!(matches!(
        h.session.invoke_method(target, "again", json!(null), None).await,
        Err(SessionError::ConnectionClosed)
    ));
    h.button.set_field("count", 5).unwrap();
    assert!(matches!(
        h.session.update().await,
        Err(SessionError::Transport(TransportError::Closed))
    ));
}

#[tokio::test]
async fn test_reconnect_resyncs_and_drops_stale_patches() {
    let mut h = harness(options());
    h.session.start().unwrap();
    let first = accept_synced(&mut h).await;

    h.connector.set_refusing(true);
    drop(first);
    tokio::time::sleep(Duration::from_millis(20)).await;

    h.button.set_field("text", "while offline").unwrap();
    let session = h.session.clone();
    let update = tokio::spawn(async move { session.update().await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!update.is_finished());

    h.connector.set_refusing(false);
    // A fresh renderer rebuilds everything from the resync alone.
    let mut second = accept_synced(&mut h).await;
    assert_eq!(update.await.unwrap().unwrap(), 1);
    assert!(second.is_quiet(Duration::from_millis(50)).await);

    let remote = second.mirror.resolve(identity(&h, &h.button)).unwrap();
    assert_eq!(remote.get("text").unwrap(), Value::Text("while offline".into()));
}

#[tokio::test]
async fn test_without_resync_queued_patches_survive_reconnect() {
    let mut h = harness(SessionOptions {
        resync_on_reconnect: false,
        ..options()
    });
    h.session.start().unwrap();

    let mut first = h.accepted.accept().await;
    assert!(matches!(first.recv().await, Message::Register { .. }));
    // Title, controls and meta of the root.
    assert_eq!(h.session.update().await.unwrap(), 3);
    first.recv_patch().await;
    let mut mirror: Mirror = std::mem::replace(&mut first.mirror, Mirror::new(registry()));

    h.connector.set_refusing(true);
    drop(first);
    tokio::time::sleep(Duration::from_millis(20)).await;
    h.button.set_field("count", 9).unwrap();
    let session = h.session.clone();
    let update = tokio::spawn(async move { session.update().await });
    tokio::time::sleep(Duration::from_millis(20)).await;

    h.connector.set_refusing(false);
    let mut second = h.accepted.accept().await;
    assert!(matches!(second.recv().await, Message::Register { .. }));
    let Message::Patch(doc) = second.recv().await else {
        panic!("expected the queued patch");
    };
    assert_eq!(update.await.unwrap().unwrap(), 1);

    // The renderer kept its state, so the incremental patch applies on top.
    mirror.apply(&doc);
    assert!(mirror.root().unwrap().structural_eq(h.session.root()));
}

#[tokio::test]
async fn test_sessions_exchange_pubsub_messages() {
    let hub: Hub<String> = Hub::new();
    let a = harness(options());
    let b = harness(options());
    let (tx, mut rx) = mpsc::unbounded_channel();

    let a_client = a.session.pubsub(&hub);
    let b_client = b.session.pubsub(&hub);
    a_client.subscribe(|_msg| panic!("origin must not receive its own message"));
    b_client.subscribe(move |msg| {
        let _ = tx.send(msg);
    });

    assert_eq!(a_client.send_others("hi".to_string()), 1);
    let got = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(got, "hi");

    a.session.close();
    assert_eq!(hub.session_count(), 1);
    drop(b);
    assert_eq!(hub.session_count(), 0);
}

async fn next_name(rx: &mut mpsc::UnboundedReceiver<String>) -> String {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("no lifecycle event")
        .unwrap()
}

#[tokio::test]
async fn test_closing_transport_fails_pending_calls() {
    let mut h = harness(options());
    let hub: Hub<String> = Hub::new();
    let client = h.session.pubsub(&hub);
    client.subscribe(|_msg| {});
    h.session.start().unwrap();
    let mut renderer = accept_synced(&mut h).await;
    let target = identity(&h, &h.button);

    let session = h.session.clone();
    let started = tokio::time::Instant::now();
    let call = tokio::spawn(async move {
        session
            .invoke_method(target, "slow", json!(null), Some(Duration::from_secs(30)))
            .await
    });
    assert!(matches!(renderer.recv().await, Message::MethodCall { .. }));

    h.session.transport().close();
    assert!(matches!(call.await.unwrap(), Err(SessionError::ConnectionClosed)));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(h.session.is_closed());
    assert_eq!(hub.session_count(), 0);
    assert!(matches!(
        h.session.invoke_method(target, "again", json!(null), None).await,
        Err(SessionError::ConnectionClosed)
    ));
}

#[tokio::test]
async fn test_root_sees_connect_disconnect_and_close() {
    let mut h = harness(options());
    let (tx, mut rx) = mpsc::unbounded_channel();
    for name in ["connect", "disconnect", "close"] {
        let tx = tx.clone();
        h.session.root().on_event(name, move |event| {
            let _ = tx.send(event.name.clone());
        });
    }
    h.session.start().unwrap();

    let first = accept_synced(&mut h).await;
    assert_eq!(next_name(&mut rx).await, "connect");
    drop(first);
    let _second = accept_synced(&mut h).await;
    assert_eq!(next_name(&mut rx).await, "disconnect");
    assert_eq!(next_name(&mut rx).await, "connect");

    h.session.close();
    assert_eq!(next_name(&mut rx).await, "close");
    h.session.close();
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_panicking_close_handler_is_contained() {
    let h = harness(options());
    h.session.root().on_event("close", |_| panic!("close failed"));
    h.session.close();
    assert!(h.session.is_closed());
}

#[tokio::test]
async fn test_property_listeners_may_reenter_session() {
    let mut h = harness(options());
    h.session.start().unwrap();
    let _renderer = accept_synced(&mut h).await;
    let target = identity(&h, &h.button);

    let session = h.session.clone();
    let listener = h.button.subscribe(move |_object, field| {
        if field == "text" {
            let enable = BTreeMap::from([("enabled".to_string(), json!(true))]);
            session.apply_props(target, &enable);
        }
    });

    let session = h.session.clone();
    let typed = BTreeMap::from([("text".to_string(), json!("typed"))]);
    let applied = tokio::time::timeout(
        Duration::from_secs(2),
        tokio::task::spawn_blocking(move || session.apply_props(target, &typed)),
    )
    .await
    .expect("apply_props blocked on its own session")
    .unwrap();
    assert_eq!(applied, 1);
    assert_eq!(h.button.get("enabled").unwrap(), Value::Bool(true));

    // Both edits came from the renderer, so nothing is echoed.
    assert_eq!(h.session.update().await.unwrap(), 0);
    assert!(h.button.unsubscribe(&listener));
}
