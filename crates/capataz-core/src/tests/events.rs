//! Category C: Event, channel and broadcast falsification tests (F021-F030).

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{Value, json};

use crate::event::{self, EventData, EventInfo, Handler, handler};
use crate::sink::EventRelay;
use crate::subscription::SubscribeOptions;
use crate::tests::harness::{ECHO, READY_THEN_SLEEP, TestHarness, child};

type Seen = Arc<Mutex<Vec<(String, EventInfo, EventData)>>>;

fn recorder() -> (Seen, Handler) {
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    let h = handler(move |name, info, data| log.lock().push((name.to_string(), info.clone(), data.clone())));
    (seen, h)
}

fn messages(seen: &Seen) -> Vec<(Option<String>, Option<u16>, Value)> {
    seen.lock()
        .iter()
        .filter_map(|(_, info, data)| match data {
            EventData::Message { payload } => Some((info.group.clone(), info.port, payload.clone())),
            _ => None,
        })
        .collect()
}

/// F021: Lifecycle events arrive in order with their origin
#[tokio::test]
async fn f021_ready_then_exit_in_order() {
    let h = TestHarness::new();
    h.prepare("web", READY_THEN_SLEEP);
    let (seen, all) = recorder();
    h.supervisor().on("*", &SubscribeOptions::new().handled(true), all);

    h.supervisor().start(&child("web", 7000)).await.unwrap();
    h.supervisor().stop(&child("web", 7000)).await.unwrap();

    let seen = seen.lock();
    let names: Vec<&str> = seen.iter().map(|(n, _, _)| n.as_str()).collect();
    assert_eq!(names, vec![event::READY, event::EXIT]);
    assert_eq!(seen[0].1, EventInfo::child("web", 7000));
    assert!(matches!(seen[1].2, EventData::Exit { expected: true, .. }));
}

/// F022: A relay verifies the handshake and receives filtered events
#[tokio::test]
async fn f022_relay_receives_events() {
    let h = TestHarness::new();
    h.prepare("web", READY_THEN_SLEEP);
    h.prepare("api", READY_THEN_SLEEP);

    let relay = EventRelay::connect(h.sink().subscribe(), Some(h.supervisor().id()))
        .await
        .unwrap();
    assert_eq!(relay.handshake().id, h.supervisor().id());
    assert_eq!(relay.handshake().version, crate::Supervisor::version());

    let (seen, rec) = recorder();
    relay.on(event::READY, &SubscribeOptions::new().group("web"), rec);

    h.supervisor().start(&child("api", 1)).await.unwrap();
    h.supervisor().start(&child("web", 2)).await.unwrap();
    assert!(h.wait_for(Duration::from_secs(2), || !seen.lock().is_empty()).await);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let seen = seen.lock();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].1, EventInfo::child("web", 2));
    drop(seen);

    h.shutdown().await;
}

/// F023: Messages round-trip over the process channel
#[tokio::test]
async fn f023_send_and_receive_message() {
    let h = TestHarness::new();
    h.prepare("echo", ECHO);
    let (seen, rec) = recorder();
    h.supervisor().on(event::MESSAGE, &SubscribeOptions::new(), rec);

    h.supervisor().start(&child("echo", 1)).await.unwrap();
    h.supervisor()
        .send(&child("echo", 1), &json!({"ping": 1}))
        .unwrap();

    assert!(h.wait_for(Duration::from_secs(2), || !messages(&seen).is_empty()).await);
    assert_eq!(
        messages(&seen),
        vec![(Some("echo".to_string()), Some(1), json!({"ping": 1}))]
    );

    h.shutdown().await;
}

/// F024: A broadcast reaches every other running child across groups
#[tokio::test]
async fn f024_broadcast_skips_origin() {
    let h = TestHarness::new();
    h.prepare("a", ECHO);
    h.prepare("b", ECHO);
    let (seen, rec) = recorder();
    h.supervisor().on(event::MESSAGE, &SubscribeOptions::new(), rec);

    h.supervisor().start(&child("a", 1)).await.unwrap();
    h.supervisor().start(&child("a", 2)).await.unwrap();
    h.supervisor().start(&child("b", 3)).await.unwrap();

    // a:1 echoes the request back, which makes it a broadcast from a:1.
    h.supervisor()
        .send(&child("a", 1), &json!({"type": "broadcast", "event": "reload", "data": 5}))
        .unwrap();

    assert!(h.wait_for(Duration::from_secs(2), || messages(&seen).len() >= 2).await);
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut received = messages(&seen);
    received.sort_by_key(|(_, port, _)| *port);
    assert_eq!(received.len(), 2, "{received:?}");
    for (_, _, payload) in &received {
        assert_eq!(payload["type"], "broadcast");
        assert_eq!(payload["event"], "reload");
        assert_eq!(payload["data"], 5);
        assert_eq!(payload["source"], json!({"group": "a", "port": 1}));
    }
    assert_eq!(received[0].1, Some(2));
    assert_eq!(received[1].1, Some(3));

    h.shutdown().await;
}

/// F025: includeSelf delivers the broadcast to its origin too
#[tokio::test]
async fn f025_broadcast_include_self() {
    let h = TestHarness::new();
    h.prepare("a", ECHO);
    let (seen, rec) = recorder();
    h.supervisor().on(event::MESSAGE, &SubscribeOptions::new(), rec);

    h.supervisor().start(&child("a", 1)).await.unwrap();
    h.supervisor().start(&child("a", 2)).await.unwrap();
    h.supervisor()
        .send(
            &child("a", 1),
            &json!({"type": "broadcast", "event": "reload", "includeSelf": true}),
        )
        .unwrap();

    assert!(h.wait_for(Duration::from_secs(2), || messages(&seen).len() >= 2).await);
    let mut ports: Vec<Option<u16>> = messages(&seen).into_iter().map(|(_, p, _)| p).collect();
    ports.sort_unstable();
    assert_eq!(ports, vec![Some(1), Some(2)]);

    h.shutdown().await;
}

/// F026: Exact subscriptions only match their exact origin
#[tokio::test]
async fn f026_exact_subscription() {
    let h = TestHarness::new();
    h.prepare("web", READY_THEN_SLEEP);
    let (detached, on_detached) = recorder();
    let (exact, on_exact) = recorder();
    h.supervisor()
        .on(event::READY, &SubscribeOptions::new().exact(true), on_detached);
    h.supervisor().on(
        event::READY,
        &SubscribeOptions::new().group("web").port(2_u16).exact(true),
        on_exact,
    );

    h.supervisor().start(&child("web", 1)).await.unwrap();
    h.supervisor().start(&child("web", 2)).await.unwrap();
    assert!(detached.lock().is_empty(), "exact with no origin ignores child events");
    assert_eq!(exact.lock().len(), 1);
    assert_eq!(exact.lock()[0].1.port, Some(2));

    h.supervisor().emit(event::READY, &EventData::None);
    assert_eq!(detached.lock().len(), 1);

    h.shutdown().await;
}

/// F027: Removed listeners receive nothing further
#[tokio::test]
async fn f027_remove_listener() {
    let h = TestHarness::new();
    h.prepare("web", READY_THEN_SLEEP);
    let (seen, rec) = recorder();
    h.supervisor().on(event::READY, &SubscribeOptions::new(), Arc::clone(&rec));
    h.supervisor().on(event::EXIT, &SubscribeOptions::new(), Arc::clone(&rec));

    assert_eq!(h.supervisor().remove_listener(Some(event::READY), None, Some(&rec)), 1);
    h.supervisor().start(&child("web", 1)).await.unwrap();
    assert!(seen.lock().is_empty());

    assert_eq!(h.supervisor().remove_listener(None, None, None), 1);
    h.supervisor().stop(&child("web", 1)).await.unwrap();
    assert!(seen.lock().is_empty());
}

/// F028: A claimed custom event reports handled to the emitter
#[tokio::test]
async fn f028_emit_returns_handled_flag() {
    let h = TestHarness::new();
    assert!(!h.supervisor().emit("custom", &EventData::None).handled);
    h.supervisor().on(
        "custom",
        &SubscribeOptions::new(),
        handler(|_, info, _| info.handled = true),
    );
    assert!(h.supervisor().emit("custom", &EventData::None).handled);
}
