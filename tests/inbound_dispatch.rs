mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{STEP, count, open_session, record_system, spawn_client, wait_until};
use socket_events::{ClientConfig, ConnectionState, MiddlewareAction, SystemEvent, Value, WsEventError};

fn collect(client: &common::TestClient, event: &str) -> Arc<Mutex<Vec<Value>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    client.on(event, move |payload| sink.lock().unwrap().push(payload.clone()));
    seen
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn malformed_packets_are_reported_and_reading_continues() {
    let (client, mut server) = spawn_client(ClientConfig::default());
    let events = record_system(&client);
    let conn = open_session(&client, &mut server, "abc").await;
    let ticks = collect(&client, "tick");

    conn.send_text("4[\"tick\"").expect("truncated");
    conn.send_text("9nope").expect("unknown type");
    conn.send_event("tick", 1i64).expect("event");

    wait_until(STEP, "tick after garbage", || ticks.lock().unwrap().len() == 1).await;
    let decode_errors = events
        .lock()
        .unwrap()
        .iter()
        .filter(|e| {
            matches!(
                e,
                SystemEvent::Error {
                    error: WsEventError::DecodingFailed(_)
                }
            )
        })
        .count();
    assert_eq!(decode_errors, 2);
    assert_eq!(client.state(), ConnectionState::Open);
    assert_eq!(client.stats().await.expect("stats").errors, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn middleware_renames_and_drops_events() {
    let (client, mut server) = spawn_client(ClientConfig::default());
    let events = record_system(&client);
    let conn = open_session(&client, &mut server, "abc").await;

    client.use_middleware(|event, payload| match event.as_str() {
        "legacy" => MiddlewareAction::forward("modern", payload),
        "noise" => MiddlewareAction::Drop,
        _ => MiddlewareAction::Forward { event, payload },
    });
    let modern = collect(&client, "modern");
    let noise = collect(&client, "noise");

    conn.send_event("noise", "hiss").expect("noise");
    conn.send_event("legacy", "old").expect("legacy");

    wait_until(STEP, "renamed event", || modern.lock().unwrap().len() == 1).await;
    assert_eq!(modern.lock().unwrap()[0], Value::from("old"));
    assert!(noise.lock().unwrap().is_empty());
    wait_until(STEP, "drop diagnostic", || count(&events, "error") == 1).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unhandled_events_are_reported_when_enabled() {
    let config = ClientConfig {
        report_unhandled_events: true,
        ..ClientConfig::default()
    };
    let (client, mut server) = spawn_client(config);
    let events = record_system(&client);
    let conn = open_session(&client, &mut server, "abc").await;
    let known = collect(&client, "known");

    conn.send_event("mystery", Value::Null).expect("mystery");
    conn.send_event("known", true).expect("known");

    wait_until(STEP, "known event", || known.lock().unwrap().len() == 1).await;
    assert!(events.lock().unwrap().contains(&SystemEvent::Error {
        error: WsEventError::UnknownEvent("mystery".to_string())
    }));
    assert_eq!(count(&events, "error"), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn once_listeners_and_catch_alls() {
    let (client, mut server) = spawn_client(ClientConfig::default());
    let conn = open_session(&client, &mut server, "abc").await;

    let once = Arc::new(Mutex::new(Vec::new()));
    let sink = once.clone();
    client.once("greet", move |payload| sink.lock().unwrap().push(payload.clone()));
    let all = Arc::new(Mutex::new(Vec::new()));
    let sink = all.clone();
    client.on_any(move |event, _| sink.lock().unwrap().push(event.to_string()));

    conn.send_event("greet", "first").expect("first");
    conn.send_event("greet", "second").expect("second");
    conn.send_event("other", 0i64).expect("other");

    wait_until(STEP, "catch-all", || all.lock().unwrap().len() == 3).await;
    assert_eq!(*once.lock().unwrap(), vec![Value::from("first")]);
    assert_eq!(*all.lock().unwrap(), vec!["greet", "greet", "other"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn panicking_listener_does_not_stop_delivery() {
    let (client, mut server) = spawn_client(ClientConfig::default());
    let events = record_system(&client);
    let conn = open_session(&client, &mut server, "abc").await;

    client.on("boom", |_| panic!("listener exploded"));
    let survivors = collect(&client, "boom");

    conn.send_event("boom", 1i64).expect("boom");
    conn.send_event("boom", 2i64).expect("boom again");

    wait_until(STEP, "both deliveries", || survivors.lock().unwrap().len() == 2).await;
    wait_until(STEP, "panic diagnostics", || count(&events, "error") == 2).await;
    assert_eq!(client.state(), ConnectionState::Open);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn listener_can_reply_through_a_spawned_emit() {
    let (client, mut server) = spawn_client(ClientConfig::default());
    let mut conn = open_session(&client, &mut server, "abc").await;

    let replier = client.clone();
    client.on("question", move |payload| {
        let client = replier.clone();
        let payload = payload.clone();
        tokio::spawn(async move {
            let _ = client.emit("answer", payload).await;
        });
    });

    conn.send_event("question", 42i64).expect("question");
    let answer = conn.recv_message(STEP).await.expect("answer");
    assert_eq!(answer.event, "answer");
    assert_eq!(answer.payload, Value::from(42i64));
    assert_eq!(answer.correlation_id, None);

    // Listeners may also unregister themselves mid-dispatch.
    let handle = Arc::new(Mutex::new(None));
    let slot = handle.clone();
    let remover = client.clone();
    let registered = client.on("bye", move |_| {
        if let Some(h) = slot.lock().unwrap().take() {
            remover.off(h);
        }
    });
    *handle.lock().unwrap() = Some(registered);
    conn.send_event("bye", Value::Null).expect("bye");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(client.remove_all("bye"), 0);
}
