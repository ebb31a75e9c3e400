mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{STEP, open_session, spawn_client, wait_until};
use socket_events::{ClientConfig, ConnectionState, ReconnectPolicy, Value, WsEventError};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn request_resolves_with_the_ack_payload() {
    let (client, mut server) = spawn_client(ClientConfig::default());
    let mut conn = open_session(&client, &mut server, "abc").await;

    let requester = client.clone();
    let pending = tokio::spawn(async move {
        requester
            .request("sum", vec![1, 2], Some(Duration::from_secs(5)))
            .await
    });

    let sent = conn.recv_message(STEP).await.expect("client message");
    assert_eq!(sent.event, "sum");
    assert_eq!(sent.payload, Value::from(vec![1, 2]));
    let id = sent.correlation_id.expect("ack id");
    conn.send_ack(id, "sum", 3).expect("ack");

    let value = pending.await.expect("join").expect("ack value");
    assert_eq!(value, Value::from(3));
    assert_eq!(client.pending_acks(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn duplicate_responses_resolve_once_but_still_dispatch() {
    let (client, mut server) = spawn_client(ClientConfig::default());
    let mut conn = open_session(&client, &mut server, "abc").await;

    let acked = Arc::new(AtomicUsize::new(0));
    let dispatched = Arc::new(AtomicUsize::new(0));
    let ack_counter = acked.clone();
    let listener_counter = dispatched.clone();
    client.on("order", move |_| {
        listener_counter.fetch_add(1, Ordering::SeqCst);
    });
    client
        .emit_with_ack("order", "buy", None, move |outcome| {
            assert!(outcome.is_ok());
            ack_counter.fetch_add(1, Ordering::SeqCst);
        })
        .await
        .expect("emit");

    let id = conn
        .recv_message(STEP)
        .await
        .and_then(|m| m.correlation_id)
        .expect("ack id");
    conn.send_ack(id, "order", "filled").expect("ack");
    conn.send_ack(id, "order", "filled again").expect("duplicate ack");

    wait_until(STEP, "both responses dispatched", || {
        dispatched.load(Ordering::SeqCst) == 2
    })
    .await;
    assert_eq!(acked.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unanswered_ack_times_out_once() {
    let (client, mut server) = spawn_client(ClientConfig::default());
    let mut conn = open_session(&client, &mut server, "abc").await;

    let outcomes = Arc::new(Mutex::new(Vec::new()));
    let sink = outcomes.clone();
    client
        .emit_with_ack("ignored", Value::Null, Some(Duration::from_millis(100)), move |o| {
            sink.lock().unwrap().push(o)
        })
        .await
        .expect("emit");
    let id = conn
        .recv_message(STEP)
        .await
        .and_then(|m| m.correlation_id)
        .expect("ack id");

    tokio::time::sleep(Duration::from_millis(300)).await;
    conn.send_ack(id, "ignored", "too late").expect("late ack");
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(
        *outcomes.lock().unwrap(),
        vec![Err(WsEventError::AckTimeout { id })]
    );
    assert_eq!(client.state(), ConnectionState::Open);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn connection_loss_fails_acks_and_ids_are_never_reused() {
    let config = ClientConfig {
        reconnect: ReconnectPolicy::fixed(Duration::from_millis(10), 3),
        ..ClientConfig::default()
    };
    let (client, mut server) = spawn_client(config);
    let mut conn = open_session(&client, &mut server, "first").await;

    let outcomes = Arc::new(Mutex::new(Vec::new()));
    let sink = outcomes.clone();
    client
        .emit_with_ack("a", 1, None, move |o| sink.lock().unwrap().push(o))
        .await
        .expect("emit");
    let first_id = conn
        .recv_message(STEP)
        .await
        .and_then(|m| m.correlation_id)
        .expect("first id");

    conn.drop_socket();
    let mut second = server.accept_timeout(STEP).await.expect("reconnect");
    second.send_handshake("second").expect("handshake");
    client
        .wait_for_state(ConnectionState::Open, STEP)
        .await
        .expect("reopened");

    assert!(matches!(
        outcomes.lock().unwrap().as_slice(),
        [Err(WsEventError::TransportUnavailable(_))]
    ));

    client
        .emit_with_ack("b", 2, None, |_| {})
        .await
        .expect("emit after reconnect");
    let second_id = second
        .recv_message(STEP)
        .await
        .and_then(|m| m.correlation_id)
        .expect("second id");
    assert!(second_id > first_id);
}
