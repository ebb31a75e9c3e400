mod common;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use common::{STEP, open_session};
use socket_events::testing::MockTransport;
use socket_events::{
    ClientArgs, ClientConfig, InMemoryMessageStore, MessageStore, OutgoingEnvelope,
    ReconnectPolicy, WsEventClient, WsEventError,
};

fn spawn_with_store(
    replay: bool,
    reconnect: ReconnectPolicy,
) -> (
    common::TestClient,
    socket_events::testing::MockServer,
    Arc<InMemoryMessageStore>,
) {
    let store = Arc::new(InMemoryMessageStore::new(16));
    let (transport, server) = MockTransport::channel_pair();
    let config = ClientConfig {
        replay_stored_on_connect: replay,
        reconnect,
        ..ClientConfig::default()
    };
    let client = WsEventClient::spawn(
        ClientArgs::new(transport)
            .with_config(config)
            .with_store(store.clone()),
    );
    (client, server, store)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn offline_emits_are_replayed_without_acks_on_connect() {
    let (client, mut server, store) = spawn_with_store(true, ReconnectPolicy::none());

    assert_eq!(
        client.emit("draft", "hello").await,
        Err(WsEventError::NotConnected)
    );
    let err = client
        .emit_with_ack("save", 7i64, Some(Duration::from_secs(1)), |_| {})
        .await
        .unwrap_err();
    assert_eq!(err, WsEventError::NotConnected);
    assert_eq!(store.len(), 2);

    let mut conn = open_session(&client, &mut server, "abc").await;
    let first = conn.recv_message(STEP).await.expect("first replayed");
    let second = conn.recv_message(STEP).await.expect("second replayed");
    assert_eq!(first.event, "draft");
    assert_eq!(second.event, "save");
    assert_eq!(second.correlation_id, None);

    common::wait_until(STEP, "store cleared", || store.is_empty()).await;
    assert_eq!(client.pending_acks(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stored_envelopes_stay_put_when_replay_is_off() {
    let (client, mut server, store) = spawn_with_store(false, ReconnectPolicy::none());

    let envelope = OutgoingEnvelope::new("note", "offline")
        .with_metadata(BTreeMap::from([("k".to_string(), "v".to_string())]));
    assert!(client.emit_envelope(envelope).await.is_err());

    let mut conn = open_session(&client, &mut server, "abc").await;
    client.emit("live", 1i64).await.expect("live emit");

    let sent = conn.recv_message(STEP).await.expect("live message");
    assert_eq!(sent.event, "live");
    assert_eq!(conn.recv_message(Duration::from_millis(100)).await, None);

    let pending = store.retrieve_pending();
    let events: Vec<&str> = pending.iter().map(|e| e.event()).collect();
    assert_eq!(events, vec!["note"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn delivered_emits_are_not_replayed_after_reconnect() {
    let (client, mut server, store) =
        spawn_with_store(true, ReconnectPolicy::fixed(Duration::from_millis(10), 3));

    let mut first = open_session(&client, &mut server, "first").await;
    client.emit("order", 1i64).await.expect("online emit");
    let sent = first.recv_message(STEP).await.expect("delivered");
    assert_eq!(sent.event, "order");
    assert!(store.is_empty());

    first.drop_socket();
    let mut second = server.accept_timeout(STEP).await.expect("reconnect");
    second.send_handshake("second").expect("handshake");
    common::wait_until(STEP, "second session", || {
        client.connection_id().as_deref() == Some("second")
    })
    .await;

    assert_eq!(second.recv_message(Duration::from_millis(100)).await, None);
    assert!(store.is_empty());
}
