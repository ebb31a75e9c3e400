#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use socket_events::testing::{MockConnection, MockServer, MockTransport};
use socket_events::{
    ClientArgs, ClientConfig, ConnectOptions, ConnectionState, SystemEvent, WsEventClient,
};

pub type TestClient = WsEventClient<MockTransport>;

pub const STEP: Duration = Duration::from_secs(2);

pub fn spawn_client(config: ClientConfig) -> (TestClient, MockServer) {
    let (transport, server) = MockTransport::channel_pair();
    let client = WsEventClient::spawn(ClientArgs::new(transport).with_config(config));
    (client, server)
}

/// Record every system notification delivered to `client`.
pub fn record_system(client: &TestClient) -> Arc<Mutex<Vec<SystemEvent>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    client.on_system_any(move |event| sink.lock().unwrap().push(event.clone()));
    seen
}

pub fn names(events: &Arc<Mutex<Vec<SystemEvent>>>) -> Vec<&'static str> {
    events.lock().unwrap().iter().map(|e| e.name()).collect()
}

pub fn count(events: &Arc<Mutex<Vec<SystemEvent>>>, name: &str) -> usize {
    names(events).into_iter().filter(|n| *n == name).count()
}

/// Connect, accept the transport and complete the handshake.
pub async fn open_session(
    client: &TestClient,
    server: &mut MockServer,
    connection_id: &str,
) -> MockConnection {
    client
        .connect("ws://mock/socket", ConnectOptions::default())
        .await
        .expect("connect");
    let conn = server.accept_timeout(STEP).await.expect("accept");
    conn.send_handshake(connection_id).expect("handshake");
    client
        .wait_for_state(ConnectionState::Open, STEP)
        .await
        .expect("session open");
    conn
}

pub async fn wait_until(timeout: Duration, what: &str, mut check: impl FnMut() -> bool) {
    let deadline = Instant::now() + timeout;
    while !check() {
        if Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
