//! Registry against a real local WebSocket server.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use pulse_core::{ConnectionConfig, ConnectionStatus};
use pulse_sockets::{ConnectionRegistry, NoopHandler, WsConnector};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;

const TIMEOUT: Duration = Duration::from_secs(5);

/// What the test server saw from one client.
#[derive(Debug)]
enum ServerEvent {
    Accepted { protocols: Option<String> },
    Text(String),
    Closed,
}

/// How the test server treats each accepted client.
#[derive(Clone, Copy)]
enum Mode {
    /// Greet with an `nginx_stats` frame, then echo text frames back as
    /// `{"type":"echo","data":...}`.
    Echo,
    /// Greet, then close the socket immediately.
    GreetAndClose,
}

async fn boot_server(mode: Mode) -> (String, mpsc::UnboundedReceiver<ServerEvent>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (events_tx, events_rx) = mpsc::unbounded_channel();

    drop(tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let events = events_tx.clone();
            drop(tokio::spawn(serve_client(stream, mode, events)));
        }
    }));

    (format!("ws://{addr}/api/lara-sock"), events_rx)
}

async fn serve_client(
    stream: tokio::net::TcpStream,
    mode: Mode,
    events: mpsc::UnboundedSender<ServerEvent>,
) {
    let offered = Arc::new(Mutex::new(None::<String>));
    let seen = Arc::clone(&offered);
    let callback = move |req: &Request, mut resp: Response| -> Result<Response, ErrorResponse> {
        if let Some(value) = req.headers().get(SEC_WEBSOCKET_PROTOCOL) {
            let header = value.to_str().unwrap_or_default().to_owned();
            let first = header.split(',').next().unwrap_or_default().trim().to_owned();
            let _ = resp
                .headers_mut()
                .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_str(&first).unwrap());
            *seen.lock() = Some(header);
        }
        Ok(resp)
    };
    let Ok(mut ws) = tokio_tungstenite::accept_hdr_async(stream, callback).await else {
        return;
    };
    let protocols = offered.lock().clone();
    let _ = events.send(ServerEvent::Accepted { protocols });

    let greeting = json!({"type": "nginx_stats", "stats": {"totalVisits": 42}}).to_string();
    if ws.send(Message::Text(greeting.into())).await.is_err() {
        return;
    }
    if matches!(mode, Mode::GreetAndClose) {
        let _ = ws.close(None).await;
        return;
    }

    while let Some(Ok(message)) = ws.next().await {
        match message {
            Message::Text(text) => {
                let _ = events.send(ServerEvent::Text(text.as_str().to_owned()));
                let echo = json!({"type": "echo", "data": text.as_str()}).to_string();
                if ws.send(Message::Text(echo.into())).await.is_err() {
                    break;
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
    let _ = events.send(ServerEvent::Closed);
}

async fn wait_for_status(
    statuses: &mut broadcast::Receiver<pulse_core::ConnectionSnapshot>,
    id: &str,
    wanted: ConnectionStatus,
) {
    timeout(TIMEOUT, async {
        loop {
            let snap = statuses.recv().await.unwrap();
            if snap.id == id && snap.status == wanted {
                return;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {id} to become {wanted}"));
}

async fn next_server_event(events: &mut mpsc::UnboundedReceiver<ServerEvent>) -> ServerEvent {
    timeout(TIMEOUT, events.recv()).await.unwrap().unwrap()
}

#[tokio::test]
async fn routes_greeting_and_echo() {
    let (url, mut server) = boot_server(Mode::Echo).await;
    let registry = ConnectionRegistry::new(WsConnector::new(), NoopHandler);
    let mut stats = registry.subscribe("main", "nginx_stats");
    let mut echoes = registry.subscribe("main", "echo");
    let mut statuses = registry.subscribe_status();

    registry.configure([ConnectionConfig::new("main", url)]);
    wait_for_status(&mut statuses, "main", ConnectionStatus::Open).await;

    let greeting = timeout(TIMEOUT, stats.recv()).await.unwrap().unwrap();
    assert_eq!(greeting.connection_id, "main");
    assert_eq!(greeting.payload, json!({"stats": {"totalVisits": 42}}));

    assert!(registry.send("main", r#"{"type":"ping","data":"test"}"#));
    let echo = timeout(TIMEOUT, echoes.recv()).await.unwrap().unwrap();
    let data: Value = serde_json::from_str(echo.field("data").unwrap().as_str().unwrap()).unwrap();
    assert_eq!(data["type"], "ping");

    assert!(matches!(next_server_event(&mut server).await, ServerEvent::Accepted { protocols: None }));
    assert!(matches!(next_server_event(&mut server).await, ServerEvent::Text(t) if t.contains("ping")));
}

#[tokio::test]
async fn disconnect_closes_socket_without_retry() {
    let (url, mut server) = boot_server(Mode::Echo).await;
    let registry = ConnectionRegistry::new(WsConnector::new(), NoopHandler);
    let mut statuses = registry.subscribe_status();

    registry.configure([ConnectionConfig::new("main", url)
        .with_reconnect_interval(Duration::from_millis(50))]);
    wait_for_status(&mut statuses, "main", ConnectionStatus::Open).await;
    assert!(matches!(next_server_event(&mut server).await, ServerEvent::Accepted { .. }));

    registry.disconnect("main");
    wait_for_status(&mut statuses, "main", ConnectionStatus::Closed).await;
    assert!(matches!(next_server_event(&mut server).await, ServerEvent::Closed));

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(registry.get("main").unwrap().status, ConnectionStatus::Closed);
    assert!(!registry.reconnect_pending("main"));
    assert!(server.try_recv().is_err());
}

#[tokio::test]
async fn server_close_triggers_retry_until_disconnect() {
    let (url, mut server) = boot_server(Mode::GreetAndClose).await;
    let registry = ConnectionRegistry::new(WsConnector::new(), NoopHandler);

    registry.configure([ConnectionConfig::new("main", url)
        .with_reconnect_interval(Duration::from_millis(50))
        .with_max_reconnect_attempts(2)]);

    // Every successful open resets the counter, so a server that keeps
    // accepting and closing keeps getting retried.
    for _ in 0..4 {
        assert!(matches!(next_server_event(&mut server).await, ServerEvent::Accepted { .. }));
    }

    registry.disconnect("main");
    tokio::time::sleep(Duration::from_millis(300)).await;
    while server.try_recv().is_ok() {}
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(server.try_recv().is_err());
    assert_eq!(registry.get("main").unwrap().status, ConnectionStatus::Closed);
}

#[tokio::test]
async fn offers_configured_protocols() {
    let (url, mut server) = boot_server(Mode::Echo).await;
    let registry = ConnectionRegistry::new(WsConnector::new(), NoopHandler);
    let mut statuses = registry.subscribe_status();

    registry.configure([ConnectionConfig::new("main", url).with_protocols(["pulse.v1", "json"])]);
    wait_for_status(&mut statuses, "main", ConnectionStatus::Open).await;

    match next_server_event(&mut server).await {
        ServerEvent::Accepted { protocols } => {
            assert_eq!(protocols.as_deref(), Some("pulse.v1, json"));
        }
        other => panic!("unexpected server event {other:?}"),
    }
}

#[tokio::test]
async fn refused_connection_records_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let registry = ConnectionRegistry::new(WsConnector::new(), NoopHandler);
    let mut statuses = registry.subscribe_status();
    registry.configure([ConnectionConfig::new("main", format!("ws://{addr}/sock"))
        .with_max_reconnect_attempts(0)]);
    wait_for_status(&mut statuses, "main", ConnectionStatus::Closed).await;

    let snap = registry.get("main").unwrap();
    assert!(snap.last_error.unwrap().contains("failed to connect"));
    assert_eq!(snap.reconnect_attempts, 0);
}
