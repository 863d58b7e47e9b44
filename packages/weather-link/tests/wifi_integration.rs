// End-to-end tests against an in-process websocket station

use futures_util::{SinkExt, StreamExt};
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;
use weather_link::transport::WebSocketTransport;
use weather_link::{
    ConnectionManager, ConnectionState, LinkConfig, LinkError, LinkEvent, Subscription, Transport,
    TransportError, TransportKind,
};

const TEARDOWN: Duration = Duration::from_millis(200);

const FIRST_FRAME: &str =
    r#"{"temperature": 22.5, "humidity": 48.0, "pressure": 1011.0, "timestamp": "2024-05-01 12:00:00"}"#;
const REFRESH_FRAME: &str = r#"{"temperature": 22.6, "humidity": 49.0, "pressure": 1011.2}"#;

enum Station {
    /// Answer every "refresh" with a fresh frame
    Responsive,
    /// Hang up right after the first frame
    HangUp,
    /// Accept the handshake, then never send anything
    Silent,
}

async fn spawn_station(behavior: Station) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        if !matches!(behavior, Station::Silent) {
            ws.send(Message::text(FIRST_FRAME)).await.unwrap();
        }

        if let Station::HangUp = behavior {
            ws.close(None).await.ok();
            return;
        }

        while let Some(Ok(message)) = ws.next().await {
            match message {
                Message::Text(text) if text.as_str() == "refresh" => {
                    if ws.send(Message::text(REFRESH_FRAME)).await.is_err() {
                        break;
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    port
}

fn wifi(port: u16) -> TransportKind {
    TransportKind::WiFi {
        host: "127.0.0.1".to_string(),
        port,
    }
}

async fn next_reading(sub: &mut Subscription) -> weather_link::Reading {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(2), sub.recv())
            .await
            .expect("timed out waiting for reading")
            .expect("subscription closed");
        if let LinkEvent::Reading(reading) = event {
            return reading;
        }
    }
}

#[tokio::test]
async fn test_wifi_stream_and_refresh() {
    let port = spawn_station(Station::Responsive).await;
    let manager = ConnectionManager::new(LinkConfig::default());
    let mut sub = manager.subscribe();

    manager.connect(wifi(port)).await.unwrap();
    assert_eq!(manager.current_state(), ConnectionState::Connected);

    let first = next_reading(&mut sub).await;
    assert_eq!(first.humidity(), 48.0);
    assert_eq!(first.observed_at().to_rfc3339(), "2024-05-01T12:00:00+00:00");

    assert!(manager.refresh_now().unwrap());
    let refreshed = next_reading(&mut sub).await;
    assert_eq!(refreshed.humidity(), 49.0);

    manager.disconnect().await.unwrap();
    assert_eq!(manager.current_state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_wifi_station_hangup_fails_connection() {
    let port = spawn_station(Station::HangUp).await;
    let manager = ConnectionManager::new(LinkConfig::default());
    let mut sub = manager.subscribe();

    manager.connect(wifi(port)).await.unwrap();

    loop {
        let event = tokio::time::timeout(Duration::from_secs(2), sub.recv())
            .await
            .unwrap()
            .unwrap();
        if let LinkEvent::StateChanged(ConnectionState::Failed { reason }) = event {
            assert!(reason.starts_with("Read failed"), "reason: {}", reason);
            break;
        }
    }
    assert_eq!(manager.recent_readings().len(), 1);
}

#[tokio::test]
async fn test_wifi_refused_connection() {
    // Grab a free port, then close it again
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let manager = ConnectionManager::new(LinkConfig::default());
    let err = manager.connect(wifi(port)).await.unwrap_err();

    assert!(matches!(
        err,
        LinkError::Transport(TransportError::Unreachable(_))
    ));
    assert!(manager.current_state().is_failed());
}

#[tokio::test]
async fn test_wifi_disconnect_unblocks_idle_reader_within_teardown() {
    let port = spawn_station(Station::Silent).await;
    let config = LinkConfig {
        teardown_timeout_ms: TEARDOWN.as_millis() as u64,
        ..LinkConfig::default()
    };
    let manager = ConnectionManager::new(config);

    manager.connect(wifi(port)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(manager.current_state(), ConnectionState::Connected);

    let started = Instant::now();
    manager.disconnect().await.unwrap();

    assert!(started.elapsed() < TEARDOWN, "took {:?}", started.elapsed());
    assert_eq!(manager.current_state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_idle_wifi_channel_closes_within_teardown() {
    let port = spawn_station(Station::Silent).await;
    let transport = WebSocketTransport::new("127.0.0.1".to_string(), port);
    let mut channel = transport.open().await.unwrap();

    let started = Instant::now();
    // Ok means the reader honored cancellation instead of being aborted
    channel.close(TEARDOWN).await.unwrap();
    assert!(started.elapsed() < TEARDOWN);
}
