// WiFi station transport
//
// The station serves a websocket on port 8765 and pushes one JSON text frame
// per reading. The client may send the literal text frame "refresh" to ask
// for an immediate reading; nothing else is ever sent upstream.

use super::{Channel, ChannelFeed, ControlFrame, Medium, Transport, TransportKind, REFRESH_FRAME};
use crate::error::{TransportError, TransportResult};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async, tungstenite, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};

/// Upper bound for the close handshake once the channel is cancelled
const CLOSE_GRACE: Duration = Duration::from_millis(100);

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct WebSocketTransport {
    kind: TransportKind,
    url: String,
}

impl WebSocketTransport {
    pub fn new(host: String, port: u16) -> Self {
        let url = format!("ws://{}:{}", host, port);
        Self {
            kind: TransportKind::WiFi { host, port },
            url,
        }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    fn kind(&self) -> &TransportKind {
        &self.kind
    }

    async fn open(&self) -> TransportResult<Channel> {
        log::info!("Connecting to WebSocket: {}", self.url);

        let (socket, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| map_connect_error(&self.url, e))?;

        log::info!("WebSocket connected: {}", self.url);

        Ok(Channel::spawn(Medium::WiFi, move |feed| pump(socket, feed)))
    }
}

fn map_connect_error(url: &str, error: tungstenite::Error) -> TransportError {
    match error {
        tungstenite::Error::Io(e) => match e.kind() {
            std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::HostUnreachable
            | std::io::ErrorKind::NetworkUnreachable
            | std::io::ErrorKind::NotFound => {
                TransportError::Unreachable(format!("{}: {}", url, e))
            }
            std::io::ErrorKind::PermissionDenied => {
                TransportError::PermissionDenied(format!("{}: {}", url, e))
            }
            _ => TransportError::Open(format!("{}: {}", url, e)),
        },
        other => TransportError::Open(format!("{}: {}", url, other)),
    }
}

async fn pump(socket: Socket, mut feed: ChannelFeed) {
    let (mut write, mut read) = socket.split();

    loop {
        tokio::select! {
            biased;

            _ = feed.cancel.cancelled() => {
                let _ = tokio::time::timeout(CLOSE_GRACE, write.send(Message::Close(None))).await;
                break;
            }

            Some(frame) = feed.control.recv() => match frame {
                ControlFrame::Refresh => {
                    log::debug!("Requesting out-of-cycle reading");
                    if let Err(e) = write.send(Message::text(REFRESH_FRAME)).await {
                        feed.fail(TransportError::Read(format!("refresh send failed: {}", e)))
                            .await;
                        break;
                    }
                }
            },

            message = read.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    if !feed.deliver(Bytes::copy_from_slice(text.as_bytes())).await {
                        break;
                    }
                }
                Some(Ok(Message::Binary(_))) => {
                    log::warn!("Ignoring binary WebSocket frame");
                }
                Some(Ok(Message::Close(_))) | None => {
                    log::info!("WebSocket closed by station");
                    feed.fail(TransportError::Read("connection closed by station".to_string()))
                        .await;
                    break;
                }
                Some(Ok(_)) => {
                    // Ping/pong are answered by tungstenite
                }
                Some(Err(e)) => {
                    log::error!("WebSocket error: {}", e);
                    feed.fail(TransportError::Read(e.to_string())).await;
                    break;
                }
            },
        }
    }

    log::info!("WebSocket reader stopped");
}
