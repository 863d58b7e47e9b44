// Pluggable transports for sensor stations
//
// A `Transport` knows how to open one physical medium. Opening yields a
// `Channel`: a reader task owned by the transport implementation pushes raw
// payloads into a queue, and `Channel::read_next` pulls them out. Closing a
// channel cancels the reader through a `CancellationToken`, so a pending read
// unblocks within the teardown timeout even if the device has gone quiet.
//
// New media are added by:
// 1. Implementing the Transport trait
// 2. Adding a variant to TransportKind
// 3. Adding a match arm in `create_transport`
//
// Current implementations:
// - Bluetooth: GATT characteristic notifications (btleplug)
// - WiFi: websocket push protocol
// - Serial: newline-delimited frames over USB serial (Unix only)

mod bluetooth;
mod websocket;

#[cfg(target_family = "unix")]
mod serial;

use crate::config::LinkConfig;
use crate::error::{TransportError, TransportResult};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub use bluetooth::{BluetoothTransport, ENVIRONMENTAL_SENSING_SERVICE};
pub use websocket::WebSocketTransport;

#[cfg(target_family = "unix")]
pub use serial::SerialTransport;

/// Port the station firmware serves its websocket on
pub const DEFAULT_WIFI_PORT: u16 = 8765;

pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// The only client-to-server message of the WiFi protocol
pub const REFRESH_FRAME: &str = "refresh";

const PAYLOAD_QUEUE_DEPTH: usize = 64;
const CONTROL_QUEUE_DEPTH: usize = 4;

/// Physical medium, which also determines the payload framing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Medium {
    Bluetooth,
    WiFi,
    Serial,
}

impl fmt::Display for Medium {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Medium::Bluetooth => write!(f, "bluetooth"),
            Medium::WiFi => write!(f, "wifi"),
            Medium::Serial => write!(f, "serial"),
        }
    }
}

/// Which medium to use and how to reach the station on it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TransportKind {
    /// Peripheral local name or address
    #[serde(rename = "bluetooth")]
    Bluetooth { device: String },

    #[serde(rename = "wifi")]
    WiFi {
        host: String,
        #[serde(default = "default_wifi_port")]
        port: u16,
    },

    /// Device path, e.g. /dev/ttyUSB0
    #[serde(rename = "serial")]
    Serial {
        path: String,
        #[serde(default = "default_baud_rate")]
        baud_rate: u32,
    },
}

fn default_wifi_port() -> u16 {
    DEFAULT_WIFI_PORT
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

impl TransportKind {
    pub fn medium(&self) -> Medium {
        match self {
            TransportKind::Bluetooth { .. } => Medium::Bluetooth,
            TransportKind::WiFi { .. } => Medium::WiFi,
            TransportKind::Serial { .. } => Medium::Serial,
        }
    }

    /// Human-readable address of the station on its medium
    pub fn target(&self) -> String {
        match self {
            TransportKind::Bluetooth { device } => device.clone(),
            TransportKind::WiFi { host, port } => format!("ws://{}:{}", host, port),
            TransportKind::Serial { path, baud_rate } => format!("{} @ {} baud", path, baud_rate),
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.medium(), self.target())
    }
}

/// One undecoded payload as delivered by a transport
#[derive(Debug, Clone, PartialEq)]
pub struct RawPayload {
    pub medium: Medium,
    pub bytes: Bytes,
    pub received_at: DateTime<Utc>,
}

impl RawPayload {
    pub fn new(medium: Medium, bytes: impl Into<Bytes>) -> Self {
        Self {
            medium,
            bytes: bytes.into(),
            received_at: Utc::now(),
        }
    }
}

/// Requests a channel's reader task can act on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlFrame {
    /// Ask the station for an out-of-cycle reading
    Refresh,
}

/// The reader-task side of a channel
///
/// Reader loops should `select!` on `cancel`, `control` and their own source,
/// and return once `cancel` fires.
pub struct ChannelFeed {
    pub medium: Medium,
    pub cancel: CancellationToken,
    pub control: mpsc::Receiver<ControlFrame>,
    payloads: mpsc::Sender<TransportResult<RawPayload>>,
}

impl ChannelFeed {
    /// Queue a payload for the consumer. Returns false once the channel is
    /// closed or cancelled, at which point the reader should stop.
    pub async fn deliver(&self, bytes: impl Into<Bytes>) -> bool {
        let payload = RawPayload::new(self.medium, bytes);
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            sent = self.payloads.send(Ok(payload)) => sent.is_ok(),
        }
    }

    /// Report a fatal read error. The reader should return afterwards.
    pub async fn fail(&self, error: TransportError) {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {}
            _ = self.payloads.send(Err(error)) => {}
        }
    }
}

/// An open connection to a station
pub struct Channel {
    medium: Medium,
    payloads: mpsc::Receiver<TransportResult<RawPayload>>,
    control: mpsc::Sender<ControlFrame>,
    cancel: CancellationToken,
    reader: JoinHandle<()>,
    closed: bool,
}

impl Channel {
    /// Spawn `reader` as this channel's reader task
    pub fn spawn<F, Fut>(medium: Medium, reader: F) -> Self
    where
        F: FnOnce(ChannelFeed) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (payload_tx, payload_rx) = mpsc::channel(PAYLOAD_QUEUE_DEPTH);
        let (control_tx, control_rx) = mpsc::channel(CONTROL_QUEUE_DEPTH);
        let cancel = CancellationToken::new();

        let feed = ChannelFeed {
            medium,
            cancel: cancel.clone(),
            control: control_rx,
            payloads: payload_tx,
        };

        Self {
            medium,
            payloads: payload_rx,
            control: control_tx,
            cancel,
            reader: tokio::spawn(reader(feed)),
            closed: false,
        }
    }

    pub fn medium(&self) -> Medium {
        self.medium
    }

    /// Wait for the next payload. Cancel-safe.
    ///
    /// Once the reader task has exited and the queue is drained this returns
    /// `TransportError::Closed`.
    pub async fn read_next(&mut self) -> TransportResult<RawPayload> {
        self.payloads.recv().await.unwrap_or(Err(TransportError::Closed))
    }

    pub fn refresh_handle(&self) -> RefreshHandle {
        RefreshHandle {
            control: self.control.clone(),
        }
    }

    /// Cancel the reader task and wait up to `timeout` for it to finish.
    /// A reader that does not honor cancellation in time is aborted.
    pub async fn close(&mut self, timeout: Duration) -> TransportResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.cancel.cancel();
        self.payloads.close();

        match tokio::time::timeout(timeout, &mut self.reader).await {
            Ok(_) => Ok(()),
            Err(_) => {
                log::warn!(
                    "{} reader did not stop within {:?}, aborting",
                    self.medium,
                    timeout
                );
                self.reader.abort();
                Err(TransportError::Timeout(format!(
                    "{} reader did not stop within {:?}",
                    self.medium, timeout
                )))
            }
        }
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Sends control frames to a channel's reader without owning the channel
#[derive(Debug, Clone)]
pub struct RefreshHandle {
    control: mpsc::Sender<ControlFrame>,
}

impl RefreshHandle {
    /// Returns false if the reader is gone or already has refreshes queued
    pub fn request(&self) -> bool {
        self.control.try_send(ControlFrame::Refresh).is_ok()
    }
}

/// Trait for all station transports
#[async_trait]
pub trait Transport: Send + Sync {
    fn kind(&self) -> &TransportKind;

    /// Whether the medium can be asked for an out-of-cycle reading
    fn supports_refresh(&self) -> bool {
        true
    }

    /// Upper bound the manager puts on `open`
    ///
    /// Transports whose open runs several timed stages widen `connect_timeout`
    /// so their own, more specific errors surface first.
    fn open_timeout(&self, connect_timeout: Duration) -> Duration {
        connect_timeout
    }

    /// Establish the connection and start the reader task
    async fn open(&self) -> TransportResult<Channel>;
}

/// Builds transports for the connection manager
pub trait TransportFactory: Send + Sync {
    fn create(&self, kind: &TransportKind) -> TransportResult<Box<dyn Transport>>;
}

/// Factory backed by the real transports
pub struct DefaultTransportFactory {
    config: LinkConfig,
}

impl DefaultTransportFactory {
    pub fn new(config: LinkConfig) -> Self {
        Self { config }
    }
}

impl TransportFactory for DefaultTransportFactory {
    fn create(&self, kind: &TransportKind) -> TransportResult<Box<dyn Transport>> {
        create_transport(kind.clone(), &self.config)
    }
}

/// Factory function to create a Transport from its kind
pub fn create_transport(
    kind: TransportKind,
    config: &LinkConfig,
) -> TransportResult<Box<dyn Transport>> {
    match kind {
        TransportKind::Bluetooth { device } => Ok(Box::new(BluetoothTransport::new(
            device,
            config.ble_characteristic,
            config.ble_scan_timeout(),
            config.connect_timeout(),
        ))),

        TransportKind::WiFi { host, port } => Ok(Box::new(WebSocketTransport::new(host, port))),

        #[cfg(target_family = "unix")]
        TransportKind::Serial { path, baud_rate } => {
            Ok(Box::new(SerialTransport::new(path, baud_rate)))
        }

        #[cfg(not(target_family = "unix"))]
        TransportKind::Serial { .. } => Err(TransportError::Unsupported(
            "serial ports are not supported on this platform".to_string(),
        )),
    }
}

/// A serial device visible to the host
#[derive(Debug, Clone, Serialize)]
pub struct SerialPortSummary {
    pub name: String,
    pub kind: String,
}

#[cfg(target_family = "unix")]
pub use serial::list_serial_ports;

#[cfg(not(target_family = "unix"))]
pub fn list_serial_ports() -> TransportResult<Vec<SerialPortSummary>> {
    Err(TransportError::Unsupported(
        "serial ports are not supported on this platform".to_string(),
    ))
}
