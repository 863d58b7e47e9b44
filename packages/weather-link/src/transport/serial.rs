// Serial port transport (Unix-only)
//
// Opens a USB serial device (e.g., /dev/ttyUSB0, /dev/ttyACM0) and yields one
// newline-delimited frame at a time. Stations on serial are push-only, so
// refresh requests are ignored.

use super::{Channel, ChannelFeed, Medium, SerialPortSummary, Transport, TransportKind};
use crate::error::{TransportError, TransportResult};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_serial::{SerialPortBuilderExt, SerialStream};

pub struct SerialTransport {
    kind: TransportKind,
    path: String,
    baud_rate: u32,
}

impl SerialTransport {
    pub fn new(path: String, baud_rate: u32) -> Self {
        Self {
            kind: TransportKind::Serial {
                path: path.clone(),
                baud_rate,
            },
            path,
            baud_rate,
        }
    }
}

#[async_trait]
impl Transport for SerialTransport {
    fn kind(&self) -> &TransportKind {
        &self.kind
    }

    fn supports_refresh(&self) -> bool {
        false
    }

    async fn open(&self) -> TransportResult<Channel> {
        log::info!(
            "Opening serial port: {} at {} baud",
            self.path,
            self.baud_rate
        );

        let port = tokio_serial::new(&self.path, self.baud_rate)
            .open_native_async()
            .map_err(|e| map_open_error(&self.path, e))?;

        log::info!("Serial port opened successfully");

        Ok(Channel::spawn(Medium::Serial, move |feed| pump(port, feed)))
    }
}

fn map_open_error(path: &str, error: tokio_serial::Error) -> TransportError {
    use tokio_serial::ErrorKind;

    match error.kind {
        ErrorKind::NoDevice => TransportError::Unreachable(format!("{}: {}", path, error)),
        ErrorKind::Io(std::io::ErrorKind::NotFound) => {
            TransportError::Unreachable(format!("{}: {}", path, error))
        }
        ErrorKind::Io(std::io::ErrorKind::PermissionDenied) => {
            TransportError::PermissionDenied(format!("{}: {}", path, error))
        }
        _ => TransportError::Open(format!("{}: {}", path, error)),
    }
}

async fn pump(port: SerialStream, mut feed: ChannelFeed) {
    let mut frames = BufReader::new(port).split(b'\n');

    loop {
        tokio::select! {
            biased;

            _ = feed.cancel.cancelled() => break,

            Some(_) = feed.control.recv() => {
                log::debug!("Serial stations are push-only, ignoring refresh");
            }

            frame = frames.next_segment() => match frame {
                Ok(Some(mut frame)) => {
                    if frame.last() == Some(&b'\r') {
                        frame.pop();
                    }
                    if frame.iter().all(|b| b.is_ascii_whitespace()) {
                        continue;
                    }
                    if !feed.deliver(frame).await {
                        break;
                    }
                }
                Ok(None) => {
                    log::warn!("Serial port closed unexpectedly");
                    feed.fail(TransportError::Read("serial port closed".to_string())).await;
                    break;
                }
                Err(e) => {
                    log::error!("Serial read error: {}", e);
                    feed.fail(TransportError::Read(e.to_string())).await;
                    break;
                }
            },
        }
    }

    log::info!("Serial reader stopped");
}

/// List the serial devices the host can see
pub fn list_serial_ports() -> TransportResult<Vec<SerialPortSummary>> {
    let ports = tokio_serial::available_ports()
        .map_err(|e| TransportError::Unsupported(format!("cannot enumerate serial ports: {}", e)))?;

    Ok(ports
        .into_iter()
        .map(|port| SerialPortSummary {
            name: port.port_name,
            kind: match port.port_type {
                tokio_serial::SerialPortType::UsbPort(info) => match info.product {
                    Some(product) => format!("usb ({})", product),
                    None => format!("usb {:04x}:{:04x}", info.vid, info.pid),
                },
                tokio_serial::SerialPortType::BluetoothPort => "bluetooth".to_string(),
                tokio_serial::SerialPortType::PciPort => "pci".to_string(),
                tokio_serial::SerialPortType::Unknown => "unknown".to_string(),
            },
        })
        .collect())
}
