// Bluetooth LE transport
//
// Scans for the station by local name (or address), connects, and subscribes
// to a notifying characteristic. Each notification is one payload. A refresh
// is served by reading the characteristic directly.

use super::{Channel, ChannelFeed, ControlFrame, Medium, Transport, TransportKind};
use crate::error::{TransportError, TransportResult};
use async_trait::async_trait;
use btleplug::api::{
    CharPropFlags, Central, Characteristic, Manager as _, Peripheral as _, ScanFilter,
    ValueNotification,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures_util::{Stream, StreamExt};
use std::collections::BTreeSet;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use uuid::Uuid;

/// GATT Environmental Sensing service (0x181A)
pub const ENVIRONMENTAL_SENSING_SERVICE: Uuid =
    Uuid::from_u128(0x0000181a_0000_1000_8000_00805f9b34fb);

const SCAN_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Stages of `open` after the scan that each get the connect timeout:
/// connect, service discovery, subscribe
const OPEN_STAGES: u32 = 3;

type Notifications = Pin<Box<dyn Stream<Item = ValueNotification> + Send>>;

pub struct BluetoothTransport {
    kind: TransportKind,
    device: String,
    characteristic: Option<Uuid>,
    scan_timeout: Duration,
    connect_timeout: Duration,
}

impl BluetoothTransport {
    pub fn new(
        device: String,
        characteristic: Option<Uuid>,
        scan_timeout: Duration,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            kind: TransportKind::Bluetooth {
                device: device.clone(),
            },
            device,
            characteristic,
            scan_timeout,
            connect_timeout,
        }
    }

    async fn find_device(&self, adapter: &Adapter) -> TransportResult<Peripheral> {
        let wanted = self.device.to_lowercase();

        let search = async {
            loop {
                let peripherals = adapter.peripherals().await.unwrap_or_default();
                for p in peripherals {
                    let address = p.address().to_string().to_lowercase();
                    if address == wanted {
                        return p;
                    }
                    if let Ok(Some(props)) = p.properties().await {
                        if let Some(name) = &props.local_name {
                            if name.to_lowercase() == wanted {
                                return p;
                            }
                        }
                    }
                }
                tokio::time::sleep(SCAN_POLL_INTERVAL).await;
            }
        };

        tokio::time::timeout(self.scan_timeout, search)
            .await
            .map_err(|_| {
                TransportError::Unreachable(format!(
                    "device {} not found within {:?}",
                    self.device, self.scan_timeout
                ))
            })
    }
}

#[async_trait]
impl Transport for BluetoothTransport {
    fn kind(&self) -> &TransportKind {
        &self.kind
    }

    fn open_timeout(&self, _connect_timeout: Duration) -> Duration {
        self.scan_timeout + self.connect_timeout * OPEN_STAGES
    }

    async fn open(&self) -> TransportResult<Channel> {
        log::info!("Scanning for Bluetooth device: {}", self.device);

        let manager = Manager::new().await.map_err(map_ble_error)?;
        let adapter = manager
            .adapters()
            .await
            .map_err(map_ble_error)?
            .into_iter()
            .next()
            .ok_or_else(|| TransportError::Unsupported("no Bluetooth adapter found".to_string()))?;

        adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(map_ble_error)?;
        let mut scanning = CleanupGuard::new({
            let adapter = adapter.clone();
            async move {
                adapter.stop_scan().await.ok();
            }
        });
        let found = self.find_device(&adapter).await;
        scanning.disarm();
        adapter.stop_scan().await.ok();
        let peripheral = found?;

        // From here on any early return, or `open` being dropped, must not
        // leave the peripheral connected. A timed-out connect may still
        // complete underneath, so it is covered too.
        let mut connected = CleanupGuard::new({
            let peripheral = peripheral.clone();
            async move {
                peripheral.disconnect().await.ok();
            }
        });

        tokio::time::timeout(self.connect_timeout, peripheral.connect())
            .await
            .map_err(|_| TransportError::Timeout(format!("connecting to {}", self.device)))?
            .map_err(map_ble_error)?;

        tokio::time::timeout(self.connect_timeout, peripheral.discover_services())
            .await
            .map_err(|_| TransportError::Timeout(format!("discovering services on {}", self.device)))?
            .map_err(map_ble_error)?;

        let characteristic = select_characteristic(&peripheral.characteristics(), self.characteristic)
            .ok_or_else(|| {
                TransportError::Open(format!(
                    "{} exposes no notifying environmental sensing characteristic",
                    self.device
                ))
            })?;

        let notifications = tokio::time::timeout(self.connect_timeout, async {
            peripheral.subscribe(&characteristic).await?;
            peripheral.notifications().await
        })
        .await
        .map_err(|_| TransportError::Timeout(format!("subscribing on {}", self.device)))?
        .map_err(map_ble_error)?;

        connected.disarm();
        log::info!(
            "Bluetooth connected: {} (characteristic {})",
            self.device,
            characteristic.uuid
        );

        Ok(Channel::spawn(Medium::Bluetooth, move |feed| {
            pump(peripheral, characteristic, notifications, feed)
        }))
    }
}

/// Runs a cleanup future on the runtime when dropped, unless disarmed
struct CleanupGuard {
    cleanup: Option<Pin<Box<dyn Future<Output = ()> + Send>>>,
}

impl CleanupGuard {
    fn new<F>(cleanup: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            cleanup: Some(Box::pin(cleanup)),
        }
    }

    fn disarm(&mut self) {
        self.cleanup = None;
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        let Some(cleanup) = self.cleanup.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(cleanup);
            }
            Err(_) => log::warn!("No runtime to release Bluetooth resources on"),
        }
    }
}

/// Pick the characteristic to stream from
///
/// An explicitly configured UUID wins. Otherwise the first characteristic of
/// the Environmental Sensing service that supports notifications is used.
pub(crate) fn select_characteristic(
    characteristics: &BTreeSet<Characteristic>,
    wanted: Option<Uuid>,
) -> Option<Characteristic> {
    match wanted {
        Some(uuid) => characteristics.iter().find(|c| c.uuid == uuid).cloned(),
        None => characteristics
            .iter()
            .find(|c| {
                c.service_uuid == ENVIRONMENTAL_SENSING_SERVICE
                    && c.properties.contains(CharPropFlags::NOTIFY)
            })
            .cloned(),
    }
}

async fn pump(
    peripheral: Peripheral,
    characteristic: Characteristic,
    mut notifications: Notifications,
    mut feed: ChannelFeed,
) {
    loop {
        tokio::select! {
            biased;

            _ = feed.cancel.cancelled() => break,

            Some(frame) = feed.control.recv() => match frame {
                ControlFrame::Refresh => match peripheral.read(&characteristic).await {
                    Ok(value) => {
                        if !feed.deliver(value).await {
                            break;
                        }
                    }
                    Err(e) => log::warn!("Bluetooth refresh read failed: {}", e),
                },
            },

            notification = notifications.next() => match notification {
                Some(n) if n.uuid == characteristic.uuid => {
                    if !feed.deliver(n.value).await {
                        break;
                    }
                }
                Some(_) => {}
                None => {
                    log::warn!("Bluetooth notification stream ended");
                    feed.fail(TransportError::Read("device disconnected".to_string()))
                        .await;
                    break;
                }
            },
        }
    }

    peripheral.unsubscribe(&characteristic).await.ok();
    peripheral.disconnect().await.ok();
    log::info!("Bluetooth reader stopped");
}

fn map_ble_error(error: btleplug::Error) -> TransportError {
    match error {
        btleplug::Error::PermissionDenied => {
            TransportError::PermissionDenied("Bluetooth access denied".to_string())
        }
        btleplug::Error::DeviceNotFound | btleplug::Error::NotConnected => {
            TransportError::Unreachable(error.to_string())
        }
        btleplug::Error::TimedOut(d) => TransportError::Timeout(format!("after {:?}", d)),
        btleplug::Error::NotSupported(what) => TransportError::Unsupported(what),
        other => TransportError::Open(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn characteristic(uuid: u128, service: Uuid, properties: CharPropFlags) -> Characteristic {
        Characteristic {
            uuid: Uuid::from_u128(uuid),
            service_uuid: service,
            properties,
            descriptors: BTreeSet::new(),
        }
    }

    #[test]
    fn test_select_prefers_configured_uuid() {
        let set: BTreeSet<_> = [
            characteristic(1, ENVIRONMENTAL_SENSING_SERVICE, CharPropFlags::NOTIFY),
            characteristic(2, Uuid::nil(), CharPropFlags::READ),
        ]
        .into_iter()
        .collect();

        let picked = select_characteristic(&set, Some(Uuid::from_u128(2))).unwrap();
        assert_eq!(picked.uuid, Uuid::from_u128(2));
        assert!(select_characteristic(&set, Some(Uuid::from_u128(3))).is_none());
    }

    #[test]
    fn test_select_falls_back_to_notifying_env_sensing() {
        let set: BTreeSet<_> = [
            characteristic(1, ENVIRONMENTAL_SENSING_SERVICE, CharPropFlags::READ),
            characteristic(2, Uuid::nil(), CharPropFlags::NOTIFY),
            characteristic(3, ENVIRONMENTAL_SENSING_SERVICE, CharPropFlags::NOTIFY | CharPropFlags::READ),
        ]
        .into_iter()
        .collect();

        let picked = select_characteristic(&set, None).unwrap();
        assert_eq!(picked.uuid, Uuid::from_u128(3));
    }

    #[test]
    fn test_select_none_without_candidates() {
        let set: BTreeSet<_> = [characteristic(1, Uuid::nil(), CharPropFlags::NOTIFY)]
            .into_iter()
            .collect();
        assert!(select_characteristic(&set, None).is_none());
    }

    #[test]
    fn test_open_budget_covers_scan_and_every_stage() {
        let transport = BluetoothTransport::new(
            "station".to_string(),
            None,
            Duration::from_secs(10),
            Duration::from_secs(10),
        );
        let budget = transport.open_timeout(Duration::from_secs(10));
        assert!(budget >= Duration::from_secs(10) + Duration::from_secs(10) * 2);
        assert_eq!(budget, Duration::from_secs(40));
    }

    #[tokio::test]
    async fn test_cleanup_guard_runs_when_dropped_armed() {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let guard = CleanupGuard::new(async move {
            let _ = tx.send(());
        });
        drop(guard);

        tokio::time::timeout(Duration::from_secs(1), rx)
            .await
            .expect("cleanup did not run")
            .unwrap();
    }

    #[tokio::test]
    async fn test_cleanup_guard_skipped_when_disarmed() {
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let mut guard = CleanupGuard::new(async move {
            let _ = tx.send(());
        });
        guard.disarm();
        drop(guard);

        // The sender is dropped with the discarded cleanup, never sent on
        assert!(rx.await.is_err());
    }

    #[tokio::test]
    async fn test_cleanup_guard_runs_when_enclosing_future_is_dropped() {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let opening = async move {
            let _guard = CleanupGuard::new(async move {
                let _ = tx.send(());
            });
            std::future::pending::<()>().await;
        };

        let timed_out = tokio::time::timeout(Duration::from_millis(20), opening).await;
        assert!(timed_out.is_err());

        tokio::time::timeout(Duration::from_secs(1), rx)
            .await
            .expect("cleanup did not run")
            .unwrap();
    }

    #[test]
    fn test_env_sensing_uuid() {
        assert_eq!(
            ENVIRONMENTAL_SENSING_SERVICE.to_string(),
            "0000181a-0000-1000-8000-00805f9b34fb"
        );
    }
}
