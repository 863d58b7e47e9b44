#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use weather_link::transport::{ControlFrame, TransportFactory};
use weather_link::{
    Channel, ConnectionManager, LinkConfig, LinkEvent, Medium, Subscription, Transport,
    TransportError, TransportKind, TransportResult,
};

pub const EVENT_TIMEOUT: Duration = Duration::from_secs(2);

/// Delivered by the scripted reader whenever a refresh is requested
pub const REFRESH_PAYLOAD: &[u8] = b"19.5,42.0,1018.0";

#[derive(Debug, Clone)]
pub enum Behavior {
    /// Deliver the payloads, then fail with the given reason or idle until cancelled
    Stream {
        payloads: Vec<&'static str>,
        then_fail: Option<&'static str>,
    },
    /// Reader that never honors cancellation
    Stubborn,
    /// `open` fails with `Unreachable`
    Refuse(&'static str),
    /// `open` takes this long, then idles
    SlowOpen(Duration),
}

impl Behavior {
    pub fn idle() -> Self {
        Behavior::Stream {
            payloads: vec![],
            then_fail: None,
        }
    }

    pub fn payloads(payloads: Vec<&'static str>) -> Self {
        Behavior::Stream {
            payloads,
            then_fail: None,
        }
    }
}

/// Counters shared by every transport the factory builds
#[derive(Debug, Default)]
pub struct Counters {
    pub opens: AtomicUsize,
    pub open_now: AtomicUsize,
    pub max_open: AtomicUsize,
    pub refreshes: AtomicUsize,
}

impl Counters {
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn open_now(&self) -> usize {
        self.open_now.load(Ordering::SeqCst)
    }

    pub fn max_open(&self) -> usize {
        self.max_open.load(Ordering::SeqCst)
    }

    pub fn refreshes(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }
}

/// Decrements `open_now` when the reader finishes or is aborted
struct OpenGuard(Arc<Counters>);

impl Drop for OpenGuard {
    fn drop(&mut self) {
        self.0.open_now.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct ScriptedFactory {
    pub behavior: Behavior,
    pub supports_refresh: bool,
    pub open_timeout: Option<Duration>,
    pub per_target: Vec<(TransportKind, Behavior)>,
    pub counters: Arc<Counters>,
}

impl ScriptedFactory {
    pub fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            supports_refresh: true,
            open_timeout: None,
            per_target: Vec::new(),
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn push_only(mut self) -> Self {
        self.supports_refresh = false;
        self
    }

    /// Transports ask the manager for this open budget instead of the
    /// configured connect timeout
    pub fn with_open_timeout(mut self, timeout: Duration) -> Self {
        self.open_timeout = Some(timeout);
        self
    }

    /// Use `behavior` instead of the default one when opening `kind`
    pub fn with_target(mut self, kind: TransportKind, behavior: Behavior) -> Self {
        self.per_target.push((kind, behavior));
        self
    }
}

impl TransportFactory for ScriptedFactory {
    fn create(&self, kind: &TransportKind) -> TransportResult<Box<dyn Transport>> {
        Ok(Box::new(ScriptedTransport {
            kind: kind.clone(),
            behavior: self
                .per_target
                .iter()
                .find(|(target, _)| target == kind)
                .map(|(_, behavior)| behavior.clone())
                .unwrap_or_else(|| self.behavior.clone()),
            supports_refresh: self.supports_refresh,
            open_timeout: self.open_timeout,
            counters: self.counters.clone(),
        }))
    }
}

struct ScriptedTransport {
    kind: TransportKind,
    behavior: Behavior,
    supports_refresh: bool,
    open_timeout: Option<Duration>,
    counters: Arc<Counters>,
}

#[async_trait]
impl Transport for ScriptedTransport {
    fn kind(&self) -> &TransportKind {
        &self.kind
    }

    fn supports_refresh(&self) -> bool {
        self.supports_refresh
    }

    fn open_timeout(&self, connect_timeout: Duration) -> Duration {
        self.open_timeout.unwrap_or(connect_timeout)
    }

    async fn open(&self) -> TransportResult<Channel> {
        let (payloads, then_fail) = match &self.behavior {
            Behavior::Refuse(reason) => {
                return Err(TransportError::Unreachable(reason.to_string()))
            }
            Behavior::SlowOpen(delay) => {
                tokio::time::sleep(*delay).await;
                (vec![], None)
            }
            Behavior::Stream {
                payloads,
                then_fail,
            } => (payloads.clone(), *then_fail),
            Behavior::Stubborn => {
                let guard = self.track_open();
                return Ok(Channel::spawn(Medium::Serial, move |feed| async move {
                    let _feed = feed;
                    let _guard = guard;
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                }));
            }
        };

        let guard = self.track_open();
        let counters = self.counters.clone();

        Ok(Channel::spawn(Medium::Serial, move |mut feed| async move {
            let _guard = guard;

            for payload in payloads {
                if !feed.deliver(payload.as_bytes()).await {
                    return;
                }
            }

            if let Some(reason) = then_fail {
                feed.fail(TransportError::Read(reason.to_string())).await;
                return;
            }

            loop {
                tokio::select! {
                    biased;
                    _ = feed.cancel.cancelled() => break,
                    Some(ControlFrame::Refresh) = feed.control.recv() => {
                        counters.refreshes.fetch_add(1, Ordering::SeqCst);
                        if !feed.deliver(REFRESH_PAYLOAD).await {
                            break;
                        }
                    }
                }
            }
        }))
    }
}

impl ScriptedTransport {
    fn track_open(&self) -> OpenGuard {
        self.counters.opens.fetch_add(1, Ordering::SeqCst);
        let now = self.counters.open_now.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.max_open.fetch_max(now, Ordering::SeqCst);
        OpenGuard(self.counters.clone())
    }
}

pub fn station(name: &str) -> TransportKind {
    TransportKind::WiFi {
        host: name.to_string(),
        port: 8765,
    }
}

pub fn manager_with(behavior: Behavior) -> (ConnectionManager, Arc<Counters>) {
    manager_with_config(behavior, LinkConfig::default())
}

pub fn manager_with_config(behavior: Behavior, config: LinkConfig) -> (ConnectionManager, Arc<Counters>) {
    manager_with_factory(ScriptedFactory::new(behavior), config)
}

pub fn manager_with_factory(
    factory: ScriptedFactory,
    config: LinkConfig,
) -> (ConnectionManager, Arc<Counters>) {
    let counters = factory.counters.clone();
    (
        ConnectionManager::with_factory(config, Arc::new(factory)),
        counters,
    )
}

pub async fn next_event(subscription: &mut Subscription) -> LinkEvent {
    tokio::time::timeout(EVENT_TIMEOUT, subscription.recv())
        .await
        .expect("timed out waiting for event")
        .expect("subscription closed")
}

/// Skip events until `matches` accepts one
pub async fn wait_for<F>(subscription: &mut Subscription, mut matches: F) -> LinkEvent
where
    F: FnMut(&LinkEvent) -> bool,
{
    loop {
        let event = next_event(subscription).await;
        if matches(&event) {
            return event;
        }
    }
}
