// Connection manager - orchestrates one station connection at a time
//
// The manager owns:
// - The connection state machine
// - At most one open transport channel and its streaming task
// - The recent-readings buffer and the latest prediction
// - The subscriber list
//
// State changes and event emission happen under the same lock, so every
// subscriber observes one total order of events. `connect` and `disconnect`
// are serialized by an async lifecycle lock; each connection gets a session
// generation so late events from a superseded stream are dropped.

use crate::buffer::{BufferStats, ReadingBuffer};
use crate::codec;
use crate::config::LinkConfig;
use crate::error::{LinkError, LinkResult, StateError, TransportError};
use crate::forecast::{Forecast, ForecastError, ForecastService};
use crate::predictor::predict_window;
use crate::state::{ConnectionStateMachine, StateEvent, Transition};
use crate::transport::{
    Channel, DefaultTransportFactory, RefreshHandle, TransportFactory, TransportKind,
};
use crate::types::{ConnectionState, LinkEvent, Prediction, Reading};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub type SubscriberId = u64;

/// Receiving end of a manager subscription
///
/// The first event is always the state at the time of subscribing.
pub struct Subscription {
    id: SubscriberId,
    events: mpsc::UnboundedReceiver<LinkEvent>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Next event, or `None` once unsubscribed or the manager is gone
    pub async fn recv(&mut self) -> Option<LinkEvent> {
        self.events.recv().await
    }

    pub fn try_recv(&mut self) -> Option<LinkEvent> {
        self.events.try_recv().ok()
    }
}

/// Handle to a connection manager. Clones share the same connection.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

struct Inner {
    config: LinkConfig,
    factory: Arc<dyn TransportFactory>,
    core: Mutex<Core>,
    lifecycle: tokio::sync::Mutex<()>,
    pending: Mutex<Option<PendingConnect>>,
    session: Mutex<Option<Session>>,
    generation: AtomicU64,
}

/// Everything that must change atomically with event emission
struct Core {
    machine: ConnectionStateMachine,
    buffer: ReadingBuffer,
    latest_prediction: Option<Prediction>,
    active_session: Option<u64>,
    target: Option<TransportKind>,
    subscribers: HashMap<SubscriberId, mpsc::UnboundedSender<LinkEvent>>,
    next_subscriber: SubscriberId,
}

struct PendingConnect {
    kind: TransportKind,
    cancel: CancellationToken,
    settled: watch::Sender<bool>,
}

struct Session {
    generation: u64,
    kind: TransportKind,
    cancel: CancellationToken,
    task: JoinHandle<()>,
    refresh: Option<RefreshHandle>,
}

/// Clears the in-flight connect slot when the attempt settles, however it ends
struct PendingGuard<'a> {
    inner: &'a Inner,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if let Some(pending) = self.inner.pending.lock().take() {
            pending.settled.send_replace(true);
        }
    }
}

impl Core {
    fn new(buffer_capacity: usize) -> Self {
        Self {
            machine: ConnectionStateMachine::new(),
            buffer: ReadingBuffer::new(buffer_capacity),
            latest_prediction: None,
            active_session: None,
            target: None,
            subscribers: HashMap::new(),
            next_subscriber: 1,
        }
    }

    fn apply(&mut self, event: StateEvent) -> Result<(), StateError> {
        if let Transition::Changed { to, .. } = self.machine.apply(event)? {
            self.publish(LinkEvent::StateChanged(to));
        }
        Ok(())
    }

    fn publish(&mut self, event: LinkEvent) {
        self.subscribers
            .retain(|_, tx| tx.send(event.clone()).is_ok());
    }

    fn record(&mut self, generation: u64, reading: Reading, window: usize) {
        if self.active_session != Some(generation) {
            return;
        }

        self.buffer.push(reading);
        let prediction = predict_window(&self.buffer.recent(window));

        self.publish(LinkEvent::Reading(reading));
        if let Some(prediction) = prediction {
            self.latest_prediction = Some(prediction);
            self.publish(LinkEvent::Prediction(prediction));
        }
    }
}

impl ConnectionManager {
    /// Create a manager backed by the real transports
    pub fn new(config: LinkConfig) -> Self {
        let factory = Arc::new(DefaultTransportFactory::new(config.clone()));
        Self::with_factory(config, factory)
    }

    /// Create a manager over any transport factory
    ///
    /// An invalid hand-built config is logged and clamped to the nearest
    /// usable values rather than rejected.
    pub fn with_factory(config: LinkConfig, factory: Arc<dyn TransportFactory>) -> Self {
        if let Err(e) = config.validate() {
            log::warn!("{}; clamping to the smallest usable values", e);
        }
        let config = config.clamped();

        Self {
            inner: Arc::new(Inner {
                core: Mutex::new(Core::new(config.buffer_capacity)),
                config,
                factory,
                lifecycle: tokio::sync::Mutex::new(()),
                pending: Mutex::new(None),
                session: Mutex::new(None),
                generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &LinkConfig {
        &self.inner.config
    }

    /// Connect to `kind`, tearing down any existing connection first
    ///
    /// On failure the manager is left in `Failed` and the transport error is
    /// returned. Nothing is retried.
    pub async fn connect(&self, kind: TransportKind) -> LinkResult<()> {
        loop {
            let claim = {
                let mut pending = self.inner.pending.lock();
                match pending.as_ref() {
                    Some(p) if p.kind != kind => {
                        return Err(LinkError::AlreadyConnecting(p.kind.to_string()))
                    }
                    Some(p) => Err(p.settled.subscribe()),
                    None => {
                        let cancel = CancellationToken::new();
                        let (settled, _) = watch::channel(false);
                        *pending = Some(PendingConnect {
                            kind: kind.clone(),
                            cancel: cancel.clone(),
                            settled,
                        });
                        Ok(cancel)
                    }
                }
            };

            match claim {
                Ok(cancel) => {
                    let _guard = PendingGuard { inner: &self.inner };
                    return self.establish(kind, cancel).await;
                }
                Err(mut settled) => {
                    log::debug!("Joining in-flight connect to {}", kind);
                    // An Err only means the attempt already settled
                    let _ = settled.wait_for(|done| *done).await;
                    if self.is_connected_to(&kind) {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Try `candidates` in order and stay on the first that opens
    ///
    /// Each attempt is a plain `connect`, so a failed candidate is published
    /// as `Failed` before the next one starts. Stops early when an attempt was
    /// cancelled by `disconnect` or rejected because another connect is in
    /// flight. Returns the kind that connected, or the last error.
    pub async fn connect_any(&self, candidates: &[TransportKind]) -> LinkResult<TransportKind> {
        let mut last_error = None;

        for kind in candidates {
            match self.connect(kind.clone()).await {
                Ok(()) => return Ok(kind.clone()),
                Err(e) => {
                    let failed = matches!(self.current_state(), ConnectionState::Failed { .. });
                    if !failed || matches!(e, LinkError::AlreadyConnecting(_)) {
                        return Err(e);
                    }
                    log::info!("{} unavailable ({}), trying next transport", kind, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            TransportError::Unsupported("no transports to try".to_string()).into()
        }))
    }

    async fn establish(&self, kind: TransportKind, cancel: CancellationToken) -> LinkResult<()> {
        let _lifecycle = self.inner.lifecycle.lock().await;

        if cancel.is_cancelled() {
            return Err(cancelled().into());
        }

        log::info!("Connecting to {}", kind);

        self.inner.stop_session().await;
        {
            let mut core = self.inner.core.lock();
            if !matches!(
                core.machine.state(),
                ConnectionState::Disconnected | ConnectionState::Failed { .. }
            ) {
                core.apply(StateEvent::Disconnect)?;
            }
            if core.target.as_ref() != Some(&kind) {
                core.buffer.clear();
                core.latest_prediction = None;
            }
            core.target = Some(kind.clone());
            core.apply(StateEvent::Connect)?;
        }

        let opened = match self.inner.factory.create(&kind) {
            Ok(transport) => {
                let supports_refresh = transport.supports_refresh();
                let timeout = transport.open_timeout(self.inner.config.connect_timeout());
                log::debug!("Opening {} (up to {:?})", transport.kind(), timeout);
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(cancelled()),
                    result = tokio::time::timeout(timeout, transport.open()) => match result {
                        Ok(opened) => opened.map(|channel| (channel, supports_refresh)),
                        Err(_) => Err(TransportError::Timeout(format!(
                            "opening {} took longer than {:?}",
                            kind, timeout
                        ))),
                    },
                }
            }
            Err(e) => Err(e),
        };

        let (channel, supports_refresh) = match opened {
            Ok(opened) => opened,
            Err(e) => {
                let mut core = self.inner.core.lock();
                if cancel.is_cancelled() {
                    log::info!("Connect to {} cancelled", kind);
                    core.target = None;
                    core.apply(StateEvent::Disconnect)?;
                } else {
                    log::warn!("Failed to open {}: {}", kind, e);
                    core.apply(StateEvent::OpenFailed(e.to_string()))?;
                }
                return Err(e.into());
            }
        };

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let refresh = supports_refresh.then(|| channel.refresh_handle());
        {
            let mut core = self.inner.core.lock();
            core.active_session = Some(generation);
            core.apply(StateEvent::TransportOpened)?;
        }

        let session_cancel = CancellationToken::new();
        let task = tokio::spawn(stream_loop(
            Arc::downgrade(&self.inner),
            channel,
            generation,
            session_cancel.clone(),
            self.inner.config.teardown_timeout(),
        ));

        *self.inner.session.lock() = Some(Session {
            generation,
            kind: kind.clone(),
            cancel: session_cancel,
            task,
            refresh,
        });

        log::info!("Connected to {} (session {})", kind, generation);
        Ok(())
    }

    /// Stop streaming, close the channel and go to `Disconnected`
    ///
    /// Safe from any state. An in-flight connect is cancelled.
    pub async fn disconnect(&self) -> LinkResult<()> {
        if let Some(pending) = self.inner.pending.lock().as_ref() {
            pending.cancel.cancel();
        }

        let _lifecycle = self.inner.lifecycle.lock().await;
        self.inner.stop_session().await;

        let mut core = self.inner.core.lock();
        core.target = None;
        core.apply(StateEvent::Disconnect)?;
        Ok(())
    }

    /// Ask the station for an out-of-cycle reading
    ///
    /// Returns whether a request was issued. The reading itself arrives
    /// through the normal event stream.
    pub fn refresh_now(&self) -> LinkResult<bool> {
        if !self.current_state().is_connected() {
            return Err(StateError::NotConnected.into());
        }

        let session = self.inner.session.lock();
        match session.as_ref().and_then(|s| s.refresh.as_ref()) {
            Some(handle) => Ok(handle.request()),
            None => Ok(false),
        }
    }

    pub fn current_state(&self) -> ConnectionState {
        self.inner.core.lock().machine.state().clone()
    }

    pub fn current_reading(&self) -> Option<Reading> {
        self.inner.core.lock().buffer.latest().copied()
    }

    pub fn current_prediction(&self) -> Option<Prediction> {
        self.inner.core.lock().latest_prediction
    }

    /// Buffered readings, oldest to newest
    pub fn recent_readings(&self) -> Vec<Reading> {
        self.inner.core.lock().buffer.snapshot()
    }

    pub fn buffer_stats(&self) -> BufferStats {
        self.inner.core.lock().buffer.stats()
    }

    /// The station the manager is connected (or connecting) to
    pub fn current_target(&self) -> Option<TransportKind> {
        self.inner.core.lock().target.clone()
    }

    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut core = self.inner.core.lock();

        let id = core.next_subscriber;
        core.next_subscriber += 1;

        let _ = tx.send(LinkEvent::StateChanged(core.machine.state().clone()));
        core.subscribers.insert(id, tx);

        Subscription { id, events: rx }
    }

    /// Returns false if `id` was not subscribed
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.inner.core.lock().subscribers.remove(&id).is_some()
    }

    /// Hand the latest reading to a long-horizon forecast service
    ///
    /// Returns `Ok(None)` when no reading has arrived yet.
    pub async fn forecast(
        &self,
        service: &dyn ForecastService,
    ) -> Result<Option<Forecast>, ForecastError> {
        let Some(reading) = self.current_reading() else {
            return Ok(None);
        };

        service
            .forecast(reading.temperature(), reading.humidity(), reading.pressure())
            .await
            .map(Some)
    }

    fn is_connected_to(&self, kind: &TransportKind) -> bool {
        let core = self.inner.core.lock();
        core.machine.state().is_connected() && core.target.as_ref() == Some(kind)
    }
}

impl Inner {
    /// Stop the current streaming task, if any, and wait for its channel to close
    async fn stop_session(&self) {
        let Some(session) = self.session.lock().take() else {
            return;
        };

        {
            let mut core = self.core.lock();
            if core.active_session == Some(session.generation) {
                core.active_session = None;
            }
        }

        log::info!("Stopping session {} ({})", session.generation, session.kind);
        session.cancel.cancel();

        let grace = self.config.teardown_timeout() * 2;
        let mut task = session.task;
        if tokio::time::timeout(grace, &mut task).await.is_err() {
            log::warn!(
                "Session {} did not stop within {:?}, aborting",
                session.generation,
                grace
            );
            task.abort();
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(session) = self.session.get_mut().take() {
            session.cancel.cancel();
        }
    }
}

fn cancelled() -> TransportError {
    TransportError::Open("connection attempt cancelled".to_string())
}

/// Per-connection streaming task: read, decode, record, publish
async fn stream_loop(
    inner: Weak<Inner>,
    mut channel: Channel,
    generation: u64,
    cancel: CancellationToken,
    teardown: Duration,
) {
    let medium = channel.medium();
    log::debug!("Streaming loop started for session {}", generation);

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = channel.read_next() => next,
        };

        let Some(shared) = inner.upgrade() else {
            break;
        };

        match next {
            Ok(raw) => match codec::decode(&raw) {
                Ok(reading) => {
                    shared
                        .core
                        .lock()
                        .record(generation, reading, shared.config.prediction_window);
                }
                Err(e) => {
                    log::warn!("Dropping undecodable {} payload: {}", medium, e);
                    let mut core = shared.core.lock();
                    if core.active_session == Some(generation) {
                        core.publish(LinkEvent::DecodeFailed {
                            medium,
                            error: e.to_string(),
                        });
                    }
                }
            },
            Err(e) => {
                log::error!("Stream error on session {}: {}", generation, e);
                let mut core = shared.core.lock();
                if core.active_session == Some(generation) {
                    core.active_session = None;
                    if let Err(e) = core.apply(StateEvent::StreamError(e.to_string())) {
                        log::warn!("Ignoring stream error: {}", e);
                    }
                }
                break;
            }
        }
    }

    if let Err(e) = channel.close(teardown).await {
        log::warn!("Closing {} channel: {}", medium, e);
    }
    log::debug!("Streaming loop stopped for session {}", generation);
}
