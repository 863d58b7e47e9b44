// Connection and streaming manager for environmental sensor stations
//
// Architecture:
// - `transport`: pluggable media (Bluetooth LE, WiFi websocket, USB serial)
// - `codec`: turns each medium's raw payloads into `Reading`s
// - `state`: connection lifecycle state machine
// - `manager`: owns the active connection, runs the streaming loop, notifies subscribers
// - `buffer`: bounded recent-readings ring buffer
// - `predictor`: rule-based short-horizon prediction
// - `forecast`: boundary to an external long-horizon forecast service

pub mod buffer;
pub mod codec;
pub mod config;
pub mod error;
pub mod forecast;
pub mod manager;
pub mod predictor;
pub mod state;
pub mod transport;
pub mod types;

pub use buffer::{BufferStats, ReadingBuffer};
pub use config::{ConfigError, LinkConfig};
pub use error::{DecodeError, LinkError, LinkResult, StateError, TransportError, TransportResult};
pub use forecast::{Forecast, ForecastError, ForecastService, HttpForecastService};
pub use manager::{ConnectionManager, SubscriberId, Subscription};
pub use state::{ConnectionStateMachine, StateEvent, Transition};
pub use transport::{
    Channel, ChannelFeed, Medium, RawPayload, Transport, TransportFactory, TransportKind,
};
pub use types::{ConnectionState, LinkEvent, Prediction, PredictionLabel, Reading};
