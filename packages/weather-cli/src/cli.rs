use clap::{Args, Parser, Subcommand, ValueEnum};
use weather_link::{LinkConfig, Medium, TransportKind};

#[derive(Parser)]
#[command(
    name = "weather-link",
    version,
    about = "Stream readings from weather sensor stations",
    long_about = "Connect to a weather sensor station over Bluetooth LE, WiFi or USB serial,\n\
                  print its readings and a short-horizon weather prediction.\n\
                  Settings such as BUFFER_SIZE or WEBSOCKET_PORT are read from the environment or .env."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Command {
    /// Connect to a station and print its events
    Stream(StreamArgs),
    /// Classify a single sample with the rule-based predictor
    Predict(PredictArgs),
    /// Decode one raw payload offline
    Decode(DecodeArgs),
    /// List serial ports
    Ports(PortsArgs),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum MediumArg {
    Bluetooth,
    Wifi,
    Serial,
}

impl From<MediumArg> for Medium {
    fn from(arg: MediumArg) -> Self {
        match arg {
            MediumArg::Bluetooth => Medium::Bluetooth,
            MediumArg::Wifi => Medium::WiFi,
            MediumArg::Serial => Medium::Serial,
        }
    }
}

/// Stream target selection; `auto` tries serial, then WiFi, then Bluetooth
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum TransportArg {
    Auto,
    Bluetooth,
    Wifi,
    Serial,
}

/// Order `auto` walks the media in
const AUTO_ORDER: [MediumArg; 3] = [MediumArg::Serial, MediumArg::Wifi, MediumArg::Bluetooth];

#[derive(Args)]
pub struct StreamArgs {
    /// Medium to connect over
    #[arg(long, value_enum)]
    pub transport: TransportArg,

    /// Bluetooth device name or address
    #[arg(long, env = "BT_DEVICE_NAME", default_value = "ESP32-Weather")]
    pub device: String,

    /// WiFi station host
    #[arg(long, env = "WIFI_HOST", default_value = "192.168.4.1")]
    pub host: String,

    /// WiFi station port (defaults to WIFI_PORT / WEBSOCKET_PORT, then 8765)
    #[arg(long)]
    pub port: Option<u16>,

    /// Serial device path
    #[arg(long, env = "ARDUINO_PORT", default_value = "/dev/ttyUSB0")]
    pub path: String,

    /// Serial baud rate (defaults to BAUDRATE, then 115200)
    #[arg(long)]
    pub baud: Option<u32>,

    /// Stop after this many seconds (default: until Ctrl-C)
    #[arg(long)]
    pub duration: Option<u64>,

    /// Ask the station for an out-of-cycle reading this often (seconds)
    #[arg(long)]
    pub refresh_every: Option<u64>,

    /// Query FORECAST_URL with the latest reading before disconnecting
    #[arg(long)]
    pub forecast: bool,

    /// Print events as JSON lines
    #[arg(long)]
    pub json: bool,
}

impl StreamArgs {
    /// Targets to try, in order
    pub fn candidates(&self, config: &LinkConfig) -> Vec<TransportKind> {
        match self.transport {
            TransportArg::Auto => AUTO_ORDER
                .iter()
                .map(|medium| self.transport_kind(*medium, config))
                .collect(),
            TransportArg::Bluetooth => vec![self.transport_kind(MediumArg::Bluetooth, config)],
            TransportArg::Wifi => vec![self.transport_kind(MediumArg::Wifi, config)],
            TransportArg::Serial => vec![self.transport_kind(MediumArg::Serial, config)],
        }
    }

    pub fn transport_kind(&self, medium: MediumArg, config: &LinkConfig) -> TransportKind {
        match medium {
            MediumArg::Bluetooth => TransportKind::Bluetooth {
                device: self.device.clone(),
            },
            MediumArg::Wifi => TransportKind::WiFi {
                host: self.host.clone(),
                port: self.port.unwrap_or(config.wifi_port),
            },
            MediumArg::Serial => TransportKind::Serial {
                path: self.path.clone(),
                baud_rate: self.baud.unwrap_or(config.baud_rate),
            },
        }
    }
}

#[derive(Args)]
pub struct PredictArgs {
    /// Relative humidity in percent
    #[arg(long, allow_negative_numbers = true)]
    pub humidity: f32,

    /// Pressure in hPa
    #[arg(long, allow_negative_numbers = true)]
    pub pressure: f32,

    /// Temperature in degrees Celsius (not used by the rules)
    #[arg(long, default_value_t = 20.0, allow_negative_numbers = true)]
    pub temperature: f32,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args)]
pub struct DecodeArgs {
    /// Framing to decode with
    #[arg(long, value_enum)]
    pub medium: MediumArg,

    /// Payload text, or hex bytes with --hex
    pub payload: String,

    /// Treat the payload as hex-encoded bytes
    #[arg(long)]
    pub hex: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args)]
pub struct PortsArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}
