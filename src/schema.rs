use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::signal::{Unit, Waveform};
use crate::util;

// ------------------------------------------------------------
// Wire frame
// ------------------------------------------------------------
//
// Every message exchanged with a gateway, in both directions, is one
// JSON text frame of this shape:
//
//     {"Type": "<tag>", "From": "<role>", "To": "<role>", "Data": ...}
//
// `Type` is dialect-specific (see `dialects`). `Data` is validated
// against the schema of the canonical `MessageKind` the tag maps to.
//
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    #[serde(rename = "Type")]
    pub tag: String,

    #[serde(rename = "From", default)]
    pub from: String,

    #[serde(rename = "To", default)]
    pub to: String,

    #[serde(rename = "Data", default)]
    pub data: Value,
}

/// Direction of a message kind relative to this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Request,
    Response,
    Push,
}

/// Canonical, dialect-independent message vocabulary.
///
/// IMPORTANT:
/// - Adding a variant requires a tag in every dialect table
/// - `MessageKind::ALL` must list every variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MessageKind {
    // Requests
    Login,
    Subscribe,
    Unsubscribe,
    GetSensors,
    GetConnectedSensors,
    TriggerReading,
    TriggerTemperatureReading,
    TriggerBatteryReading,
    GetReadings,
    GetTemperatureReadings,
    GetBatteryReadings,

    // Responses
    LoginResult,
    SensorList,
    ReadingHistory,
    TemperatureHistory,
    BatteryHistory,
    Error,

    // Push notifications
    SensorConnectionChanged,
    ReadingStarted,
    ReadingComplete,
    TemperatureComplete,
    BatteryComplete,
}

impl MessageKind {
    pub const ALL: [MessageKind; 22] = [
        MessageKind::Login,
        MessageKind::Subscribe,
        MessageKind::Unsubscribe,
        MessageKind::GetSensors,
        MessageKind::GetConnectedSensors,
        MessageKind::TriggerReading,
        MessageKind::TriggerTemperatureReading,
        MessageKind::TriggerBatteryReading,
        MessageKind::GetReadings,
        MessageKind::GetTemperatureReadings,
        MessageKind::GetBatteryReadings,
        MessageKind::LoginResult,
        MessageKind::SensorList,
        MessageKind::ReadingHistory,
        MessageKind::TemperatureHistory,
        MessageKind::BatteryHistory,
        MessageKind::Error,
        MessageKind::SensorConnectionChanged,
        MessageKind::ReadingStarted,
        MessageKind::ReadingComplete,
        MessageKind::TemperatureComplete,
        MessageKind::BatteryComplete,
    ];

    pub fn direction(self) -> Direction {
        use MessageKind::*;
        match self {
            Login | Subscribe | Unsubscribe | GetSensors | GetConnectedSensors | TriggerReading
            | TriggerTemperatureReading | TriggerBatteryReading | GetReadings
            | GetTemperatureReadings | GetBatteryReadings => Direction::Request,
            LoginResult | SensorList | ReadingHistory | TemperatureHistory | BatteryHistory
            | Error => Direction::Response,
            SensorConnectionChanged | ReadingStarted | ReadingComplete | TemperatureComplete
            | BatteryComplete => Direction::Push,
        }
    }

    /// Default reply contract of a request kind.
    ///
    /// Trigger commands only start an asynchronous effect on the gateway;
    /// their outcome shows up later as a push notification.
    pub fn expectation(self) -> Expectation {
        use MessageKind::*;
        match self {
            Login => Expectation::Response(LoginResult),
            GetSensors | GetConnectedSensors => Expectation::Response(SensorList),
            GetReadings => Expectation::Response(ReadingHistory),
            GetTemperatureReadings => Expectation::Response(TemperatureHistory),
            GetBatteryReadings => Expectation::Response(BatteryHistory),
            Subscribe | Unsubscribe => Expectation::Grace,
            _ => Expectation::FireAndForget,
        }
    }

    /// Routing prefix of a push notification.
    pub fn topic_prefix(self) -> Option<&'static str> {
        match self {
            MessageKind::SensorConnectionChanged => Some("sensor/connection"),
            MessageKind::ReadingStarted => Some("reading/started"),
            MessageKind::ReadingComplete => Some("reading/vibration"),
            MessageKind::TemperatureComplete => Some("reading/temperature"),
            MessageKind::BatteryComplete => Some("reading/battery"),
            _ => None,
        }
    }

    /// Expected top-level shape of the payload.
    pub fn payload_shape(self) -> PayloadShape {
        match self {
            MessageKind::SensorList => PayloadShape::KeyedMap { natural_key: "Serial" },
            MessageKind::ReadingHistory
            | MessageKind::TemperatureHistory
            | MessageKind::BatteryHistory => PayloadShape::List,
            _ => PayloadShape::Object,
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// How the reply to a request is recognised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expectation {
    /// Resolved by the oldest pending entry matching this response kind.
    Response(MessageKind),

    /// Resolved as soon as the frame is written.
    FireAndForget,

    /// Resolved as success when no error arrives within the grace window.
    Grace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadShape {
    Object,
    List,
    KeyedMap { natural_key: &'static str },
}

// ------------------------------------------------------------
// Outbound requests
// ------------------------------------------------------------

/// A request ready to be written by a connection.
///
/// `timeout` overrides the connection's default deadline for this
/// request only.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub kind: MessageKind,
    pub data: Value,
    pub expect: Expectation,
    pub timeout: Option<Duration>,
}

impl Request {
    pub fn new(kind: MessageKind, data: Value) -> Self {
        Self {
            kind,
            data,
            expect: kind.expectation(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn get_sensors() -> Self {
        Self::new(MessageKind::GetSensors, json!({}))
    }

    pub fn get_connected_sensors() -> Self {
        Self::new(MessageKind::GetConnectedSensors, json!({}))
    }

    pub fn trigger_reading(serial: u64) -> Self {
        Self::new(MessageKind::TriggerReading, json!({ "Serial": serial }))
    }

    pub fn trigger_temperature_reading(serial: u64) -> Self {
        Self::new(MessageKind::TriggerTemperatureReading, json!({ "Serial": serial }))
    }

    pub fn trigger_battery_reading(serial: u64) -> Self {
        Self::new(MessageKind::TriggerBatteryReading, json!({ "Serial": serial }))
    }

    pub fn get_readings(serial: u64, count: u32) -> Self {
        Self::new(MessageKind::GetReadings, json!({ "Serial": serial, "Count": count }))
    }

    pub fn get_temperature_readings(serial: u64, count: u32) -> Self {
        Self::new(
            MessageKind::GetTemperatureReadings,
            json!({ "Serial": serial, "Count": count }),
        )
    }

    pub fn get_battery_readings(serial: u64, count: u32) -> Self {
        Self::new(
            MessageKind::GetBatteryReadings,
            json!({ "Serial": serial, "Count": count }),
        )
    }

    pub fn subscribe(topics: &[String]) -> Self {
        Self::new(MessageKind::Subscribe, json!({ "Topics": topics }))
    }

    pub fn unsubscribe(topics: &[String]) -> Self {
        Self::new(MessageKind::Unsubscribe, json!({ "Topics": topics }))
    }
}

// ------------------------------------------------------------
// Inbound payloads
// ------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LoginResult {
    #[serde(deserialize_with = "util::de_flag")]
    pub success: bool,

    #[serde(default, deserialize_with = "util::de_opt_string")]
    pub message: Option<String>,
}

/// One dynamic sensor as reported by the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SensorRecord {
    #[serde(deserialize_with = "util::de_serial")]
    pub serial: u64,

    #[serde(default, deserialize_with = "util::de_flag")]
    pub connected: bool,

    #[serde(default, deserialize_with = "util::de_opt_string")]
    pub part_num: Option<String>,

    #[serde(default, deserialize_with = "util::de_opt_u32")]
    pub access_point: Option<u32>,

    #[serde(default, deserialize_with = "util::de_opt_u32")]
    pub read_rate: Option<u32>,

    #[serde(default, deserialize_with = "util::de_opt_u32")]
    pub samples: Option<u32>,

    #[serde(default, deserialize_with = "util::de_opt_string")]
    pub g_mode: Option<String>,

    #[serde(default, deserialize_with = "util::de_opt_string")]
    pub hw_ver: Option<String>,

    #[serde(default, deserialize_with = "util::de_opt_string")]
    pub fm_ver: Option<String>,
}

/// Sensors keyed by serial number.
pub type SensorMap = BTreeMap<u64, SensorRecord>;

/// Raw per-axis acceleration samples attached to a vibration reading.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AxisSamples {
    #[serde(default)]
    pub x: Vec<f64>,
    #[serde(default)]
    pub y: Vec<f64>,
    #[serde(default)]
    pub z: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub fn name(self) -> &'static str {
        match self {
            Axis::X => "X",
            Axis::Y => "Y",
            Axis::Z => "Z",
        }
    }
}

/// Vibration measurement: RMS per axis plus optional raw samples (g).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct VibrationReading {
    #[serde(deserialize_with = "util::de_serial")]
    pub serial: u64,

    #[serde(deserialize_with = "util::de_timestamp")]
    pub time: DateTime<Utc>,

    #[serde(rename = "X", deserialize_with = "util::de_f64")]
    pub x_rms: f64,

    #[serde(rename = "Y", deserialize_with = "util::de_f64")]
    pub y_rms: f64,

    #[serde(rename = "Z", deserialize_with = "util::de_f64")]
    pub z_rms: f64,

    #[serde(default, deserialize_with = "util::de_opt_f64")]
    pub sample_rate: Option<f64>,

    #[serde(default, rename = "Waveform")]
    pub samples: Option<AxisSamples>,
}

impl VibrationReading {
    /// Raw acceleration samples of one axis as a waveform in g.
    ///
    /// `None` when the reading carries no samples or no sample rate.
    pub fn waveform(&self, axis: Axis) -> Option<Waveform> {
        let rate = self.sample_rate.filter(|r| *r > 0.0)?;
        let samples = self.samples.as_ref()?;
        let values = match axis {
            Axis::X => &samples.x,
            Axis::Y => &samples.y,
            Axis::Z => &samples.z,
        };
        if values.is_empty() {
            return None;
        }
        Some(Waveform::from_values(
            values,
            rate,
            Unit::G,
            format!("{} {} acceleration", self.serial, axis.name()),
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TemperatureReading {
    #[serde(deserialize_with = "util::de_serial")]
    pub serial: u64,

    #[serde(deserialize_with = "util::de_timestamp")]
    pub time: DateTime<Utc>,

    /// Degrees Celsius.
    #[serde(rename = "Temp", deserialize_with = "util::de_f64")]
    pub celsius: f64,
}

impl TemperatureReading {
    pub fn fahrenheit(&self) -> f64 {
        self.celsius * 9.0 / 5.0 + 32.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BatteryReading {
    #[serde(deserialize_with = "util::de_serial")]
    pub serial: u64,

    #[serde(deserialize_with = "util::de_timestamp")]
    pub time: DateTime<Utc>,

    /// Remaining charge in percent.
    #[serde(rename = "Batt", deserialize_with = "util::de_f64")]
    pub level: f64,
}

/// Any reading a sensor can produce.
#[derive(Debug, Clone, PartialEq)]
pub enum SensorReading {
    Vibration(VibrationReading),
    Temperature(TemperatureReading),
    Battery(BatteryReading),
}

impl SensorReading {
    pub fn serial(&self) -> u64 {
        match self {
            SensorReading::Vibration(r) => r.serial,
            SensorReading::Temperature(r) => r.serial,
            SensorReading::Battery(r) => r.serial,
        }
    }

    pub fn time(&self) -> DateTime<Utc> {
        match self {
            SensorReading::Vibration(r) => r.time,
            SensorReading::Temperature(r) => r.time,
            SensorReading::Battery(r) => r.time,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SensorConnectionChange {
    #[serde(deserialize_with = "util::de_serial")]
    pub serial: u64,

    #[serde(deserialize_with = "util::de_flag")]
    pub connected: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ReadingStarted {
    #[serde(deserialize_with = "util::de_serial")]
    pub serial: u64,
}

/// Generic error frame. `attempt` is the wire tag of the failed command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    #[serde(rename = "Attempt", alias = "attempt", alias = "Command", alias = "command")]
    pub attempt: String,

    #[serde(
        rename = "Error",
        alias = "error",
        alias = "Message",
        alias = "message",
        default
    )]
    pub message: String,
}

// ------------------------------------------------------------
// Inbound message (tagged union)
// ------------------------------------------------------------

/// A decoded inbound message.
///
/// `Unvalidated` carries payloads that failed their schema but are still
/// delivered as-is; `Unknown` carries frames whose tag the dialect does
/// not know.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    LoginResult(LoginResult),
    SensorList(SensorMap),
    ReadingHistory(Vec<VibrationReading>),
    TemperatureHistory(Vec<TemperatureReading>),
    BatteryHistory(Vec<BatteryReading>),
    Error(ErrorPayload),
    SensorConnectionChanged(SensorConnectionChange),
    ReadingStarted(ReadingStarted),
    ReadingComplete(VibrationReading),
    TemperatureComplete(TemperatureReading),
    BatteryComplete(BatteryReading),
    Unvalidated { kind: MessageKind, data: Value },
    Unknown { tag: String, data: Value },
}

impl InboundMessage {
    pub fn kind(&self) -> Option<MessageKind> {
        Some(match self {
            InboundMessage::LoginResult(_) => MessageKind::LoginResult,
            InboundMessage::SensorList(_) => MessageKind::SensorList,
            InboundMessage::ReadingHistory(_) => MessageKind::ReadingHistory,
            InboundMessage::TemperatureHistory(_) => MessageKind::TemperatureHistory,
            InboundMessage::BatteryHistory(_) => MessageKind::BatteryHistory,
            InboundMessage::Error(_) => MessageKind::Error,
            InboundMessage::SensorConnectionChanged(_) => MessageKind::SensorConnectionChanged,
            InboundMessage::ReadingStarted(_) => MessageKind::ReadingStarted,
            InboundMessage::ReadingComplete(_) => MessageKind::ReadingComplete,
            InboundMessage::TemperatureComplete(_) => MessageKind::TemperatureComplete,
            InboundMessage::BatteryComplete(_) => MessageKind::BatteryComplete,
            InboundMessage::Unvalidated { kind, .. } => *kind,
            InboundMessage::Unknown { .. } => return None,
        })
    }

    /// Sensor serial this message is about, if any.
    pub fn serial(&self) -> Option<u64> {
        match self {
            InboundMessage::SensorConnectionChanged(c) => Some(c.serial),
            InboundMessage::ReadingStarted(r) => Some(r.serial),
            InboundMessage::ReadingComplete(r) => Some(r.serial),
            InboundMessage::TemperatureComplete(r) => Some(r.serial),
            InboundMessage::BatteryComplete(r) => Some(r.serial),
            InboundMessage::Unvalidated { data, .. } | InboundMessage::Unknown { data, .. } => {
                data.get("Serial").and_then(util::value_as_u64)
            }
            _ => None,
        }
    }

    /// The completed reading carried by a push notification.
    pub fn reading(&self) -> Option<SensorReading> {
        match self {
            InboundMessage::ReadingComplete(r) => Some(SensorReading::Vibration(r.clone())),
            InboundMessage::TemperatureComplete(r) => Some(SensorReading::Temperature(r.clone())),
            InboundMessage::BatteryComplete(r) => Some(SensorReading::Battery(r.clone())),
            _ => None,
        }
    }

    /// Routing topic for push notifications: `<prefix>/<serial>`.
    pub fn topic(&self) -> Option<String> {
        let prefix = self.kind()?.topic_prefix()?;
        Some(match self.serial() {
            Some(serial) => format!("{prefix}/{serial}"),
            None => prefix.to_string(),
        })
    }
}

/// A push notification as handed to local listeners.
#[derive(Debug, Clone, PartialEq)]
pub struct PushMessage {
    pub topic: String,
    pub message: InboundMessage,
}
