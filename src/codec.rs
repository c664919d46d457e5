//! Frame codec.
//!
//! Inbound text goes through three explicit steps:
//!
//! 1. envelope parse (`Frame`) and tag lookup in the active dialect
//! 2. [`normalize`]: a pure shape fix-up for payloads whose upstream
//!    representation is array-vs-object ambiguous
//! 3. [`validate`]: schema check into a typed [`InboundMessage`]
//!
//! A payload that fails step 3 is still delivered as
//! `InboundMessage::Unvalidated` with a logged warning.

use log::warn;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::dialects::GatewayDialect;
use crate::error::GatewayError;
use crate::metrics::{METRICS, bump};
use crate::schema::{Frame, InboundMessage, MessageKind, PayloadShape};
use crate::util;

/// Result of decoding one inbound text frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    /// Raw wire tag.
    pub tag: String,

    /// Canonical kind, `None` when the dialect does not know the tag.
    pub kind: Option<MessageKind>,

    pub message: InboundMessage,

    /// `false` when the payload was passed through without validation.
    pub validated: bool,
}

/// Serializes an outbound frame in the given dialect.
pub fn encode(
    dialect: &dyn GatewayDialect,
    kind: MessageKind,
    data: Value,
) -> Result<String, GatewayError> {
    let frame = Frame {
        tag: dialect.tag(kind).to_string(),
        from: dialect.client_role().to_string(),
        to: dialect.server_role().to_string(),
        data,
    };
    serde_json::to_string(&frame).map_err(|e| GatewayError::Validation {
        message_type: kind.to_string(),
        reason: e.to_string(),
    })
}

/// Decodes one inbound text frame.
///
/// Errors only when the text is not a frame at all (invalid JSON, or no
/// `Type`). Payload problems never error here.
pub fn decode(dialect: &dyn GatewayDialect, raw: &str) -> Result<Decoded, GatewayError> {
    let frame: Frame = serde_json::from_str(raw).map_err(|e| GatewayError::Validation {
        message_type: "frame".to_string(),
        reason: e.to_string(),
    })?;

    let Some(kind) = dialect.kind(&frame.tag) else {
        return Ok(Decoded {
            message: InboundMessage::Unknown {
                tag: frame.tag.clone(),
                data: frame.data,
            },
            tag: frame.tag,
            kind: None,
            validated: false,
        });
    };

    let data = normalize(kind, frame.data);
    let (message, validated) = match validate(kind, data.clone()) {
        Ok(message) => (message, true),
        Err(e) => {
            bump(&METRICS.validation_failures);
            warn!("[{}] passing through unvalidated payload: {}", frame.tag, e);
            (InboundMessage::Unvalidated { kind, data }, false)
        }
    };

    Ok(Decoded {
        tag: frame.tag,
        kind: Some(kind),
        message,
        validated,
    })
}

/// Reconciles array-vs-object representations of the same payload.
///
/// - keyed map expected, array received: each item is keyed by its
///   natural key (e.g. `Serial`), falling back to its index
/// - list expected, object received: the object's values in key order
///   (numeric keys ordered numerically)
///
/// Every other combination is returned untouched.
pub fn normalize(kind: MessageKind, data: Value) -> Value {
    match (kind.payload_shape(), data) {
        (PayloadShape::KeyedMap { natural_key }, Value::Array(items)) => {
            let mut map = Map::with_capacity(items.len());
            for (index, item) in items.into_iter().enumerate() {
                let key = item
                    .get(natural_key)
                    .and_then(util::value_as_key)
                    .unwrap_or_else(|| index.to_string());
                map.insert(key, item);
            }
            Value::Object(map)
        }
        (PayloadShape::List, Value::Object(map)) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|(a, _), (b, _)| match (a.parse::<u64>(), b.parse::<u64>()) {
                (Ok(x), Ok(y)) => x.cmp(&y),
                _ => a.cmp(b),
            });
            Value::Array(entries.into_iter().map(|(_, v)| v).collect())
        }
        (_, data) => data,
    }
}

/// Checks a (normalized) payload against the schema of `kind`.
pub fn validate(kind: MessageKind, data: Value) -> Result<InboundMessage, GatewayError> {
    Ok(match kind {
        MessageKind::LoginResult => InboundMessage::LoginResult(parse(kind, data)?),
        MessageKind::SensorList => InboundMessage::SensorList(parse(kind, data)?),
        MessageKind::ReadingHistory => InboundMessage::ReadingHistory(parse(kind, data)?),
        MessageKind::TemperatureHistory => InboundMessage::TemperatureHistory(parse(kind, data)?),
        MessageKind::BatteryHistory => InboundMessage::BatteryHistory(parse(kind, data)?),
        MessageKind::Error => InboundMessage::Error(parse(kind, data)?),
        MessageKind::SensorConnectionChanged => {
            InboundMessage::SensorConnectionChanged(parse(kind, data)?)
        }
        MessageKind::ReadingStarted => InboundMessage::ReadingStarted(parse(kind, data)?),
        MessageKind::ReadingComplete => InboundMessage::ReadingComplete(parse(kind, data)?),
        MessageKind::TemperatureComplete => {
            InboundMessage::TemperatureComplete(parse(kind, data)?)
        }
        MessageKind::BatteryComplete => InboundMessage::BatteryComplete(parse(kind, data)?),
        MessageKind::Login
        | MessageKind::Subscribe
        | MessageKind::Unsubscribe
        | MessageKind::GetSensors
        | MessageKind::GetConnectedSensors
        | MessageKind::TriggerReading
        | MessageKind::TriggerTemperatureReading
        | MessageKind::TriggerBatteryReading
        | MessageKind::GetReadings
        | MessageKind::GetTemperatureReadings
        | MessageKind::GetBatteryReadings => {
            return Err(GatewayError::Validation {
                message_type: kind.to_string(),
                reason: "request type received from gateway".to_string(),
            });
        }
    })
}

fn parse<T: DeserializeOwned>(kind: MessageKind, data: Value) -> Result<T, GatewayError> {
    serde_json::from_value(data).map_err(|e| GatewayError::Validation {
        message_type: kind.to_string(),
        reason: e.to_string(),
    })
}
