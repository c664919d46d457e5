use serde_json::{Value, json};

use crate::config::GatewayIdentity;
use crate::schema::MessageKind;

use super::adapter::GatewayDialect;

/// Second-generation gateway dialect.
///
/// Dotted lower-case tags grouped by subject (`auth.*`, `sensors.*`,
/// `reading.*`, ...). Login carries the gateway serial next to the
/// username, and the gateway rejects logins whose serial does not match.
pub struct V2Dialect;

impl GatewayDialect for V2Dialect {
    fn name(&self) -> &'static str {
        "v2"
    }

    fn tag(&self, kind: MessageKind) -> &'static str {
        match kind {
            MessageKind::Login => "auth.login",
            MessageKind::Subscribe => "events.subscribe",
            MessageKind::Unsubscribe => "events.unsubscribe",
            MessageKind::GetSensors => "sensors.list",
            MessageKind::GetConnectedSensors => "sensors.connected",
            MessageKind::TriggerReading => "reading.trigger",
            MessageKind::TriggerTemperatureReading => "temperature.trigger",
            MessageKind::TriggerBatteryReading => "battery.trigger",
            MessageKind::GetReadings => "reading.history",
            MessageKind::GetTemperatureReadings => "temperature.history",
            MessageKind::GetBatteryReadings => "battery.history",
            MessageKind::LoginResult => "auth.result",
            MessageKind::SensorList => "sensors.result",
            MessageKind::ReadingHistory => "reading.history.result",
            MessageKind::TemperatureHistory => "temperature.history.result",
            MessageKind::BatteryHistory => "battery.history.result",
            MessageKind::Error => "error",
            MessageKind::SensorConnectionChanged => "sensor.connection",
            MessageKind::ReadingStarted => "reading.started",
            MessageKind::ReadingComplete => "reading.complete",
            MessageKind::TemperatureComplete => "temperature.complete",
            MessageKind::BatteryComplete => "battery.complete",
        }
    }

    fn kind(&self, tag: &str) -> Option<MessageKind> {
        Some(match tag {
            "auth.login" => MessageKind::Login,
            "events.subscribe" => MessageKind::Subscribe,
            "events.unsubscribe" => MessageKind::Unsubscribe,
            "sensors.list" => MessageKind::GetSensors,
            "sensors.connected" => MessageKind::GetConnectedSensors,
            "reading.trigger" => MessageKind::TriggerReading,
            "temperature.trigger" => MessageKind::TriggerTemperatureReading,
            "battery.trigger" => MessageKind::TriggerBatteryReading,
            "reading.history" => MessageKind::GetReadings,
            "temperature.history" => MessageKind::GetTemperatureReadings,
            "battery.history" => MessageKind::GetBatteryReadings,
            "auth.result" => MessageKind::LoginResult,
            "sensors.result" => MessageKind::SensorList,
            "reading.history.result" => MessageKind::ReadingHistory,
            "temperature.history.result" => MessageKind::TemperatureHistory,
            "battery.history.result" => MessageKind::BatteryHistory,
            "error" => MessageKind::Error,
            "sensor.connection" => MessageKind::SensorConnectionChanged,
            "reading.started" => MessageKind::ReadingStarted,
            "reading.complete" => MessageKind::ReadingComplete,
            "temperature.complete" => MessageKind::TemperatureComplete,
            "battery.complete" => MessageKind::BatteryComplete,
            _ => return None,
        })
    }

    fn client_role(&self) -> &'static str {
        "client"
    }

    fn server_role(&self) -> &'static str {
        "gateway"
    }

    fn login_payload(&self, identity: &GatewayIdentity) -> Value {
        json!({
            "Username": identity.username,
            "Password": identity.password,
            "Serial": identity.serial_number,
        })
    }
}
