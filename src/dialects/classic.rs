use serde_json::{Value, json};

use crate::config::GatewayIdentity;
use crate::schema::MessageKind;

use super::adapter::GatewayDialect;

/// Classic gateway firmware dialect.
///
/// Tags:
/// - requests:   POST_* / GET_* / TAKE_*
/// - responses:  RTN_*
/// - push:       NOT_*
///
/// Login is by e-mail address.
pub struct ClassicDialect;

impl GatewayDialect for ClassicDialect {
    fn name(&self) -> &'static str {
        "classic"
    }

    fn tag(&self, kind: MessageKind) -> &'static str {
        match kind {
            MessageKind::Login => "POST_LOGIN",
            MessageKind::Subscribe => "POST_SUB_CHANGES",
            MessageKind::Unsubscribe => "POST_UNSUB_CHANGES",
            MessageKind::GetSensors => "GET_DYN",
            MessageKind::GetConnectedSensors => "GET_DYN_CONNECTED",
            MessageKind::TriggerReading => "TAKE_DYN_READING",
            MessageKind::TriggerTemperatureReading => "TAKE_DYN_TEMP",
            MessageKind::TriggerBatteryReading => "TAKE_DYN_BATT",
            MessageKind::GetReadings => "GET_DYN_READINGS",
            MessageKind::GetTemperatureReadings => "GET_DYN_TEMPS",
            MessageKind::GetBatteryReadings => "GET_DYN_BATTS",
            MessageKind::LoginResult => "RTN_LOGIN",
            MessageKind::SensorList => "RTN_DYN",
            MessageKind::ReadingHistory => "RTN_DYN_READINGS",
            MessageKind::TemperatureHistory => "RTN_DYN_TEMPS",
            MessageKind::BatteryHistory => "RTN_DYN_BATTS",
            MessageKind::Error => "RTN_ERR",
            MessageKind::SensorConnectionChanged => "NOT_DYN_CONN",
            MessageKind::ReadingStarted => "NOT_DYN_READING_STARTED",
            MessageKind::ReadingComplete => "NOT_DYN_READING",
            MessageKind::TemperatureComplete => "NOT_DYN_TEMP",
            MessageKind::BatteryComplete => "NOT_DYN_BATT",
        }
    }

    fn kind(&self, tag: &str) -> Option<MessageKind> {
        Some(match tag {
            "POST_LOGIN" => MessageKind::Login,
            "POST_SUB_CHANGES" => MessageKind::Subscribe,
            "POST_UNSUB_CHANGES" => MessageKind::Unsubscribe,
            "GET_DYN" => MessageKind::GetSensors,
            "GET_DYN_CONNECTED" => MessageKind::GetConnectedSensors,
            "TAKE_DYN_READING" => MessageKind::TriggerReading,
            "TAKE_DYN_TEMP" => MessageKind::TriggerTemperatureReading,
            "TAKE_DYN_BATT" => MessageKind::TriggerBatteryReading,
            "GET_DYN_READINGS" => MessageKind::GetReadings,
            "GET_DYN_TEMPS" => MessageKind::GetTemperatureReadings,
            "GET_DYN_BATTS" => MessageKind::GetBatteryReadings,
            "RTN_LOGIN" => MessageKind::LoginResult,
            "RTN_DYN" => MessageKind::SensorList,
            "RTN_DYN_READINGS" => MessageKind::ReadingHistory,
            "RTN_DYN_TEMPS" => MessageKind::TemperatureHistory,
            "RTN_DYN_BATTS" => MessageKind::BatteryHistory,
            "RTN_ERR" => MessageKind::Error,
            "NOT_DYN_CONN" => MessageKind::SensorConnectionChanged,
            "NOT_DYN_READING_STARTED" => MessageKind::ReadingStarted,
            "NOT_DYN_READING" => MessageKind::ReadingComplete,
            "NOT_DYN_TEMP" => MessageKind::TemperatureComplete,
            "NOT_DYN_BATT" => MessageKind::BatteryComplete,
            _ => return None,
        })
    }

    fn client_role(&self) -> &'static str {
        "UI"
    }

    fn server_role(&self) -> &'static str {
        "SERV"
    }

    fn login_payload(&self, identity: &GatewayIdentity) -> Value {
        json!({
            "Email": identity.username,
            "Password": identity.password,
        })
    }
}
