use std::fmt;
use std::time::Duration;

use serde::Deserialize;

use crate::dialects::DialectKind;
use crate::error::GatewayError;
use crate::registry::CredentialProvider;

// ------------------------------------------------------------
// Root configuration
// ------------------------------------------------------------
//
// Top-level structure loaded from `config.json` by the binary.
//
// It defines:
// - The gateways this process may connect to
// - Connection tuning shared by every gateway
// - Optional debug configuration
//
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Known gateways and their credentials
    pub gateways: Vec<GatewayConfig>,

    /// Connection tuning (all fields defaulted)
    #[serde(default)]
    pub connection: ConnectionOptions,

    /// Optional debug configuration
    pub debug: Option<DebugConfig>,
}

impl Config {
    pub fn from_json(data: &str) -> serde_json::Result<Self> {
        serde_json::from_str(data)
    }

    pub fn gateway(&self, id: &str) -> Option<&GatewayConfig> {
        self.gateways.iter().find(|g| g.id == id)
    }
}

// ------------------------------------------------------------
// Gateway configuration
// ------------------------------------------------------------
//
// NOTE:
// - The password is security-sensitive and must never be committed.
// - In the full product these records come from the equipment
//   database; the file form exists for the standalone binary.
//
#[derive(Deserialize, Clone)]
pub struct GatewayConfig {
    pub id: String,
    pub url: String,
    pub username: String,
    pub password: String,

    #[serde(default)]
    pub serial_number: String,

    #[serde(default)]
    pub dialect: DialectKind,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("id", &self.id)
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("serial_number", &self.serial_number)
            .field("dialect", &self.dialect)
            .field("enabled", &self.enabled)
            .finish()
    }
}

impl GatewayConfig {
    pub fn identity(&self) -> GatewayIdentity {
        GatewayIdentity {
            id: self.id.clone(),
            url: self.url.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            serial_number: self.serial_number.clone(),
            dialect: self.dialect,
        }
    }
}

/// Everything needed to reach and log into one gateway.
///
/// Supplied by a `CredentialProvider`; the connectivity layer keeps it in
/// memory only for the lifetime of the connection.
#[derive(Clone, PartialEq, Eq)]
pub struct GatewayIdentity {
    pub id: String,
    pub url: String,
    pub username: String,
    pub password: String,
    pub serial_number: String,
    pub dialect: DialectKind,
}

impl fmt::Debug for GatewayIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayIdentity")
            .field("id", &self.id)
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("serial_number", &self.serial_number)
            .field("dialect", &self.dialect)
            .finish()
    }
}

// ------------------------------------------------------------
// Connection options
// ------------------------------------------------------------
//
// Every suspend-capable operation has a finite deadline here.
//
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ConnectionOptions {
    /// Reconnect automatically after an unexpected, non-clean close
    pub auto_reconnect: bool,

    /// Delay before each automatic reconnect attempt
    pub reconnect_interval_ms: u64,

    /// Automatic attempts before giving up (state `closed`)
    pub max_reconnect_attempts: u32,

    /// Upper bound for opening the transport
    pub connect_timeout_ms: u64,

    /// Default deadline for correlated commands
    pub command_timeout_ms: u64,

    /// Deadline for the login reply
    pub auth_timeout_ms: u64,

    /// Window in which a subscribe error is still attributed to the attempt
    pub subscription_grace_ms: u64,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            auto_reconnect: true,
            reconnect_interval_ms: 5_000,
            max_reconnect_attempts: 5,
            connect_timeout_ms: 10_000,
            command_timeout_ms: 10_000,
            auth_timeout_ms: 15_000,
            subscription_grace_ms: 500,
        }
    }
}

impl ConnectionOptions {
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn auth_timeout(&self) -> Duration {
        Duration::from_millis(self.auth_timeout_ms)
    }

    pub fn subscription_grace(&self) -> Duration {
        Duration::from_millis(self.subscription_grace_ms)
    }
}

// ------------------------------------------------------------
// Debug configuration
// ------------------------------------------------------------
#[derive(Debug, Deserialize, Clone, Default)]
pub struct DebugConfig {
    /// Logs every push message at info level
    pub log_push: Option<bool>,

    /// Seconds between metric summaries (default 10)
    pub metrics_interval_secs: Option<u64>,
}

fn default_true() -> bool {
    true
}

/// The file configuration doubles as a static credential source.
#[async_trait::async_trait]
impl CredentialProvider for Config {
    async fn credentials(&self, gateway_id: &str) -> Result<GatewayIdentity, GatewayError> {
        self.gateway(gateway_id)
            .map(GatewayConfig::identity)
            .ok_or_else(|| GatewayError::Credentials(gateway_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "gateways": [
            {
                "id": "plant-a",
                "url": "ws://10.0.0.5:5000",
                "username": "ops@example.com",
                "password": "hunter2",
                "serial_number": "GW-001"
            },
            {
                "id": "plant-b",
                "url": "ws://10.0.0.6:5000",
                "username": "ops",
                "password": "secret",
                "dialect": "v2",
                "enabled": false
            }
        ],
        "connection": { "max_reconnect_attempts": 3 }
    }"#;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let cfg = Config::from_json(SAMPLE).unwrap();
        assert_eq!(cfg.connection.max_reconnect_attempts, 3);
        assert_eq!(cfg.connection.reconnect_interval_ms, 5_000);
        assert_eq!(cfg.connection.command_timeout(), Duration::from_secs(10));
        assert_eq!(cfg.connection.subscription_grace(), Duration::from_millis(500));
        assert!(cfg.connection.auto_reconnect);

        let a = cfg.gateway("plant-a").unwrap();
        assert_eq!(a.dialect, DialectKind::Classic);
        assert!(a.enabled);
        let b = cfg.gateway("plant-b").unwrap();
        assert_eq!(b.dialect, DialectKind::V2);
        assert!(!b.enabled);
    }

    #[test]
    fn test_debug_output_redacts_password() {
        let cfg = Config::from_json(SAMPLE).unwrap();
        let identity = cfg.gateway("plant-a").unwrap().identity();
        let rendered = format!("{identity:?} {:?}", cfg.gateways[0]);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }

    #[tokio::test]
    async fn test_config_supplies_credentials() {
        let cfg = Config::from_json(SAMPLE).unwrap();
        let identity = cfg.credentials("plant-a").await.unwrap();
        assert_eq!(identity.serial_number, "GW-001");
        assert!(matches!(
            cfg.credentials("missing").await,
            Err(GatewayError::Credentials(id)) if id == "missing"
        ));
    }
}
