use std::time::Duration;

use thiserror::Error;

use crate::connection::state::ConnectionState;

/// Coarse classification of a [`GatewayError`].
///
/// Outer layers (banners, toasts, audit logs) switch on this instead of
/// matching every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Transport,
    ProtocolValidation,
    Authentication,
    CommandTimeout,
    SubscriptionUnsupported,
    Gateway,
    InvalidState,
    NotConnected,
    Credentials,
    InvalidPattern,
}

/// Every failure the connectivity layer can report.
///
/// The type is `Clone` because a single failure may be handed to the
/// waiting caller and fanned out to error listeners at the same time.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    /// Socket-level failure before a logical reply.
    #[error("transport error: {0}")]
    Transport(String),

    /// A frame or payload did not match its schema.
    #[error("invalid {message_type} payload: {reason}")]
    Validation { message_type: String, reason: String },

    /// Explicit login rejection or malformed login reply.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// No correlated response before the deadline.
    #[error("command {command} timed out after {after:?}")]
    CommandTimeout { command: String, after: Duration },

    /// The gateway answered a subscribe attempt with an error.
    #[error("subscriptions not supported by gateway: {0}")]
    SubscriptionUnsupported(String),

    /// Generic error frame sent by the gateway.
    #[error("gateway rejected {command}: {message}")]
    Gateway { command: String, message: String },

    #[error("cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: ConnectionState,
    },

    /// The connection was torn down while the operation was in flight.
    #[error("connection closed by caller")]
    Disconnected,

    #[error("gateway {0} is not connected")]
    NotConnected(String),

    /// The credential collaborator could not supply an identity.
    #[error("no credentials for gateway {0}")]
    Credentials(String),

    #[error("invalid topic pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

impl GatewayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::Transport(_) | GatewayError::Disconnected => ErrorKind::Transport,
            GatewayError::Validation { .. } => ErrorKind::ProtocolValidation,
            GatewayError::Authentication(_) => ErrorKind::Authentication,
            GatewayError::CommandTimeout { .. } => ErrorKind::CommandTimeout,
            GatewayError::SubscriptionUnsupported(_) => ErrorKind::SubscriptionUnsupported,
            GatewayError::Gateway { .. } => ErrorKind::Gateway,
            GatewayError::InvalidState { .. } => ErrorKind::InvalidState,
            GatewayError::NotConnected(_) => ErrorKind::NotConnected,
            GatewayError::Credentials(_) => ErrorKind::Credentials,
            GatewayError::InvalidPattern { .. } => ErrorKind::InvalidPattern,
        }
    }

    /// The command this error originated from, when known.
    pub fn command(&self) -> Option<&str> {
        match self {
            GatewayError::CommandTimeout { command, .. } | GatewayError::Gateway { command, .. } => {
                Some(command)
            }
            _ => None,
        }
    }

    /// `true` for failures that must never abort a connect/authenticate flow.
    pub fn is_soft(&self) -> bool {
        matches!(self, GatewayError::SubscriptionUnsupported(_))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for GatewayError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        GatewayError::Transport(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_and_command_are_exposed() {
        let err = GatewayError::Gateway {
            command: "GET_DYN".into(),
            message: "busy".into(),
        };
        assert_eq!(err.kind(), ErrorKind::Gateway);
        assert_eq!(err.command(), Some("GET_DYN"));
        assert_eq!(err.to_string(), "gateway rejected GET_DYN: busy");
    }

    #[test]
    fn test_only_unsupported_subscription_is_soft() {
        assert!(GatewayError::SubscriptionUnsupported("no".into()).is_soft());
        assert!(!GatewayError::Authentication("bad password".into()).is_soft());
        assert!(!GatewayError::Disconnected.is_soft());
    }
}
