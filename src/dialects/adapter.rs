use serde_json::Value;

use crate::config::GatewayIdentity;
use crate::schema::MessageKind;

/// GatewayDialect is the translation layer between:
/// - The canonical `MessageKind` vocabulary used by the client
/// - One vendor's wire tags, roles and login payload
///
/// Each dialect must:
/// - Map every `MessageKind` to exactly one wire tag
/// - Map every wire tag it knows back to the same `MessageKind`
/// - Build its own login payload
///
/// THREAD SAFETY:
/// - Must be Send + Sync
/// - One dialect instance is shared by every connection using it
///
pub trait GatewayDialect: Send + Sync {
    /// Canonical dialect name, as used in configuration.
    fn name(&self) -> &'static str;

    /// Wire tag written in the `Type` field for `kind`.
    fn tag(&self, kind: MessageKind) -> &'static str;

    /// Reverse lookup of a wire tag.
    ///
    /// Returns `None` for tags this dialect does not define; such frames
    /// are surfaced as `InboundMessage::Unknown`.
    fn kind(&self, tag: &str) -> Option<MessageKind>;

    /// Role written in the `From` field of outbound frames.
    fn client_role(&self) -> &'static str;

    /// Role written in the `To` field of outbound frames.
    fn server_role(&self) -> &'static str;

    /// Payload of the login request.
    ///
    /// MUST NOT:
    /// - Perform network I/O
    /// - Log the password
    fn login_payload(&self, identity: &GatewayIdentity) -> Value;
}
