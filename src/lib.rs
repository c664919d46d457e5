// ------------------------------------------------------------
// Module declarations
// ------------------------------------------------------------
//
// Each module represents a well-defined responsibility:
//
// - config:       Configuration structs loaded from JSON
// - schema:       Strongly typed gateway message definitions
// - dialects:     Wire-tag tables per gateway firmware family
// - codec:        Frame encoding, normalization and validation
// - connection:   One gateway connection (state machine, correlation, reconnect)
// - registry:     Connections keyed by gateway id
// - subscription: Local glob routing of push messages
// - signal:       Waveform conversion, integration and spectra
// - metrics:      Process-wide counters
// - util:         Shared helpers (time, lenient number parsing)
//
pub mod codec;
pub mod config;
pub mod connection;
pub mod dialects;
pub mod error;
pub mod metrics;
pub mod registry;
pub mod schema;
pub mod signal;
pub mod subscription;
pub mod util;

pub use config::{Config, ConnectionOptions, GatewayIdentity};
pub use connection::{
    ConnectionState, ConnectionStats, GatewayConnection, Reply, StateChange, SubscriptionOutcome,
};
pub use error::{ErrorKind, GatewayError};
pub use registry::{CredentialProvider, GatewayRegistry, StateListener};
pub use schema::{MessageKind, PushMessage, Request};
