//! Single-gateway connectivity.
//!
//! This module provides:
//! - `GatewayConnection`, the caller-facing handle
//! - The connection state machine and its statistics
//! - FIFO request/response correlation
//! - Bounded automatic reconnection
//!
//! Each connection is owned by one tokio task (`driver`); handles only
//! exchange messages with it, so no connection state is shared.

pub mod correlator;
mod driver;
mod handle;
pub mod reconnect;
pub mod state;

pub use driver::{Reply, SubscriptionOutcome};
pub use handle::GatewayConnection;
pub use state::{ConnectionState, ConnectionStats, StateChange};
