//! Gateway protocol dialects and dialect factory
//!
//! This module provides:
//! - The `GatewayDialect` translation trait
//! - One table per supported firmware family
//! - A factory resolving a configured `DialectKind` to its table
//!
//! The rest of the crate speaks only canonical `MessageKind`s; wire tags
//! never leave the codec.

pub mod adapter;
pub mod classic;
pub mod v2;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use adapter::GatewayDialect;

/// Dialect selector used in configuration and identities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialectKind {
    #[default]
    Classic,
    V2,
}

/// Returns the translation table for a dialect.
pub fn get_dialect(kind: DialectKind) -> Arc<dyn GatewayDialect> {
    match kind {
        DialectKind::Classic => Arc::new(classic::ClassicDialect),
        DialectKind::V2 => Arc::new(v2::V2Dialect),
    }
}
