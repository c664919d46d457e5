use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;

/// Process-wide counters for the gateway connectivity layer.
///
/// Lock-free atomics, safe to bump from any connection task. They are
/// informational only; nothing in the client reads them back to make
/// decisions.
#[derive(Default)]
pub struct RuntimeMetrics {
    // Connections
    pub connections_active: AtomicUsize,
    pub connect_failures: AtomicUsize,
    pub reconnects_scheduled: AtomicUsize,
    pub auth_failures: AtomicUsize,

    // Traffic
    pub frames_sent: AtomicUsize,
    pub frames_received: AtomicUsize,
    pub push_messages: AtomicUsize,

    // Protocol health
    pub parse_errors: AtomicUsize,
    pub validation_failures: AtomicUsize,
    pub command_timeouts: AtomicUsize,
    pub gateway_errors: AtomicUsize,
}

impl RuntimeMetrics {
    /// One-line summary, used by the binary's periodic reporter.
    pub fn summary(&self) -> String {
        format!(
            "conn={} conn_fail={} reconnects={} auth_fail={} sent={} recv={} push={} parse_err={} invalid={} timeouts={} gw_err={}",
            self.connections_active.load(Ordering::Relaxed),
            self.connect_failures.load(Ordering::Relaxed),
            self.reconnects_scheduled.load(Ordering::Relaxed),
            self.auth_failures.load(Ordering::Relaxed),
            self.frames_sent.load(Ordering::Relaxed),
            self.frames_received.load(Ordering::Relaxed),
            self.push_messages.load(Ordering::Relaxed),
            self.parse_errors.load(Ordering::Relaxed),
            self.validation_failures.load(Ordering::Relaxed),
            self.command_timeouts.load(Ordering::Relaxed),
            self.gateway_errors.load(Ordering::Relaxed),
        )
    }
}

/// Global metrics registry (singleton)
pub static METRICS: Lazy<Arc<RuntimeMetrics>> = Lazy::new(|| Arc::new(RuntimeMetrics::default()));

/// Increments a counter with relaxed ordering.
pub fn bump(counter: &AtomicUsize) {
    counter.fetch_add(1, Ordering::Relaxed);
}
