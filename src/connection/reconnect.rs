use std::time::Duration;

use tokio::time::Instant;

use super::state::ConnectionState;
use crate::config::ConnectionOptions;

/// Outcome of reporting a transport loss to the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Not eligible for automatic recovery (disabled, clean, or caller-initiated).
    Skip,

    /// Attempt number `attempt` will start at `at`.
    Scheduled { attempt: u32, at: Instant },

    /// The attempt budget is spent; the connection moves to `closed`.
    Exhausted,
}

/// Why the transport went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Loss {
    /// State the connection was in when the loss was observed.
    pub previous: ConnectionState,

    /// Closing handshake completed normally.
    pub clean: bool,

    /// Caller asked for it (`disconnect`, failed login teardown).
    pub caller_initiated: bool,

    /// The failed transport was itself a scheduled reconnect attempt.
    pub during_recovery: bool,
}

/// Bounded automatic reconnection.
///
/// GUARANTEES:
/// - `attempts()` never exceeds the configured maximum
/// - at most one attempt is scheduled at a time
/// - `reset()` after any successful connect restores the full budget
pub struct ReconnectScheduler {
    enabled: bool,
    interval: Duration,
    max_attempts: u32,
    attempts: u32,
    due: Option<Instant>,
}

impl ReconnectScheduler {
    pub fn new(options: &ConnectionOptions) -> Self {
        Self {
            enabled: options.auto_reconnect,
            interval: options.reconnect_interval(),
            max_attempts: options.max_reconnect_attempts,
            attempts: 0,
            due: None,
        }
    }

    pub fn is_eligible(&self, loss: &Loss) -> bool {
        let was_open = matches!(
            loss.previous,
            ConnectionState::Connected | ConnectionState::Authenticated
        );
        self.enabled && !loss.clean && !loss.caller_initiated && (was_open || loss.during_recovery)
    }

    /// Decides what follows a transport loss and arms the timer if needed.
    pub fn on_loss(&mut self, loss: Loss) -> ReconnectDecision {
        if !self.is_eligible(&loss) {
            return ReconnectDecision::Skip;
        }
        if self.attempts >= self.max_attempts {
            self.due = None;
            return ReconnectDecision::Exhausted;
        }
        self.attempts += 1;
        let at = Instant::now() + self.interval;
        self.due = Some(at);
        ReconnectDecision::Scheduled {
            attempt: self.attempts,
            at,
        }
    }

    /// Consumes the armed timer if it is due.
    pub fn take_due(&mut self, now: Instant) -> bool {
        match self.due {
            Some(at) if at <= now => {
                self.due = None;
                true
            }
            _ => false,
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.due
    }

    pub fn is_scheduled(&self) -> bool {
        self.due.is_some()
    }

    pub fn cancel(&mut self) {
        self.due = None;
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}
