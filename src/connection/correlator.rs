//! Request/response correlation.
//!
//! The gateway protocol does not echo request identifiers. A reply is
//! matched to the OLDEST pending request that expects its message kind
//! (FIFO per kind). Two concurrent requests expecting the same kind are
//! therefore answered in submission order, whatever the caller meant.
//!
//! Entries are keyed by submission order, so ordered iteration over the
//! map is oldest-first. Every entry leaves the map exactly once: through
//! `resolve`, `take_for_command`, `expire` or `drain`.

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::time::Instant;

use crate::schema::MessageKind;

/// What happens when an entry's deadline passes without a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadlinePolicy {
    /// Fail with a timeout.
    Reject,

    /// Treat silence as success (subscription grace window).
    AssumeSuccess,
}

#[derive(Debug)]
pub struct PendingCommand<C> {
    pub seq: u64,

    /// Request kind; generic error frames are matched on this.
    pub command: MessageKind,

    /// Response kind that resolves this entry, if any.
    pub expected: Option<MessageKind>,

    pub timeout: Duration,
    pub deadline: Instant,
    pub policy: DeadlinePolicy,

    /// Continuation run by the owner once the entry settles.
    pub completion: C,
}

pub struct Correlator<C> {
    next_seq: u64,
    pending: BTreeMap<u64, PendingCommand<C>>,
}

impl<C> Default for Correlator<C> {
    fn default() -> Self {
        Self {
            next_seq: 0,
            pending: BTreeMap::new(),
        }
    }
}

impl<C> Correlator<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entry and returns its submission sequence number.
    pub fn register(
        &mut self,
        command: MessageKind,
        expected: Option<MessageKind>,
        timeout: Duration,
        policy: DeadlinePolicy,
        completion: C,
    ) -> u64 {
        self.next_seq += 1;
        let seq = self.next_seq;
        self.pending.insert(
            seq,
            PendingCommand {
                seq,
                command,
                expected,
                timeout,
                deadline: Instant::now() + timeout,
                policy,
                completion,
            },
        );
        seq
    }

    /// Removes the oldest entry expecting `kind`.
    pub fn resolve(&mut self, kind: MessageKind) -> Option<PendingCommand<C>> {
        let seq = self
            .pending
            .values()
            .find(|p| p.expected == Some(kind))
            .map(|p| p.seq)?;
        self.pending.remove(&seq)
    }

    /// Removes the oldest entry issued as `command` (generic error frames).
    pub fn take_for_command(&mut self, command: MessageKind) -> Option<PendingCommand<C>> {
        let seq = self
            .pending
            .values()
            .find(|p| p.command == command)
            .map(|p| p.seq)?;
        self.pending.remove(&seq)
    }

    /// Removes and returns every entry whose deadline is at or before `now`,
    /// oldest first.
    pub fn expire(&mut self, now: Instant) -> Vec<PendingCommand<C>> {
        let due: Vec<u64> = self
            .pending
            .values()
            .filter(|p| p.deadline <= now)
            .map(|p| p.seq)
            .collect();
        due.into_iter()
            .filter_map(|seq| self.pending.remove(&seq))
            .collect()
    }

    /// Removes every entry, oldest first.
    pub fn drain(&mut self) -> Vec<PendingCommand<C>> {
        std::mem::take(&mut self.pending).into_values().collect()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|p| p.deadline).min()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
