//! Local push-notification routing.
//!
//! Listeners register a glob pattern (`*` any run, `?` one character)
//! against push topics such as `reading/vibration/12345`. One inbound
//! message can match several patterns; every matching listener runs.
//!
//! This is purely local. Gateway-side delivery is controlled separately
//! by `GatewayConnection::subscribe` / `unsubscribe`.

use std::sync::Arc;

use globset::{Glob, GlobMatcher};

use crate::error::GatewayError;
use crate::schema::PushMessage;

pub type DataCallback = Arc<dyn Fn(&PushMessage) + Send + Sync>;

/// Handle returned by `on_data`, used to remove that listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// One glob pattern and the callbacks registered under it.
struct TopicSubscription {
    pattern: String,
    matcher: GlobMatcher,
    callbacks: Vec<(ListenerId, DataCallback)>,
}

#[derive(Default)]
pub struct TopicRouter {
    subscriptions: Vec<TopicSubscription>,
    next_id: u64,
}

impl TopicRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `callback` for every topic matching `pattern`.
    pub fn add(&mut self, pattern: &str, callback: DataCallback) -> Result<ListenerId, GatewayError> {
        self.next_id += 1;
        let id = ListenerId(self.next_id);

        if let Some(existing) = self.subscriptions.iter_mut().find(|s| s.pattern == pattern) {
            existing.callbacks.push((id, callback));
            return Ok(id);
        }

        let matcher = Glob::new(pattern)
            .map_err(|e| GatewayError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })?
            .compile_matcher();
        self.subscriptions.push(TopicSubscription {
            pattern: pattern.to_string(),
            matcher,
            callbacks: vec![(id, callback)],
        });
        Ok(id)
    }

    /// Removes one listener. Returns `false` if it was already gone.
    pub fn remove(&mut self, id: ListenerId) -> bool {
        let mut removed = false;
        for sub in &mut self.subscriptions {
            let before = sub.callbacks.len();
            sub.callbacks.retain(|(cid, _)| *cid != id);
            removed |= sub.callbacks.len() != before;
        }
        self.subscriptions.retain(|s| !s.callbacks.is_empty());
        removed
    }

    /// Callbacks whose pattern matches `topic`, in registration order.
    ///
    /// Returned as owned handles so the caller can invoke them without
    /// holding the router lock.
    pub fn matching(&self, topic: &str) -> Vec<DataCallback> {
        self.subscriptions
            .iter()
            .filter(|s| s.matcher.is_match(topic))
            .flat_map(|s| s.callbacks.iter().map(|(_, cb)| cb.clone()))
            .collect()
    }

    pub fn patterns(&self) -> Vec<String> {
        self.subscriptions.iter().map(|s| s.pattern.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }
}
