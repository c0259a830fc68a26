// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Topic-to-sessions fan-out map. Exact-match only: this broker does no
//! wildcard expansion, so a topic string is just an opaque key.

use std::collections::{BTreeMap, BTreeSet};

use crate::types::SessionId;

/// Maps a topic string to the ordered set of sessions subscribed to it.
///
/// `BTreeMap`/`BTreeSet` rather than a hash map: spec.md requires fan-out
/// order to be deterministic within one broadcast, and an ordered
/// collection gives that for free without a separate insertion-order
/// tracker.
#[derive(Debug, Default)]
pub struct SubscriptionIndex {
    topics: BTreeMap<String, BTreeSet<SessionId>>,
}

impl SubscriptionIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent: subscribing twice to the same topic is a no-op.
    pub fn add(&mut self, topic: &str, session: SessionId) {
        self.topics.entry(topic.to_string()).or_default().insert(session);
    }

    /// Removes the edge and prunes the topic entry once it is empty.
    pub fn remove(&mut self, topic: &str, session: SessionId) {
        if let Some(sessions) = self.topics.get_mut(topic) {
            sessions.remove(&session);
            if sessions.is_empty() {
                self.topics.remove(topic);
            }
        }
    }

    /// Exact-match lookup; empty if nobody is subscribed.
    #[must_use]
    pub fn subscribers(&self, topic: &str) -> Vec<SessionId> {
        self.topics
            .get(topic)
            .map(|sessions| sessions.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Removes every edge involving `session`, across all topics.
    pub fn drop_session(&mut self, session: SessionId) {
        self.topics.retain(|_, sessions| {
            sessions.remove(&session);
            !sessions.is_empty()
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_then_subscribers_round_trip() {
        let mut index = SubscriptionIndex::new();
        index.add("test", 1);
        assert_eq!(index.subscribers("test"), vec![1]);
    }

    #[test]
    fn add_is_idempotent() {
        let mut index = SubscriptionIndex::new();
        index.add("test", 1);
        index.add("test", 1);
        assert_eq!(index.subscribers("test"), vec![1]);
    }

    #[test]
    fn remove_prunes_empty_topic() {
        let mut index = SubscriptionIndex::new();
        index.add("test", 1);
        index.remove("test", 1);
        assert!(index.subscribers("test").is_empty());
        assert!(index.topics.is_empty());
    }

    #[test]
    fn drop_session_removes_every_edge() {
        let mut index = SubscriptionIndex::new();
        index.add("a", 1);
        index.add("b", 1);
        index.add("b", 2);
        index.drop_session(1);
        assert!(index.subscribers("a").is_empty());
        assert_eq!(index.subscribers("b"), vec![2]);
    }

    #[test]
    fn fan_out_order_is_deterministic() {
        let mut index = SubscriptionIndex::new();
        index.add("test", 3);
        index.add("test", 1);
        index.add("test", 2);
        let first = index.subscribers("test");
        let second = index.subscribers("test");
        assert_eq!(first, second);
        assert_eq!(first, vec![1, 2, 3]);
    }

    #[test]
    fn no_wildcard_expansion() {
        let mut index = SubscriptionIndex::new();
        index.add("a/b", 1);
        assert!(index.subscribers("a/+").is_empty());
        assert!(index.subscribers("a/#").is_empty());
    }
}
