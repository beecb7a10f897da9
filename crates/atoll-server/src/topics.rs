//! The inverted subscription index: topic → local subscriber aliases.
//!
//! The index and each peer's own `topics` set are two views of the same
//! relation; the broker keeps them in lock-step. Divergence is a programming
//! error and aborts — the registry cannot be trusted after that.

use std::collections::{HashMap, HashSet};

#[derive(Debug, Default)]
pub struct SubscriptionIndex {
    by_topic: HashMap<String, HashSet<u64>>,
}

impl SubscriptionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a set-replace subscription change for `alias`.
    ///
    /// `old` is the peer's current topic set, `new` the replacement; the
    /// caller updates the peer record with `new` afterwards.
    pub fn replace(&mut self, alias: u64, old: &HashSet<String>, new: &HashSet<String>) {
        for topic in old.difference(new) {
            self.remove_subscription(alias, topic);
        }
        for topic in new.difference(old) {
            self.by_topic.entry(topic.clone()).or_default().insert(alias);
        }
    }

    /// Drop every subscription of a departing peer.
    pub fn remove_peer(&mut self, alias: u64, topics: &HashSet<String>) {
        for topic in topics {
            self.remove_subscription(alias, topic);
        }
    }

    fn remove_subscription(&mut self, alias: u64, topic: &str) {
        let Some(subscribers) = self.by_topic.get_mut(topic) else {
            panic!("subscription index diverged: peer {alias} holds topic {topic:?} with no index entry");
        };
        if !subscribers.remove(&alias) {
            panic!("subscription index diverged: peer {alias} missing from index entry for {topic:?}");
        }
        // Last subscriber out removes the key — empty sets never linger.
        if subscribers.is_empty() {
            self.by_topic.remove(topic);
        }
    }

    pub fn subscribers(&self, topic: &str) -> Option<&HashSet<u64>> {
        self.by_topic.get(topic)
    }

    pub fn topic_count(&self) -> usize {
        self.by_topic.len()
    }

    pub fn contains_alias(&self, alias: u64) -> bool {
        self.by_topic.values().any(|s| s.contains(&alias))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(topics: &[&str]) -> HashSet<String> {
        topics.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn replace_computes_diff() {
        let mut index = SubscriptionIndex::new();
        let old = set(&[]);
        let new = set(&["a", "b"]);
        index.replace(1, &old, &new);
        assert!(index.subscribers("a").unwrap().contains(&1));
        assert!(index.subscribers("b").unwrap().contains(&1));

        // Replace, not merge: "a" goes away, "c" appears.
        let newer = set(&["b", "c"]);
        index.replace(1, &new, &newer);
        assert!(index.subscribers("a").is_none());
        assert!(index.subscribers("b").unwrap().contains(&1));
        assert!(index.subscribers("c").unwrap().contains(&1));
    }

    #[test]
    fn empty_replacement_clears_everything() {
        let mut index = SubscriptionIndex::new();
        let topics = set(&["x", "y"]);
        index.replace(3, &set(&[]), &topics);
        index.replace(3, &topics, &set(&[]));
        assert_eq!(index.topic_count(), 0);
        assert!(!index.contains_alias(3));
    }

    #[test]
    fn last_subscriber_removes_topic_key() {
        let mut index = SubscriptionIndex::new();
        index.replace(1, &set(&[]), &set(&["t"]));
        index.replace(2, &set(&[]), &set(&["t"]));
        index.remove_peer(1, &set(&["t"]));
        assert_eq!(index.subscribers("t").unwrap().len(), 1);
        index.remove_peer(2, &set(&["t"]));
        assert!(index.subscribers("t").is_none());
        assert_eq!(index.topic_count(), 0);
    }

    #[test]
    #[should_panic(expected = "subscription index diverged")]
    fn divergence_aborts() {
        let mut index = SubscriptionIndex::new();
        // Peer claims a topic the index never saw.
        index.remove_peer(9, &set(&["ghost"]));
    }
}
