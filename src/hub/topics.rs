use std::collections::{HashMap, HashSet, hash_map::Entry};

use super::types::SessionId;

/// Two-sided index between topics (form ids) and sessions.
///
/// Both sides are updated together, so a session's topic set always mirrors
/// its topic memberships, and a topic is present only while it has at least
/// one subscriber.
#[derive(Debug, Default)]
pub struct TopicIndex {
    topics: HashMap<String, HashSet<SessionId>>,
    sessions: HashMap<SessionId, HashSet<String>>,
}

impl TopicIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` when the session already held the topic.
    pub fn subscribe(&mut self, session: SessionId, topic: &str) -> bool {
        let added = self
            .topics
            .entry(topic.to_string())
            .or_default()
            .insert(session);
        self.sessions
            .entry(session)
            .or_default()
            .insert(topic.to_string());
        added
    }

    /// Returns `false` when the session did not hold the topic.
    pub fn unsubscribe(&mut self, session: SessionId, topic: &str) -> bool {
        let removed = match self.topics.entry(topic.to_string()) {
            Entry::Occupied(mut entry) => {
                let removed = entry.get_mut().remove(&session);
                if entry.get().is_empty() {
                    entry.remove();
                }
                removed
            },
            Entry::Vacant(_) => false,
        };
        if let Entry::Occupied(mut entry) = self.sessions.entry(session) {
            entry.get_mut().remove(topic);
            if entry.get().is_empty() {
                entry.remove();
            }
        }
        removed
    }

    /// Drops every membership of the session, pruning emptied topics.
    /// Returns the topics the session held.
    pub fn remove_session(&mut self, session: SessionId) -> Vec<String> {
        let Some(held) = self.sessions.remove(&session) else {
            return Vec::new();
        };
        for topic in &held {
            if let Entry::Occupied(mut entry) = self.topics.entry(topic.clone()) {
                entry.get_mut().remove(&session);
                if entry.get().is_empty() {
                    entry.remove();
                }
            }
        }
        held.into_iter().collect()
    }

    pub fn subscribers(&self, topic: &str) -> Vec<SessionId> {
        self.topics
            .get(topic)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.get(topic).map_or(0, HashSet::len)
    }

    pub fn is_subscribed(&self, session: SessionId, topic: &str) -> bool {
        self.sessions
            .get(&session)
            .is_some_and(|topics| topics.contains(topic))
    }

    pub fn topics_of(&self, session: SessionId) -> Vec<String> {
        let mut topics: Vec<String> = self
            .sessions
            .get(&session)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        topics.sort();
        topics
    }

    pub fn topic_count_of(&self, session: SessionId) -> usize {
        self.sessions.get(&session).map_or(0, HashSet::len)
    }

    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }
}
