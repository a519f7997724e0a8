//! Presence tracked from connection lifecycle events.
//!
//! A user may hold several connections at once (tabs, devices); they are
//! present while at least one is open.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parley_core::{
  clock::{Clock, SystemClock},
  presence::{AvailabilityRecord, PresenceRegistry, TopicQuery, TopicTag},
};
use tracing::debug;
use uuid::Uuid;

struct PresenceEntry {
  connections: usize,
  topics:      Vec<TopicTag>,
  since:       DateTime<Utc>,
}

pub struct InMemoryPresence {
  entries: DashMap<Uuid, PresenceEntry>,
  clock:   Arc<dyn Clock>,
}

impl InMemoryPresence {
  pub fn new() -> Self { Self::with_clock(Arc::new(SystemClock)) }

  pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
    Self { entries: DashMap::new(), clock }
  }

  /// Register a new connection for `user_id`. The most recently declared
  /// topics replace any earlier ones. Returns the user's connection count.
  pub fn connect(&self, user_id: Uuid, topics: Vec<TopicTag>) -> usize {
    let now = self.clock.now();
    let mut entry = self
      .entries
      .entry(user_id)
      .or_insert_with(|| PresenceEntry { connections: 0, topics: Vec::new(), since: now });
    entry.connections += 1;
    entry.topics = topics;
    let count = entry.connections;
    debug!(%user_id, connections = count, "presence: connected");
    count
  }

  /// Drop one connection for `user_id`. Returns the connections left.
  pub fn disconnect(&self, user_id: Uuid) -> usize {
    let remaining = match self.entries.get_mut(&user_id) {
      Some(mut entry) => {
        entry.connections = entry.connections.saturating_sub(1);
        entry.connections
      }
      None => return 0,
    };

    if remaining == 0 {
      self.entries.remove_if(&user_id, |_, entry| entry.connections == 0);
    }
    debug!(%user_id, connections = remaining, "presence: disconnected");
    remaining
  }

  /// Number of distinct users currently present.
  pub fn present_count(&self) -> usize { self.entries.len() }
}

impl Default for InMemoryPresence {
  fn default() -> Self { Self::new() }
}

impl PresenceRegistry for InMemoryPresence {
  fn snapshot(&self, filter: &TopicQuery) -> Vec<AvailabilityRecord> {
    self
      .entries
      .iter()
      .map(|entry| AvailabilityRecord {
        user_id: *entry.key(),
        topics:  entry.topics.clone(),
        present: entry.connections > 0,
        since:   entry.since,
      })
      .filter(|record| record.offers(filter))
      .collect()
  }

  fn is_present(&self, user_id: Uuid) -> bool {
    self
      .entries
      .get(&user_id)
      .is_some_and(|entry| entry.connections > 0)
  }
}
