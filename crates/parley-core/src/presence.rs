//! Presence snapshots used for real-time matching.
//!
//! Presence is owned by the connection layer. The core only ever reads a
//! point-in-time snapshot and never treats it as a source of truth for
//! activation or scheduling.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result};

/// A topic an expert declares when they come online.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicTag {
  pub subject:   String,
  pub topic:     String,
  #[serde(default)]
  pub sub_topic: Option<String>,
}

/// What a requester is looking for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicQuery {
  pub subject:   String,
  pub topic:     String,
  #[serde(default)]
  pub sub_topic: Option<String>,
}

impl TopicQuery {
  pub fn new(subject: impl Into<String>, topic: impl Into<String>) -> Self {
    Self { subject: subject.into(), topic: topic.into(), sub_topic: None }
  }

  pub fn with_sub_topic(mut self, sub_topic: impl Into<String>) -> Self {
    self.sub_topic = Some(sub_topic.into());
    self
  }

  pub fn validate(&self) -> Result<()> {
    if self.subject.trim().is_empty() || self.topic.trim().is_empty() {
      return Err(Error::Validation("subject and topic are required".into()));
    }
    Ok(())
  }

  /// Every component present in the query must equal the tag's,
  /// ignoring case and surrounding whitespace.
  pub fn matches(&self, tag: &TopicTag) -> bool {
    same(&self.subject, &tag.subject)
      && same(&self.topic, &tag.topic)
      && match (&self.sub_topic, &tag.sub_topic) {
        (None, _) => true,
        (Some(want), Some(have)) => same(want, have),
        (Some(_), None) => false,
      }
  }
}

fn same(a: &str, b: &str) -> bool { a.trim().eq_ignore_ascii_case(b.trim()) }

/// One user's presence at the instant the snapshot was taken.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityRecord {
  pub user_id: Uuid,
  pub topics:  Vec<TopicTag>,
  pub present: bool,
  pub since:   DateTime<Utc>,
}

impl AvailabilityRecord {
  pub fn offers(&self, query: &TopicQuery) -> bool {
    self.present && self.topics.iter().any(|t| query.matches(t))
  }
}

/// Live presence, written by connect/disconnect events elsewhere.
pub trait PresenceRegistry: Send + Sync {
  /// Records of users currently present whose topics match `filter`.
  fn snapshot(&self, filter: &TopicQuery) -> Vec<AvailabilityRecord>;

  fn is_present(&self, user_id: Uuid) -> bool;
}

#[cfg(test)]
mod tests {
  use super::*;

  fn tag(subject: &str, topic: &str, sub: Option<&str>) -> TopicTag {
    TopicTag {
      subject:   subject.into(),
      topic:     topic.into(),
      sub_topic: sub.map(Into::into),
    }
  }

  #[test]
  fn matching_ignores_case() {
    let q = TopicQuery::new("math", "ALGEBRA");
    assert!(q.matches(&tag("Math", "Algebra", Some("Quadratics"))));
    assert!(!q.matches(&tag("Math", "Geometry", None)));
  }

  #[test]
  fn sub_topic_must_match_when_requested() {
    let q = TopicQuery::new("Math", "Algebra").with_sub_topic("quadratics");
    assert!(q.matches(&tag("Math", "Algebra", Some("Quadratics"))));
    assert!(!q.matches(&tag("Math", "Algebra", Some("Matrices"))));
    assert!(!q.matches(&tag("Math", "Algebra", None)));
  }
}
