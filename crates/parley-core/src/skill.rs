//! Declared skills and the merge rule applied when an application is
//! approved.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// One entry of an expert's public skill list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Skill {
  /// Grade or level band, e.g. `"Class 10"` or `"Senior"`.
  pub class:   String,
  pub subject: String,
  pub topic:   String,
}

impl Skill {
  pub fn new(
    class: impl Into<String>,
    subject: impl Into<String>,
    topic: impl Into<String>,
  ) -> Self {
    Self { class: class.into(), subject: subject.into(), topic: topic.into() }
  }

  /// Case-insensitive composite identity.
  pub fn key(&self) -> (String, String, String) {
    (
      normalize(&self.class),
      normalize(&self.subject),
      normalize(&self.topic),
    )
  }

  pub fn validate(&self) -> Result<()> {
    if [&self.class, &self.subject, &self.topic]
      .iter()
      .any(|s| s.trim().is_empty())
    {
      return Err(Error::Validation(
        "skill class, subject and topic must be non-empty".into(),
      ));
    }
    Ok(())
  }
}

fn normalize(s: &str) -> String { s.trim().to_lowercase() }

/// Deduplicating merge of skill lists.
pub struct SkillMerge;

impl SkillMerge {
  /// Merge `incoming` into `existing`.
  ///
  /// Entries are compared on [`Skill::key`]. Existing entries win ties and
  /// keep their position; new entries are appended in submission order, and
  /// repeats within `incoming` collapse to their first occurrence.
  pub fn merge(existing: &[Skill], incoming: &[Skill]) -> Vec<Skill> {
    let mut seen = HashSet::with_capacity(existing.len() + incoming.len());
    let mut merged = Vec::with_capacity(existing.len() + incoming.len());

    for skill in existing.iter().chain(incoming) {
      if seen.insert(skill.key()) {
        merged.push(skill.clone());
      }
    }
    merged
  }
}
