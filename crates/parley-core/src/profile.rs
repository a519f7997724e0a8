//! Expert profiles and the activation state carried on them.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  skill::{Skill, SkillMerge},
  store::{Document, DocumentKind},
};

/// Where a user stands on the way to becoming a discoverable expert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ActivationState {
  Inactive,
  /// Approved; becomes active once `activation_at` has passed.
  Pending { activation_at: DateTime<Utc> },
  Active { activation_at: DateTime<Utc> },
}

impl ActivationState {
  pub fn activation_at(&self) -> Option<DateTime<Utc>> {
    match self {
      Self::Inactive => None,
      Self::Pending { activation_at } | Self::Active { activation_at } => {
        Some(*activation_at)
      }
    }
  }

  pub fn is_active(&self) -> bool { matches!(self, Self::Active { .. }) }
}

/// The expert-facing subset of a user's profile, keyed by user id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpertProfile {
  pub user_id:    Uuid,
  /// Public skill list, grown by every approval.
  pub skills:     Vec<Skill>,
  pub activation: ActivationState,
  pub updated_at: DateTime<Utc>,
  #[serde(default)]
  pub version:    u64,
}

impl ExpertProfile {
  pub fn new(user_id: Uuid, now: DateTime<Utc>) -> Self {
    Self {
      user_id,
      skills: Vec::new(),
      activation: ActivationState::Inactive,
      updated_at: now,
      version: 0,
    }
  }

  /// Apply an approval: merge the approved skills and restart the countdown.
  pub fn schedule_activation(
    &self,
    approved_skills: &[Skill],
    activation_at: DateTime<Utc>,
    now: DateTime<Utc>,
  ) -> Self {
    Self {
      skills: SkillMerge::merge(&self.skills, approved_skills),
      activation: ActivationState::Pending { activation_at },
      updated_at: now,
      ..self.clone()
    }
  }

  /// Apply a rejection: clear any pending or completed activation.
  pub fn reset_activation(&self, now: DateTime<Utc>) -> Self {
    Self {
      activation: ActivationState::Inactive,
      updated_at: now,
      ..self.clone()
    }
  }

  /// The promoted profile if the grace period has elapsed, `None` if there is
  /// nothing to do.
  pub fn activate_if_due(&self, now: DateTime<Utc>) -> Option<Self> {
    match self.activation {
      ActivationState::Pending { activation_at } if activation_at <= now => Some(Self {
        activation: ActivationState::Active { activation_at },
        updated_at: now,
        ..self.clone()
      }),
      _ => None,
    }
  }

  pub fn activation_view(&self) -> ExpertActivation {
    ExpertActivation {
      user_id:       self.user_id,
      activation_at: self.activation.activation_at(),
      is_active:     self.activation.is_active(),
    }
  }
}

impl Document for ExpertProfile {
  const KIND: DocumentKind = DocumentKind::Profile;

  fn id(&self) -> Uuid { self.user_id }

  fn version(&self) -> u64 { self.version }

  fn set_version(&mut self, version: u64) { self.version = version; }
}

/// Read model returned by activation checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpertActivation {
  pub user_id:       Uuid,
  pub activation_at: Option<DateTime<Utc>>,
  pub is_active:     bool,
}

impl ExpertActivation {
  /// The view for a user who has never been approved.
  pub fn none(user_id: Uuid) -> Self {
    Self { user_id, activation_at: None, is_active: false }
  }

  /// Time left on a pending countdown.
  pub fn remaining(&self, now: DateTime<Utc>) -> Option<TimeDelta> {
    match (self.is_active, self.activation_at) {
      (false, Some(at)) if at > now => Some(at - now),
      _ => None,
    }
  }
}
