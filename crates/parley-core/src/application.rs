//! Expert applications and their review state machine.
//!
//! An application is `pending` until an operator approves or rejects it.
//! After review the payload is frozen; the only way to change it is a
//! resubmission, which resets the review to `pending`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  Error, Result,
  skill::Skill,
  store::{Document, DocumentKind},
};

/// Which kind of expert the applicant wants to become.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Expertise {
  Tutor,
  Interviewer,
}

/// Flat status, used for filtering and display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplicationStatus {
  Pending,
  Approved,
  Rejected,
}

/// Review state. Each variant carries exactly the fields that are meaningful
/// in it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Review {
  Pending,
  Approved {
    reviewed_by: Uuid,
    reviewed_at: DateTime<Utc>,
  },
  Rejected {
    reviewed_by: Uuid,
    reviewed_at: DateTime<Utc>,
    reason:      Option<String>,
  },
}

impl Review {
  pub fn status(&self) -> ApplicationStatus {
    match self {
      Self::Pending => ApplicationStatus::Pending,
      Self::Approved { .. } => ApplicationStatus::Approved,
      Self::Rejected { .. } => ApplicationStatus::Rejected,
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpertApplication {
  pub application_id: Uuid,
  pub applicant_id:   Uuid,
  pub expertise:      Expertise,
  pub skills:         Vec<Skill>,
  /// Opaque URLs returned by the upload collaborator.
  pub documents:      Vec<String>,
  pub review:         Review,
  pub submitted_at:   DateTime<Utc>,
  #[serde(default)]
  pub version:        u64,
}

/// Input to [`ExpertApplication::submit`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewApplication {
  pub expertise: Expertise,
  pub skills:    Vec<Skill>,
  #[serde(default)]
  pub documents: Vec<String>,
}

impl NewApplication {
  fn validate(&self) -> Result<()> {
    if self.skills.is_empty() {
      return Err(Error::Validation("an application must declare at least one skill".into()));
    }
    self.skills.iter().try_for_each(Skill::validate)?;
    if self.documents.iter().any(|d| d.trim().is_empty()) {
      return Err(Error::Validation("document references must be non-empty".into()));
    }
    Ok(())
  }
}

impl ExpertApplication {
  /// Build a fresh `pending` application.
  pub fn submit(
    applicant_id: Uuid,
    input: NewApplication,
    now: DateTime<Utc>,
  ) -> Result<Self> {
    input.validate()?;
    Ok(Self {
      application_id: Uuid::new_v4(),
      applicant_id,
      expertise: input.expertise,
      skills: input.skills,
      documents: input.documents,
      review: Review::Pending,
      submitted_at: now,
      version: 0,
    })
  }

  /// Replace the payload and reset the review to `pending`.
  pub fn resubmit(&self, input: NewApplication, now: DateTime<Utc>) -> Result<Self> {
    input.validate()?;
    Ok(Self {
      expertise: input.expertise,
      skills: input.skills,
      documents: input.documents,
      review: Review::Pending,
      submitted_at: now,
      ..self.clone()
    })
  }

  pub fn approve(&self, reviewer: Uuid, now: DateTime<Utc>) -> Result<Self> {
    self.ensure_pending()?;
    Ok(Self {
      review: Review::Approved { reviewed_by: reviewer, reviewed_at: now },
      ..self.clone()
    })
  }

  pub fn reject(
    &self,
    reviewer: Uuid,
    reason: Option<String>,
    now: DateTime<Utc>,
  ) -> Result<Self> {
    self.ensure_pending()?;
    Ok(Self {
      review: Review::Rejected { reviewed_by: reviewer, reviewed_at: now, reason },
      ..self.clone()
    })
  }

  pub fn status(&self) -> ApplicationStatus { self.review.status() }

  pub fn reviewed_at(&self) -> Option<DateTime<Utc>> {
    match &self.review {
      Review::Pending => None,
      Review::Approved { reviewed_at, .. } | Review::Rejected { reviewed_at, .. } => {
        Some(*reviewed_at)
      }
    }
  }

  pub fn approved_at(&self) -> Option<DateTime<Utc>> {
    match &self.review {
      Review::Approved { reviewed_at, .. } => Some(*reviewed_at),
      _ => None,
    }
  }

  fn ensure_pending(&self) -> Result<()> {
    match self.review {
      Review::Pending => Ok(()),
      _ => Err(Error::AlreadyReviewed(self.application_id)),
    }
  }
}

impl Document for ExpertApplication {
  const KIND: DocumentKind = DocumentKind::Application;

  fn id(&self) -> Uuid { self.application_id }

  fn version(&self) -> u64 { self.version }

  fn set_version(&mut self, version: u64) { self.version = version; }
}
