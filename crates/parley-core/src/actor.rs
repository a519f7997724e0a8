//! The authenticated caller, passed explicitly into every operation.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
  Member,
  /// Support staff: reviews applications and assigns interviewers.
  Operator,
}

/// Claims of the caller on whose behalf an operation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
  pub user_id: Uuid,
  pub role:    Role,
}

impl Actor {
  pub fn member(user_id: Uuid) -> Self { Self { user_id, role: Role::Member } }

  pub fn operator(user_id: Uuid) -> Self { Self { user_id, role: Role::Operator } }

  pub fn is_operator(&self) -> bool { self.role == Role::Operator }
}
