//! Error types for `parley-core`.
//!
//! The same taxonomy is shared by the engine and surfaced unchanged to API
//! callers. Only [`Error::StaleState`] is retryable.

use thiserror::Error;
use uuid::Uuid;

use crate::{request::RequestStatus, store::DocumentKind};

#[derive(Debug, Error)]
pub enum Error {
  #[error("{kind} not found: {id}")]
  NotFound { kind: DocumentKind, id: Uuid },

  #[error("cannot {action} a request that is {status}")]
  InvalidTransition {
    status: RequestStatus,
    action: &'static str,
  },

  /// Optimistic-concurrency conflict: the document changed between the read
  /// and the compare-and-set.
  #[error("{kind} {id} was modified concurrently")]
  StaleState { kind: DocumentKind, id: Uuid },

  #[error("application {0} has already been reviewed")]
  AlreadyReviewed(Uuid),

  #[error("request {0} has already been rated by this party")]
  AlreadyRated(Uuid),

  #[error("expert {0} is not available")]
  TargetUnavailable(Uuid),

  #[error("requester {0} already has a request awaiting a response")]
  AlreadyDispatched(Uuid),

  #[error("unauthorized: {0}")]
  Unauthorized(String),

  #[error("invalid input: {0}")]
  Validation(String),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
  /// Wrap a backend error.
  pub fn store<E>(err: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Store(Box::new(err))
  }

  /// Whether the caller should re-read and try again.
  pub fn is_retryable(&self) -> bool { matches!(self, Self::StaleState { .. }) }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
