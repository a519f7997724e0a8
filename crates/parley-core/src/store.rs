//! The `EntityStore` trait and the `Document` contract it stores.
//!
//! The trait is implemented by storage backends (e.g. `parley-store-sqlite`).
//! The engine depends on this abstraction, not on any concrete backend.
//!
//! Every document carries a store-managed version. A write only lands if the
//! caller's expected version still matches the stored one, so two conflicting
//! writers against the same document cannot both succeed.

use std::{fmt, future::Future};

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Documents ───────────────────────────────────────────────────────────────

/// The collections the core persists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
  Application,
  Profile,
  SessionRequest,
}

impl DocumentKind {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Application => "application",
      Self::Profile => "profile",
      Self::SessionRequest => "session_request",
    }
  }
}

impl fmt::Display for DocumentKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// A keyed, versioned entity owned by the store.
pub trait Document: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
  const KIND: DocumentKind;

  fn id(&self) -> Uuid;

  /// Version as last read from the store; `0` for a document never written.
  fn version(&self) -> u64;

  fn set_version(&mut self, version: u64);
}

// ─── Write outcome ───────────────────────────────────────────────────────────

/// Result of a conditional write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasOutcome<D> {
  /// The write landed; carries the document with its new version.
  Applied(D),
  /// Another writer got there first.
  Stale { current: u64 },
  /// No document with that id exists.
  Missing,
}

impl<D: Document> CasOutcome<D> {
  /// Collapse the outcome into the core error taxonomy.
  pub fn into_result(self, id: Uuid) -> Result<D> {
    match self {
      Self::Applied(doc) => Ok(doc),
      Self::Stale { .. } => Err(Error::StaleState { kind: D::KIND, id }),
      Self::Missing => Err(Error::NotFound { kind: D::KIND, id }),
    }
  }
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over a durable document store with single-document atomic
/// read-modify-write.
///
/// All methods return `Send` futures so the trait can be used in
/// multi-threaded async runtimes (e.g. tokio with `axum`).
pub trait EntityStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Retrieve a document by id. Returns `None` if not found.
  fn get<D: Document>(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<D>, Self::Error>> + Send + '_;

  /// Persist a new document at version 1.
  ///
  /// Returns [`CasOutcome::Stale`] if a document with the same id exists.
  fn insert<D: Document>(
    &self,
    doc: D,
  ) -> impl Future<Output = Result<CasOutcome<D>, Self::Error>> + Send + '_;

  /// Replace a document iff its stored version equals `expected_version`.
  /// On success the stored version becomes `expected_version + 1`.
  fn compare_and_set<D: Document>(
    &self,
    doc: D,
    expected_version: u64,
  ) -> impl Future<Output = Result<CasOutcome<D>, Self::Error>> + Send + '_;

  /// Every document of kind `D`, in insertion order.
  fn list<D: Document>(
    &self,
  ) -> impl Future<Output = Result<Vec<D>, Self::Error>> + Send + '_;

  /// Every document of kind `D` matching `predicate`.
  fn query<D, P>(
    &self,
    predicate: P,
  ) -> impl Future<Output = Result<Vec<D>, Self::Error>> + Send + '_
  where
    D: Document,
    P: Fn(&D) -> bool + Send + 'static,
  {
    async move {
      let all = self.list::<D>().await?;
      Ok(all.into_iter().filter(|doc| predicate(doc)).collect())
    }
  }
}
