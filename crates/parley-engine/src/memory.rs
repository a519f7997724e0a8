//! A process-local [`EntityStore`].
//!
//! Documents are kept in their serialised JSON form so the store behaves like
//! a real backend: callers never share a live copy with it. Used by tests
//! and by deployments that do not need durability.

use std::{
  collections::HashMap,
  sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use parley_core::store::{CasOutcome, Document, DocumentKind, EntityStore};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum MemoryStoreError {
  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),
}

struct Entry {
  version: u64,
  seq:     u64,
  body:    serde_json::Value,
}

#[derive(Default)]
struct Inner {
  docs:     HashMap<(DocumentKind, Uuid), Entry>,
  next_seq: u64,
}

/// Clones share the same documents.
#[derive(Clone, Default)]
pub struct MemoryStore {
  inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
  pub fn new() -> Self { Self::default() }

  fn lock(&self) -> MutexGuard<'_, Inner> {
    self.inner.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

fn decode<D: Document>(entry: &Entry) -> Result<D, MemoryStoreError> {
  let mut doc: D = serde_json::from_value(entry.body.clone())?;
  doc.set_version(entry.version);
  Ok(doc)
}

impl EntityStore for MemoryStore {
  type Error = MemoryStoreError;

  async fn get<D: Document>(&self, id: Uuid) -> Result<Option<D>, Self::Error> {
    let inner = self.lock();
    inner.docs.get(&(D::KIND, id)).map(decode::<D>).transpose()
  }

  async fn insert<D: Document>(&self, mut doc: D) -> Result<CasOutcome<D>, Self::Error> {
    doc.set_version(1);
    let body = serde_json::to_value(&doc)?;
    let key = (D::KIND, doc.id());

    let mut inner = self.lock();
    if let Some(existing) = inner.docs.get(&key) {
      return Ok(CasOutcome::Stale { current: existing.version });
    }
    let seq = inner.next_seq;
    inner.next_seq += 1;
    inner.docs.insert(key, Entry { version: 1, seq, body });
    Ok(CasOutcome::Applied(doc))
  }

  async fn compare_and_set<D: Document>(
    &self,
    mut doc: D,
    expected_version: u64,
  ) -> Result<CasOutcome<D>, Self::Error> {
    let version = expected_version + 1;
    doc.set_version(version);
    let body = serde_json::to_value(&doc)?;

    let mut inner = self.lock();
    let Some(entry) = inner.docs.get_mut(&(D::KIND, doc.id())) else {
      return Ok(CasOutcome::Missing);
    };
    if entry.version != expected_version {
      return Ok(CasOutcome::Stale { current: entry.version });
    }
    entry.version = version;
    entry.body = body;
    Ok(CasOutcome::Applied(doc))
  }

  async fn list<D: Document>(&self) -> Result<Vec<D>, Self::Error> {
    let inner = self.lock();
    let mut entries: Vec<&Entry> = inner
      .docs
      .iter()
      .filter(|((kind, _), _)| *kind == D::KIND)
      .map(|(_, entry)| entry)
      .collect();
    entries.sort_by_key(|entry| entry.seq);
    entries.into_iter().map(decode::<D>).collect()
  }
}
