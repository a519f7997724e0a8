//! Thin wrappers that fold store outcomes into the core error taxonomy.

use parley_core::{
  Error, Result,
  store::{Document, EntityStore},
};
use uuid::Uuid;

pub(crate) async fn load<S, D>(store: &S, id: Uuid) -> Result<D>
where
  S: EntityStore,
  D: Document,
{
  store
    .get::<D>(id)
    .await
    .map_err(Error::store)?
    .ok_or(Error::NotFound { kind: D::KIND, id })
}

pub(crate) async fn create<S, D>(store: &S, doc: D) -> Result<D>
where
  S: EntityStore,
  D: Document,
{
  let id = doc.id();
  store.insert(doc).await.map_err(Error::store)?.into_result(id)
}

/// Write `doc` back iff nobody else has since the version it was read at.
pub(crate) async fn save<S, D>(store: &S, doc: D) -> Result<D>
where
  S: EntityStore,
  D: Document,
{
  let id = doc.id();
  let expected = doc.version();
  store
    .compare_and_set(doc, expected)
    .await
    .map_err(Error::store)?
    .into_result(id)
}
