//! The SQLite implementation of [`EntityStore`].

use std::path::Path;

use chrono::Utc;
use rusqlite::OptionalExtension as _;
use uuid::Uuid;

use parley_core::store::{CasOutcome, Document, EntityStore};

use crate::{
  Result,
  encode::{RawDocument, decode_version, encode_dt, encode_kind, encode_uuid, encode_version},
  schema::SCHEMA,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A Parley document store backed by a single SQLite file.
///
/// Clones share the underlying connection.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

/// What a conditional write found, before the body is decoded.
enum WriteResult {
  Written,
  Conflict(i64),
  Absent,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, for tests.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  fn conflict<D: Document>(&self, id: Uuid, current: i64) -> Result<CasOutcome<D>> {
    let current = decode_version(D::KIND, &encode_uuid(id), current)?;
    Ok(CasOutcome::Stale { current })
  }
}

// ─── EntityStore impl ────────────────────────────────────────────────────────

impl EntityStore for SqliteStore {
  type Error = crate::Error;

  async fn get<D: Document>(&self, id: Uuid) -> Result<Option<D>> {
    let kind_str = encode_kind(D::KIND);
    let id_str = encode_uuid(id);

    let raw: Option<RawDocument> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT id, version, body FROM documents WHERE kind = ?1 AND id = ?2",
              rusqlite::params![kind_str, id_str],
              |row| {
                Ok(RawDocument {
                  id:      row.get(0)?,
                  version: row.get(1)?,
                  body:    row.get(2)?,
                })
              },
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawDocument::into_document::<D>).transpose()
  }

  async fn insert<D: Document>(&self, mut doc: D) -> Result<CasOutcome<D>> {
    let id = doc.id();
    doc.set_version(1);

    let kind_str = encode_kind(D::KIND);
    let id_str = encode_uuid(id);
    let body = serde_json::to_string(&doc)?;
    let at_str = encode_dt(Utc::now());

    let result = self
      .conn
      .call(move |conn| {
        let inserted = conn.execute(
          "INSERT INTO documents (kind, id, version, body, updated_at)
           VALUES (?1, ?2, 1, ?3, ?4)
           ON CONFLICT (kind, id) DO NOTHING",
          rusqlite::params![kind_str, id_str, body, at_str],
        )?;
        if inserted == 1 {
          return Ok(WriteResult::Written);
        }

        let current: Option<i64> = conn
          .query_row(
            "SELECT version FROM documents WHERE kind = ?1 AND id = ?2",
            rusqlite::params![kind_str, id_str],
            |row| row.get(0),
          )
          .optional()?;
        Ok(current.map_or(WriteResult::Absent, WriteResult::Conflict))
      })
      .await?;

    match result {
      WriteResult::Written => Ok(CasOutcome::Applied(doc)),
      WriteResult::Conflict(current) => self.conflict(id, current),
      // Only reachable if the row vanished between the two statements,
      // which nothing in this crate does.
      WriteResult::Absent => Ok(CasOutcome::Missing),
    }
  }

  async fn compare_and_set<D: Document>(
    &self,
    mut doc: D,
    expected_version: u64,
  ) -> Result<CasOutcome<D>> {
    let id = doc.id();
    let next_version = expected_version + 1;
    doc.set_version(next_version);

    let kind_str = encode_kind(D::KIND);
    let id_str = encode_uuid(id);
    let expected = encode_version(D::KIND, id, expected_version)?;
    let next = encode_version(D::KIND, id, next_version)?;
    let body = serde_json::to_string(&doc)?;
    let at_str = encode_dt(Utc::now());

    let result = self
      .conn
      .call(move |conn| {
        let updated = conn.execute(
          "UPDATE documents
              SET version = ?1, body = ?2, updated_at = ?3
            WHERE kind = ?4 AND id = ?5 AND version = ?6",
          rusqlite::params![next, body, at_str, kind_str, id_str, expected],
        )?;
        if updated == 1 {
          return Ok(WriteResult::Written);
        }

        let current: Option<i64> = conn
          .query_row(
            "SELECT version FROM documents WHERE kind = ?1 AND id = ?2",
            rusqlite::params![kind_str, id_str],
            |row| row.get(0),
          )
          .optional()?;
        Ok(current.map_or(WriteResult::Absent, WriteResult::Conflict))
      })
      .await?;

    match result {
      WriteResult::Written => Ok(CasOutcome::Applied(doc)),
      WriteResult::Conflict(current) => self.conflict(id, current),
      WriteResult::Absent => Ok(CasOutcome::Missing),
    }
  }

  async fn list<D: Document>(&self) -> Result<Vec<D>> {
    let kind_str = encode_kind(D::KIND);

    let raws: Vec<RawDocument> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn
          .prepare("SELECT id, version, body FROM documents WHERE kind = ?1 ORDER BY rowid")?;
        let rows = stmt
          .query_map(rusqlite::params![kind_str], |row| {
            Ok(RawDocument {
              id:      row.get(0)?,
              version: row.get(1)?,
              body:    row.get(2)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawDocument::into_document::<D>).collect()
  }
}
