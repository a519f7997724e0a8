//! Encoding and decoding helpers between documents and the plain-text
//! columns stored in SQLite.
//!
//! Timestamps are RFC 3339 strings, UUIDs hyphenated lowercase strings and
//! bodies compact JSON. The `version` column is authoritative: whatever the
//! body says is overwritten on decode.

use chrono::{DateTime, Utc};
use parley_core::store::{Document, DocumentKind};
use uuid::Uuid;

use crate::{Error, Result};

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn encode_kind(kind: DocumentKind) -> &'static str { kind.as_str() }

pub fn encode_version(kind: DocumentKind, id: Uuid, version: u64) -> Result<i64> {
  i64::try_from(version)
    .map_err(|_| Error::VersionOverflow { kind: kind.as_str(), id: encode_uuid(id) })
}

pub fn decode_version(kind: DocumentKind, id: &str, version: i64) -> Result<u64> {
  u64::try_from(version)
    .ok()
    .filter(|v| *v >= 1)
    .ok_or_else(|| Error::CorruptVersion { kind: kind.as_str(), id: id.to_owned(), version })
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// A `documents` row as read back from SQLite.
pub struct RawDocument {
  pub id:      String,
  pub version: i64,
  pub body:    String,
}

impl RawDocument {
  pub fn into_document<D: Document>(self) -> Result<D> {
    let version = decode_version(D::KIND, &self.id, self.version)?;
    let mut doc: D = serde_json::from_str(&self.body)?;
    doc.set_version(version);
    Ok(doc)
  }
}
