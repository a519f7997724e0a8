//! Error type for `parley-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  /// A version column that does not fit the document model.
  #[error("corrupt version {version} for {kind} {id}")]
  CorruptVersion {
    kind:    &'static str,
    id:      String,
    version: i64,
  },

  #[error("version of {kind} {id} no longer fits in a database column")]
  VersionOverflow { kind: &'static str, id: String },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
