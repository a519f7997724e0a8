//! SQL schema for the Parley SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;

-- One row per document. `version` starts at 1 and only moves through a
-- conditional UPDATE that names the version the writer read.
-- Rows are never deleted; rowid order is insertion order.
CREATE TABLE IF NOT EXISTS documents (
    kind        TEXT    NOT NULL,   -- 'application' | 'profile' | 'session_request'
    id          TEXT    NOT NULL,
    version     INTEGER NOT NULL CHECK (version >= 1),
    body        TEXT    NOT NULL,   -- JSON-encoded document
    updated_at  TEXT    NOT NULL,   -- ISO 8601 UTC of the last write
    PRIMARY KEY (kind, id)
);

CREATE INDEX IF NOT EXISTS documents_kind_idx ON documents(kind);

PRAGMA user_version = 1;
";
