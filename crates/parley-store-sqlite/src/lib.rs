//! SQLite backend for the Parley entity store.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. Each document kind shares one table;
//! bodies are stored as JSON next to the version used for compare-and-set.

mod encode;
mod schema;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use store::SqliteStore;
