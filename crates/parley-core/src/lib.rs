//! Core types and trait definitions for the Parley expert pipeline.
//!
//! This crate is deliberately free of HTTP, database and runtime
//! dependencies. It holds the entity types, their pure transition functions
//! and the collaborator traits the engine is written against.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod actor;
pub mod application;
pub mod clock;
pub mod error;
pub mod notify;
pub mod policy;
pub mod presence;
pub mod profile;
pub mod request;
pub mod skill;
pub mod store;

pub use error::{Error, Result};
