//! JSON REST API for Parley.
//!
//! Exposes an axum [`Router`] over a [`Parley`] engine backed by any
//! [`EntityStore`]. Authentication is the caller's responsibility: every
//! handler reads the caller's [`Actor`](parley_core::actor::Actor) from the
//! request extensions, so an outer layer must insert one.
//!
//! # Mounting
//!
//! ```rust,ignore
//! .nest("/api", parley_api::api_router(parley.clone()))
//! ```

pub mod applications;
pub mod error;
pub mod experts;
pub mod requests;

use std::sync::Arc;

use axum::{
  Router,
  routing::{get, post},
};
use parley_core::store::EntityStore;
use parley_engine::Parley;

pub use error::ApiError;

/// Build a fully-materialised API router for `parley`.
///
/// The returned `Router<()>` can be nested into any parent router regardless
/// of its own state type.
pub fn api_router<S>(parley: Arc<Parley<S>>) -> Router<()>
where
  S: EntityStore + 'static,
{
  Router::new()
    // Applications
    .route(
      "/applications",
      get(applications::list::<S>).post(applications::submit::<S>),
    )
    .route(
      "/applications/{id}",
      get(applications::get_one::<S>).put(applications::resubmit::<S>),
    )
    .route("/applications/{id}/approve", post(applications::approve::<S>))
    .route("/applications/{id}/reject", post(applications::reject::<S>))
    // Experts
    .route("/experts/available", get(experts::available::<S>))
    .route("/experts/{user_id}/activation", get(experts::activation::<S>))
    // Requests
    .route("/interviews", post(requests::create_interview::<S>))
    .route("/requests", get(requests::list::<S>).post(requests::dispatch::<S>))
    .route("/requests/{id}", get(requests::get_one::<S>))
    .route("/requests/{id}/assign", post(requests::assign::<S>))
    .route("/requests/{id}/accept", post(requests::accept::<S>))
    .route("/requests/{id}/reject", post(requests::reject::<S>))
    .route("/requests/{id}/propose", post(requests::propose::<S>))
    .route("/requests/{id}/counter", post(requests::counter::<S>))
    .route("/requests/{id}/accept-slot", post(requests::accept_slot::<S>))
    .route("/requests/{id}/decline-slots", post(requests::decline_slots::<S>))
    .route("/requests/{id}/complete", post(requests::complete::<S>))
    .route("/requests/{id}/cancel", post(requests::cancel::<S>))
    .route("/requests/{id}/rate", post(requests::rate::<S>))
    .with_state(parley)
}
