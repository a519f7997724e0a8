//! Handlers for `/experts` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/experts/{user_id}/activation` | Activates lazily if the grace period is over |
//! | `GET`  | `/experts/available` | `?subject=&topic=[&sub_topic=]` |

use std::sync::Arc;

use axum::{
  Json,
  extract::{Path, Query, State},
};
use parley_core::{presence::TopicQuery, profile::ExpertActivation, store::EntityStore};
use parley_engine::{Candidate, Parley, RetryPolicy, retry_on_stale};
use uuid::Uuid;

use crate::error::ApiError;

/// `GET /experts/{user_id}/activation`
pub async fn activation<S>(
  State(parley): State<Arc<Parley<S>>>,
  Path(user_id): Path<Uuid>,
) -> Result<Json<ExpertActivation>, ApiError>
where
  S: EntityStore + 'static,
{
  let view = retry_on_stale(RetryPolicy::default(), || {
    parley.activation.ensure_activated(user_id)
  })
  .await?;
  Ok(Json(view))
}

/// `GET /experts/available?subject=<s>&topic=<t>[&sub_topic=<st>]`
///
/// A fresh snapshot on every call.
pub async fn available<S>(
  State(parley): State<Arc<Parley<S>>>,
  Query(query): Query<TopicQuery>,
) -> Result<Json<Vec<Candidate>>, ApiError>
where
  S: EntityStore + 'static,
{
  let candidates = parley.matching.find_available_experts(&query).await?;
  Ok(Json(candidates.collect()))
}
