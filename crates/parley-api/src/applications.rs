//! Handlers for `/applications` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `POST` | `/applications` | Body: [`NewApplication`]; returns 201 |
//! | `GET`  | `/applications` | Optional `?status=pending\|approved\|rejected` |
//! | `GET`  | `/applications/{id}` | Applicant or operator |
//! | `PUT`  | `/applications/{id}` | Resubmit; body: [`NewApplication`] |
//! | `POST` | `/applications/{id}/approve` | Operator only |
//! | `POST` | `/applications/{id}/reject` | Operator only; body: `{"reason":"..."}` |

use std::sync::Arc;

use axum::{
  Extension, Json,
  extract::{Path, Query, State},
  http::StatusCode,
  response::IntoResponse,
};
use parley_core::{
  actor::Actor,
  application::{ApplicationStatus, ExpertApplication, NewApplication},
  store::EntityStore,
};
use parley_engine::{Parley, RetryPolicy, retry_on_stale};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct ListParams {
  pub status: Option<ApplicationStatus>,
}

/// `GET /applications[?status=...]`
pub async fn list<S>(
  State(parley): State<Arc<Parley<S>>>,
  Extension(actor): Extension<Actor>,
  Query(params): Query<ListParams>,
) -> Result<Json<Vec<ExpertApplication>>, ApiError>
where
  S: EntityStore + 'static,
{
  let applications = parley.activation.list_applications(&actor, params.status).await?;
  Ok(Json(applications))
}

/// `POST /applications`
pub async fn submit<S>(
  State(parley): State<Arc<Parley<S>>>,
  Extension(actor): Extension<Actor>,
  Json(body): Json<NewApplication>,
) -> Result<impl IntoResponse, ApiError>
where
  S: EntityStore + 'static,
{
  let application = parley.activation.submit(&actor, body).await?;
  Ok((StatusCode::CREATED, Json(application)))
}

/// `GET /applications/{id}`
pub async fn get_one<S>(
  State(parley): State<Arc<Parley<S>>>,
  Extension(actor): Extension<Actor>,
  Path(id): Path<Uuid>,
) -> Result<Json<ExpertApplication>, ApiError>
where
  S: EntityStore + 'static,
{
  Ok(Json(parley.activation.get_application(&actor, id).await?))
}

/// `PUT /applications/{id}`
pub async fn resubmit<S>(
  State(parley): State<Arc<Parley<S>>>,
  Extension(actor): Extension<Actor>,
  Path(id): Path<Uuid>,
  Json(body): Json<NewApplication>,
) -> Result<Json<ExpertApplication>, ApiError>
where
  S: EntityStore + 'static,
{
  let application = retry_on_stale(RetryPolicy::default(), || {
    parley.activation.resubmit(&actor, id, body.clone())
  })
  .await?;
  Ok(Json(application))
}

/// `POST /applications/{id}/approve`
///
/// A conflicting concurrent review is retried, which then surfaces as
/// `already_reviewed`.
pub async fn approve<S>(
  State(parley): State<Arc<Parley<S>>>,
  Extension(actor): Extension<Actor>,
  Path(id): Path<Uuid>,
) -> Result<Json<ExpertApplication>, ApiError>
where
  S: EntityStore + 'static,
{
  let application =
    retry_on_stale(RetryPolicy::default(), || parley.activation.approve(&actor, id)).await?;
  Ok(Json(application))
}

#[derive(Debug, Default, Deserialize)]
pub struct RejectBody {
  pub reason: Option<String>,
}

/// `POST /applications/{id}/reject`; body: `{"reason":"..."}` (optional).
pub async fn reject<S>(
  State(parley): State<Arc<Parley<S>>>,
  Extension(actor): Extension<Actor>,
  Path(id): Path<Uuid>,
  Json(body): Json<RejectBody>,
) -> Result<Json<ExpertApplication>, ApiError>
where
  S: EntityStore + 'static,
{
  let application = retry_on_stale(RetryPolicy::default(), || {
    parley.activation.reject(&actor, id, body.reason.clone())
  })
  .await?;
  Ok(Json(application))
}
