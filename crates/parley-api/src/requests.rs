//! Handlers for session requests: real-time dispatch, interviews and the
//! slot negotiation that follows.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `POST` | `/requests` | Dispatch to one candidate; body: [`DispatchBody`]; 201 |
//! | `POST` | `/interviews` | Body: [`InterviewBody`]; 201 |
//! | `GET`  | `/requests` | Caller's requests; optional `?status=` (effective status) |
//! | `GET`  | `/requests/{id}` | |
//! | `POST` | `/requests/{id}/assign` | Operator; body: `{"respondent":"<uuid>"}` |
//! | `POST` | `/requests/{id}/accept` | |
//! | `POST` | `/requests/{id}/reject` | Body: `{"reason":"..."}` |
//! | `POST` | `/requests/{id}/propose` | Body: `{"slots":[...]}` |
//! | `POST` | `/requests/{id}/counter` | Body: `{"slots":[...]}` |
//! | `POST` | `/requests/{id}/accept-slot` | Body: `{"start":"<rfc3339>"}` (optional with one slot) |
//! | `POST` | `/requests/{id}/decline-slots` | |
//! | `POST` | `/requests/{id}/complete` | |
//! | `POST` | `/requests/{id}/cancel` | |
//! | `POST` | `/requests/{id}/rate` | Body: `{"stars":5,"comment":"..."}` |
//!
//! Every command answers with the updated [`RequestView`].

use std::sync::Arc;

use axum::{
  Extension, Json,
  extract::{Path, Query, State},
  http::StatusCode,
  response::IntoResponse,
};
use chrono::{DateTime, Utc};
use parley_core::{
  actor::Actor,
  presence::TopicQuery,
  request::{RequestStatus, Slot},
  store::EntityStore,
};
use parley_engine::{DispatchPayload, Parley, RequestView, RetryPolicy, retry_on_stale};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::ApiError;

type ViewResult = Result<Json<RequestView>, ApiError>;

// ─── Creation ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct DispatchBody {
  pub candidate: Uuid,
  pub topic:     TopicQuery,
  #[serde(default)]
  pub note:      Option<String>,
}

/// `POST /requests`
pub async fn dispatch<S>(
  State(parley): State<Arc<Parley<S>>>,
  Extension(actor): Extension<Actor>,
  Json(body): Json<DispatchBody>,
) -> Result<impl IntoResponse, ApiError>
where
  S: EntityStore + 'static,
{
  let payload = DispatchPayload { topic: body.topic, note: body.note };
  let request = parley.matching.dispatch_request(&actor, body.candidate, payload).await?;
  Ok((StatusCode::CREATED, Json(parley.negotiation.view(request))))
}

#[derive(Debug, Deserialize)]
pub struct InterviewBody {
  pub topic: TopicQuery,
  #[serde(default)]
  pub note:  Option<String>,
}

/// `POST /interviews`
pub async fn create_interview<S>(
  State(parley): State<Arc<Parley<S>>>,
  Extension(actor): Extension<Actor>,
  Json(body): Json<InterviewBody>,
) -> Result<impl IntoResponse, ApiError>
where
  S: EntityStore + 'static,
{
  let request = parley.negotiation.create_interview(&actor, body.topic, body.note).await?;
  Ok((StatusCode::CREATED, Json(parley.negotiation.view(request))))
}

// ─── Reads ───────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ListParams {
  pub status: Option<RequestStatus>,
}

/// `GET /requests[?status=...]`
pub async fn list<S>(
  State(parley): State<Arc<Parley<S>>>,
  Extension(actor): Extension<Actor>,
  Query(params): Query<ListParams>,
) -> Result<Json<Vec<RequestView>>, ApiError>
where
  S: EntityStore + 'static,
{
  Ok(Json(parley.negotiation.list_for(&actor, params.status).await?))
}

/// `GET /requests/{id}`
pub async fn get_one<S>(
  State(parley): State<Arc<Parley<S>>>,
  Extension(actor): Extension<Actor>,
  Path(id): Path<Uuid>,
) -> ViewResult
where
  S: EntityStore + 'static,
{
  Ok(Json(parley.negotiation.get(&actor, id).await?))
}

// ─── Commands ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct AssignBody {
  pub respondent: Uuid,
}

/// `POST /requests/{id}/assign`
pub async fn assign<S>(
  State(parley): State<Arc<Parley<S>>>,
  Extension(actor): Extension<Actor>,
  Path(id): Path<Uuid>,
  Json(body): Json<AssignBody>,
) -> ViewResult
where
  S: EntityStore + 'static,
{
  let request = retry_on_stale(RetryPolicy::default(), || {
    parley.negotiation.assign(&actor, id, body.respondent)
  })
  .await?;
  Ok(Json(parley.negotiation.view(request)))
}

/// `POST /requests/{id}/accept`
pub async fn accept<S>(
  State(parley): State<Arc<Parley<S>>>,
  Extension(actor): Extension<Actor>,
  Path(id): Path<Uuid>,
) -> ViewResult
where
  S: EntityStore + 'static,
{
  let request =
    retry_on_stale(RetryPolicy::default(), || parley.negotiation.accept(&actor, id)).await?;
  Ok(Json(parley.negotiation.view(request)))
}

#[derive(Debug, Deserialize)]
pub struct RejectBody {
  pub reason: Option<String>,
}

/// `POST /requests/{id}/reject`
pub async fn reject<S>(
  State(parley): State<Arc<Parley<S>>>,
  Extension(actor): Extension<Actor>,
  Path(id): Path<Uuid>,
  Json(body): Json<RejectBody>,
) -> ViewResult
where
  S: EntityStore + 'static,
{
  let request = retry_on_stale(RetryPolicy::default(), || {
    parley.negotiation.reject(&actor, id, body.reason.clone())
  })
  .await?;
  Ok(Json(parley.negotiation.view(request)))
}

#[derive(Debug, Deserialize)]
pub struct SlotsBody {
  pub slots: Vec<Slot>,
}

/// `POST /requests/{id}/propose`
pub async fn propose<S>(
  State(parley): State<Arc<Parley<S>>>,
  Extension(actor): Extension<Actor>,
  Path(id): Path<Uuid>,
  Json(body): Json<SlotsBody>,
) -> ViewResult
where
  S: EntityStore + 'static,
{
  let request = retry_on_stale(RetryPolicy::default(), || {
    parley.negotiation.propose(&actor, id, body.slots.clone())
  })
  .await?;
  Ok(Json(parley.negotiation.view(request)))
}

/// `POST /requests/{id}/counter`
pub async fn counter<S>(
  State(parley): State<Arc<Parley<S>>>,
  Extension(actor): Extension<Actor>,
  Path(id): Path<Uuid>,
  Json(body): Json<SlotsBody>,
) -> ViewResult
where
  S: EntityStore + 'static,
{
  let request = retry_on_stale(RetryPolicy::default(), || {
    parley.negotiation.counter(&actor, id, body.slots.clone())
  })
  .await?;
  Ok(Json(parley.negotiation.view(request)))
}

#[derive(Debug, Deserialize)]
pub struct AcceptSlotBody {
  pub start: Option<DateTime<Utc>>,
}

/// `POST /requests/{id}/accept-slot`
pub async fn accept_slot<S>(
  State(parley): State<Arc<Parley<S>>>,
  Extension(actor): Extension<Actor>,
  Path(id): Path<Uuid>,
  Json(body): Json<AcceptSlotBody>,
) -> ViewResult
where
  S: EntityStore + 'static,
{
  let request = retry_on_stale(RetryPolicy::default(), || {
    parley.negotiation.accept_slot(&actor, id, body.start)
  })
  .await?;
  Ok(Json(parley.negotiation.view(request)))
}

/// `POST /requests/{id}/decline-slots`
pub async fn decline_slots<S>(
  State(parley): State<Arc<Parley<S>>>,
  Extension(actor): Extension<Actor>,
  Path(id): Path<Uuid>,
) -> ViewResult
where
  S: EntityStore + 'static,
{
  let request = retry_on_stale(RetryPolicy::default(), || {
    parley.negotiation.decline_slots(&actor, id)
  })
  .await?;
  Ok(Json(parley.negotiation.view(request)))
}

/// `POST /requests/{id}/complete`
pub async fn complete<S>(
  State(parley): State<Arc<Parley<S>>>,
  Extension(actor): Extension<Actor>,
  Path(id): Path<Uuid>,
) -> ViewResult
where
  S: EntityStore + 'static,
{
  let request =
    retry_on_stale(RetryPolicy::default(), || parley.negotiation.complete(&actor, id)).await?;
  Ok(Json(parley.negotiation.view(request)))
}

/// `POST /requests/{id}/cancel`
pub async fn cancel<S>(
  State(parley): State<Arc<Parley<S>>>,
  Extension(actor): Extension<Actor>,
  Path(id): Path<Uuid>,
) -> ViewResult
where
  S: EntityStore + 'static,
{
  let request =
    retry_on_stale(RetryPolicy::default(), || parley.negotiation.cancel(&actor, id)).await?;
  Ok(Json(parley.negotiation.view(request)))
}

#[derive(Debug, Deserialize)]
pub struct RateBody {
  pub stars:   u8,
  pub comment: Option<String>,
}

/// `POST /requests/{id}/rate`
pub async fn rate<S>(
  State(parley): State<Arc<Parley<S>>>,
  Extension(actor): Extension<Actor>,
  Path(id): Path<Uuid>,
  Json(body): Json<RateBody>,
) -> ViewResult
where
  S: EntityStore + 'static,
{
  let request = retry_on_stale(RetryPolicy::default(), || {
    parley.negotiation.rate(&actor, id, body.stars, body.comment.clone())
  })
  .await?;
  Ok(Json(parley.negotiation.view(request)))
}
