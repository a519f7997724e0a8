//! Connection lifecycle endpoints.
//!
//! | Method   | Path | Notes |
//! |----------|------|-------|
//! | `POST`   | `/presence` | Open a connection; body: `{"topics":[...]}` |
//! | `DELETE` | `/presence` | Close one connection |
//! | `GET`    | `/notifications` | Long-poll for the next notification; `?wait_secs=` (max 60) |
//!
//! Notifications are best effort: anything sent while no poll is waiting is
//! dropped, and clients reconcile through `GET /requests`.

use std::time::Duration;

use axum::{
  Extension, Json,
  extract::{Query, State},
  http::StatusCode,
  response::{IntoResponse, Response},
};
use parley_core::{actor::Actor, presence::TopicTag, store::EntityStore};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info};

use crate::AppState;

const MAX_WAIT_SECS: u64 = 60;

#[derive(Debug, Deserialize)]
pub struct ConnectBody {
  #[serde(default)]
  pub topics: Vec<TopicTag>,
}

#[derive(Debug, Serialize)]
pub struct ConnectionCount {
  pub connections: usize,
}

/// `POST /presence`
pub async fn connect<S>(
  State(state): State<AppState<S>>,
  Extension(actor): Extension<Actor>,
  Json(body): Json<ConnectBody>,
) -> Json<ConnectionCount>
where
  S: EntityStore + 'static,
{
  let connections = state.presence.connect(actor.user_id, body.topics);
  info!(user_id = %actor.user_id, connections, "client connected");
  Json(ConnectionCount { connections })
}

/// `DELETE /presence`
pub async fn disconnect<S>(
  State(state): State<AppState<S>>,
  Extension(actor): Extension<Actor>,
) -> Json<ConnectionCount>
where
  S: EntityStore + 'static,
{
  let connections = state.presence.disconnect(actor.user_id);
  info!(user_id = %actor.user_id, connections, "client disconnected");
  Json(ConnectionCount { connections })
}

#[derive(Debug, Deserialize)]
pub struct WaitParams {
  pub wait_secs: Option<u64>,
}

/// `GET /notifications[?wait_secs=25]`: 200 with the notification, or 204
/// when nothing arrived in time.
pub async fn next_notification<S>(
  State(state): State<AppState<S>>,
  Extension(actor): Extension<Actor>,
  Query(params): Query<WaitParams>,
) -> Response
where
  S: EntityStore + 'static,
{
  let wait = Duration::from_secs(params.wait_secs.unwrap_or(25).min(MAX_WAIT_SECS));
  let mut rx = state.notifier.subscribe(actor.user_id);

  let response = loop {
    match tokio::time::timeout(wait, rx.recv()).await {
      Ok(Ok(notification)) => break Json(notification).into_response(),
      Ok(Err(RecvError::Lagged(skipped))) => {
        debug!(user_id = %actor.user_id, skipped, "notification poll lagged");
      }
      Ok(Err(RecvError::Closed)) | Err(_) => break StatusCode::NO_CONTENT.into_response(),
    }
  };

  drop(rx);
  state.notifier.release(actor.user_id);
  response
}
