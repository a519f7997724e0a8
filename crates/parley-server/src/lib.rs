//! HTTP server for Parley.
//!
//! Wraps the JSON API from `parley-api` with Basic authentication, the
//! presence lifecycle endpoints that feed real-time matching, a long-poll
//! endpoint for push notifications, and request tracing.

pub mod auth;
pub mod error;
pub mod presence;

pub use error::Error;

use std::{path::PathBuf, sync::Arc};

use axum::{
  Router, middleware,
  routing::{get, post},
};
use parley_core::{
  policy::{DEFAULT_EXPIRY_WINDOW_SECS, DEFAULT_GRACE_PERIOD_SECS, Policy},
  store::EntityStore,
};
use parley_engine::{ChannelNotifier, InMemoryPresence, Parley};
use serde::Deserialize;
use tower_http::trace::TraceLayer;

use auth::{Account, AuthConfig, require_auth};

// ─── Configuration ────────────────────────────────────────────────────────────

/// Runtime server configuration, deserialised from `config.toml` and
/// `PARLEY_*` environment variables.
#[derive(Deserialize, Clone)]
pub struct ServerConfig {
  pub host:                String,
  pub port:                u16,
  /// SQLite file; `:memory:` keeps everything in process.
  pub store_path:          PathBuf,
  #[serde(default = "default_grace_period_secs")]
  pub grace_period_secs:   i64,
  #[serde(default = "default_expiry_window_secs")]
  pub expiry_window_secs:  i64,
  /// Schedule a timer per approval in addition to lazy activation.
  #[serde(default = "default_true")]
  pub eager_activation:    bool,
  /// How often overdue requests are persisted as expired.
  #[serde(default = "default_sweep_interval_secs")]
  pub sweep_interval_secs: u64,
  #[serde(default)]
  pub accounts:            Vec<Account>,
}

fn default_grace_period_secs() -> i64 { DEFAULT_GRACE_PERIOD_SECS }

fn default_expiry_window_secs() -> i64 { DEFAULT_EXPIRY_WINDOW_SECS }

fn default_sweep_interval_secs() -> u64 { 60 }

fn default_true() -> bool { true }

impl ServerConfig {
  pub fn policy(&self) -> Policy {
    Policy::from_secs(self.grace_period_secs, self.expiry_window_secs)
  }
}

// ─── Application state ────────────────────────────────────────────────────────

/// Shared state threaded through the server's own handlers.
pub struct AppState<S> {
  pub parley:   Arc<Parley<S>>,
  pub presence: Arc<InMemoryPresence>,
  pub notifier: Arc<ChannelNotifier>,
  pub auth:     Arc<AuthConfig>,
}

impl<S> Clone for AppState<S> {
  fn clone(&self) -> Self {
    Self {
      parley:   Arc::clone(&self.parley),
      presence: Arc::clone(&self.presence),
      notifier: Arc::clone(&self.notifier),
      auth:     Arc::clone(&self.auth),
    }
  }
}

// ─── Router ───────────────────────────────────────────────────────────────────

/// Build the full server [`Router`]: everything under `/api`, authenticated.
pub fn router<S>(state: AppState<S>) -> Router
where
  S: EntityStore + 'static,
{
  let own = Router::new()
    .route(
      "/presence",
      post(presence::connect::<S>).delete(presence::disconnect::<S>),
    )
    .route("/notifications", get(presence::next_notification::<S>))
    .with_state(state.clone());

  let api = parley_api::api_router(state.parley.clone())
    .merge(own)
    .layer(middleware::from_fn_with_state(state.auth.clone(), require_auth));

  Router::new()
    .nest("/api", api)
    .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
  use super::*;

  use argon2::{Argon2, PasswordHasher, password_hash::SaltString};
  use axum::{
    body::Body,
    http::{Request, StatusCode, header},
  };
  use base64::Engine as _;
  use base64::engine::general_purpose::STANDARD as B64;
  use parley_core::actor::Role;
  use parley_engine::{Deps, MemoryStore};
  use rand_core::OsRng;
  use serde_json::{Value, json};
  use tower::ServiceExt as _;
  use uuid::Uuid;

  const PASSWORD: &str = "secret";

  fn account(username: &str, role: Role) -> Account {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
      .hash_password(PASSWORD.as_bytes(), &salt)
      .unwrap()
      .to_string();
    Account {
      username: username.to_string(),
      password_hash: hash,
      user_id: Uuid::new_v4(),
      role,
    }
  }

  fn make_state(accounts: Vec<Account>) -> AppState<MemoryStore> {
    let presence = Arc::new(InMemoryPresence::new());
    let notifier = Arc::new(ChannelNotifier::new());
    let deps = Deps::new(Arc::new(MemoryStore::new()))
      .with_presence(presence.clone())
      .with_notifier(notifier.clone())
      .with_policy(Policy::from_secs(0, DEFAULT_EXPIRY_WINDOW_SECS));
    AppState {
      parley: Arc::new(Parley::new(deps)),
      presence,
      notifier,
      auth: Arc::new(AuthConfig::new(accounts)),
    }
  }

  fn auth_header(user: &str) -> String {
    format!("Basic {}", B64.encode(format!("{user}:{PASSWORD}")))
  }

  async fn send(
    state: AppState<MemoryStore>,
    method: &str,
    uri: &str,
    user: Option<&str>,
    body: Option<Value>,
  ) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(user) = user {
      builder = builder.header(header::AUTHORIZATION, auth_header(user));
    }
    let body = match body {
      Some(json) => {
        builder = builder.header(header::CONTENT_TYPE, "application/json");
        Body::from(json.to_string())
      }
      None => Body::empty(),
    };
    let resp = router(state).oneshot(builder.body(body).unwrap()).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
      Value::Null
    } else {
      serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
  }

  #[tokio::test]
  async fn api_requires_credentials() {
    let state = make_state(vec![account("alice", Role::Member)]);
    let (status, body) = send(state, "GET", "/api/requests", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthenticated");
  }

  #[tokio::test]
  async fn authenticated_caller_reaches_the_api() {
    let state = make_state(vec![account("alice", Role::Member)]);
    let (status, body) = send(state, "GET", "/api/requests", Some("alice"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));
  }

  fn application_body() -> Value {
    json!({
      "expertise": "tutor",
      "skills": [{ "class": "Class 10", "subject": "Math", "topic": "Algebra" }],
      "documents": []
    })
  }

  #[tokio::test]
  async fn presence_lifecycle_feeds_matching() {
    let alice = account("alice", Role::Member);
    let alice_id = alice.user_id;
    let state = make_state(vec![alice, account("bob", Role::Member), account("ops", Role::Operator)]);
    let topics = json!({ "topics": [{ "subject": "Math", "topic": "Algebra" }] });

    let (_, app) =
      send(state.clone(), "POST", "/api/applications", Some("alice"), Some(application_body()))
        .await;
    let approve = format!("/api/applications/{}/approve", app["application_id"].as_str().unwrap());
    let (status, _) = send(state.clone(), "POST", &approve, Some("ops"), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) =
      send(state.clone(), "POST", "/api/presence", Some("alice"), Some(topics.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["connections"], 1);

    // Bob is online for the same topic but was never approved.
    send(state.clone(), "POST", "/api/presence", Some("bob"), Some(topics)).await;

    let uri = "/api/experts/available?subject=Math&topic=Algebra";
    let (_, found) = send(state.clone(), "GET", uri, Some("bob"), None).await;
    assert_eq!(found.as_array().unwrap().len(), 1);
    assert_eq!(found[0]["user_id"], alice_id.to_string());

    let (status, body) = send(state.clone(), "DELETE", "/api/presence", Some("alice"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["connections"], 0);

    let (_, found) = send(state, "GET", uri, Some("bob"), None).await;
    assert_eq!(found, json!([]));
  }

  #[tokio::test]
  async fn operator_role_comes_from_the_account() {
    let state = make_state(vec![account("alice", Role::Member), account("ops", Role::Operator)]);
    let app = json!({
      "expertise": "interviewer",
      "skills": [{ "class": "Senior", "subject": "Backend", "topic": "Rust" }],
      "documents": []
    });

    let (status, created) =
      send(state.clone(), "POST", "/api/applications", Some("alice"), Some(app)).await;
    assert_eq!(status, StatusCode::CREATED);
    let id = created["application_id"].as_str().unwrap().to_owned();

    let uri = format!("/api/applications/{id}/approve");
    let (status, _) = send(state.clone(), "POST", &uri, Some("alice"), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, body) = send(state, "POST", &uri, Some("ops"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["review"]["status"], "approved");
  }

  #[tokio::test]
  async fn long_poll_times_out_without_events() {
    let state = make_state(vec![account("alice", Role::Member)]);
    let (status, _) =
      send(state.clone(), "GET", "/api/notifications?wait_secs=0", Some("alice"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(state.notifier.channel_count(), 0);
  }
}
