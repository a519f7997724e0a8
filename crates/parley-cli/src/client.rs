//! Async HTTP client wrapping the Parley JSON API.

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use parley_core::{
  application::{ApplicationStatus, ExpertApplication, NewApplication},
  notify::Notification,
  presence::{TopicQuery, TopicTag},
  profile::ExpertActivation,
  request::{RequestStatus, SessionRequest, Slot},
};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Value, json};
use tracing::debug;
use uuid::Uuid;

/// Connection settings for the Parley API.
#[derive(Debug, Clone)]
pub struct ApiConfig {
  pub base_url: String,
  pub username: String,
  pub password: String,
}

/// A request as the server reports it, with expiry already applied.
#[derive(Debug, Clone, Deserialize)]
pub struct RequestView {
  #[serde(flatten)]
  pub request:          SessionRequest,
  pub effective_status: RequestStatus,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Candidate {
  pub user_id: Uuid,
  pub topics:  Vec<TopicTag>,
  pub since:   DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct ConnectionCount {
  connections: usize,
}

/// The server's error body.
#[derive(Debug, Deserialize)]
struct ErrorBody {
  error:   String,
  #[serde(default)]
  message: String,
}

/// Async HTTP client for the Parley JSON REST API.
///
/// The inner [`reqwest::Client`] is `Arc`-based, so clones are cheap.
#[derive(Clone)]
pub struct ApiClient {
  client: Client,
  config: ApiConfig,
}

impl ApiClient {
  pub fn new(config: ApiConfig) -> Result<Self> {
    // Long enough to outlast a notification long-poll.
    let client = Client::builder()
      .timeout(Duration::from_secs(90))
      .build()
      .context("failed to build HTTP client")?;
    Ok(Self { client, config })
  }

  fn url(&self, path: &str) -> String {
    format!("{}/api{}", self.config.base_url.trim_end_matches('/'), path)
  }

  fn auth(&self, req: RequestBuilder) -> RequestBuilder {
    if self.config.username.is_empty() {
      req
    } else {
      req.basic_auth(&self.config.username, Some(&self.config.password))
    }
  }

  fn request(&self, method: Method, path: &str) -> RequestBuilder {
    debug!(%method, path, "api call");
    self.auth(self.client.request(method, self.url(path)))
  }

  /// Send `req`, turning a non-2xx response into an error carrying the
  /// server's error code.
  async fn send(&self, req: RequestBuilder, what: &str) -> Result<Response> {
    let resp = req.send().await.with_context(|| format!("{what} failed"))?;
    let status = resp.status();
    if status.is_success() {
      return Ok(resp);
    }
    match resp.json::<ErrorBody>().await {
      Ok(body) if body.message.is_empty() => Err(anyhow!("{what} → {status}: {}", body.error)),
      Ok(body) => Err(anyhow!("{what} → {status}: {} ({})", body.error, body.message)),
      Err(_) => Err(anyhow!("{what} → {status}")),
    }
  }

  async fn json<T: DeserializeOwned>(&self, req: RequestBuilder, what: &str) -> Result<T> {
    self
      .send(req, what)
      .await?
      .json()
      .await
      .with_context(|| format!("deserialising {what} response"))
  }

  async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
    let what = format!("POST {path}");
    self.json(self.request(Method::POST, path).json(body), &what).await
  }

  // ── Applications ──────────────────────────────────────────────────────────

  /// `POST /api/applications`
  pub async fn submit_application(&self, input: &NewApplication) -> Result<ExpertApplication> {
    self.post("/applications", input).await
  }

  /// `PUT /api/applications/{id}`
  pub async fn resubmit_application(
    &self,
    id: Uuid,
    input: &NewApplication,
  ) -> Result<ExpertApplication> {
    let path = format!("/applications/{id}");
    let what = format!("PUT {path}");
    self.json(self.request(Method::PUT, &path).json(input), &what).await
  }

  /// `GET /api/applications[?status=<s>]`
  pub async fn list_applications(
    &self,
    status: Option<ApplicationStatus>,
  ) -> Result<Vec<ExpertApplication>> {
    let mut req = self.request(Method::GET, "/applications");
    if let Some(status) = status {
      req = req.query(&[("status", status)]);
    }
    self.json(req, "GET /applications").await
  }

  /// `POST /api/applications/{id}/approve`
  pub async fn approve(&self, id: Uuid) -> Result<ExpertApplication> {
    self.post(&format!("/applications/{id}/approve"), &json!({})).await
  }

  /// `POST /api/applications/{id}/reject`
  pub async fn reject_application(
    &self,
    id: Uuid,
    reason: Option<String>,
  ) -> Result<ExpertApplication> {
    self
      .post(&format!("/applications/{id}/reject"), &json!({ "reason": reason }))
      .await
  }

  // ── Experts ───────────────────────────────────────────────────────────────

  /// `GET /api/experts/{user_id}/activation`
  pub async fn activation(&self, user_id: Uuid) -> Result<ExpertActivation> {
    let path = format!("/experts/{user_id}/activation");
    let what = format!("GET {path}");
    self.json(self.request(Method::GET, &path), &what).await
  }

  /// `GET /api/experts/available?subject=..&topic=..[&sub_topic=..]`
  pub async fn available(&self, query: &TopicQuery) -> Result<Vec<Candidate>> {
    let req = self.request(Method::GET, "/experts/available").query(query);
    self.json(req, "GET /experts/available").await
  }

  // ── Requests ──────────────────────────────────────────────────────────────

  /// `POST /api/requests`
  pub async fn dispatch(
    &self,
    candidate: Uuid,
    topic: &TopicQuery,
    note: Option<String>,
  ) -> Result<RequestView> {
    self
      .post("/requests", &json!({ "candidate": candidate, "topic": topic, "note": note }))
      .await
  }

  /// `POST /api/interviews`
  pub async fn create_interview(
    &self,
    topic: &TopicQuery,
    note: Option<String>,
  ) -> Result<RequestView> {
    self.post("/interviews", &json!({ "topic": topic, "note": note })).await
  }

  /// `GET /api/requests[?status=<s>]`
  pub async fn list_requests(&self, status: Option<RequestStatus>) -> Result<Vec<RequestView>> {
    let mut req = self.request(Method::GET, "/requests");
    if let Some(status) = status {
      req = req.query(&[("status", status)]);
    }
    self.json(req, "GET /requests").await
  }

  /// `GET /api/requests/{id}`
  pub async fn get_request(&self, id: Uuid) -> Result<RequestView> {
    let path = format!("/requests/{id}");
    let what = format!("GET {path}");
    self.json(self.request(Method::GET, &path), &what).await
  }

  /// `POST /api/requests/{id}/{action}` for the commands that take a body.
  pub async fn command(&self, id: Uuid, action: &str, body: Value) -> Result<RequestView> {
    self.post(&format!("/requests/{id}/{action}"), &body).await
  }

  pub async fn propose(&self, id: Uuid, slots: Vec<Slot>, counter: bool) -> Result<RequestView> {
    let action = if counter { "counter" } else { "propose" };
    self.command(id, action, json!({ "slots": slots })).await
  }

  // ── Presence ──────────────────────────────────────────────────────────────

  /// `POST /api/presence`; returns the caller's open connection count.
  pub async fn connect(&self, topics: Vec<TopicTag>) -> Result<usize> {
    let count: ConnectionCount = self.post("/presence", &json!({ "topics": topics })).await?;
    Ok(count.connections)
  }

  /// `DELETE /api/presence`
  pub async fn disconnect(&self) -> Result<usize> {
    let count: ConnectionCount = self
      .json(self.request(Method::DELETE, "/presence"), "DELETE /presence")
      .await?;
    Ok(count.connections)
  }

  /// `GET /api/notifications?wait_secs=<n>`; `None` when the poll timed out.
  pub async fn next_notification(&self, wait_secs: u64) -> Result<Option<Notification>> {
    let req = self
      .request(Method::GET, "/notifications")
      .query(&[("wait_secs", wait_secs)]);
    let resp = self.send(req, "GET /notifications").await?;
    if resp.status() == StatusCode::NO_CONTENT {
      return Ok(None);
    }
    resp.json().await.map(Some).context("deserialising notification")
  }
}
