//! Real-time matching: who can take a request right now, and handing a
//! request to exactly one of them.

use chrono::{DateTime, Utc};
use parley_core::{
  Error, Result,
  actor::Actor,
  notify::Notification,
  presence::{AvailabilityRecord, TopicQuery, TopicTag},
  request::{RequestKind, RequestStatus, SessionRequest},
  store::EntityStore,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::{activation::ActivationEngine, deps::Deps, ops::create};

/// An expert who was present and offering the queried topic when the
/// snapshot was taken.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
  pub user_id: Uuid,
  pub topics:  Vec<TopicTag>,
  pub since:   DateTime<Utc>,
}

impl From<AvailabilityRecord> for Candidate {
  fn from(record: AvailabilityRecord) -> Self {
    Self { user_id: record.user_id, topics: record.topics, since: record.since }
  }
}

/// One pass over a point-in-time presence snapshot, longest-present first.
///
/// The snapshot is never refreshed; query again for current presence.
#[derive(Debug)]
pub struct Candidates {
  inner: std::vec::IntoIter<Candidate>,
}

impl Iterator for Candidates {
  type Item = Candidate;

  fn next(&mut self) -> Option<Candidate> { self.inner.next() }

  fn size_hint(&self) -> (usize, Option<usize>) { self.inner.size_hint() }
}

impl ExactSizeIterator for Candidates {}

/// What the requester wants help with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchPayload {
  pub topic: TopicQuery,
  #[serde(default)]
  pub note:  Option<String>,
}

pub struct Matcher<S> {
  deps:       Deps<S>,
  activation: ActivationEngine<S>,
}

impl<S> Clone for Matcher<S> {
  fn clone(&self) -> Self {
    Self { deps: self.deps.clone(), activation: self.activation.clone() }
  }
}

impl<S> Matcher<S>
where
  S: EntityStore + 'static,
{
  pub fn new(deps: Deps<S>, activation: ActivationEngine<S>) -> Self {
    Self { deps, activation }
  }

  /// Active experts who are online and offering `query`. Connected users
  /// who are not active experts are left out.
  pub async fn find_available_experts(&self, query: &TopicQuery) -> Result<Candidates> {
    query.validate()?;
    let mut found = Vec::new();
    for record in self.deps.presence.snapshot(query) {
      if record.offers(query) && self.activation.is_expert(record.user_id).await? {
        found.push(Candidate::from(record));
      }
    }
    found.sort_by_key(|c| c.since);

    debug!(subject = %query.subject, topic = %query.topic, found = found.len(), "matched experts");
    Ok(Candidates { inner: found.into_iter() })
  }

  /// Address a new tutoring request to `candidate` alone.
  ///
  /// Presence, the offered topic and activation are re-checked here, so a
  /// candidate who went offline or stopped offering the topic after
  /// [`find_available_experts`](Self::find_available_experts) is refused with
  /// [`Error::TargetUnavailable`].
  pub async fn dispatch_request(
    &self,
    requester: &Actor,
    candidate: Uuid,
    payload: DispatchPayload,
  ) -> Result<SessionRequest> {
    payload.topic.validate()?;
    if candidate == requester.user_id {
      return Err(Error::Validation("cannot dispatch a request to yourself".into()));
    }
    if !self.deps.presence.is_present(candidate) {
      return Err(Error::TargetUnavailable(candidate));
    }
    let offers_topic = self
      .deps
      .presence
      .snapshot(&payload.topic)
      .iter()
      .any(|record| record.user_id == candidate && record.offers(&payload.topic));
    if !offers_topic {
      debug!(%candidate, topic = %payload.topic.topic, "candidate does not offer the topic");
      return Err(Error::TargetUnavailable(candidate));
    }
    if !self.activation.ensure_activated(candidate).await?.is_active {
      return Err(Error::TargetUnavailable(candidate));
    }

    let requester_id = requester.user_id;
    let outstanding = self
      .deps
      .store
      .query::<SessionRequest, _>(move |request| {
        request.requester_id == requester_id
          && request.kind == RequestKind::Tutoring
          && request.status() == RequestStatus::PendingResponse
      })
      .await
      .map_err(Error::store)?;
    if !outstanding.is_empty() {
      return Err(Error::AlreadyDispatched(requester_id));
    }

    let request = SessionRequest::tutoring(
      requester_id,
      candidate,
      payload.topic,
      payload.note,
      self.deps.clock.now(),
    );
    let request = create(&*self.deps.store, request).await?;

    info!(
      request_id = %request.request_id,
      %requester_id,
      respondent_id = %candidate,
      "request dispatched"
    );
    self.deps.notifier.send(candidate, Notification::RequestReceived {
      request_id: request.request_id,
      requester_id,
    });
    Ok(request)
  }
}
