//! The negotiation service: loads a request, checks who is asking, runs the
//! pure transition in `parley-core` and writes the result back with a
//! compare-and-set against the version it read.

use chrono::{DateTime, Utc};
use parley_core::{
  Error, Result,
  actor::Actor,
  notify::Notification,
  presence::TopicQuery,
  request::{Command, Party, RequestStatus, SessionRequest, Slot, Standing},
  store::EntityStore,
};
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
  activation::ActivationEngine,
  deps::Deps,
  ops::{create, load, save},
};

/// A request as a reader should see it: the stored document plus the
/// status with any due expiry applied.
#[derive(Debug, Clone, Serialize)]
pub struct RequestView {
  #[serde(flatten)]
  pub request:          SessionRequest,
  pub effective_status: RequestStatus,
}

pub struct Negotiator<S> {
  deps:       Deps<S>,
  activation: ActivationEngine<S>,
}

impl<S> Clone for Negotiator<S> {
  fn clone(&self) -> Self {
    Self { deps: self.deps.clone(), activation: self.activation.clone() }
  }
}

impl<S> Negotiator<S>
where
  S: EntityStore + 'static,
{
  pub fn new(deps: Deps<S>, activation: ActivationEngine<S>) -> Self {
    Self { deps, activation }
  }

  fn now(&self) -> DateTime<Utc> { self.deps.clock.now() }

  pub fn view(&self, request: SessionRequest) -> RequestView {
    let effective_status = request.effective_status(self.now(), self.deps.policy.expiry_window);
    RequestView { request, effective_status }
  }

  // ─── Reads ────────────────────────────────────────────────────────────────

  /// Open an interview request. It waits in `open` until an operator
  /// assigns an interviewer.
  pub async fn create_interview(
    &self,
    requester: &Actor,
    topic: TopicQuery,
    note: Option<String>,
  ) -> Result<SessionRequest> {
    topic.validate()?;
    let request = SessionRequest::interview(requester.user_id, topic, note, self.now());
    let request = create(&*self.deps.store, request).await?;
    info!(
      request_id = %request.request_id,
      requester_id = %request.requester_id,
      "interview request opened"
    );
    Ok(request)
  }

  pub async fn get(&self, actor: &Actor, request_id: Uuid) -> Result<RequestView> {
    let request: SessionRequest = load(&*self.deps.store, request_id).await?;
    if request.standing_of(actor).is_none() {
      return Err(Error::Unauthorized("not a party to this request".into()));
    }
    Ok(self.view(request))
  }

  /// Every request `actor` takes part in (all of them, for operators),
  /// optionally narrowed to one effective status. This is how a client
  /// catches up on notifications it missed.
  pub async fn list_for(
    &self,
    actor: &Actor,
    status: Option<RequestStatus>,
  ) -> Result<Vec<RequestView>> {
    let actor = *actor;
    let requests = self
      .deps
      .store
      .query::<SessionRequest, _>(move |request| request.standing_of(&actor).is_some())
      .await
      .map_err(Error::store)?;

    Ok(
      requests
        .into_iter()
        .map(|request| self.view(request))
        .filter(|view| status.is_none_or(|s| view.effective_status == s))
        .collect(),
    )
  }

  // ─── Commands ─────────────────────────────────────────────────────────────

  /// Hand an open interview request to `respondent`, who must be an active
  /// expert.
  pub async fn assign(
    &self,
    operator: &Actor,
    request_id: Uuid,
    respondent: Uuid,
  ) -> Result<SessionRequest> {
    if !operator.is_operator() {
      return Err(Error::Unauthorized("only operators may assign requests".into()));
    }
    if !self.activation.ensure_activated(respondent).await?.is_active {
      return Err(Error::TargetUnavailable(respondent));
    }
    self.transition(operator, request_id, Command::Assign { respondent }).await
  }

  pub async fn accept(&self, actor: &Actor, request_id: Uuid) -> Result<SessionRequest> {
    self.transition(actor, request_id, Command::Accept).await
  }

  pub async fn reject(
    &self,
    actor: &Actor,
    request_id: Uuid,
    reason: Option<String>,
  ) -> Result<SessionRequest> {
    self.transition(actor, request_id, Command::Reject { reason }).await
  }

  /// Offer slots, replacing whatever the respondent offered before.
  pub async fn propose(
    &self,
    actor: &Actor,
    request_id: Uuid,
    slots: Vec<Slot>,
  ) -> Result<SessionRequest> {
    self.transition(actor, request_id, Command::Propose { slots }).await
  }

  /// Answer the live proposal with alternates.
  pub async fn counter(
    &self,
    actor: &Actor,
    request_id: Uuid,
    slots: Vec<Slot>,
  ) -> Result<SessionRequest> {
    self.transition(actor, request_id, Command::Counter { slots }).await
  }

  /// Confirm one slot from the other party's proposal. `start` may be
  /// omitted when exactly one slot is on offer.
  pub async fn accept_slot(
    &self,
    actor: &Actor,
    request_id: Uuid,
    start: Option<DateTime<Utc>>,
  ) -> Result<SessionRequest> {
    self.transition(actor, request_id, Command::AcceptSlot { start }).await
  }

  pub async fn decline_slots(&self, actor: &Actor, request_id: Uuid) -> Result<SessionRequest> {
    self.transition(actor, request_id, Command::DeclineSlots).await
  }

  pub async fn complete(&self, actor: &Actor, request_id: Uuid) -> Result<SessionRequest> {
    self.transition(actor, request_id, Command::Complete).await
  }

  pub async fn cancel(&self, actor: &Actor, request_id: Uuid) -> Result<SessionRequest> {
    self.transition(actor, request_id, Command::Cancel).await
  }

  /// Rate a completed session. Each party rates at most once.
  pub async fn rate(
    &self,
    actor: &Actor,
    request_id: Uuid,
    stars: u8,
    comment: Option<String>,
  ) -> Result<SessionRequest> {
    let current: SessionRequest = load(&*self.deps.store, request_id).await?;
    let Some(party) = current.party_of(actor.user_id) else {
      return Err(Error::Unauthorized("only the parties may rate a session".into()));
    };

    let next = current.rate(party, stars, comment, self.now())?;
    let saved = save(&*self.deps.store, next).await?;
    info!(%request_id, ?party, stars, "session rated");
    Ok(saved)
  }

  /// Persist every expiry that has come due. Returns how many requests were
  /// expired by this call.
  pub async fn sweep_expired(&self) -> Result<usize> {
    let now = self.now();
    let window = self.deps.policy.expiry_window;
    let due = self
      .deps
      .store
      .query::<SessionRequest, _>(move |request| request.is_expired_at(now, window))
      .await
      .map_err(Error::store)?;

    let mut expired = 0;
    for request in due {
      match self.expire(&request, Standing::System, now).await {
        Ok(_) => expired += 1,
        // Someone else moved it first; the next sweep sees the new state.
        Err(Error::StaleState { .. } | Error::InvalidTransition { .. }) => {
          debug!(request_id = %request.request_id, "expiry raced with another write");
        }
        Err(err) => return Err(err),
      }
    }
    if expired > 0 {
      info!(expired, "expired stale requests");
    }
    Ok(expired)
  }

  // ─── Internals ────────────────────────────────────────────────────────────

  async fn transition(
    &self,
    actor: &Actor,
    request_id: Uuid,
    command: Command,
  ) -> Result<SessionRequest> {
    let now = self.now();
    let current: SessionRequest = load(&*self.deps.store, request_id).await?;
    let Some(by) = current.standing_of(actor) else {
      return Err(Error::Unauthorized("not a party to this request".into()));
    };

    // A request past its window is expired for everyone; record that before
    // refusing the command.
    if current.is_expired_at(now, self.deps.policy.expiry_window) {
      let action = command.name();
      self.expire(&current, Standing::System, now).await?;
      return Err(Error::InvalidTransition { status: RequestStatus::Expired, action });
    }

    if by == Standing::Respondent
      && !matches!(command, Command::Reject { .. } | Command::Cancel)
    {
      self.activation.require_active(actor.user_id).await?;
    }

    let from = current.status();
    let next = current.apply(by, command, now, &self.deps.policy)?;
    let saved = save(&*self.deps.store, next).await?;
    info!(%request_id, %from, to = %saved.status(), ?by, "request transitioned");

    self.announce(&saved, by);
    Ok(saved)
  }

  async fn expire(
    &self,
    request: &SessionRequest,
    by: Standing,
    now: DateTime<Utc>,
  ) -> Result<SessionRequest> {
    let next = request.apply(by, Command::Expire, now, &self.deps.policy)?;
    let saved = save(&*self.deps.store, next).await?;
    info!(request_id = %saved.request_id, "request expired");
    self.announce(&saved, by);
    Ok(saved)
  }

  /// Tell every party other than the one who acted. A respondent seeing a
  /// request for the first time gets a `RequestReceived`.
  fn announce(&self, request: &SessionRequest, by: Standing) {
    for party in [Party::Requester, Party::Respondent] {
      if by.party() == Some(party) {
        continue;
      }
      let Some(user_id) = request.user_of(party) else {
        continue;
      };

      let notification = if party == Party::Respondent
        && request.status() == RequestStatus::PendingResponse
      {
        Notification::RequestReceived {
          request_id:   request.request_id,
          requester_id: request.requester_id,
        }
      } else {
        Notification::RequestUpdated { request_id: request.request_id, status: request.status() }
      };
      self.deps.notifier.send(user_id, notification);
    }
  }
}
