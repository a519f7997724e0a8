//! End-to-end behaviour of the three services against `MemoryStore` with a
//! hand-driven clock.

use std::sync::{
  Arc,
  atomic::{AtomicBool, Ordering},
};

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use parley_core::{
  Error,
  actor::Actor,
  application::{ApplicationStatus, Expertise, NewApplication},
  clock::{Clock, ManualClock},
  notify::Notification,
  policy::Policy,
  presence::{TopicQuery, TopicTag},
  profile::ExpertProfile,
  request::{Command, RequestState, RequestStatus, SessionRequest, Slot, Standing},
  skill::Skill,
  store::{CasOutcome, Document, DocumentKind, EntityStore},
};
use uuid::Uuid;

use crate::{
  ChannelNotifier, Deps, DispatchPayload, InMemoryPresence, MemoryStore, Parley,
  memory::MemoryStoreError, ops::save,
};

/// Sunday 2024-03-03 09:00 UTC.
fn t0() -> DateTime<Utc> { Utc.with_ymd_and_hms(2024, 3, 3, 9, 0, 0).unwrap() }

fn at(day: u32, hour: u32) -> DateTime<Utc> {
  Utc.with_ymd_and_hms(2024, 3, day, hour, 0, 0).unwrap()
}

struct Harness {
  parley:   Parley<MemoryStore>,
  store:    Arc<MemoryStore>,
  clock:    Arc<ManualClock>,
  presence: Arc<InMemoryPresence>,
  notifier: Arc<ChannelNotifier>,
  operator: Actor,
}

fn harness() -> Harness {
  let store = Arc::new(MemoryStore::new());
  let clock = Arc::new(ManualClock::new(t0()));
  let presence = Arc::new(InMemoryPresence::with_clock(clock.clone()));
  let notifier = Arc::new(ChannelNotifier::new());
  let deps = Deps::new(store.clone())
    .with_clock(clock.clone())
    .with_presence(presence.clone())
    .with_notifier(notifier.clone());

  Harness {
    parley: Parley::new(deps),
    store,
    clock,
    presence,
    notifier,
    operator: Actor::operator(Uuid::new_v4()),
  }
}

fn algebra() -> Skill { Skill::new("Class 10", "Math", "Algebra") }

fn application(skills: Vec<Skill>) -> NewApplication {
  NewApplication {
    expertise: Expertise::Tutor,
    skills,
    documents: vec!["https://files.example.com/cv.pdf".into()],
  }
}

fn math_tag() -> TopicTag {
  TopicTag { subject: "Math".into(), topic: "Algebra".into(), sub_topic: None }
}

impl Harness {
  /// Submit, approve and wait out the grace period for a fresh expert.
  async fn active_expert(&self) -> Actor {
    let expert = Actor::member(Uuid::new_v4());
    let app = self
      .parley
      .activation
      .submit(&expert, application(vec![algebra()]))
      .await
      .unwrap();
    self.parley.activation.approve(&self.operator, app.application_id).await.unwrap();
    self.clock.advance(TimeDelta::seconds(300));
    assert!(self.parley.activation.ensure_activated(expert.user_id).await.unwrap().is_active);
    expert
  }

  /// A tutoring request from a new requester to an online expert, already
  /// accepted and waiting for slots.
  async fn accepted_request(&self) -> (Actor, Actor, SessionRequest) {
    let expert = self.active_expert().await;
    self.presence.connect(expert.user_id, vec![math_tag()]);
    let requester = Actor::member(Uuid::new_v4());

    let request = self
      .parley
      .matching
      .dispatch_request(&requester, expert.user_id, DispatchPayload {
        topic: TopicQuery::new("Math", "Algebra"),
        note:  None,
      })
      .await
      .unwrap();
    let request = self.parley.negotiation.accept(&expert, request.request_id).await.unwrap();
    (requester, expert, request)
  }
}

/// `MemoryStore` whose profile writes fail while `fail_profiles` is set.
#[derive(Default)]
struct FlakyProfiles {
  inner:         MemoryStore,
  fail_profiles: AtomicBool,
}

#[derive(Debug, thiserror::Error)]
enum FlakyError {
  #[error(transparent)]
  Inner(#[from] MemoryStoreError),
  #[error("profile writes unavailable")]
  Unavailable,
}

impl FlakyProfiles {
  fn check<D: Document>(&self) -> Result<(), FlakyError> {
    if D::KIND == DocumentKind::Profile && self.fail_profiles.load(Ordering::SeqCst) {
      Err(FlakyError::Unavailable)
    } else {
      Ok(())
    }
  }
}

impl EntityStore for FlakyProfiles {
  type Error = FlakyError;

  async fn get<D: Document>(&self, id: Uuid) -> Result<Option<D>, FlakyError> {
    Ok(self.inner.get::<D>(id).await?)
  }

  async fn insert<D: Document>(&self, doc: D) -> Result<CasOutcome<D>, FlakyError> {
    self.check::<D>()?;
    Ok(self.inner.insert(doc).await?)
  }

  async fn compare_and_set<D: Document>(
    &self,
    doc: D,
    expected_version: u64,
  ) -> Result<CasOutcome<D>, FlakyError> {
    self.check::<D>()?;
    Ok(self.inner.compare_and_set(doc, expected_version).await?)
  }

  async fn list<D: Document>(&self) -> Result<Vec<D>, FlakyError> {
    Ok(self.inner.list::<D>().await?)
  }
}

fn flaky_parley() -> (Parley<FlakyProfiles>, Arc<FlakyProfiles>, Arc<ManualClock>) {
  let store = Arc::new(FlakyProfiles::default());
  let clock = Arc::new(ManualClock::new(t0()));
  let parley = Parley::new(Deps::new(store.clone()).with_clock(clock.clone()));
  (parley, store, clock)
}

// ─── Review & activation ─────────────────────────────────────────────────────

#[tokio::test]
async fn second_review_is_refused_and_changes_nothing() {
  let h = harness();
  let applicant = Actor::member(Uuid::new_v4());
  let app = h.parley.activation.submit(&applicant, application(vec![algebra()])).await.unwrap();

  let approved = h.parley.activation.approve(&h.operator, app.application_id).await.unwrap();
  assert_eq!(approved.status(), ApplicationStatus::Approved);

  let again = h.parley.activation.approve(&h.operator, app.application_id).await;
  assert!(matches!(again, Err(Error::AlreadyReviewed(id)) if id == app.application_id));
  let rejected = h.parley.activation.reject(&h.operator, app.application_id, None).await;
  assert!(matches!(rejected, Err(Error::AlreadyReviewed(_))));

  let stored = h.parley.activation.get_application(&applicant, app.application_id).await.unwrap();
  assert_eq!(stored.status(), ApplicationStatus::Approved);
  assert_eq!(stored.version, approved.version);
}

#[tokio::test]
async fn members_cannot_review() {
  let h = harness();
  let applicant = Actor::member(Uuid::new_v4());
  let app = h.parley.activation.submit(&applicant, application(vec![algebra()])).await.unwrap();

  let out = h.parley.activation.approve(&applicant, app.application_id).await;
  assert!(matches!(out, Err(Error::Unauthorized(_))));
}

#[tokio::test]
async fn activation_flips_lazily_at_the_deadline() {
  let h = harness();
  let expert = Actor::member(Uuid::new_v4());
  let mut events = h.notifier.subscribe(expert.user_id);
  let app = h.parley.activation.submit(&expert, application(vec![algebra()])).await.unwrap();
  h.parley.activation.approve(&h.operator, app.application_id).await.unwrap();

  h.clock.advance(TimeDelta::seconds(299));
  let view = h.parley.activation.ensure_activated(expert.user_id).await.unwrap();
  assert!(!view.is_active);
  assert_eq!(view.activation_at, Some(t0() + TimeDelta::seconds(300)));
  assert!(!h.parley.activation.is_expert(expert.user_id).await.unwrap());

  h.clock.advance(TimeDelta::seconds(2));
  let before = h.store.get::<ExpertProfile>(expert.user_id).await.unwrap().unwrap();
  assert!(h.parley.activation.is_expert(expert.user_id).await.unwrap());
  let after = h.store.get::<ExpertProfile>(expert.user_id).await.unwrap().unwrap();
  assert_eq!(after.version, before.version);
  assert!(!after.activation.is_active());
  let view = h.parley.activation.ensure_activated(expert.user_id).await.unwrap();
  assert!(view.is_active);

  assert!(matches!(events.recv().await.unwrap(), Notification::ApplicationApproved { .. }));
  assert!(matches!(events.recv().await.unwrap(), Notification::ExpertActivated { .. }));
}

#[tokio::test]
async fn concurrent_activation_checks_converge() {
  let h = harness();
  let expert = Actor::member(Uuid::new_v4());
  let app = h.parley.activation.submit(&expert, application(vec![algebra()])).await.unwrap();
  h.parley.activation.approve(&h.operator, app.application_id).await.unwrap();
  h.clock.advance(TimeDelta::seconds(600));

  let (a, b) = tokio::join!(
    h.parley.activation.ensure_activated(expert.user_id),
    h.parley.activation.ensure_activated(expert.user_id),
  );
  assert!(a.unwrap().is_active);
  assert!(b.unwrap().is_active);

  let profile: ExpertProfile = h.store.get(expert.user_id).await.unwrap().unwrap();
  assert_eq!(profile.version, 2);
}

#[tokio::test]
async fn unknown_users_read_as_inactive() {
  let h = harness();
  let view = h.parley.activation.ensure_activated(Uuid::new_v4()).await.unwrap();
  assert!(!view.is_active);
  assert!(view.activation_at.is_none());
}

#[tokio::test]
async fn rejection_resets_an_existing_profile() {
  let h = harness();
  let expert = h.active_expert().await;

  let second = h.parley.activation.submit(&expert, application(vec![algebra()])).await.unwrap();
  h.parley
    .activation
    .reject(&h.operator, second.application_id, Some("incomplete".into()))
    .await
    .unwrap();

  let view = h.parley.activation.ensure_activated(expert.user_id).await.unwrap();
  assert!(!view.is_active);
  assert!(view.activation_at.is_none());
}

#[tokio::test]
async fn resubmission_returns_to_pending() {
  let h = harness();
  let applicant = Actor::member(Uuid::new_v4());
  let app = h.parley.activation.submit(&applicant, application(vec![algebra()])).await.unwrap();
  h.parley.activation.reject(&h.operator, app.application_id, None).await.unwrap();

  let stranger = Actor::member(Uuid::new_v4());
  let out = h
    .parley
    .activation
    .resubmit(&stranger, app.application_id, application(vec![algebra()]))
    .await;
  assert!(matches!(out, Err(Error::Unauthorized(_))));

  let again = h
    .parley
    .activation
    .resubmit(&applicant, app.application_id, application(vec![algebra()]))
    .await
    .unwrap();
  assert_eq!(again.status(), ApplicationStatus::Pending);
  assert!(again.reviewed_at().is_none());

  let queue = h.parley.activation.pending_applications(&h.operator).await.unwrap();
  assert_eq!(queue.len(), 1);
}

/// A1 approved at t=0; inactive at t=299; an unrelated rejection changes
/// nothing; active at t=301 with the skill lists merged.
#[tokio::test]
async fn approval_scenario_with_unrelated_rejection() {
  let h = harness();
  let expert = Actor::member(Uuid::new_v4());

  let mut seeded = ExpertProfile::new(expert.user_id, t0());
  seeded.skills = vec![Skill::new("Class 9", "Physics", "Optics"), algebra()];
  h.store.insert(seeded).await.unwrap();

  let a1 = h
    .parley
    .activation
    .submit(&expert, application(vec![
      Skill::new("class 10", "MATH", " algebra "),
      Skill::new("Class 10", "Math", "Geometry"),
    ]))
    .await
    .unwrap();
  let other = Actor::member(Uuid::new_v4());
  let a2 = h.parley.activation.submit(&other, application(vec![algebra()])).await.unwrap();

  h.parley.activation.approve(&h.operator, a1.application_id).await.unwrap();

  h.clock.set(t0() + TimeDelta::seconds(299));
  assert!(!h.parley.activation.ensure_activated(expert.user_id).await.unwrap().is_active);

  h.parley.activation.reject(&h.operator, a2.application_id, None).await.unwrap();

  h.clock.set(t0() + TimeDelta::seconds(301));
  assert!(h.parley.activation.ensure_activated(expert.user_id).await.unwrap().is_active);

  let profile: ExpertProfile = h.store.get(expert.user_id).await.unwrap().unwrap();
  assert_eq!(profile.skills, vec![
    Skill::new("Class 9", "Physics", "Optics"),
    algebra(),
    Skill::new("Class 10", "Math", "Geometry"),
  ]);
}

// ─── Negotiation ─────────────────────────────────────────────────────────────

/// R1 to C1; C1 accepts and proposes Monday; the requester counters with
/// Tuesday and Wednesday; C1 takes Wednesday.
#[tokio::test]
async fn negotiation_scenario_ends_scheduled() {
  let h = harness();
  let (requester, expert, request) = h.accepted_request().await;
  let id = request.request_id;
  assert_eq!(request.status(), RequestStatus::AwaitingSlot);

  let neg = &h.parley.negotiation;
  neg.propose(&expert, id, vec![Slot::new(at(4, 10), 60)]).await.unwrap();
  neg
    .counter(&requester, id, vec![Slot::new(at(5, 14), 60), Slot::new(at(6, 9), 60)])
    .await
    .unwrap();
  let scheduled = neg.accept_slot(&expert, id, Some(at(6, 9))).await.unwrap();

  assert_eq!(scheduled.status(), RequestStatus::Scheduled);
  assert_eq!(scheduled.state.confirmed_slot(), Some(Slot::new(at(6, 9), 60)));

  let again = neg.accept_slot(&requester, id, Some(at(6, 9))).await;
  assert!(matches!(
    again,
    Err(Error::InvalidTransition { status: RequestStatus::Scheduled, .. })
  ));
}

#[tokio::test]
async fn only_the_latest_proposal_is_visible() {
  let h = harness();
  let (requester, expert, request) = h.accepted_request().await;
  let id = request.request_id;
  let neg = &h.parley.negotiation;

  neg.propose(&expert, id, vec![Slot::new(at(4, 10), 60)]).await.unwrap();
  neg.propose(&expert, id, vec![Slot::new(at(4, 11), 30)]).await.unwrap();
  neg.counter(&requester, id, vec![Slot::new(at(5, 8), 45)]).await.unwrap();

  let view = neg.get(&requester, id).await.unwrap();
  let proposal = view.request.state.current_proposal().unwrap();
  assert_eq!(proposal.slots, vec![Slot::new(at(5, 8), 45)]);

  // The superseded offers cannot be picked.
  let out = neg.accept_slot(&expert, id, Some(at(4, 10))).await;
  assert!(matches!(out, Err(Error::Validation(_))));
}

#[tokio::test]
async fn proposer_cannot_accept_own_proposal() {
  let h = harness();
  let (requester, expert, request) = h.accepted_request().await;
  let id = request.request_id;
  let neg = &h.parley.negotiation;

  neg.propose(&expert, id, vec![Slot::new(at(4, 10), 60)]).await.unwrap();
  let out = neg.accept_slot(&expert, id, None).await;
  assert!(matches!(out, Err(Error::InvalidTransition { .. })));

  neg.counter(&requester, id, vec![Slot::new(at(5, 10), 60)]).await.unwrap();
  let out = neg.accept_slot(&requester, id, None).await;
  assert!(matches!(out, Err(Error::InvalidTransition { .. })));
}

#[tokio::test]
async fn declining_alternates_reopens_slot_selection() {
  let h = harness();
  let (requester, expert, request) = h.accepted_request().await;
  let id = request.request_id;
  let neg = &h.parley.negotiation;

  neg.propose(&expert, id, vec![Slot::new(at(4, 10), 60)]).await.unwrap();
  neg.counter(&requester, id, vec![Slot::new(at(5, 10), 60)]).await.unwrap();
  let declined = neg.decline_slots(&expert, id).await.unwrap();
  assert!(matches!(declined.state, RequestState::AwaitingSlot));
}

#[tokio::test]
async fn each_party_rates_once() {
  let h = harness();
  let (requester, expert, request) = h.accepted_request().await;
  let id = request.request_id;
  let neg = &h.parley.negotiation;

  neg.propose(&expert, id, vec![Slot::new(at(4, 10), 60)]).await.unwrap();
  neg.accept_slot(&requester, id, None).await.unwrap();

  let early = neg.complete(&requester, id).await;
  assert!(matches!(early, Err(Error::InvalidTransition { .. })));

  h.clock.set(at(4, 11));
  neg.complete(&requester, id).await.unwrap();

  neg.rate(&requester, id, 5, Some("great".into())).await.unwrap();
  let twice = neg.rate(&requester, id, 4, None).await;
  assert!(matches!(twice, Err(Error::AlreadyRated(_))));

  let rated = neg.rate(&expert, id, 4, None).await.unwrap();
  assert_eq!(rated.ratings.by_requester.unwrap().stars, 5);
  assert_eq!(rated.ratings.by_respondent.unwrap().stars, 4);

  let outsider = Actor::member(Uuid::new_v4());
  assert!(matches!(neg.rate(&outsider, id, 3, None).await, Err(Error::Unauthorized(_))));
}

#[tokio::test]
async fn strangers_cannot_touch_a_request() {
  let h = harness();
  let (_, _, request) = h.accepted_request().await;
  let stranger = Actor::member(Uuid::new_v4());

  let out = h.parley.negotiation.cancel(&stranger, request.request_id).await;
  assert!(matches!(out, Err(Error::Unauthorized(_))));
  let out = h.parley.negotiation.get(&stranger, request.request_id).await;
  assert!(matches!(out, Err(Error::Unauthorized(_))));

  // Operators can.
  let cancelled = h.parley.negotiation.cancel(&h.operator, request.request_id).await.unwrap();
  assert_eq!(cancelled.status(), RequestStatus::Cancelled);
}

#[tokio::test]
async fn deactivated_respondent_cannot_negotiate() {
  let h = harness();
  let (_, expert, request) = h.accepted_request().await;

  let app = h.parley.activation.submit(&expert, application(vec![algebra()])).await.unwrap();
  h.parley.activation.reject(&h.operator, app.application_id, None).await.unwrap();

  let out = h
    .parley
    .negotiation
    .propose(&expert, request.request_id, vec![Slot::new(at(4, 10), 60)])
    .await;
  assert!(matches!(out, Err(Error::Unauthorized(_))));
}

#[tokio::test]
async fn expiry_is_seen_everywhere_and_persisted() {
  let h = harness();
  let (requester, expert, request) = h.accepted_request().await;
  let id = request.request_id;
  let neg = &h.parley.negotiation;

  neg.propose(&expert, id, vec![Slot::new(at(4, 10), 60)]).await.unwrap();

  h.clock.set(at(4, 22));
  let view = neg.get(&requester, id).await.unwrap();
  assert_eq!(view.effective_status, RequestStatus::Expired);
  assert_eq!(view.request.status(), RequestStatus::SlotProposed);
  let listed = neg.list_for(&requester, Some(RequestStatus::Expired)).await.unwrap();
  assert_eq!(listed.len(), 1);

  let out = neg.accept_slot(&requester, id, None).await;
  assert!(matches!(
    out,
    Err(Error::InvalidTransition { status: RequestStatus::Expired, .. })
  ));
  let stored: SessionRequest = h.store.get(id).await.unwrap().unwrap();
  assert_eq!(stored.status(), RequestStatus::Expired);
  assert_eq!(neg.sweep_expired().await.unwrap(), 0);
}

#[tokio::test]
async fn sweep_persists_due_expiries() {
  let h = harness();
  let (_, expert, request) = h.accepted_request().await;
  let neg = &h.parley.negotiation;
  neg.propose(&expert, request.request_id, vec![Slot::new(at(4, 10), 60)]).await.unwrap();

  h.clock.set(at(4, 21));
  assert_eq!(neg.sweep_expired().await.unwrap(), 0);
  h.clock.set(at(4, 22));
  assert_eq!(neg.sweep_expired().await.unwrap(), 1);

  let stored: SessionRequest = h.store.get(request.request_id).await.unwrap().unwrap();
  assert!(matches!(stored.state, RequestState::Expired { .. }));
}

#[tokio::test]
async fn interviews_wait_for_an_operator_assignment() {
  let h = harness();
  let interviewer = h.active_expert().await;
  let candidate = Actor::member(Uuid::new_v4());
  let mut inbox = h.notifier.subscribe(interviewer.user_id);

  let request = h
    .parley
    .negotiation
    .create_interview(&candidate, TopicQuery::new("Backend", "Rust"), None)
    .await
    .unwrap();
  assert_eq!(request.status(), RequestStatus::Open);

  let out = h.parley.negotiation.assign(&candidate, request.request_id, interviewer.user_id).await;
  assert!(matches!(out, Err(Error::Unauthorized(_))));

  let nobody = Uuid::new_v4();
  let out = h.parley.negotiation.assign(&h.operator, request.request_id, nobody).await;
  assert!(matches!(out, Err(Error::TargetUnavailable(id)) if id == nobody));

  let assigned = h
    .parley
    .negotiation
    .assign(&h.operator, request.request_id, interviewer.user_id)
    .await
    .unwrap();
  assert_eq!(assigned.status(), RequestStatus::PendingResponse);
  assert!(matches!(
    inbox.recv().await.unwrap(),
    Notification::RequestReceived { request_id, .. } if request_id == request.request_id
  ));

  let mine = h.parley.negotiation.list_for(&interviewer, None).await.unwrap();
  assert_eq!(mine.len(), 1);
}

// ─── Matching & dispatch ─────────────────────────────────────────────────────

#[tokio::test]
async fn dispatch_fails_once_the_candidate_goes_offline() {
  let h = harness();
  let expert = h.active_expert().await;
  h.presence.connect(expert.user_id, vec![math_tag()]);
  let requester = Actor::member(Uuid::new_v4());

  let query = TopicQuery::new("math", "algebra");
  let candidates: Vec<_> = h.parley.matching.find_available_experts(&query).await.unwrap().collect();
  assert_eq!(candidates.len(), 1);
  assert_eq!(candidates[0].user_id, expert.user_id);

  h.presence.disconnect(expert.user_id);
  let out = h
    .parley
    .matching
    .dispatch_request(&requester, expert.user_id, DispatchPayload { topic: query, note: None })
    .await;
  assert!(matches!(out, Err(Error::TargetUnavailable(id)) if id == expert.user_id));
}

#[tokio::test]
async fn presence_counts_connections() {
  let h = harness();
  let expert = h.active_expert().await;
  let query = TopicQuery::new("Math", "Algebra");

  h.presence.connect(expert.user_id, vec![math_tag()]);
  h.presence.connect(expert.user_id, vec![math_tag()]);
  h.presence.disconnect(expert.user_id);
  assert_eq!(h.parley.matching.find_available_experts(&query).await.unwrap().len(), 1);

  h.presence.disconnect(expert.user_id);
  assert_eq!(h.parley.matching.find_available_experts(&query).await.unwrap().len(), 0);
}

#[tokio::test]
async fn only_active_experts_are_listed() {
  let h = harness();
  let expert = h.active_expert().await;
  let bystander = Uuid::new_v4();
  let pending = Actor::member(Uuid::new_v4());
  let app = h.parley.activation.submit(&pending, application(vec![algebra()])).await.unwrap();
  h.parley.activation.approve(&h.operator, app.application_id).await.unwrap();

  for user in [expert.user_id, bystander, pending.user_id] {
    h.presence.connect(user, vec![math_tag()]);
  }

  let found: Vec<_> = h
    .parley
    .matching
    .find_available_experts(&TopicQuery::new("Math", "Algebra"))
    .await
    .unwrap()
    .map(|c| c.user_id)
    .collect();
  assert_eq!(found, vec![expert.user_id]);
}

#[tokio::test]
async fn dispatch_requires_the_candidate_to_offer_the_topic() {
  let h = harness();
  let expert = h.active_expert().await;
  h.presence.connect(expert.user_id, vec![math_tag()]);

  let out = h
    .parley
    .matching
    .dispatch_request(&Actor::member(Uuid::new_v4()), expert.user_id, DispatchPayload {
      topic: TopicQuery::new("Chemistry", "Organic"),
      note:  None,
    })
    .await;
  assert!(matches!(out, Err(Error::TargetUnavailable(id)) if id == expert.user_id));
  assert!(h.store.list::<SessionRequest>().await.unwrap().is_empty());
}

#[tokio::test]
async fn inactive_experts_are_unavailable() {
  let h = harness();
  let pending = Actor::member(Uuid::new_v4());
  let app = h.parley.activation.submit(&pending, application(vec![algebra()])).await.unwrap();
  h.parley.activation.approve(&h.operator, app.application_id).await.unwrap();
  h.presence.connect(pending.user_id, vec![math_tag()]);

  let out = h
    .parley
    .matching
    .dispatch_request(&Actor::member(Uuid::new_v4()), pending.user_id, DispatchPayload {
      topic: TopicQuery::new("Math", "Algebra"),
      note:  None,
    })
    .await;
  assert!(matches!(out, Err(Error::TargetUnavailable(_))));
}

#[tokio::test]
async fn one_outstanding_request_per_requester() {
  let h = harness();
  let first = h.active_expert().await;
  let second = h.active_expert().await;
  h.presence.connect(first.user_id, vec![math_tag()]);
  h.presence.connect(second.user_id, vec![math_tag()]);
  let requester = Actor::member(Uuid::new_v4());
  let payload = || DispatchPayload { topic: TopicQuery::new("Math", "Algebra"), note: None };

  let request = h
    .parley
    .matching
    .dispatch_request(&requester, first.user_id, payload())
    .await
    .unwrap();
  let out = h.parley.matching.dispatch_request(&requester, second.user_id, payload()).await;
  assert!(matches!(out, Err(Error::AlreadyDispatched(_))));

  h.parley.negotiation.reject(&first, request.request_id, None).await.unwrap();
  h.parley
    .matching
    .dispatch_request(&requester, second.user_id, payload())
    .await
    .unwrap();

  let out = h.parley.matching.dispatch_request(&second, second.user_id, payload()).await;
  assert!(matches!(out, Err(Error::Validation(_))));
}

// ─── Failure & contention ────────────────────────────────────────────────────

#[tokio::test]
async fn failed_profile_write_leaves_the_application_reviewable() {
  let (parley, store, clock) = flaky_parley();
  let operator = Actor::operator(Uuid::new_v4());
  let applicant = Actor::member(Uuid::new_v4());
  let app = parley.activation.submit(&applicant, application(vec![algebra()])).await.unwrap();

  store.fail_profiles.store(true, Ordering::SeqCst);
  let out = parley.activation.approve(&operator, app.application_id).await;
  assert!(matches!(out, Err(Error::Store(_))));
  let stored = parley.activation.get_application(&operator, app.application_id).await.unwrap();
  assert_eq!(stored.status(), ApplicationStatus::Pending);

  store.fail_profiles.store(false, Ordering::SeqCst);
  parley.activation.approve(&operator, app.application_id).await.unwrap();
  clock.advance(TimeDelta::seconds(300));
  assert!(parley.activation.ensure_activated(applicant.user_id).await.unwrap().is_active);
}

#[tokio::test]
async fn failed_profile_reset_leaves_the_rejection_undone() {
  let (parley, store, clock) = flaky_parley();
  let operator = Actor::operator(Uuid::new_v4());
  let applicant = Actor::member(Uuid::new_v4());
  let first = parley.activation.submit(&applicant, application(vec![algebra()])).await.unwrap();
  parley.activation.approve(&operator, first.application_id).await.unwrap();
  let second = parley.activation.submit(&applicant, application(vec![algebra()])).await.unwrap();

  store.fail_profiles.store(true, Ordering::SeqCst);
  let out = parley.activation.reject(&operator, second.application_id, None).await;
  assert!(matches!(out, Err(Error::Store(_))));
  let stored = parley.activation.get_application(&operator, second.application_id).await.unwrap();
  assert_eq!(stored.status(), ApplicationStatus::Pending);

  store.fail_profiles.store(false, Ordering::SeqCst);
  clock.advance(TimeDelta::seconds(300));
  assert!(parley.activation.ensure_activated(applicant.user_id).await.unwrap().is_active);
  parley.activation.reject(&operator, second.application_id, None).await.unwrap();
  assert!(!parley.activation.ensure_activated(applicant.user_id).await.unwrap().is_active);
}

#[tokio::test]
async fn conflicting_request_writes_keep_the_winner() {
  let h = harness();
  let (requester, expert, request) = h.accepted_request().await;
  let id = request.request_id;
  h.parley.negotiation.propose(&expert, id, vec![Slot::new(at(4, 10), 60)]).await.unwrap();

  // Both parties act on the same read; the requester's write lands first.
  let seen: SessionRequest = h.store.get(id).await.unwrap().unwrap();
  h.parley.negotiation.accept_slot(&requester, id, None).await.unwrap();

  let late = seen
    .apply(
      Standing::Respondent,
      Command::Propose { slots: vec![Slot::new(at(5, 10), 60)] },
      h.clock.now(),
      &Policy::default(),
    )
    .unwrap();
  let lost = save(&*h.store, late).await;
  assert!(matches!(lost, Err(Error::StaleState { id: stale, .. }) if stale == id));

  let stored = h.parley.negotiation.get(&requester, id).await.unwrap();
  assert_eq!(stored.effective_status, RequestStatus::Scheduled);
  assert_eq!(stored.request.state.confirmed_slot(), Some(Slot::new(at(4, 10), 60)));
}

#[tokio::test]
async fn out_of_range_slot_is_refused() {
  let h = harness();
  let (_, expert, request) = h.accepted_request().await;
  let edge: Slot =
    serde_json::from_str(r#"{"start":"+262142-12-31T23:59:59Z","duration_minutes":60}"#)
      .unwrap();

  let out = h.parley.negotiation.propose(&expert, request.request_id, vec![edge]).await;
  assert!(matches!(out, Err(Error::Validation(_))));
  let stored = h.parley.negotiation.get(&expert, request.request_id).await.unwrap();
  assert_eq!(stored.effective_status, RequestStatus::AwaitingSlot);
}
