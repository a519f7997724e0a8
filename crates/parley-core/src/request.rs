//! Session requests and the slot-negotiation state machine.
//!
//! A request moves through a single transition function,
//! [`SessionRequest::apply`]. Every legal move is one arm of that function;
//! anything else is an [`Error::InvalidTransition`].
//!
//! | From | Command | By | To |
//! |------|---------|----|----|
//! | `open` | assign | operator | `pending_response` |
//! | `pending_response` | accept / reject | respondent | `awaiting_slot` / `rejected` |
//! | `awaiting_slot`, `slot_proposed` | propose | respondent | `slot_proposed` |
//! | `slot_proposed`, `slot_countered` | counter | requester | `slot_countered` |
//! | `slot_proposed`, `slot_countered` | accept slot | the non-proposer | `scheduled` |
//! | `slot_countered` | decline slots | respondent | `awaiting_slot` |
//! | `scheduled` | complete | a party or operator | `completed` |
//! | any live state | cancel | a party or operator | `cancelled` |
//! | any live state past expiry | expire | system or operator | `expired` |

use std::{collections::HashSet, fmt};

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  Error, Result,
  actor::Actor,
  policy::Policy,
  presence::TopicQuery,
  store::{Document, DocumentKind},
};

// ─── Parties ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestKind {
  /// Matched in real time; the respondent is fixed at creation.
  Tutoring,
  /// Created open; an operator assigns the respondent later.
  Interview,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Party {
  Requester,
  Respondent,
}

impl Party {
  pub fn other(self) -> Self {
    match self {
      Self::Requester => Self::Respondent,
      Self::Respondent => Self::Requester,
    }
  }
}

/// The capacity in which a command is issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Standing {
  Requester,
  Respondent,
  Operator,
  /// Background sweeps; only ever expires requests.
  System,
}

impl Standing {
  pub fn party(self) -> Option<Party> {
    match self {
      Self::Requester => Some(Party::Requester),
      Self::Respondent => Some(Party::Respondent),
      Self::Operator | Self::System => None,
    }
  }
}

// ─── Slots ───────────────────────────────────────────────────────────────────

/// A proposed session time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
  pub start:            DateTime<Utc>,
  pub duration_minutes: u32,
}

impl Slot {
  pub fn new(start: DateTime<Utc>, duration_minutes: u32) -> Self {
    Self { start, duration_minutes }
  }

  /// Whether the slot is already past its expiry window at `now`.
  fn is_stale(&self, now: DateTime<Utc>, window: TimeDelta) -> bool {
    deadline(self.start, window).is_some_and(|deadline| deadline <= now)
  }
}

/// `start + window`, or `None` past the representable range.
fn deadline(start: DateTime<Utc>, window: TimeDelta) -> Option<DateTime<Utc>> {
  start.checked_add_signed(window)
}

/// The single live offer on a request. Issuing a new one replaces it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
  pub slots:       Vec<Slot>,
  pub proposed_by: Party,
  pub proposed_at: DateTime<Utc>,
}

impl Proposal {
  pub fn latest_start(&self) -> Option<DateTime<Utc>> {
    self.slots.iter().map(|s| s.start).max()
  }

  /// Select the slot starting at `start`; with a single slot on offer the
  /// choice may be omitted.
  pub fn pick(&self, start: Option<DateTime<Utc>>) -> Result<Slot> {
    match (start, self.slots.as_slice()) {
      (None, [only]) => Ok(*only),
      (None, _) => Err(Error::Validation(
        "several slots are on offer; choose one by its start time".into(),
      )),
      (Some(start), slots) => slots
        .iter()
        .find(|s| s.start == start)
        .copied()
        .ok_or_else(|| Error::Validation(format!("no slot on offer starts at {start}"))),
    }
  }
}

fn validate_slots(slots: &[Slot], now: DateTime<Utc>, policy: &Policy) -> Result<()> {
  if slots.is_empty() {
    return Err(Error::Validation("a proposal needs at least one slot".into()));
  }
  if slots.len() > policy.max_slots {
    return Err(Error::Validation(format!(
      "a proposal may carry at most {} slots",
      policy.max_slots
    )));
  }

  let mut starts = HashSet::with_capacity(slots.len());
  for slot in slots {
    if slot.duration_minutes == 0 || slot.duration_minutes > policy.max_slot_minutes {
      return Err(Error::Validation(format!(
        "slot duration must be between 1 and {} minutes",
        policy.max_slot_minutes
      )));
    }
    if now
      .checked_add_signed(policy.max_lead_time)
      .is_some_and(|horizon| slot.start > horizon)
    {
      return Err(Error::Validation(format!(
        "slot at {} is more than {} days ahead",
        slot.start,
        policy.max_lead_time.num_days()
      )));
    }
    if slot.is_stale(now, policy.expiry_window) {
      return Err(Error::Validation(format!("slot at {} has already expired", slot.start)));
    }
    if !starts.insert(slot.start) {
      return Err(Error::Validation(format!("slot at {} is listed twice", slot.start)));
    }
  }
  Ok(())
}

// ─── State ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RequestState {
  Open,
  PendingResponse,
  /// Accepted by the respondent, no time offered yet.
  AwaitingSlot,
  SlotProposed {
    proposal: Proposal,
  },
  SlotCountered {
    proposal: Proposal,
  },
  Scheduled {
    confirmed:    Slot,
    scheduled_at: DateTime<Utc>,
  },
  Completed {
    confirmed:    Slot,
    completed_at: DateTime<Utc>,
  },
  Rejected {
    reason: Option<String>,
    at:     DateTime<Utc>,
  },
  Cancelled {
    by: Standing,
    at: DateTime<Utc>,
  },
  Expired {
    at: DateTime<Utc>,
  },
}

impl RequestState {
  pub fn status(&self) -> RequestStatus {
    match self {
      Self::Open => RequestStatus::Open,
      Self::PendingResponse => RequestStatus::PendingResponse,
      Self::AwaitingSlot => RequestStatus::AwaitingSlot,
      Self::SlotProposed { .. } => RequestStatus::SlotProposed,
      Self::SlotCountered { .. } => RequestStatus::SlotCountered,
      Self::Scheduled { .. } => RequestStatus::Scheduled,
      Self::Completed { .. } => RequestStatus::Completed,
      Self::Rejected { .. } => RequestStatus::Rejected,
      Self::Cancelled { .. } => RequestStatus::Cancelled,
      Self::Expired { .. } => RequestStatus::Expired,
    }
  }

  pub fn current_proposal(&self) -> Option<&Proposal> {
    match self {
      Self::SlotProposed { proposal } | Self::SlotCountered { proposal } => Some(proposal),
      _ => None,
    }
  }

  pub fn confirmed_slot(&self) -> Option<Slot> {
    match self {
      Self::Scheduled { confirmed, .. } | Self::Completed { confirmed, .. } => {
        Some(*confirmed)
      }
      _ => None,
    }
  }

  /// The instant the expiry window is measured from, if the state has one.
  pub fn expiry_reference(&self) -> Option<DateTime<Utc>> {
    match self {
      Self::SlotProposed { proposal } | Self::SlotCountered { proposal } => {
        proposal.latest_start()
      }
      Self::Scheduled { confirmed, .. } => Some(confirmed.start),
      _ => None,
    }
  }
}

/// Flat status, used for filtering, errors and notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
  Open,
  PendingResponse,
  AwaitingSlot,
  SlotProposed,
  SlotCountered,
  Scheduled,
  Completed,
  Rejected,
  Cancelled,
  Expired,
}

impl RequestStatus {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Open => "open",
      Self::PendingResponse => "pending_response",
      Self::AwaitingSlot => "awaiting_slot",
      Self::SlotProposed => "slot_proposed",
      Self::SlotCountered => "slot_countered",
      Self::Scheduled => "scheduled",
      Self::Completed => "completed",
      Self::Rejected => "rejected",
      Self::Cancelled => "cancelled",
      Self::Expired => "expired",
    }
  }

  pub fn is_terminal(self) -> bool {
    matches!(
      self,
      Self::Completed | Self::Rejected | Self::Cancelled | Self::Expired
    )
  }
}

impl fmt::Display for RequestStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

// ─── Ratings ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rating {
  pub stars:    u8,
  pub comment:  Option<String>,
  pub rated_at: DateTime<Utc>,
}

/// Ratings keyed by the party that gave them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ratings {
  pub by_requester:  Option<Rating>,
  pub by_respondent: Option<Rating>,
}

impl Ratings {
  fn given_by(&mut self, party: Party) -> &mut Option<Rating> {
    match party {
      Party::Requester => &mut self.by_requester,
      Party::Respondent => &mut self.by_respondent,
    }
  }
}

// ─── Commands ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
  Assign { respondent: Uuid },
  Accept,
  Reject { reason: Option<String> },
  Propose { slots: Vec<Slot> },
  Counter { slots: Vec<Slot> },
  AcceptSlot { start: Option<DateTime<Utc>> },
  DeclineSlots,
  Complete,
  Cancel,
  Expire,
}

impl Command {
  pub fn name(&self) -> &'static str {
    match self {
      Self::Assign { .. } => "assign",
      Self::Accept => "accept",
      Self::Reject { .. } => "reject",
      Self::Propose { .. } => "propose slots for",
      Self::Counter { .. } => "counter",
      Self::AcceptSlot { .. } => "accept a slot on",
      Self::DeclineSlots => "decline the slots on",
      Self::Complete => "complete",
      Self::Cancel => "cancel",
      Self::Expire => "expire",
    }
  }
}

// ─── Request ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRequest {
  pub request_id:    Uuid,
  pub kind:          RequestKind,
  pub requester_id:  Uuid,
  pub respondent_id: Option<Uuid>,
  pub topic:         TopicQuery,
  pub note:          Option<String>,
  pub state:         RequestState,
  #[serde(default)]
  pub ratings:       Ratings,
  pub created_at:    DateTime<Utc>,
  pub updated_at:    DateTime<Utc>,
  #[serde(default)]
  pub version:       u64,
}

impl SessionRequest {
  /// A real-time request addressed to exactly one expert.
  pub fn tutoring(
    requester_id: Uuid,
    respondent_id: Uuid,
    topic: TopicQuery,
    note: Option<String>,
    now: DateTime<Utc>,
  ) -> Self {
    Self {
      request_id: Uuid::new_v4(),
      kind: RequestKind::Tutoring,
      requester_id,
      respondent_id: Some(respondent_id),
      topic,
      note,
      state: RequestState::PendingResponse,
      ratings: Ratings::default(),
      created_at: now,
      updated_at: now,
      version: 0,
    }
  }

  /// An interview request waiting for an operator to assign an interviewer.
  pub fn interview(
    requester_id: Uuid,
    topic: TopicQuery,
    note: Option<String>,
    now: DateTime<Utc>,
  ) -> Self {
    Self {
      request_id: Uuid::new_v4(),
      kind: RequestKind::Interview,
      requester_id,
      respondent_id: None,
      topic,
      note,
      state: RequestState::Open,
      ratings: Ratings::default(),
      created_at: now,
      updated_at: now,
      version: 0,
    }
  }

  pub fn status(&self) -> RequestStatus { self.state.status() }

  pub fn party_of(&self, user_id: Uuid) -> Option<Party> {
    if user_id == self.requester_id {
      Some(Party::Requester)
    } else if Some(user_id) == self.respondent_id {
      Some(Party::Respondent)
    } else {
      None
    }
  }

  /// The capacity `actor` holds on this request; `None` if they hold none.
  pub fn standing_of(&self, actor: &Actor) -> Option<Standing> {
    match self.party_of(actor.user_id) {
      Some(Party::Requester) => Some(Standing::Requester),
      Some(Party::Respondent) => Some(Standing::Respondent),
      None if actor.is_operator() => Some(Standing::Operator),
      None => None,
    }
  }

  pub fn user_of(&self, party: Party) -> Option<Uuid> {
    match party {
      Party::Requester => Some(self.requester_id),
      Party::Respondent => self.respondent_id,
    }
  }

  /// Whether the request has sat past its expiry window without progress.
  pub fn is_expired_at(&self, now: DateTime<Utc>, window: TimeDelta) -> bool {
    !self.status().is_terminal()
      && self
        .state
        .expiry_reference()
        .and_then(|reference| deadline(reference, window))
        .is_some_and(|deadline| now >= deadline)
  }

  /// The status every reader should see, with due expiry already applied.
  pub fn effective_status(&self, now: DateTime<Utc>, window: TimeDelta) -> RequestStatus {
    if self.is_expired_at(now, window) {
      RequestStatus::Expired
    } else {
      self.status()
    }
  }

  /// Compute the request that results from `command` issued in capacity
  /// `by`. Never mutates `self`; the caller persists the result.
  pub fn apply(
    &self,
    by: Standing,
    command: Command,
    now: DateTime<Utc>,
    policy: &Policy,
  ) -> Result<Self> {
    let status = self.status();
    let action = command.name();
    let invalid = |status| Error::InvalidTransition { status, action };

    if status.is_terminal() {
      return Err(invalid(status));
    }

    if self.is_expired_at(now, policy.expiry_window) {
      return match (command, by) {
        (Command::Expire, Standing::System | Standing::Operator) => {
          Ok(self.with_state(RequestState::Expired { at: now }, now))
        }
        _ => Err(invalid(RequestStatus::Expired)),
      };
    }

    let next = match (&self.state, command, by) {
      (RequestState::Open, Command::Assign { respondent }, Standing::Operator) => {
        if respondent == self.requester_id {
          return Err(Error::Validation(
            "a requester cannot respond to their own request".into(),
          ));
        }
        return Ok(Self {
          respondent_id: Some(respondent),
          state: RequestState::PendingResponse,
          updated_at: now,
          ..self.clone()
        });
      }

      (RequestState::PendingResponse, Command::Accept, Standing::Respondent) => {
        RequestState::AwaitingSlot
      }

      (RequestState::PendingResponse, Command::Reject { reason }, Standing::Respondent) => {
        RequestState::Rejected { reason, at: now }
      }

      (
        RequestState::AwaitingSlot | RequestState::SlotProposed { .. },
        Command::Propose { slots },
        Standing::Respondent,
      ) => {
        validate_slots(&slots, now, policy)?;
        RequestState::SlotProposed {
          proposal: Proposal { slots, proposed_by: Party::Respondent, proposed_at: now },
        }
      }

      (
        RequestState::SlotProposed { .. } | RequestState::SlotCountered { .. },
        Command::Counter { slots },
        Standing::Requester,
      ) => {
        validate_slots(&slots, now, policy)?;
        RequestState::SlotCountered {
          proposal: Proposal { slots, proposed_by: Party::Requester, proposed_at: now },
        }
      }

      (
        RequestState::SlotProposed { proposal } | RequestState::SlotCountered { proposal },
        Command::AcceptSlot { start },
        by,
      ) if by.party().is_some_and(|p| p != proposal.proposed_by) => {
        let confirmed = proposal.pick(start)?;
        if confirmed.is_stale(now, policy.expiry_window) {
          return Err(Error::Validation(format!(
            "slot at {} has already expired",
            confirmed.start
          )));
        }
        RequestState::Scheduled { confirmed, scheduled_at: now }
      }

      (RequestState::SlotCountered { proposal }, Command::DeclineSlots, Standing::Respondent)
        if proposal.proposed_by == Party::Requester =>
      {
        RequestState::AwaitingSlot
      }

      (
        RequestState::Scheduled { confirmed, .. },
        Command::Complete,
        Standing::Requester | Standing::Respondent | Standing::Operator,
      ) => {
        if now < confirmed.start {
          return Err(invalid(status));
        }
        RequestState::Completed { confirmed: *confirmed, completed_at: now }
      }

      (
        _,
        Command::Cancel,
        by @ (Standing::Requester | Standing::Respondent | Standing::Operator),
      ) => RequestState::Cancelled { by, at: now },

      _ => return Err(invalid(status)),
    };

    Ok(self.with_state(next, now))
  }

  /// Record `party`'s rating of a completed session.
  pub fn rate(
    &self,
    party: Party,
    stars: u8,
    comment: Option<String>,
    now: DateTime<Utc>,
  ) -> Result<Self> {
    let status = self.status();
    if status != RequestStatus::Completed {
      return Err(Error::InvalidTransition { status, action: "rate" });
    }
    if !(1..=5).contains(&stars) {
      return Err(Error::Validation("a rating must be between 1 and 5 stars".into()));
    }

    let mut next = self.clone();
    let slot = next.ratings.given_by(party);
    if slot.is_some() {
      return Err(Error::AlreadyRated(self.request_id));
    }
    *slot = Some(Rating { stars, comment, rated_at: now });
    next.updated_at = now;
    Ok(next)
  }

  fn with_state(&self, state: RequestState, now: DateTime<Utc>) -> Self {
    Self { state, updated_at: now, ..self.clone() }
  }
}

impl Document for SessionRequest {
  const KIND: DocumentKind = DocumentKind::SessionRequest;

  fn id(&self) -> Uuid { self.request_id }

  fn version(&self) -> u64 { self.version }

  fn set_version(&mut self, version: u64) { self.version = version; }
}
