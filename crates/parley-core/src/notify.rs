//! Best-effort notifications to a user's live connections.
//!
//! Delivery is never required for correctness: every event has a pull-based
//! counterpart (listing one's own requests, checking activation status).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::request::RequestStatus;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notification {
  ApplicationApproved {
    application_id: Uuid,
    activation_at:  DateTime<Utc>,
  },
  ApplicationRejected {
    application_id: Uuid,
    reason:         Option<String>,
  },
  ExpertActivated {
    activation_at: DateTime<Utc>,
  },
  /// A request was dispatched or assigned to the recipient.
  RequestReceived {
    request_id:   Uuid,
    requester_id: Uuid,
  },
  /// The counterparty moved a request the recipient is party to.
  RequestUpdated {
    request_id: Uuid,
    status:     RequestStatus,
  },
}

impl Notification {
  pub fn event_type(&self) -> &'static str {
    match self {
      Self::ApplicationApproved { .. } => "application_approved",
      Self::ApplicationRejected { .. } => "application_rejected",
      Self::ExpertActivated { .. } => "expert_activated",
      Self::RequestReceived { .. } => "request_received",
      Self::RequestUpdated { .. } => "request_updated",
    }
  }
}

/// Fire-and-forget delivery.
pub trait Notifier: Send + Sync {
  fn send(&self, user_id: Uuid, notification: Notification);
}

/// Discards every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
  fn send(&self, _user_id: Uuid, _notification: Notification) {}
}
