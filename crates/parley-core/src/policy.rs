//! Deployment-tunable timing and validation limits.

use chrono::TimeDelta;

/// Default delay between approval and activation.
pub const DEFAULT_GRACE_PERIOD_SECS: i64 = 5 * 60;

/// Default time past a proposed or confirmed start after which a request is
/// expired.
pub const DEFAULT_EXPIRY_WINDOW_SECS: i64 = 12 * 60 * 60;

/// Default limit on how far ahead a slot may be proposed.
pub const DEFAULT_MAX_LEAD_DAYS: i64 = 365;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Policy {
  pub grace_period:     TimeDelta,
  pub expiry_window:    TimeDelta,
  /// Upper bound on slots carried by a single proposal.
  pub max_slots:        usize,
  pub max_slot_minutes: u32,
  /// How far past now a proposed slot may start.
  pub max_lead_time:    TimeDelta,
}

impl Policy {
  pub fn from_secs(grace_period_secs: i64, expiry_window_secs: i64) -> Self {
    Self {
      grace_period: seconds_saturating(grace_period_secs),
      expiry_window: seconds_saturating(expiry_window_secs),
      ..Self::default()
    }
  }
}

impl Default for Policy {
  fn default() -> Self {
    Self {
      grace_period:     TimeDelta::seconds(DEFAULT_GRACE_PERIOD_SECS),
      expiry_window:    TimeDelta::seconds(DEFAULT_EXPIRY_WINDOW_SECS),
      max_slots:        8,
      max_slot_minutes: 8 * 60,
      max_lead_time:    TimeDelta::days(DEFAULT_MAX_LEAD_DAYS),
    }
  }
}

fn seconds_saturating(secs: i64) -> TimeDelta {
  TimeDelta::try_seconds(secs).unwrap_or(if secs < 0 { TimeDelta::MIN } else { TimeDelta::MAX })
}
