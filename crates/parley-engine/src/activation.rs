//! Application review and the delayed activation that follows approval.
//!
//! Approval never activates an expert directly. It records an
//! `activation_at` deadline on the profile; the flip to active happens the
//! first time anyone asks after the deadline ([`ActivationEngine::ensure_activated`]).
//! An optional per-approval timer asks on the expert's behalf, but nothing
//! depends on it firing.

use chrono::{DateTime, Utc};
use parley_core::{
  Error, Result,
  actor::Actor,
  application::{ApplicationStatus, ExpertApplication, NewApplication},
  notify::Notification,
  profile::{ExpertActivation, ExpertProfile},
  store::{CasOutcome, Document, EntityStore},
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
  deps::Deps,
  ops::{create, load, save},
};

/// Rounds of re-reading a contended profile before giving up with
/// [`Error::StaleState`].
const PROFILE_WRITE_ATTEMPTS: usize = 8;

enum ProfileWrite {
  Written(ExpertProfile),
  Unchanged(ExpertProfile),
  Absent,
}

pub struct ActivationEngine<S> {
  deps: Deps<S>,
}

impl<S> Clone for ActivationEngine<S> {
  fn clone(&self) -> Self { Self { deps: self.deps.clone() } }
}

impl<S> ActivationEngine<S>
where
  S: EntityStore + 'static,
{
  pub fn new(deps: Deps<S>) -> Self { Self { deps } }

  fn now(&self) -> DateTime<Utc> { self.deps.clock.now() }

  // ─── Applications ─────────────────────────────────────────────────────────

  pub async fn submit(
    &self,
    applicant: &Actor,
    input: NewApplication,
  ) -> Result<ExpertApplication> {
    let application = ExpertApplication::submit(applicant.user_id, input, self.now())?;
    let application = create(&*self.deps.store, application).await?;
    info!(
      application_id = %application.application_id,
      applicant_id = %application.applicant_id,
      "application submitted"
    );
    Ok(application)
  }

  /// Replace the payload of the caller's own application and send it back
  /// for review.
  pub async fn resubmit(
    &self,
    applicant: &Actor,
    application_id: Uuid,
    input: NewApplication,
  ) -> Result<ExpertApplication> {
    let current: ExpertApplication = load(&*self.deps.store, application_id).await?;
    if current.applicant_id != applicant.user_id {
      return Err(Error::Unauthorized(
        "only the applicant may resubmit an application".into(),
      ));
    }

    let next = current.resubmit(input, self.now())?;
    let application = save(&*self.deps.store, next).await?;
    info!(%application_id, "application resubmitted");
    Ok(application)
  }

  pub async fn get_application(
    &self,
    actor: &Actor,
    application_id: Uuid,
  ) -> Result<ExpertApplication> {
    let application: ExpertApplication = load(&*self.deps.store, application_id).await?;
    if application.applicant_id != actor.user_id && !actor.is_operator() {
      return Err(Error::Unauthorized("not your application".into()));
    }
    Ok(application)
  }

  /// Operators see every application; members see their own.
  pub async fn list_applications(
    &self,
    actor: &Actor,
    status: Option<ApplicationStatus>,
  ) -> Result<Vec<ExpertApplication>> {
    let actor = *actor;
    self
      .deps
      .store
      .query::<ExpertApplication, _>(move |application| {
        (actor.is_operator() || application.applicant_id == actor.user_id)
          && status.is_none_or(|s| application.status() == s)
      })
      .await
      .map_err(Error::store)
  }

  /// The review queue.
  pub async fn pending_applications(&self, reviewer: &Actor) -> Result<Vec<ExpertApplication>> {
    require_operator(reviewer, "review applications")?;
    self.list_applications(reviewer, Some(ApplicationStatus::Pending)).await
  }

  // ─── Review ───────────────────────────────────────────────────────────────

  /// Approve a pending application and start the applicant's grace period.
  ///
  /// A second review of the same application fails with
  /// [`Error::AlreadyReviewed`] and changes nothing.
  pub async fn approve(
    &self,
    reviewer: &Actor,
    application_id: Uuid,
  ) -> Result<ExpertApplication> {
    require_operator(reviewer, "approve applications")?;

    let now = self.now();
    let activation_at = now
      .checked_add_signed(self.deps.policy.grace_period)
      .ok_or_else(|| Error::Validation("grace period is out of range".into()))?;
    let current: ExpertApplication = load(&*self.deps.store, application_id).await?;
    let application =
      save(&*self.deps.store, current.approve(reviewer.user_id, now)?).await?;

    let skills = application.skills.clone();
    let scheduled = self
      .update_profile(application.applicant_id, true, |profile| {
        Some(profile.schedule_activation(&skills, activation_at, now))
      })
      .await;
    if let Err(err) = scheduled {
      self.roll_back_review(current, &application).await;
      return Err(err);
    }

    info!(
      %application_id,
      applicant_id = %application.applicant_id,
      %activation_at,
      "application approved"
    );
    self.deps.notifier.send(application.applicant_id, Notification::ApplicationApproved {
      application_id,
      activation_at,
    });

    if self.deps.eager_activation {
      self.arm_timer(application.applicant_id, activation_at);
    }
    Ok(application)
  }

  /// Reject a pending application. The applicant's profile, if any, goes
  /// back to inactive.
  pub async fn reject(
    &self,
    reviewer: &Actor,
    application_id: Uuid,
    reason: Option<String>,
  ) -> Result<ExpertApplication> {
    require_operator(reviewer, "reject applications")?;

    let now = self.now();
    let current: ExpertApplication = load(&*self.deps.store, application_id).await?;
    let application =
      save(&*self.deps.store, current.reject(reviewer.user_id, reason.clone(), now)?).await?;

    let reset = self
      .update_profile(application.applicant_id, false, |profile| {
        Some(profile.reset_activation(now))
      })
      .await;
    if let Err(err) = reset {
      self.roll_back_review(current, &application).await;
      return Err(err);
    }

    info!(%application_id, applicant_id = %application.applicant_id, "application rejected");
    self.deps.notifier.send(application.applicant_id, Notification::ApplicationRejected {
      application_id,
      reason,
    });
    Ok(application)
  }

  // ─── Activation ───────────────────────────────────────────────────────────

  /// Read the user's activation, flipping it to active first if the grace
  /// period has elapsed. Concurrent callers converge on the same result.
  pub async fn ensure_activated(&self, user_id: Uuid) -> Result<ExpertActivation> {
    let now = self.now();
    let outcome = self
      .update_profile(user_id, false, |profile| profile.activate_if_due(now))
      .await?;

    match outcome {
      ProfileWrite::Absent => Ok(ExpertActivation::none(user_id)),
      ProfileWrite::Unchanged(profile) => Ok(profile.activation_view()),
      ProfileWrite::Written(profile) => {
        let activation_at = profile.activation.activation_at().unwrap_or(now);
        info!(%user_id, %activation_at, "expert activated");
        self
          .deps
          .notifier
          .send(user_id, Notification::ExpertActivated { activation_at });
        Ok(profile.activation_view())
      }
    }
  }

  /// Whether `user_id` is an active expert right now. Never writes.
  ///
  /// Agrees with [`ensure_activated`](Self::ensure_activated): a profile whose
  /// deadline has passed counts as active even before anyone has stored the
  /// flip, so no reader sees an expert go inactive-then-active after the
  /// deadline.
  pub async fn is_expert(&self, user_id: Uuid) -> Result<bool> {
    let Some(profile) = self
      .deps
      .store
      .get::<ExpertProfile>(user_id)
      .await
      .map_err(Error::store)?
    else {
      return Ok(false);
    };
    Ok(profile.activation.is_active() || profile.activate_if_due(self.now()).is_some())
  }

  /// Fail with [`Error::Unauthorized`] unless `user_id` is an active expert.
  pub async fn require_active(&self, user_id: Uuid) -> Result<ExpertActivation> {
    let view = self.ensure_activated(user_id).await?;
    if !view.is_active {
      return Err(Error::Unauthorized(format!("{user_id} is not an active expert")));
    }
    Ok(view)
  }

  // ─── Internals ────────────────────────────────────────────────────────────

  /// Read-modify-write the profile of `user_id`, re-reading on conflict.
  ///
  /// `change` returns `None` to leave the profile as it is. A missing
  /// profile is created from [`ExpertProfile::new`] only when
  /// `create_missing` is set.
  async fn update_profile<F>(
    &self,
    user_id: Uuid,
    create_missing: bool,
    mut change: F,
  ) -> Result<ProfileWrite>
  where
    F: FnMut(&ExpertProfile) -> Option<ExpertProfile>,
  {
    let store = &*self.deps.store;
    for _ in 0..PROFILE_WRITE_ATTEMPTS {
      let current = store.get::<ExpertProfile>(user_id).await.map_err(Error::store)?;

      let outcome = match current {
        Some(profile) => {
          let Some(next) = change(&profile) else {
            return Ok(ProfileWrite::Unchanged(profile));
          };
          store
            .compare_and_set(next, profile.version())
            .await
            .map_err(Error::store)?
        }
        None if create_missing => {
          let fresh = ExpertProfile::new(user_id, self.now());
          let Some(next) = change(&fresh) else {
            return Ok(ProfileWrite::Absent);
          };
          store.insert(next).await.map_err(Error::store)?
        }
        None => return Ok(ProfileWrite::Absent),
      };

      match outcome {
        CasOutcome::Applied(profile) => return Ok(ProfileWrite::Written(profile)),
        CasOutcome::Stale { .. } | CasOutcome::Missing => {
          debug!(%user_id, "profile changed underneath us, re-reading");
        }
      }
    }
    Err(Error::StaleState { kind: ExpertProfile::KIND, id: user_id })
  }

  /// Put a review back to what it was before `written` landed, after the
  /// profile half of the review failed. The reviewer may then retry.
  async fn roll_back_review(&self, mut previous: ExpertApplication, written: &ExpertApplication) {
    let application_id = written.application_id;
    previous.set_version(written.version());
    match save(&*self.deps.store, previous).await {
      Ok(_) => warn!(%application_id, "profile update failed, review rolled back"),
      Err(err) => error!(%application_id, error = %err, "review could not be rolled back"),
    }
  }

  /// Ask for activation on the expert's behalf once `activation_at` passes.
  /// Outside a tokio runtime this does nothing.
  fn arm_timer(&self, user_id: Uuid, activation_at: DateTime<Utc>) {
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
      warn!(%user_id, "no runtime for the activation timer; relying on lazy activation");
      return;
    };

    let delay = (activation_at - self.now()).to_std().unwrap_or_default();
    let engine = self.clone();
    runtime.spawn(async move {
      tokio::time::sleep(delay).await;
      match engine.ensure_activated(user_id).await {
        Ok(view) if view.is_active => debug!(%user_id, "activation timer fired"),
        Ok(_) => debug!(%user_id, "activation timer fired before the deadline moved"),
        Err(err) => warn!(%user_id, error = %err, "activation timer failed"),
      }
    });
  }
}

fn require_operator(actor: &Actor, what: &str) -> Result<()> {
  if actor.is_operator() {
    Ok(())
  } else {
    Err(Error::Unauthorized(format!("only operators may {what}")))
  }
}
