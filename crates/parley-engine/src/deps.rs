//! Collaborators shared by every service.

use std::sync::Arc;

use parley_core::{
  clock::{Clock, SystemClock},
  notify::{Notifier, NullNotifier},
  policy::Policy,
  presence::PresenceRegistry,
};

use crate::presence::InMemoryPresence;

pub struct Deps<S> {
  pub store:            Arc<S>,
  pub clock:            Arc<dyn Clock>,
  pub notifier:         Arc<dyn Notifier>,
  pub presence:         Arc<dyn PresenceRegistry>,
  pub policy:           Policy,
  /// Also schedule a one-shot timer per approval. Activation is correct
  /// without it.
  pub eager_activation: bool,
}

impl<S> Deps<S> {
  /// Wall clock, no push delivery, an empty presence registry and the
  /// default policy.
  pub fn new(store: Arc<S>) -> Self {
    Self {
      store,
      clock: Arc::new(SystemClock),
      notifier: Arc::new(NullNotifier),
      presence: Arc::new(InMemoryPresence::new()),
      policy: Policy::default(),
      eager_activation: false,
    }
  }

  pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = clock;
    self
  }

  pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
    self.notifier = notifier;
    self
  }

  pub fn with_presence(mut self, presence: Arc<dyn PresenceRegistry>) -> Self {
    self.presence = presence;
    self
  }

  pub fn with_policy(mut self, policy: Policy) -> Self {
    self.policy = policy;
    self
  }

  pub fn with_eager_activation(mut self, eager: bool) -> Self {
    self.eager_activation = eager;
    self
  }
}

impl<S> Clone for Deps<S> {
  fn clone(&self) -> Self {
    Self {
      store:            Arc::clone(&self.store),
      clock:            Arc::clone(&self.clock),
      notifier:         Arc::clone(&self.notifier),
      presence:         Arc::clone(&self.presence),
      policy:           self.policy,
      eager_activation: self.eager_activation,
    }
  }
}
