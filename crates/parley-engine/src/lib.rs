//! The coordination engine: delayed activation, slot negotiation and
//! real-time dispatch, written against the collaborator traits in
//! `parley-core`.
//!
//! Every mutation is a read followed by one compare-and-set on the document
//! that was read. The engine holds no entity state of its own.

mod deps;
mod ops;

pub mod activation;
pub mod matching;
pub mod memory;
pub mod negotiation;
pub mod notifier;
pub mod presence;
pub mod retry;

pub use activation::ActivationEngine;
pub use deps::Deps;
pub use matching::{Candidate, Candidates, DispatchPayload, Matcher};
pub use memory::MemoryStore;
pub use negotiation::{Negotiator, RequestView};
pub use notifier::ChannelNotifier;
pub use presence::InMemoryPresence;
pub use retry::{RetryPolicy, retry_on_stale};

use parley_core::store::EntityStore;

/// The three services, sharing one set of collaborators.
pub struct Parley<S> {
  pub activation:  ActivationEngine<S>,
  pub negotiation: Negotiator<S>,
  pub matching:    Matcher<S>,
}

impl<S> Parley<S>
where
  S: EntityStore + 'static,
{
  pub fn new(deps: Deps<S>) -> Self {
    let activation = ActivationEngine::new(deps.clone());
    Self {
      negotiation: Negotiator::new(deps.clone(), activation.clone()),
      matching: Matcher::new(deps, activation.clone()),
      activation,
    }
  }
}

#[cfg(test)]
mod tests;
