//! Per-user broadcast channels for pushing [`Notification`]s.
//!
//! Each live connection subscribes to its user's channel. Notifications for
//! users without a subscriber are dropped; nothing is persisted.

use dashmap::DashMap;
use parley_core::notify::{Notification, Notifier};
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

const DEFAULT_CAPACITY: usize = 64;

pub struct ChannelNotifier {
  channels: DashMap<Uuid, broadcast::Sender<Notification>>,
  capacity: usize,
}

impl ChannelNotifier {
  pub fn new() -> Self { Self::with_capacity(DEFAULT_CAPACITY) }

  /// `capacity` bounds how far a slow subscriber may lag before it starts
  /// missing notifications.
  pub fn with_capacity(capacity: usize) -> Self {
    Self { channels: DashMap::new(), capacity }
  }

  pub fn subscribe(&self, user_id: Uuid) -> broadcast::Receiver<Notification> {
    self
      .channels
      .entry(user_id)
      .or_insert_with(|| broadcast::channel(self.capacity).0)
      .subscribe()
  }

  /// Users with a live channel.
  pub fn channel_count(&self) -> usize { self.channels.len() }

  /// Drop the user's channel once its last receiver is gone. Call after a
  /// subscriber goes away without having been sent anything.
  pub fn release(&self, user_id: Uuid) {
    self
      .channels
      .remove_if(&user_id, |_, tx| tx.receiver_count() == 0);
  }
}

impl Default for ChannelNotifier {
  fn default() -> Self { Self::new() }
}

impl Notifier for ChannelNotifier {
  fn send(&self, user_id: Uuid, notification: Notification) {
    let event = notification.event_type();
    let delivered = match self.channels.get(&user_id) {
      Some(tx) => tx.send(notification).ok(),
      None => None,
    };

    match delivered {
      Some(receivers) => debug!(%user_id, event, receivers, "notification delivered"),
      None => {
        self.release(user_id);
        debug!(%user_id, event, "notification dropped: no live connection");
      }
    }
  }
}
