use std::collections::HashMap;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::session::Message;

/// Each subscriber gets a single-slot buffer. A subscriber that has not
/// drained its previous message blocks dispatch, and with it the whole read
/// loop of the owning session.
pub const SUBSCRIBER_CHANNEL_CAPACITY: usize = 1;

/// Event-name-scoped fan-out: event name -> subscriber name -> channel.
///
/// Subscribing may race the dispatch loop, so the mapping is a concurrent
/// map; senders are cloned out before any delivery await.
#[derive(Default)]
pub struct SubscriptionRegistry {
    subscribers: DashMap<String, HashMap<String, mpsc::Sender<Message>>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create (or replace) the channel for this (event, subscriber) pair.
    pub fn subscribe(&self, event: &str, subscriber: &str) -> mpsc::Receiver<Message> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CHANNEL_CAPACITY);
        let mut entry = self.subscribers.entry(event.to_owned()).or_default();
        if entry.insert(subscriber.to_owned(), tx).is_some() {
            debug!(event = %event, subscriber = %subscriber, "replaced subscription");
        } else {
            debug!(event = %event, subscriber = %subscriber, "new subscription");
        }
        rx
    }

    /// Remove the entry if present; absent pairs are not an error.
    pub fn unsubscribe(&self, event: &str, subscriber: &str) {
        if let Some(mut entry) = self.subscribers.get_mut(event) {
            entry.remove(subscriber);
        }
    }

    /// Deliver `message` to every subscriber of its event name. Zero
    /// subscribers drops the message silently.
    pub async fn dispatch(&self, message: Message) {
        let senders: Vec<(String, mpsc::Sender<Message>)> = match self.subscribers.get(&message.name)
        {
            Some(entry) => entry
                .iter()
                .map(|(name, tx)| (name.clone(), tx.clone()))
                .collect(),
            None => {
                trace!(event = %message.name, "no subscribers, dropping message");
                return;
            }
        };

        for (subscriber, tx) in senders {
            if tx.send(message.clone()).await.is_err() {
                debug!(
                    event = %message.name,
                    subscriber = %subscriber,
                    "subscriber channel dropped, skipping"
                );
            }
        }
    }

    /// Drop every delivery channel; receivers observe closure.
    pub fn close_all(&self) {
        self.subscribers.clear();
    }

    pub fn subscriber_count(&self, event: &str) -> usize {
        self.subscribers.get(event).map(|e| e.len()).unwrap_or(0)
    }
}
