//! Subscription and callback registries.
use std::collections::HashMap;
use std::sync::Arc;

use crate::interface::{Observer, Request};

/// Coordinator events observable through registered callbacks.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    /// The connection status changed.
    Status,
    /// New chain state arrived over the main interface.
    Updated,
    /// The main server's banner was received.
    Banner,
    /// The federation announced a new server list.
    Servers,
}

/// A registered callback. Callbacks must be cheap and non-blocking;
/// long work is the observer's responsibility.
pub type Callback = Arc<dyn Fn() + Send + Sync>;

/// Subscriptions replayed over every newly promoted main interface,
/// keyed by observer token.
#[derive(Default)]
pub struct Subscriptions {
    entries: HashMap<u64, (Observer, Vec<Request>)>,
}

impl Subscriptions {
    /// Append messages to an observer's subscription list. Messages the
    /// observer already holds are dropped, so re-subscribing is
    /// harmless.
    pub fn insert(&mut self, observer: Observer, messages: Vec<Request>) {
        let (_, list) = self
            .entries
            .entry(observer.id())
            .or_insert_with(|| (observer, Vec::new()));

        for message in messages {
            if !list.contains(&message) {
                list.push(message);
            }
        }
    }

    /// Iterate over all registrations.
    pub fn iter(&self) -> impl Iterator<Item = (&Observer, &[Request])> {
        self.entries
            .values()
            .map(|(observer, messages)| (observer, messages.as_slice()))
    }

    /// Number of registered observers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no observer is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Callbacks fanned out on coordinator events.
#[derive(Default)]
pub struct Callbacks {
    entries: HashMap<Topic, Vec<Callback>>,
}

impl Callbacks {
    /// Register a callback for an event.
    pub fn register(&mut self, topic: Topic, callback: Callback) {
        self.entries.entry(topic).or_default().push(callback);
    }

    /// Snapshot the callbacks registered for an event, so they can be
    /// invoked outside the coordinator lock.
    pub fn snapshot(&self, topic: Topic) -> Vec<Callback> {
        self.entries.get(&topic).cloned().unwrap_or_default()
    }
}

/// State guarded by the coordinator lock.
#[derive(Default)]
pub(crate) struct Registry {
    pub subscriptions: Subscriptions,
    pub callbacks: Callbacks,
    pub running: bool,
}
