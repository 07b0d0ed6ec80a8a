//! Synchronous change notification.

use serde_json::Value;
use std::fmt;

/// Prefix of the event fired when a variable is bound.
pub const ENV_EVENT_PREFIX: &str = "env.";
/// Event fired when the cancellation flag changes.
pub const CANCELLED_EVENT: &str = "cancelled";
/// Event fired when the call history changes.
pub const CALLS_EVENT: &str = "calls";

/// A named state change with its old and new values.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub name: String,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
}

/// Handle returned by [`ChangeNotifier::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Box<dyn FnMut(&ChangeEvent) + Send>;

/// Broadcasts events to listeners in registration order, on the
/// caller's thread, before the triggering call returns.
#[derive(Default)]
pub struct ChangeNotifier {
    listeners: Vec<(ListenerId, Listener)>,
    next_id: u64,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&mut self, listener: F) -> ListenerId
    where
        F: FnMut(&ChangeEvent) + Send + 'static,
    {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    /// Returns `false` when `id` was not subscribed.
    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(listener_id, _)| *listener_id != id);
        self.listeners.len() != before
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn fire(
        &mut self,
        name: impl Into<String>,
        old_value: Option<Value>,
        new_value: Option<Value>,
    ) {
        if self.listeners.is_empty() {
            return;
        }
        let event = ChangeEvent {
            name: name.into(),
            old_value,
            new_value,
        };
        for (_, listener) in &mut self.listeners {
            listener(&event);
        }
    }
}

impl fmt::Debug for ChangeNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeNotifier")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
