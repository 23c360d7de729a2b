use std::{
    collections::BTreeMap,
    fmt,
    sync::{Arc, Weak},
};

use parking_lot::Mutex;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SessionEvent {
    /// The current credential can no longer be renewed
    Invalidated,
}

impl SessionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::Invalidated => "auth:refresh-failed",
        }
    }
}

type Listener = Arc<dyn Fn(SessionEvent) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    listeners: BTreeMap<u64, Listener>,
}

/// Observer registry for session-wide signals
///
/// Consumers are expected to clear their local session state and go back to a
/// public surface when they see `SessionEvent::Invalidated`.
#[derive(Clone, Default)]
pub struct SessionEventBus(Arc<Mutex<Registry>>);

impl SessionEventBus {
    pub fn new() -> SessionEventBus {
        SessionEventBus::default()
    }

    pub fn subscribe<F>(&self, listener: F) -> SessionListener
    where
        F: 'static + Send + Sync + Fn(SessionEvent),
    {
        let mut registry = self.0.lock();
        let id = registry.next_id;
        registry.next_id += 1;
        registry.listeners.insert(id, Arc::new(listener));
        SessionListener {
            registry: Arc::downgrade(&self.0),
            id,
        }
    }

    pub fn publish(&self, event: SessionEvent) {
        // Listeners run outside the lock, so they can subscribe or unsubscribe
        let listeners = self.0.lock().listeners.values().cloned().collect::<Vec<_>>();
        tracing::info!(
            event = event.name(),
            listeners = listeners.len(),
            "publishing session event"
        );
        for l in listeners {
            l(event);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.0.lock().listeners.len()
    }
}

impl fmt::Debug for SessionEventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionEventBus")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

/// Registration handle, dropping it unsubscribes the listener
#[must_use = "dropping a SessionListener immediately unsubscribes it"]
#[derive(Debug)]
pub struct SessionListener {
    registry: Weak<Mutex<Registry>>,
    id: u64,
}

impl SessionListener {
    pub fn unsubscribe(self) {}
}

impl Drop for SessionListener {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.lock().listeners.remove(&self.id);
        }
    }
}
