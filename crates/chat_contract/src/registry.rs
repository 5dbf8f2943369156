use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::event::{ChatEvent, EventKind};

/// Identifier returned by [`EventRegistry::subscribe`].
pub type SubscriptionId = u64;

/// Callback invoked for every delivered event of the subscribed kind.
pub type EventHandler = Arc<dyn Fn(&ChatEvent) + Send + Sync>;

#[derive(Default)]
struct RegistryState {
    next_id: SubscriptionId,
    handlers: HashMap<EventKind, Vec<(SubscriptionId, EventHandler)>>,
}

/// Typed multi-subscriber handler table keyed by [`EventKind`].
///
/// Handlers of one kind run in subscription order. Dispatch snapshots the handler list
/// before invoking it, so handlers may subscribe or unsubscribe re-entrantly.
#[derive(Default)]
pub struct EventRegistry {
    state: Mutex<RegistryState>,
}

impl EventRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, kind: EventKind, handler: EventHandler) -> SubscriptionId {
        let mut state = self.lock_state();
        state.next_id += 1;
        let id = state.next_id;
        state.handlers.entry(kind).or_default().push((id, handler));
        id
    }

    /// Removes a handler. Returns false when `id` was not registered for `kind`.
    pub fn unsubscribe(&self, kind: EventKind, id: SubscriptionId) -> bool {
        let mut state = self.lock_state();
        let Some(handlers) = state.handlers.get_mut(&kind) else {
            return false;
        };

        let before = handlers.len();
        handlers.retain(|(existing, _)| *existing != id);
        before != handlers.len()
    }

    /// Delivers `event` to every handler of its kind and returns how many ran.
    pub fn dispatch(&self, event: &ChatEvent) -> usize {
        let handlers = {
            let state = self.lock_state();
            state
                .handlers
                .get(&event.kind())
                .map(|handlers| {
                    handlers
                        .iter()
                        .map(|(_, handler)| Arc::clone(handler))
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default()
        };

        for handler in &handlers {
            handler(event);
        }

        handlers.len()
    }

    #[must_use]
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.lock_state()
            .handlers
            .get(&kind)
            .map_or(0, Vec::len)
    }

    fn lock_state(&self) -> MutexGuard<'_, RegistryState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::event::{CompletionSignal, ControlMessage};

    fn counting_handler(counter: &Arc<AtomicUsize>) -> EventHandler {
        let counter = Arc::clone(counter);
        Arc::new(move |_event: &ChatEvent| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn dispatch_reaches_every_subscriber_of_the_event_kind_only() {
        let registry = EventRegistry::new();
        let complete_hits = Arc::new(AtomicUsize::new(0));
        let control_hits = Arc::new(AtomicUsize::new(0));

        registry.subscribe(EventKind::MessageComplete, counting_handler(&complete_hits));
        registry.subscribe(EventKind::MessageComplete, counting_handler(&complete_hits));
        registry.subscribe(EventKind::ControlMessage, counting_handler(&control_hits));

        let delivered = registry.dispatch(&ChatEvent::Complete(CompletionSignal::default()));

        assert_eq!(delivered, 2);
        assert_eq!(complete_hits.load(Ordering::SeqCst), 2);
        assert_eq!(control_hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unsubscribe_removes_only_the_matching_handler() {
        let registry = EventRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let first = registry.subscribe(EventKind::ControlMessage, counting_handler(&hits));
        registry.subscribe(EventKind::ControlMessage, counting_handler(&hits));

        assert!(!registry.unsubscribe(EventKind::MessageBroadcast, first));
        assert!(registry.unsubscribe(EventKind::ControlMessage, first));
        assert!(!registry.unsubscribe(EventKind::ControlMessage, first));
        assert_eq!(registry.subscriber_count(EventKind::ControlMessage), 1);

        registry.dispatch(&ChatEvent::Control(ControlMessage::enable_input()));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn handlers_may_unsubscribe_during_dispatch() {
        let registry = Arc::new(EventRegistry::new());
        let slot = Arc::new(Mutex::new(None::<SubscriptionId>));

        let handler: EventHandler = {
            let registry = Arc::clone(&registry);
            let slot = Arc::clone(&slot);
            Arc::new(move |_event: &ChatEvent| {
                if let Some(id) = slot.lock().expect("slot lock").take() {
                    registry.unsubscribe(EventKind::MessageComplete, id);
                }
            })
        };
        let id = registry.subscribe(EventKind::MessageComplete, handler);
        *slot.lock().expect("slot lock") = Some(id);

        assert_eq!(
            registry.dispatch(&ChatEvent::Complete(CompletionSignal::default())),
            1
        );
        assert_eq!(registry.subscriber_count(EventKind::MessageComplete), 0);
    }
}
