//! Subscriptions to intercepted calls

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::hook::Decision;

/// Identifies a subscription so it can be removed again
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Shared handler
type Handler<A> = Arc<dyn Fn(&A) -> Decision + Send + Sync>;

/// Set of handlers notified about every intercepted call
///
/// Handlers answer with a [`Decision`]; every handler runs and a single [`Decision::Cancel`] cancels
/// the call.
pub struct Event<A> {
    /// Registered handlers in subscription order
    handlers: RwLock<Vec<(SubscriptionId, Handler<A>)>>,
    /// Next identifier to hand out
    next_id: AtomicU64,
}

impl<A> Event<A> {
    /// Creates an event without handlers
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Adds a handler
    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&A) -> Decision + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers.write().push((id, Arc::new(handler)));
        id
    }

    /// Removes a handler; returns whether it was registered
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write();
        let len = handlers.len();
        handlers.retain(|(handler_id, _)| *handler_id != id);
        handlers.len() != len
    }

    /// Runs every handler and combines their decisions
    pub fn dispatch(&self, args: &A) -> Decision {
        // handlers may (un)subscribe while running, so they run on a snapshot
        let handlers: Vec<Handler<A>> = self
            .handlers
            .read()
            .iter()
            .map(|(_, handler)| handler.clone())
            .collect();

        handlers
            .iter()
            .fold(Decision::Continue, |decision, handler| decision.and(handler(args)))
    }

    /// Amount of registered handlers
    pub fn subscriber_count(&self) -> usize {
        self.handlers.read().len()
    }
}

impl<A> Default for Event<A> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use crate::hook::Decision;
    use crate::hooks::event::Event;

    #[test]
    /// Every handler runs, a single cancellation wins
    fn test_dispatch() {
        let event: Event<u32> = Event::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        event.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Decision::Continue
        });
        let counter = calls.clone();
        event.subscribe(move |value| {
            counter.fetch_add(1, Ordering::SeqCst);
            if *value == 0 {
                Decision::Cancel
            } else {
                Decision::Continue
            }
        });

        assert_eq!(event.dispatch(&1), Decision::Continue);
        assert_eq!(event.dispatch(&0), Decision::Cancel);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    /// Removed handlers are no longer called
    fn test_unsubscribe() {
        let event: Event<()> = Event::default();
        let id = event.subscribe(|_| Decision::Cancel);
        assert_eq!(event.subscriber_count(), 1);

        assert!(event.unsubscribe(id));
        assert!(!event.unsubscribe(id));
        assert_eq!(event.subscriber_count(), 0);

        // no handlers, the call continues
        assert_eq!(event.dispatch(&()), Decision::Continue);
    }
}
