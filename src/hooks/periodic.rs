//! Hook of a function the client calls once per frame on its main thread

use crate::error::{BindingError, Result};
use crate::hook::Decision;
use crate::wrapper::convention::FunctionDescriptor;

use super::{names, CancelableHook, HookContext, SubscriptionId};

/// Hook ticking on the game thread
///
/// Handlers can't cancel the call and the original function can't be called from outside the
/// client.
pub struct PeriodicHook {
    /// Shared core
    core: CancelableHook<()>,
}

impl PeriodicHook {
    /// No arguments, nothing to clean up
    pub const DESCRIPTOR: FunctionDescriptor = FunctionDescriptor::register(&[], 0);

    /// Locates and hooks the function
    pub fn create(context: &HookContext<'_>) -> Result<Self> {
        let core = CancelableHook::create(
            context.binding,
            names::PERIODIC,
            Self::DESCRIPTOR,
            &context.options.periodic,
            false,
            |_| Some(()),
        )?;
        Ok(Self { core })
    }

    /// Runs `handler` on every tick
    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.core.called().subscribe(move |_| {
            handler();
            Decision::Continue
        })
    }

    /// Removes a handler; returns whether it was registered
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.core.called().unsubscribe(id)
    }

    /// Amount of registered handlers
    pub fn subscriber_count(&self) -> usize {
        self.core.called().subscriber_count()
    }

    /// The periodic function is only ever called by the client
    pub fn original(&self) -> Result<usize> {
        Err(BindingError::NotCallable(names::PERIODIC))
    }
}

nos_hook!(PeriodicHook, (), |_| true);
