//! Core shared by every hook of the catalog

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::binding::ProcessBinding;
use crate::error::Result;
use crate::hook::{Decision, Detour, RawHook};
use crate::wrapper::convention::FunctionDescriptor;
use crate::wrapper::NativeFunction;

use super::event::Event;
use super::options::HookOptions;

/// Turns the raw arguments of a call into event arguments; `None` lets the call through silently
type Converter<A> = Box<dyn Fn(&[usize]) -> Option<A> + Send + Sync>;

/// State reached from the generated code
struct HookState<A> {
    /// Name of the hook
    name: &'static str,
    /// Amount of replays of the original currently running
    replaying: AtomicUsize,
    /// Handlers of intercepted calls
    called: Event<A>,
    /// Conversion of raw arguments
    convert: Converter<A>,
    /// Whether handlers may cancel the call
    cancelable: bool,
}

impl<A: Send + Sync> Detour for HookState<A> {
    fn on_call(&self, args: &[usize]) -> Decision {
        // calls made by this crate through `call_original` are not reported
        if self.replaying.load(Ordering::SeqCst) > 0 {
            return Decision::Continue;
        }
        let Some(args) = (self.convert)(args) else {
            log::trace!("Skipped a call of {} with unreadable arguments", self.name);
            return Decision::Continue;
        };

        let decision = self.called.dispatch(&args);
        if self.cancelable {
            decision
        } else {
            Decision::Continue
        }
    }
}

/// Marks a replay of the original for as long as it lives
struct ReplayGuard<'a>(&'a AtomicUsize);

impl<'a> ReplayGuard<'a> {
    /// Enters a replay
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for ReplayGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Hook reporting every call of a native function through an [`Event`]
///
/// The original function can be replayed with [`CancelableHook::call_original`] without the replay
/// being reported to the handlers.
pub struct CancelableHook<A> {
    /// State shared with the detour
    state: Arc<HookState<A>>,
    /// Placed hook
    raw: Box<dyn RawHook>,
    /// Callable running the hooked function
    original: Arc<dyn NativeFunction>,
    /// Calling convention of the function
    descriptor: FunctionDescriptor,
}

impl<A: Send + Sync + 'static> CancelableHook<A> {
    /// Locates the function and hooks it
    pub(crate) fn create<F>(
        binding: &ProcessBinding,
        name: &'static str,
        descriptor: FunctionDescriptor,
        options: &HookOptions,
        cancelable: bool,
        convert: F,
    ) -> Result<Self>
    where
        F: Fn(&[usize]) -> Option<A> + Send + Sync + 'static,
    {
        let state = Arc::new(HookState {
            name,
            replaying: AtomicUsize::new(0),
            called: Event::new(),
            convert: Box::new(convert),
            cancelable,
        });
        let raw = binding.create_hook(name, descriptor, state.clone(), options, cancelable)?;
        let original = raw.original();

        Ok(Self {
            state,
            raw,
            original,
            descriptor,
        })
    }

    /// Name of the hook
    pub fn name(&self) -> &'static str {
        self.state.name
    }

    /// Handlers of intercepted calls
    pub fn called(&self) -> &Event<A> {
        &self.state.called
    }

    /// Calling convention of the hooked function
    pub fn descriptor(&self) -> &FunctionDescriptor {
        &self.descriptor
    }

    /// Routes calls through the handlers
    pub fn enable(&self) -> Result<()> {
        self.raw.enable()
    }

    /// Restores the original function
    pub fn disable(&self) -> Result<()> {
        self.raw.disable()
    }

    /// Whether calls are routed through the handlers
    pub fn is_enabled(&self) -> bool {
        self.raw.is_enabled()
    }

    /// Calls the original function without reporting the call to the handlers
    pub fn call_original(&self, args: &[usize]) -> Result<usize> {
        let _guard = ReplayGuard::enter(&self.state.replaying);
        self.original.call(args)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use crate::binding::tests::fake_binding;
    use crate::hook::testing::FakeInterceptor;
    use crate::hook::Decision;
    use crate::hooks::cancelable::CancelableHook;
    use crate::hooks::options::HookOptions;
    use crate::wrapper::convention::{FunctionDescriptor, Register};

    /// Calling convention used by the tests
    const DESCRIPTOR: FunctionDescriptor =
        FunctionDescriptor::register(&[Register::Eax, Register::Edx], 2);

    /// Creates a hook on a function placed at offset 0x10 of the fake module
    fn hook(cancelable: bool) -> (CancelableHook<usize>, Arc<FakeInterceptor>) {
        let (binding, interceptor) = fake_binding(&[(0x10, &[0x53, 0x56, 0x8b, 0xf2])]);
        let options = HookOptions::new("Test", true, "53 56 8B F2", 0);
        let hook =
            CancelableHook::create(&binding, "Test", DESCRIPTOR, &options, cancelable, |args| {
                (args[1] != 0).then_some(args[1])
            })
            .unwrap();
        (hook, interceptor)
    }

    #[test]
    /// A cancelling handler stops the original, the caller observes zero
    fn test_cancel() {
        let (hook, interceptor) = hook(true);
        let function = interceptor.function("Test");
        hook.called().subscribe(|_| Decision::Cancel);

        assert_eq!(function.call(&[0x100, 5]), 0);
        assert!(function.original_calls().is_empty());
    }

    #[test]
    /// Without cancellation the original runs exactly once
    fn test_continue() {
        let (hook, interceptor) = hook(true);
        let function = interceptor.function("Test");
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        hook.called().subscribe(move |value| {
            counter.store(*value, Ordering::SeqCst);
            Decision::Continue
        });

        assert_eq!(function.call(&[0x100, 5]), 1);
        assert_eq!(seen.load(Ordering::SeqCst), 5);
        assert_eq!(function.original_calls(), vec![vec![0x100, 5]]);
    }

    #[test]
    /// Replaying the original does not notify the handlers
    fn test_replay_does_not_fire() {
        let (hook, interceptor) = hook(true);
        let function = interceptor.function("Test");
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        hook.called().subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Decision::Cancel
        });

        assert_eq!(hook.call_original(&[0x100, 7]).unwrap(), 1);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(function.original_calls(), vec![vec![0x100, 7]]);

        // the guard is released afterwards
        assert_eq!(function.call(&[0x100, 7]), 0);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    /// Non-cancelable hooks ignore cancellations and unreadable arguments skip the handlers
    fn test_not_cancelable() {
        let (hook, interceptor) = hook(false);
        let function = interceptor.function("Test");
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        hook.called().subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Decision::Cancel
        });

        assert_eq!(function.call(&[0x100, 1]), 1);
        // the converter rejects a null second argument
        assert_eq!(function.call(&[0x100, 0]), 1);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(function.original_calls().len(), 2);
    }

    #[test]
    /// Disabled hooks let every call through
    fn test_disable() {
        let (hook, interceptor) = hook(true);
        let function = interceptor.function("Test");
        hook.called().subscribe(|_| Decision::Cancel);
        assert!(hook.is_enabled());

        hook.disable().unwrap();
        assert!(!hook.is_enabled());
        assert_eq!(function.call(&[0x100, 5]), 1);

        hook.enable().unwrap();
        assert_eq!(function.call(&[0x100, 5]), 0);
    }
}
