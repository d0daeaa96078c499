//! # Hook
//!
//! This module covers hooks, which redirect execution of a native function into Rust.
//!
//! An [`Interceptor`] turns a function address plus its [`FunctionDescriptor`] into a [`RawHook`].
//! Every intercepted call is handed to a [`Detour`] as an array of arguments; the [`Decision`] it
//! returns tells a cancelable hook whether the original function runs.

use std::sync::Arc;

use crate::error::Result;
use crate::wrapper::convention::FunctionDescriptor;
use crate::wrapper::NativeFunction;

pub mod asmhook;
#[cfg(test)]
pub(crate) mod testing;

pub use asmhook::{AsmHook, AsmInterceptor};

/// Outcome of an intercepted call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Let the original function run
    Continue,
    /// Return to the caller without running the original function
    Cancel,
}

impl Decision {
    /// Value handed back to the generated code; zero skips the original
    pub fn native(self) -> usize {
        match self {
            Decision::Continue => 1,
            Decision::Cancel => 0,
        }
    }

    /// Combines two decisions, a single cancellation wins
    pub fn and(self, other: Decision) -> Decision {
        if self == Decision::Cancel || other == Decision::Cancel {
            Decision::Cancel
        } else {
            Decision::Continue
        }
    }
}

/// Receiver of intercepted calls
pub trait Detour: Send + Sync {
    /// Handles a call; `args` holds the arguments in parameter order, register arguments first
    fn on_call(&self, args: &[usize]) -> Decision;
}

impl<F> Detour for F
where
    F: Fn(&[usize]) -> Decision + Send + Sync,
{
    fn on_call(&self, args: &[usize]) -> Decision {
        self(args)
    }
}

/// Everything needed to intercept a native function
pub struct InterceptRequest<'a> {
    /// Name of the hook, used for diagnostics
    pub name: &'a str,
    /// Address of the first instruction of the function
    pub address: usize,
    /// Calling convention of the function
    pub descriptor: FunctionDescriptor,
    /// Receiver of the calls
    pub detour: Arc<dyn Detour>,
    /// Whether the detour may skip the original function
    pub cancelable: bool,
}

/// Creates hooks on native functions
pub trait Interceptor: Send + Sync {
    /// Prepares a hook for the requested function, without activating it
    fn intercept(&self, request: InterceptRequest<'_>) -> Result<Box<dyn RawHook>>;
}

/// A prepared hook on a native function
///
/// `enable` and `disable` are idempotent. Toggling the same hook from several threads at once is
/// serialized by the implementation.
pub trait RawHook: Send + Sync {
    /// Routes calls through the detour, activating the hook on first use
    fn enable(&self) -> Result<()>;
    /// Restores the original code
    fn disable(&self) -> Result<()>;
    /// Whether calls are currently routed through the detour
    fn is_enabled(&self) -> bool;
    /// Callable which runs the function as if it was not hooked
    fn original(&self) -> Arc<dyn NativeFunction>;
}

#[cfg(test)]
mod tests {
    use crate::hook::{Decision, Detour};

    #[test]
    /// Decisions map to the values expected by the generated code
    fn test_decision() {
        assert_eq!(Decision::Continue.native(), 1);
        assert_eq!(Decision::Cancel.native(), 0);

        assert_eq!(Decision::Continue.and(Decision::Continue), Decision::Continue);
        assert_eq!(Decision::Continue.and(Decision::Cancel), Decision::Cancel);
        assert_eq!(Decision::Cancel.and(Decision::Continue), Decision::Cancel);
    }

    #[test]
    /// Closures act as detours
    fn test_closure_detour() {
        let detour = |args: &[usize]| {
            if args[0] == 0 {
                Decision::Cancel
            } else {
                Decision::Continue
            }
        };
        assert_eq!(detour.on_call(&[0]), Decision::Cancel);
        assert_eq!(detour.on_call(&[1]), Decision::Continue);
    }
}
