//! In-process stand-in for the machine code backend

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;
use crate::wrapper::convention::FunctionDescriptor;
use crate::wrapper::NativeFunction;

use super::{Decision, Detour, InterceptRequest, Interceptor, RawHook};

/// Interceptor recording every hook it creates
#[derive(Default)]
pub(crate) struct FakeInterceptor {
    /// Created hooks
    hooks: Mutex<Vec<Arc<FakeFunction>>>,
}

impl FakeInterceptor {
    /// Creates an interceptor without hooks
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Hooked function with the given name
    pub(crate) fn function(&self, name: &str) -> Arc<FakeFunction> {
        match self.hooks.lock().iter().find(|f| f.name == name) {
            Some(function) => function.clone(),
            None => panic!("{name} was never intercepted"),
        }
    }
}

impl Interceptor for FakeInterceptor {
    fn intercept(&self, request: InterceptRequest<'_>) -> Result<Box<dyn RawHook>> {
        request.descriptor.validate()?;
        let function = Arc::new(FakeFunction {
            name: request.name.to_string(),
            address: request.address,
            descriptor: request.descriptor,
            detour: request.detour,
            cancelable: request.cancelable,
            enabled: AtomicBool::new(false),
            original_calls: Mutex::new(Vec::new()),
        });
        self.hooks.lock().push(function.clone());
        Ok(Box::new(FakeHook(function)))
    }
}

/// Native function simulated in Rust
pub(crate) struct FakeFunction {
    /// Name of the hook
    pub(crate) name: String,
    /// Address the hook was placed at
    pub(crate) address: usize,
    /// Calling convention
    pub(crate) descriptor: FunctionDescriptor,
    /// Receiver of the calls
    detour: Arc<dyn Detour>,
    /// Whether the detour may skip the original
    cancelable: bool,
    /// Whether the hook is placed
    enabled: AtomicBool,
    /// Arguments of every execution of the original body
    original_calls: Mutex<Vec<Vec<usize>>>,
}

impl FakeFunction {
    /// Simulates the client calling the function; returns 0 when the call was cancelled
    pub(crate) fn call(&self, args: &[usize]) -> usize {
        if self.enabled.load(Ordering::SeqCst) {
            let decision = self.detour.on_call(args);
            if self.cancelable && decision == Decision::Cancel {
                return 0;
            }
        }
        self.original_calls.lock().push(args.to_vec());
        1
    }

    /// Arguments of every execution of the original body
    pub(crate) fn original_calls(&self) -> Vec<Vec<usize>> {
        self.original_calls.lock().clone()
    }

    /// Whether the hook is placed
    pub(crate) fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }
}

/// Hook handle of a [`FakeFunction`]
struct FakeHook(Arc<FakeFunction>);

impl RawHook for FakeHook {
    fn enable(&self) -> Result<()> {
        self.0.enabled.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn disable(&self) -> Result<()> {
        self.0.enabled.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        self.0.is_enabled()
    }

    fn original(&self) -> Arc<dyn NativeFunction> {
        Arc::new(FakeOriginal(self.0.clone()))
    }
}

/// Calls the hooked entry, like the generated wrapper does
struct FakeOriginal(Arc<FakeFunction>);

impl NativeFunction for FakeOriginal {
    fn call(&self, args: &[usize]) -> Result<usize> {
        Ok(self.0.call(args))
    }
}
