//! # Wrapper
//!
//! This takes code execution from a given calling convention specification and standardizes it.
//!
//! Two directions are generated from a [`FunctionDescriptor`]:
//!
//! - [`ReverseWrapper`]: entered with the native convention, collects the arguments into an array and
//!   calls [`dispatch`], which forwards them to a [`Detour`].
//! - [`FunctionWrapper`]: called from Rust with an argument array, loads the arguments the way the
//!   native function expects them and calls it.

use std::panic::{self, AssertUnwindSafe};
use std::slice;
use std::sync::Arc;

use iced_x86::code_asm::{dword_ptr, eax, ebp, ebx, edi, esi, esp, CodeAssembler};

use crate::alloc::{emit, ExecutableMemory};
use crate::code::x86::BITNESS;
use crate::error::{panic_message, BindingError, Result};
use crate::hook::{Decision, Detour};

use self::convention::{FunctionDescriptor, Register, StackCleanup};

pub mod convention;

/// A native function callable from Rust
pub trait NativeFunction: Send + Sync {
    /// Calls the function; `args` holds the arguments in parameter order
    fn call(&self, args: &[usize]) -> Result<usize>;
}

/// Data a reverse wrapper hands to [`dispatch`]
pub struct DetourContext {
    /// Name of the hooked function
    name: String,
    /// Receiver of the calls
    detour: Arc<dyn Detour>,
    /// Length of the argument array
    parameters: usize,
}

impl DetourContext {
    /// Creates a context for a function with `parameters` arguments
    pub fn new(name: impl Into<String>, detour: Arc<dyn Detour>, parameters: usize) -> Self {
        Self {
            name: name.into(),
            detour,
            parameters,
        }
    }
}

/// Entry point of every reverse wrapper
///
/// Panics never cross into native frames; a panicking detour lets the original function run.
pub extern "C" fn dispatch(context: *const DetourContext, args: *const usize) -> usize {
    // Safety: reverse wrappers pass the context they were built with, which outlives them
    let context = unsafe { &*context };
    let args = if context.parameters == 0 || args.is_null() {
        &[][..]
    } else {
        // Safety: reverse wrappers build an array of exactly `parameters` values on the stack
        unsafe { slice::from_raw_parts(args, context.parameters) }
    };

    match panic::catch_unwind(AssertUnwindSafe(|| context.detour.on_call(args))) {
        Ok(decision) => decision.native(),
        Err(payload) => {
            log::error!(
                "The detour of {} panicked: {}",
                context.name,
                panic_message(payload.as_ref())
            );
            Decision::Continue.native()
        }
    }
}

/// Generates code converting the native convention of `descriptor` into a call of
/// `dispatch(context, args)`, located at `ip`
pub fn reverse_wrapper_code(
    descriptor: &FunctionDescriptor,
    dispatch: usize,
    context: usize,
    ip: usize,
) -> Result<Vec<u8>> {
    descriptor.validate()?;
    let mut a = CodeAssembler::new(BITNESS)?;
    let stack_arguments = descriptor.stack_arguments() as i32;
    // rust clobbers the cdecl scratch registers, save the ones the caller relies on
    let preserved: Vec<Register> = [Register::Eax, Register::Ecx, Register::Edx]
        .into_iter()
        .filter(|r| !descriptor.clobbers(*r) && *r != descriptor.return_register)
        .collect();

    a.push(ebp)?;
    a.mov(ebp, esp)?;
    for register in &preserved {
        a.push(register.asm())?;
    }

    // build the argument array: stack arguments on top, register arguments below them
    for i in (0..stack_arguments).rev() {
        a.push(dword_ptr(ebp + (8 + 4 * i)))?;
    }
    for register in descriptor.registers.iter().rev() {
        a.push(register.asm())?;
    }

    a.mov(eax, esp)?;
    a.push(eax)?;
    a.push(context as u32)?;
    a.mov(eax, dispatch as u32)?;
    a.call(eax)?;

    if descriptor.return_register != Register::Eax {
        a.mov(descriptor.return_register.asm(), eax)?;
    }
    if preserved.is_empty() {
        a.mov(esp, ebp)?;
    } else {
        a.lea(esp, dword_ptr(ebp - 4 * preserved.len() as i32))?;
        for register in preserved.iter().rev() {
            a.pop(register.asm())?;
        }
    }
    a.pop(ebp)?;
    ret(&mut a, descriptor)?;

    Ok(a.assemble(ip as u64)?)
}

/// Generates code calling `target` with the native convention of `descriptor`, located at `ip`
///
/// The code has the signature `extern "C" fn(args: *const usize) -> usize`.
pub fn function_wrapper_code(
    descriptor: &FunctionDescriptor,
    target: usize,
    ip: usize,
) -> Result<Vec<u8>> {
    descriptor.validate()?;
    let mut a = CodeAssembler::new(BITNESS)?;
    let registers = descriptor.registers.len() as i32;
    let stack_arguments = descriptor.stack_arguments() as i32;
    // holds the argument array and later the call target
    let base = Register::ARGUMENT_CAPABLE
        .into_iter()
        .find(|r| !descriptor.registers.contains(r))
        .ok_or_else(|| BindingError::InvalidDescriptor("no scratch register".to_string()))?
        .asm();

    a.push(ebp)?;
    a.mov(ebp, esp)?;
    a.push(ebx)?;
    a.push(esi)?;
    a.push(edi)?;
    a.mov(base, dword_ptr(ebp + 8))?;

    for i in (0..stack_arguments).rev() {
        a.push(dword_ptr(base + 4 * (registers + i)))?;
    }
    for (i, register) in descriptor.registers.iter().enumerate() {
        a.mov(register.asm(), dword_ptr(base + 4 * i as i32))?;
    }

    a.mov(base, target as u32)?;
    a.call(base)?;
    if descriptor.cleanup == StackCleanup::Caller && stack_arguments > 0 {
        a.add(esp, 4 * stack_arguments)?;
    }
    if descriptor.return_register != Register::Eax {
        a.mov(eax, descriptor.return_register.asm())?;
    }

    a.lea(esp, dword_ptr(ebp - 12))?;
    a.pop(edi)?;
    a.pop(esi)?;
    a.pop(ebx)?;
    a.pop(ebp)?;
    a.ret()?;

    Ok(a.assemble(ip as u64)?)
}

/// Emits the return matching the cleanup of `descriptor`
pub(crate) fn ret(a: &mut CodeAssembler, descriptor: &FunctionDescriptor) -> Result<()> {
    match descriptor.callee_cleanup_bytes() {
        0 => a.ret()?,
        bytes => a.ret_1(bytes as i32)?,
    }
    Ok(())
}

/// Native entry point which forwards calls to a [`Detour`]
pub struct ReverseWrapper {
    /// Context passed to [`dispatch`], referenced by address from the generated code
    context: Box<DetourContext>,
    /// Generated code
    code: ExecutableMemory,
}

impl ReverseWrapper {
    /// Generates a wrapper for functions shaped like `descriptor`
    pub fn new(
        name: &str,
        descriptor: &FunctionDescriptor,
        detour: Arc<dyn Detour>,
    ) -> Result<Self> {
        let context = Box::new(DetourContext::new(name, detour, descriptor.parameters));
        let context_address = &*context as *const DetourContext as usize;
        let entry = dispatch as extern "C" fn(*const DetourContext, *const usize) -> usize;
        let code =
            emit(|ip| reverse_wrapper_code(descriptor, entry as usize, context_address, ip))?;

        Ok(Self { context, code })
    }

    /// Address of the generated code
    pub fn address(&self) -> usize {
        self.code.address()
    }

    /// Name of the wrapped function
    pub fn name(&self) -> &str {
        &self.context.name
    }
}

/// Rust entry point into a native function
pub struct FunctionWrapper {
    /// Calling convention of the function
    descriptor: FunctionDescriptor,
    /// Address of the native function
    target: usize,
    /// Generated code
    code: ExecutableMemory,
}

impl FunctionWrapper {
    /// Generates a wrapper calling `target`
    pub fn new(descriptor: FunctionDescriptor, target: usize) -> Result<Self> {
        let code = emit(|ip| function_wrapper_code(&descriptor, target, ip))?;
        Ok(Self {
            descriptor,
            target,
            code,
        })
    }

    /// Address of the native function
    pub fn target(&self) -> usize {
        self.target
    }
}

impl NativeFunction for FunctionWrapper {
    fn call(&self, args: &[usize]) -> Result<usize> {
        if args.len() != self.descriptor.parameters {
            return Err(BindingError::ArgumentCount {
                expected: self.descriptor.parameters,
                given: args.len(),
            });
        }

        #[cfg(target_arch = "x86")]
        {
            // Safety: the code was generated for this signature and calls a function of the client
            let function: extern "C" fn(*const usize) -> usize =
                unsafe { std::mem::transmute(self.code.address()) };
            Ok(function(args.as_ptr()))
        }
        #[cfg(not(target_arch = "x86"))]
        {
            let _ = &self.code;
            Err(BindingError::UnsupportedArchitecture)
        }
    }
}
