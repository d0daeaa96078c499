//! # Assembly hook
//!
//! This hook type overwrites the entry of a function with a `jmp` into a generated shim.
//!
//! The shim snapshots all registers and flags, copies the stack arguments past the snapshot and
//! calls a [`ReverseWrapper`]. For cancelable hooks a zero result returns straight to the caller,
//! otherwise the snapshot is restored and the relocated prologue runs before jumping back into the
//! function.

use std::sync::Arc;

use iced_x86::code_asm::{dword_ptr, esp, CodeAssembler};
use parking_lot::Mutex;

use crate::alloc::{emit, ExecutableMemory};
use crate::code::x86::{entry_patch, steal, StolenCode, BITNESS, JMP_LEN, MAX_INSTRUCTION_LEN};
use crate::error::{BindingError, Result};
use crate::memory::{LocalMemory, MemoryExt};
use crate::patcher::byte::{BytePatchGuard, BytePatcher};
use crate::patcher::mem::{PermissionWrapper, PermissionWrapperGuard};
use crate::patcher::Patcher;
use crate::wrapper::convention::{FunctionDescriptor, StackCleanup};
use crate::wrapper::{ret, FunctionWrapper, NativeFunction, ReverseWrapper};

use super::{InterceptRequest, Interceptor, RawHook};

/// Size of the register snapshot: `pushad` plus `pushfd`
const SNAPSHOT_SIZE: i32 = 36;

/// Generator of the code a hooked function jumps to
pub struct DetourShim<'a> {
    /// Calling convention of the hooked function
    pub descriptor: &'a FunctionDescriptor,
    /// Address of the reverse wrapper forwarding into Rust
    pub reverse_wrapper: usize,
    /// Whether a zero result skips the original function
    pub cancelable: bool,
    /// Prologue moved out of the hooked function
    pub stolen: &'a StolenCode,
    /// Address execution continues at after the prologue
    pub resume: usize,
}

impl DetourShim<'_> {
    /// Assembles the shim for address `ip`
    pub fn assemble(&self, ip: usize) -> Result<Vec<u8>> {
        let mut a = CodeAssembler::new(BITNESS)?;
        let stack_arguments = self.descriptor.stack_arguments() as i32;

        a.pushad()?;
        a.pushfd()?;
        // every push moves esp, so the same displacement walks down the arguments
        let displacement = SNAPSHOT_SIZE + 4 * stack_arguments;
        for _ in 0..stack_arguments {
            a.push(dword_ptr(esp + displacement))?;
        }
        a.call(self.reverse_wrapper as u64)?;
        if self.descriptor.cleanup == StackCleanup::Caller && stack_arguments > 0 {
            a.add(esp, 4 * stack_arguments)?;
        }

        let mut original = a.create_label();
        if self.cancelable {
            let result = self.descriptor.return_register.asm();
            a.test(result, result)?;
            a.jnz(original)?;
            a.popfd()?;
            a.popad()?;
            ret(&mut a, self.descriptor)?;
        }

        a.set_label(&mut original)?;
        a.popfd()?;
        a.popad()?;
        for instruction in &self.stolen.instructions {
            a.add_instruction(*instruction)?;
        }
        a.jmp(self.resume as u64)?;

        Ok(a.assemble(ip as u64)?)
    }
}

/// Creates [`AsmHook`]s inside the current process
#[derive(Default, Clone, Copy)]
pub struct AsmInterceptor;

impl AsmInterceptor {
    /// Creates a new interceptor
    pub fn new() -> Self {
        Self
    }
}

impl Interceptor for AsmInterceptor {
    fn intercept(&self, request: InterceptRequest<'_>) -> Result<Box<dyn RawHook>> {
        if cfg!(not(target_arch = "x86")) {
            return Err(BindingError::UnsupportedArchitecture);
        }
        Ok(Box::new(AsmHook::new(request)?))
    }
}

/// Hook which jumps from the entry of a function into a generated shim
pub struct AsmHook {
    /// Guard of the entry patch while the hook is enabled, dropped first so the jump is gone
    /// before the shim is freed
    guard: Mutex<Option<PermissionWrapperGuard<BytePatchGuard>>>,
    /// Name of the hooked function
    name: String,
    /// Address of the hooked function
    target: usize,
    /// Jump written over the entry
    patch: Vec<u8>,
    /// Wrapper calling the hooked function
    original: Arc<FunctionWrapper>,
    /// Generated shim
    shim: ExecutableMemory,
    /// Entry point into Rust used by the shim
    reverse: ReverseWrapper,
}

impl AsmHook {
    /// Generates all code for the hook without touching the target
    pub fn new(request: InterceptRequest<'_>) -> Result<Self> {
        request.descriptor.validate()?;
        let target = request.address;

        let prologue = LocalMemory::new().read_vec(target, JMP_LEN + MAX_INSTRUCTION_LEN)?;
        let stolen = steal(&prologue, target, JMP_LEN)?;

        let reverse = ReverseWrapper::new(request.name, &request.descriptor, request.detour)?;
        let shim = DetourShim {
            descriptor: &request.descriptor,
            reverse_wrapper: reverse.address(),
            cancelable: request.cancelable,
            stolen: &stolen,
            resume: target + stolen.len,
        };
        let shim = emit(|ip| shim.assemble(ip))?;
        let patch = entry_patch(target, shim.address(), stolen.len)?;
        let original = Arc::new(FunctionWrapper::new(request.descriptor, target)?);

        log::debug!(
            "Prepared hook {} at {target:#x} with shim at {:#x}, moved {} bytes",
            request.name,
            shim.address(),
            stolen.len
        );
        Ok(Self {
            guard: Mutex::new(None),
            name: request.name.to_string(),
            target,
            patch,
            original,
            shim,
            reverse,
        })
    }

    /// Address of the hooked function
    pub fn target(&self) -> usize {
        self.target
    }

    /// Address of the generated shim
    pub fn shim(&self) -> usize {
        self.shim.address()
    }

    /// Address of the reverse wrapper called by the shim
    pub fn reverse_wrapper(&self) -> usize {
        self.reverse.address()
    }
}

impl RawHook for AsmHook {
    fn enable(&self) -> Result<()> {
        let mut guard = self.guard.lock();
        if guard.is_some() {
            return Ok(());
        }
        let patcher = PermissionWrapper::new(BytePatcher::new());
        // Safety: the target is mapped code of the client and the patch covers whole instructions
        *guard = Some(unsafe { patcher.patch(self.target as *mut u8, &self.patch)? });

        log::debug!("Enabled hook {} at {:#x}", self.name, self.target);
        Ok(())
    }

    fn disable(&self) -> Result<()> {
        if let Some(guard) = self.guard.lock().take() {
            drop(guard);
            log::debug!("Disabled hook {} at {:#x}", self.name, self.target);
        }
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        self.guard.lock().is_some()
    }

    fn original(&self) -> Arc<dyn NativeFunction> {
        self.original.clone()
    }
}
