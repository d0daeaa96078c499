//! # Convention
//!
//! Description of the calling conventions used by the client.
//!
//! The client is compiled with a Delphi style `register` convention: the first arguments travel in
//! `eax`, `edx`, `ecx`, the rest is pushed on the stack and the callee removes it. The generated
//! code is driven entirely by a [`FunctionDescriptor`], so other conventions (`stdcall`, `cdecl`,
//! `fastcall`) are expressed the same way.
//!
//! ## Standardized calling convention
//!
//! Rust sees every native function as `extern "C" fn(args: *const usize) -> usize`, where `args`
//! points to the arguments in parameter order, register arguments first.

use iced_x86::code_asm::{eax, ebp, ebx, ecx, edi, edx, esi, esp, AsmRegister32};
use serde::{Deserialize, Serialize};

use crate::error::{BindingError, Result};

/// General purpose registers of 32-bit x86
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Register {
    /// Accumulator
    Eax,
    /// Base
    Ebx,
    /// Counter
    Ecx,
    /// Data
    Edx,
    /// Source index
    Esi,
    /// Destination index
    Edi,
    /// Frame pointer
    Ebp,
    /// Stack pointer
    Esp,
}

impl Register {
    /// Registers that can carry arguments
    pub const ARGUMENT_CAPABLE: [Register; 6] = [
        Register::Eax,
        Register::Ebx,
        Register::Ecx,
        Register::Edx,
        Register::Esi,
        Register::Edi,
    ];

    /// Assembler operand of the register
    pub fn asm(self) -> AsmRegister32 {
        match self {
            Register::Eax => eax,
            Register::Ebx => ebx,
            Register::Ecx => ecx,
            Register::Edx => edx,
            Register::Esi => esi,
            Register::Edi => edi,
            Register::Ebp => ebp,
            Register::Esp => esp,
        }
    }
}

/// Side responsible for removing stack arguments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StackCleanup {
    /// The called function removes its arguments (`ret imm16`)
    Callee,
    /// The caller removes the arguments after the call returns
    Caller,
}

/// Calling convention and arity of a native function
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FunctionDescriptor {
    /// Registers carrying the leading arguments, in parameter order
    pub registers: &'static [Register],
    /// Total amount of parameters, register and stack
    pub parameters: usize,
    /// Register holding the return value
    pub return_register: Register,
    /// Side removing the stack arguments
    pub cleanup: StackCleanup,
    /// Registers the native code may change without restoring them
    pub clobbers: &'static [Register],
}

impl FunctionDescriptor {
    /// Registers the client's compiler may clobber
    pub const DELPHI_CLOBBERS: &'static [Register] = &[Register::Eax, Register::Ecx, Register::Edx];

    /// Describes a Delphi `register` function
    pub const fn register(registers: &'static [Register], parameters: usize) -> Self {
        Self {
            registers,
            parameters,
            return_register: Register::Eax,
            cleanup: StackCleanup::Callee,
            clobbers: Self::DELPHI_CLOBBERS,
        }
    }

    /// Describes a `stdcall` function
    pub const fn stdcall(parameters: usize) -> Self {
        Self {
            registers: &[],
            parameters,
            return_register: Register::Eax,
            cleanup: StackCleanup::Callee,
            clobbers: Self::DELPHI_CLOBBERS,
        }
    }

    /// Describes a `cdecl` function
    pub const fn cdecl(parameters: usize) -> Self {
        Self {
            registers: &[],
            parameters,
            return_register: Register::Eax,
            cleanup: StackCleanup::Caller,
            clobbers: Self::DELPHI_CLOBBERS,
        }
    }

    /// Amount of arguments passed on the stack
    pub fn stack_arguments(&self) -> usize {
        self.parameters.saturating_sub(self.registers.len())
    }

    /// Bytes removed by the callee on return
    pub fn callee_cleanup_bytes(&self) -> usize {
        match self.cleanup {
            StackCleanup::Callee => self.stack_arguments() * 4,
            StackCleanup::Caller => 0,
        }
    }

    /// Whether `register` is saved by neither side, i.e. may be changed freely
    pub fn clobbers(&self, register: Register) -> bool {
        self.clobbers.contains(&register)
    }

    /// Checks that the descriptor can be expressed in generated code
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| Err(BindingError::InvalidDescriptor(reason));

        if self.registers.len() > self.parameters {
            return invalid(format!(
                "{} register arguments for {} parameters",
                self.registers.len(),
                self.parameters
            ));
        }
        if self.registers.len() >= Register::ARGUMENT_CAPABLE.len() {
            return invalid("no scratch register is left for the generated code".to_string());
        }
        for (i, register) in self.registers.iter().enumerate() {
            if !Register::ARGUMENT_CAPABLE.contains(register) {
                return invalid(format!("{register:?} cannot carry an argument"));
            }
            if self.registers[..i].contains(register) {
                return invalid(format!("{register:?} is used twice"));
            }
        }
        if self.return_register == Register::Esp || self.return_register == Register::Ebp {
            return invalid(format!("{:?} cannot hold a return value", self.return_register));
        }
        if self.callee_cleanup_bytes() > u16::MAX as usize {
            return invalid(format!("{} stack arguments", self.stack_arguments()));
        }
        Ok(())
    }
}
