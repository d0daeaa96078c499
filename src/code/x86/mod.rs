//! # x86
//!
//! Helpers for 32-bit x86 machine code: jump encoding and moving function prologues

use iced_x86::{Decoder, DecoderOptions, FlowControl, Instruction};

use crate::error::{BindingError, Result};

/// Bitness of the client
pub const BITNESS: u32 = 32;

/// Length of a `jmp rel32`
pub const JMP_LEN: usize = 5;

/// Longest possible x86 instruction
pub const MAX_INSTRUCTION_LEN: usize = 15;

/// Encodes a `jmp rel32` located at `from` which jumps to `to`
pub fn jmp_rel32(from: usize, to: usize) -> Result<[u8; JMP_LEN]> {
    let relative = to as i64 - (from as i64 + JMP_LEN as i64);
    let relative = i32::try_from(relative).map_err(|_| BindingError::Relocation {
        address: from,
        reason: format!("{to:#x} is out of reach of a relative jump"),
    })?;

    let mut jmp = [0xe9, 0, 0, 0, 0];
    jmp[1..].copy_from_slice(&relative.to_le_bytes());
    Ok(jmp)
}

/// Builds the bytes written over a function entry: a jump padded with `nop`s to `len`
pub fn entry_patch(from: usize, to: usize, len: usize) -> Result<Vec<u8>> {
    let mut patch = jmp_rel32(from, to)?.to_vec();
    patch.resize(len.max(JMP_LEN), 0x90);
    Ok(patch)
}

/// Whole instructions taken from the start of a function
#[derive(Debug, Clone)]
pub struct StolenCode {
    /// Decoded instructions, still carrying their original addresses
    pub instructions: Vec<Instruction>,
    /// Amount of bytes the instructions cover
    pub len: usize,
}

/// Decodes whole instructions from `code` (located at `ip`) until at least `min_len` bytes are covered
///
/// The instructions keep their original addresses so that the assembler can fix up relative
/// branches when they are emitted elsewhere.
pub fn steal(code: &[u8], ip: usize, min_len: usize) -> Result<StolenCode> {
    let error = |reason: &str| BindingError::Relocation {
        address: ip,
        reason: reason.to_string(),
    };
    let mut decoder = Decoder::with_ip(BITNESS, code, ip as u64, DecoderOptions::NONE);
    let mut instructions = Vec::new();
    let mut len = 0;

    while len < min_len {
        if !decoder.can_decode() {
            return Err(error("the function ends before the jump fits"));
        }
        let instruction = decoder.decode();
        if instruction.is_invalid() {
            return Err(error("invalid instruction in the prologue"));
        }
        len += instruction.len();

        let leaves = matches!(
            instruction.flow_control(),
            FlowControl::Return
                | FlowControl::UnconditionalBranch
                | FlowControl::IndirectBranch
                | FlowControl::Interrupt
        );
        if leaves && len < min_len {
            return Err(error("the function is too short to be hooked"));
        }
        instructions.push(instruction);
    }

    Ok(StolenCode { instructions, len })
}

#[cfg(test)]
mod tests {
    use iced_x86::Mnemonic;

    use crate::code::x86::{entry_patch, jmp_rel32, steal, JMP_LEN};

    #[test]
    /// Relative jumps are computed from the end of the instruction
    fn test_jmp_rel32() {
        assert_eq!(jmp_rel32(0x1000, 0x1005).unwrap(), [0xe9, 0, 0, 0, 0]);
        assert_eq!(jmp_rel32(0x1000, 0x2000).unwrap(), [0xe9, 0xfb, 0x0f, 0, 0]);
        // backwards
        assert_eq!(jmp_rel32(0x2000, 0x1000).unwrap(), [0xe9, 0xfb, 0xef, 0xff, 0xff]);
    }

    #[test]
    /// Entry patches are padded to whole instructions
    fn test_entry_patch() {
        let patch = entry_patch(0x1000, 0x1005, 7).unwrap();
        assert_eq!(patch, [0xe9, 0, 0, 0, 0, 0x90, 0x90]);
        assert_eq!(entry_patch(0x1000, 0x1005, 2).unwrap().len(), JMP_LEN);
    }

    #[test]
    /// Only whole instructions are taken
    fn test_steal_prologue() {
        // push ebp; mov ebp, esp; add esp, -0x14; push ebx; push esi
        let code = [0x55, 0x8b, 0xec, 0x83, 0xc4, 0xec, 0x53, 0x56];
        let stolen = steal(&code, 0x401000, JMP_LEN).unwrap();

        assert_eq!(stolen.len, 6);
        let mnemonics: Vec<_> = stolen.instructions.iter().map(|i| i.mnemonic()).collect();
        assert_eq!(mnemonics, [Mnemonic::Push, Mnemonic::Mov, Mnemonic::Add]);
    }

    #[test]
    /// Functions which return before the jump fits are rejected
    fn test_steal_too_short() {
        // xor eax, eax; ret; int3...
        let code = [0x33, 0xc0, 0xc3, 0xcc, 0xcc, 0xcc];
        assert!(steal(&code, 0x401000, JMP_LEN).is_err());

        // not enough bytes
        assert!(steal(&[0x55, 0x8b, 0xec], 0x401000, JMP_LEN).is_err());
    }
}
