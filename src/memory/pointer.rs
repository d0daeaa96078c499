//! # Pointer
//!
//! Resolution of static pointer chains.
//!
//! The client keeps its manager objects behind global variables which are rebuilt on login and map
//! change. Bindings therefore keep the chain and walk it again on every access.

use std::sync::Arc;

use super::{Memory, MemoryError, MemoryExt};

/// Follows a pointer chain starting at `base`
///
/// Every step adds the offset to the current address and dereferences the result:
/// `address = *(address + offset)`. The last read value is returned.
pub fn follow_offsets(
    memory: &dyn Memory,
    base: usize,
    offsets: &[isize],
) -> Result<usize, MemoryError> {
    offsets
        .iter()
        .enumerate()
        .try_fold(base, |address, (step, &offset)| {
            let address = memory.read_pointer(address.wrapping_add_signed(offset))?;
            if address == 0 {
                return Err(MemoryError::NullPointer { base, step });
            }
            Ok(address)
        })
}

/// A pointer chain anchored at a static address inside the module
#[derive(Clone)]
pub struct StaticPointer {
    /// Memory the chain is walked in
    memory: Arc<dyn Memory>,
    /// Address the chain starts at
    static_address: usize,
    /// Offsets applied before each dereference
    offsets: Vec<isize>,
}

impl StaticPointer {
    /// Creates a new chain
    pub fn new(memory: Arc<dyn Memory>, static_address: usize, offsets: Vec<isize>) -> Self {
        Self {
            memory,
            static_address,
            offsets,
        }
    }

    /// Returns a chain which dereferences `offset` once more at the end
    pub fn then(&self, offset: isize) -> Self {
        let mut offsets = self.offsets.clone();
        offsets.push(offset);
        Self::new(self.memory.clone(), self.static_address, offsets)
    }

    /// Address the chain starts at
    pub fn static_address(&self) -> usize {
        self.static_address
    }

    /// Walks the chain
    pub fn resolve(&self) -> Result<usize, MemoryError> {
        follow_offsets(self.memory.as_ref(), self.static_address, &self.offsets)
    }
}

impl std::fmt::Debug for StaticPointer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticPointer")
            .field("static_address", &format_args!("{:#x}", self.static_address))
            .field("offsets", &self.offsets)
            .finish()
    }
}
