//! # Alloc
//!
//! Executable memory for generated code.
//!
//! Pages are allocated read-, write- and executable and carved into slices by a [`SlicePool`], so
//! that the many small wrappers of a hook share pages. A relative jump reaches the whole 32-bit
//! address space, so allocations need no proximity to their targets.

use std::ops::{Deref, DerefMut};
use std::slice;

use lazy_static::lazy_static;
use parking_lot::Mutex;
use region::Protection;
use slice_pool::sync::{SliceBox, SlicePool};

use crate::error::{BindingError, Result};

/// Smallest amount of memory reserved for a new pool
pub const POOL_SIZE: usize = 0x1000;

/// Extra room reserved when code is assembled, relocated branches may grow once the address is known
const SLACK: usize = 32;

/// A thread-safe set of pools for executable allocations
pub struct ThreadAllocator(Mutex<Vec<SlicePool<u8>>>);

impl ThreadAllocator {
    /// Creates an allocator without any pools
    pub fn new() -> Self {
        ThreadAllocator(Mutex::new(Vec::new()))
    }

    /// Allocates `size` bytes of read-, write- & executable memory
    pub fn allocate(&self, size: usize) -> Result<ExecutableMemory> {
        let mut pools = self.0.lock();

        // Check if an existing pool can handle the allocation request
        if let Some(data) = pools.iter_mut().find_map(|pool| pool.alloc(size)) {
            return Ok(ExecutableMemory { data });
        }

        // ... otherwise map a new pool
        let region = region::alloc(size.max(POOL_SIZE), Protection::READ_WRITE_EXECUTE)?;
        log::trace!(
            "Mapped {:#x} bytes of executable memory at {:p}",
            region.len(),
            region.as_ptr::<u8>()
        );
        let pool = SlicePool::new(SliceableRegion(region));
        let data = pool.alloc(size).ok_or(BindingError::OutOfMemory(size))?;
        pools.push(pool);

        Ok(ExecutableMemory { data })
    }
}

impl Default for ThreadAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// A handle for allocated executable memory, returned to its pool when dropped
pub struct ExecutableMemory {
    /// Actual allocation where the executable code resides
    data: SliceBox<u8>,
}

impl ExecutableMemory {
    /// Address of the first byte
    pub fn address(&self) -> usize {
        self.data.as_ptr() as usize
    }

    /// Copies `code` to the start of the allocation
    pub fn write(&mut self, code: &[u8]) -> Result<()> {
        if code.len() > self.data.len() {
            return Err(BindingError::OutOfMemory(code.len()));
        }
        self.data[..code.len()].copy_from_slice(code);
        Ok(())
    }
}

// generated code is only written before it is published to other threads
unsafe impl Send for ExecutableMemory {}
unsafe impl Sync for ExecutableMemory {}

impl Deref for ExecutableMemory {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.data.deref()
    }
}

impl DerefMut for ExecutableMemory {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.data.deref_mut()
    }
}

/// A wrapper for making a region allocation compatible with `SlicePool`.
struct SliceableRegion(region::Allocation);

impl AsRef<[u8]> for SliceableRegion {
    fn as_ref(&self) -> &[u8] {
        // Safety: the allocation is mapped for its whole length while we own it
        unsafe { slice::from_raw_parts(self.0.as_ptr(), self.0.len()) }
    }
}

impl AsMut<[u8]> for SliceableRegion {
    fn as_mut(&mut self) -> &mut [u8] {
        // Safety: the allocation is mapped for its whole length while we own it
        unsafe { slice::from_raw_parts_mut(self.0.as_mut_ptr(), self.0.len()) }
    }
}

unsafe impl Send for SliceableRegion {}
unsafe impl Sync for SliceableRegion {}

lazy_static! {
    static ref POOL: ThreadAllocator = ThreadAllocator::new();
}

/// Allocates an executable buffer
///
/// Note: When the executable buffer returns, the buffer's data is undefined, but valid u8 values
pub fn allocate_executable(size: usize) -> Result<ExecutableMemory> {
    POOL.allocate(size)
}

/// Assembles code into executable memory
///
/// `generate` receives the address the code will live at; it is called once to measure the code and
/// once more with the final address.
pub fn emit(generate: impl Fn(usize) -> Result<Vec<u8>>) -> Result<ExecutableMemory> {
    let estimate = generate(0)?.len();
    let mut memory = allocate_executable(estimate + SLACK)?;
    let code = generate(memory.address())?;
    memory.write(&code)?;
    Ok(memory)
}

#[cfg(test)]
mod tests {
    use crate::alloc::{allocate_executable, emit, ThreadAllocator};

    #[test]
    /// Allocations are writable and don't overlap
    fn test_allocate() {
        let allocator = ThreadAllocator::new();
        let mut first = allocator.allocate(16).unwrap();
        let mut second = allocator.allocate(16).unwrap();

        first.write(&[0xc3; 16]).unwrap();
        second.write(&[0x90; 16]).unwrap();
        assert_eq!(&first[..], &[0xc3; 16]);
        assert_eq!(&second[..], &[0x90; 16]);
        assert!(
            first.address() + 16 <= second.address() || second.address() + 16 <= first.address()
        );

        // code larger than the allocation is refused
        assert!(first.write(&[0; 17]).is_err());
    }

    #[test]
    /// Allocations larger than a pool get a pool of their own
    fn test_large_allocation() {
        let memory = allocate_executable(0x3000).unwrap();
        assert!(memory.len() >= 0x3000);
    }

    #[test]
    /// Emitted code is generated for its final address
    fn test_emit() {
        let memory = emit(|ip| Ok((ip as u32).to_le_bytes().to_vec())).unwrap();
        assert_eq!(&memory[..4], &(memory.address() as u32).to_le_bytes());
    }
}
