//! Memory image backed by a byte buffer

use parking_lot::RwLock;

use super::{Memory, MemoryError};

/// Synthetic memory that maps a byte buffer at a base address
///
/// Used for snapshots of the client and for testing bindings without a live process.
pub struct BufferMemory {
    /// Address of the first byte of `data`
    base: usize,
    /// Contents of the image
    data: RwLock<Vec<u8>>,
    /// Width of pointers inside the image
    pointer_size: usize,
}

impl BufferMemory {
    /// Maps `data` at `base` with 32-bit pointers
    pub fn new(base: usize, data: Vec<u8>) -> Self {
        Self {
            base,
            data: RwLock::new(data),
            pointer_size: 4,
        }
    }

    /// Changes the width of pointers inside the image
    pub fn with_pointer_size(mut self, pointer_size: usize) -> Self {
        self.pointer_size = pointer_size;
        self
    }

    /// Address of the first byte of the image
    pub fn base(&self) -> usize {
        self.base
    }

    /// Length of the image
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Whether the image contains no bytes
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Translates an address range to a range inside `data`
    fn range(&self, address: usize, len: usize, size: usize) -> Option<std::ops::Range<usize>> {
        let start = address.checked_sub(self.base)?;
        let end = start.checked_add(len)?;
        (end <= size).then_some(start..end)
    }
}

impl Memory for BufferMemory {
    fn read_bytes(&self, address: usize, buffer: &mut [u8]) -> Result<(), MemoryError> {
        let data = self.data.read();
        let range = self
            .range(address, buffer.len(), data.len())
            .ok_or(MemoryError::Read {
                address,
                len: buffer.len(),
            })?;
        buffer.copy_from_slice(&data[range]);
        Ok(())
    }

    fn write_bytes(&self, address: usize, bytes: &[u8]) -> Result<(), MemoryError> {
        let mut data = self.data.write();
        let size = data.len();
        let range = self
            .range(address, bytes.len(), size)
            .ok_or(MemoryError::Write {
                address,
                len: bytes.len(),
            })?;
        data[range].copy_from_slice(bytes);
        Ok(())
    }

    fn pointer_size(&self) -> usize {
        self.pointer_size
    }
}
