//! # Memory
//!
//! Read and write access to the memory of the hosted client.
//!
//! The client is usually the current process, but every consumer goes through [`Memory`] so that the
//! same bindings work against another process or a synthetic image.

use std::mem;

use thiserror::Error;

pub mod buffer;
pub mod external;
pub mod local;
pub mod module;
pub mod pointer;

pub use buffer::BufferMemory;
pub use external::ExternalMemory;
pub use local::LocalMemory;
pub use module::ModuleInfo;
pub use pointer::{follow_offsets, StaticPointer};

/// Errors while accessing memory
#[derive(Debug, Error)]
pub enum MemoryError {
    /// The range could not be read
    #[error("Could not read {len} bytes at {address:#x}")]
    Read {
        /// Start of the range
        address: usize,
        /// Length of the range
        len: usize,
    },
    /// The range could not be written
    #[error("Could not write {len} bytes at {address:#x}")]
    Write {
        /// Start of the range
        address: usize,
        /// Length of the range
        len: usize,
    },
    /// A pointer chain hit a null pointer
    #[error("Null pointer found at step {step} of a pointer chain starting at {base:#x}")]
    NullPointer {
        /// Start of the chain
        base: usize,
        /// Index of the offset whose read returned null
        step: usize,
    },
    /// The module image does not carry a valid header
    #[error("No valid module image at {0:#x}")]
    InvalidImage(usize),
    /// Error from the operating system
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Accessor for the memory of the hosted client
pub trait Memory: Send + Sync {
    /// Fills `buffer` with the bytes located at `address`
    fn read_bytes(&self, address: usize, buffer: &mut [u8]) -> Result<(), MemoryError>;

    /// Writes `data` to `address`
    fn write_bytes(&self, address: usize, data: &[u8]) -> Result<(), MemoryError>;

    /// Width of a pointer inside the accessed memory
    fn pointer_size(&self) -> usize {
        mem::size_of::<usize>()
    }
}

/// Typed helpers for every [`Memory`]
pub trait MemoryExt: Memory {
    /// Reads `len` bytes into a new vector
    fn read_vec(&self, address: usize, len: usize) -> Result<Vec<u8>, MemoryError> {
        let mut buffer = vec![0; len];
        self.read_bytes(address, &mut buffer)?;
        Ok(buffer)
    }

    /// Reads a single byte
    fn read_u8(&self, address: usize) -> Result<u8, MemoryError> {
        let mut buffer = [0; 1];
        self.read_bytes(address, &mut buffer)?;
        Ok(buffer[0])
    }

    /// Reads a little endian `u16`
    fn read_u16(&self, address: usize) -> Result<u16, MemoryError> {
        let mut buffer = [0; 2];
        self.read_bytes(address, &mut buffer)?;
        Ok(u16::from_le_bytes(buffer))
    }

    /// Reads a little endian `u32`
    fn read_u32(&self, address: usize) -> Result<u32, MemoryError> {
        let mut buffer = [0; 4];
        self.read_bytes(address, &mut buffer)?;
        Ok(u32::from_le_bytes(buffer))
    }

    /// Reads a little endian `i32`
    fn read_i32(&self, address: usize) -> Result<i32, MemoryError> {
        self.read_u32(address).map(|value| value as i32)
    }

    /// Reads a pointer-sized value
    fn read_pointer(&self, address: usize) -> Result<usize, MemoryError> {
        let mut buffer = [0; 8];
        let size = self.pointer_size().min(buffer.len());
        self.read_bytes(address, &mut buffer[..size])?;
        Ok(u64::from_le_bytes(buffer) as usize)
    }

    /// Reads a null terminated string, stopping after `max_len` bytes
    fn read_c_string(&self, address: usize, max_len: usize) -> Result<String, MemoryError> {
        let mut bytes = Vec::new();
        let mut chunk = [0u8; 64];
        while bytes.len() < max_len {
            let len = chunk.len().min(max_len - bytes.len());
            // read byte by byte when a chunk would cross into unreadable memory
            if self.read_bytes(address + bytes.len(), &mut chunk[..len]).is_err() {
                let byte = self.read_u8(address + bytes.len())?;
                if byte == 0 {
                    break;
                }
                bytes.push(byte);
                continue;
            }
            match chunk[..len].iter().position(|&b| b == 0) {
                Some(end) => {
                    bytes.extend_from_slice(&chunk[..end]);
                    break;
                }
                None => bytes.extend_from_slice(&chunk[..len]),
            }
        }
        Ok(bytes.iter().map(|&b| b as char).collect())
    }

    /// Writes a little endian `u32`
    fn write_u32(&self, address: usize, value: u32) -> Result<(), MemoryError> {
        self.write_bytes(address, &value.to_le_bytes())
    }

    /// Writes a pointer-sized value
    fn write_pointer(&self, address: usize, value: usize) -> Result<(), MemoryError> {
        let bytes = (value as u64).to_le_bytes();
        let size = self.pointer_size().min(bytes.len());
        self.write_bytes(address, &bytes[..size])
    }
}

impl<M: Memory + ?Sized> MemoryExt for M {}

#[cfg(test)]
mod tests {
    use crate::memory::{BufferMemory, MemoryExt};

    #[test]
    /// Typed reads decode little endian values
    fn test_typed_reads() {
        let memory = BufferMemory::new(0x1000, vec![0x78, 0x56, 0x34, 0x12, 0xff, 0xff]);

        assert_eq!(memory.read_u8(0x1000).unwrap(), 0x78);
        assert_eq!(memory.read_u16(0x1000).unwrap(), 0x5678);
        assert_eq!(memory.read_u32(0x1000).unwrap(), 0x1234_5678);
        assert_eq!(memory.read_pointer(0x1000).unwrap(), 0x1234_5678);
        assert_eq!(memory.read_u16(0x1004).unwrap(), 0xffff);

        // reading past the image fails
        assert!(memory.read_u32(0x1004).is_err());
    }

    #[test]
    /// C strings stop at the terminator, even close to the end of readable memory
    fn test_read_c_string() {
        let mut data = b"say hello".to_vec();
        data.push(0);
        data.extend_from_slice(b"ignored");
        let memory = BufferMemory::new(0x2000, data);

        assert_eq!(memory.read_c_string(0x2000, 256).unwrap(), "say hello");
        assert_eq!(memory.read_c_string(0x2004, 256).unwrap(), "hello");
        assert_eq!(memory.read_c_string(0x2000, 3).unwrap(), "say");
    }

    #[test]
    /// Writes are visible to later reads
    fn test_write() {
        let memory = BufferMemory::new(0x3000, vec![0; 8]);

        memory.write_u32(0x3004, 0xdead_beef).unwrap();
        assert_eq!(memory.read_u32(0x3004).unwrap(), 0xdead_beef);

        memory.write_pointer(0x3000, 0x1234).unwrap();
        assert_eq!(memory.read_pointer(0x3000).unwrap(), 0x1234);
    }
}
