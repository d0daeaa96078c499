//! Location of the client module inside memory

use super::{Memory, MemoryError, MemoryExt};

/// Offset of `e_lfanew` inside the DOS header
const DOS_LFANEW: usize = 0x3c;
/// Offset of `SizeOfImage` from the NT header (signature, file header and 56 bytes of optional header)
const NT_SIZE_OF_IMAGE: usize = 0x50;
/// `PE\0\0`
const PE_SIGNATURE: u32 = 0x0000_4550;

/// Base address and size of the main module of the client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleInfo {
    /// Address the module is loaded at
    pub base: usize,
    /// Size of the mapped image
    pub size: usize,
}

impl ModuleInfo {
    /// Creates a module description from known values
    pub fn new(base: usize, size: usize) -> Self {
        Self { base, size }
    }

    /// Reads the size of the image from the PE header located at `base`
    pub fn from_pe_header(memory: &dyn Memory, base: usize) -> Result<Self, MemoryError> {
        if memory.read_u16(base)? != u16::from_le_bytes(*b"MZ") {
            return Err(MemoryError::InvalidImage(base));
        }
        let nt = base + memory.read_u32(base + DOS_LFANEW)? as usize;
        if memory.read_u32(nt)? != PE_SIGNATURE {
            return Err(MemoryError::InvalidImage(base));
        }
        let size = memory.read_u32(nt + NT_SIZE_OF_IMAGE)? as usize;

        Ok(Self { base, size })
    }

    /// Describes the main module of the current process
    #[cfg(windows)]
    pub fn current() -> Result<Self, MemoryError> {
        use windows_sys::Win32::System::LibraryLoader::GetModuleHandleW;

        // Safety: a null name returns the handle of the executable
        let base = unsafe { GetModuleHandleW(std::ptr::null()) } as usize;
        if base == 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        Self::from_pe_header(&super::LocalMemory::new(), base)
    }

    /// Whether `address` lies inside the module
    pub fn contains(&self, address: usize) -> bool {
        (self.base..self.base + self.size).contains(&address)
    }
}
