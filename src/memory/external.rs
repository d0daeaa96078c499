//! Memory of another process

use super::{Memory, MemoryError};

/// Accessor for the memory of a foreign process
///
/// Used when the bindings are evaluated from outside of the client, e.g. by the injector.
pub struct ExternalMemory {
    /// Identifier of the process
    pid: u32,
    /// Handle opened for reading and writing
    #[cfg(windows)]
    handle: windows_sys::Win32::Foundation::HANDLE,
    /// Width of pointers inside the process
    pointer_size: usize,
}

// the handle is only used through thread-safe system calls
unsafe impl Send for ExternalMemory {}
unsafe impl Sync for ExternalMemory {}

impl ExternalMemory {
    /// Process identifier this accessor is attached to
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Changes the width of pointers inside the process
    pub fn with_pointer_size(mut self, pointer_size: usize) -> Self {
        self.pointer_size = pointer_size;
        self
    }
}

#[cfg(target_os = "linux")]
impl ExternalMemory {
    /// Attaches to the process `pid`, assuming a 32-bit client
    pub fn open(pid: u32) -> Result<Self, MemoryError> {
        Ok(Self {
            pid,
            pointer_size: 4,
        })
    }

    /// Transfers `len` bytes between `local` and the remote `address`
    fn transfer(
        &self,
        address: usize,
        local: *mut u8,
        len: usize,
        write: bool,
    ) -> std::io::Result<usize> {
        let local = libc::iovec {
            iov_base: local as *mut libc::c_void,
            iov_len: len,
        };
        let remote = libc::iovec {
            iov_base: address as *mut libc::c_void,
            iov_len: len,
        };

        // Safety: both vectors describe exactly `len` bytes, the local one is owned by the caller
        let transferred = unsafe {
            if write {
                libc::process_vm_writev(self.pid as libc::pid_t, &local, 1, &remote, 1, 0)
            } else {
                libc::process_vm_readv(self.pid as libc::pid_t, &local, 1, &remote, 1, 0)
            }
        };
        if transferred < 0 {
            Err(std::io::Error::last_os_error())
        } else {
            Ok(transferred as usize)
        }
    }
}

#[cfg(target_os = "linux")]
impl Memory for ExternalMemory {
    fn read_bytes(&self, address: usize, buffer: &mut [u8]) -> Result<(), MemoryError> {
        let len = buffer.len();
        match self.transfer(address, buffer.as_mut_ptr(), len, false) {
            Ok(read) if read == len => Ok(()),
            Ok(_) => Err(MemoryError::Read { address, len }),
            Err(e) => {
                log::trace!("process_vm_readv at {address:#x} failed: {e}");
                Err(MemoryError::Read { address, len })
            }
        }
    }

    fn write_bytes(&self, address: usize, data: &[u8]) -> Result<(), MemoryError> {
        let len = data.len();
        // process_vm_writev never writes through the local vector
        match self.transfer(address, data.as_ptr() as *mut u8, len, true) {
            Ok(written) if written == len => Ok(()),
            Ok(_) => Err(MemoryError::Write { address, len }),
            Err(e) => {
                log::trace!("process_vm_writev at {address:#x} failed: {e}");
                Err(MemoryError::Write { address, len })
            }
        }
    }

    fn pointer_size(&self) -> usize {
        self.pointer_size
    }
}

#[cfg(windows)]
impl ExternalMemory {
    /// Attaches to the process `pid`, assuming a 32-bit client
    pub fn open(pid: u32) -> Result<Self, MemoryError> {
        use windows_sys::Win32::System::Threading::{
            OpenProcess, PROCESS_QUERY_INFORMATION, PROCESS_VM_OPERATION, PROCESS_VM_READ,
            PROCESS_VM_WRITE,
        };

        let access =
            PROCESS_VM_READ | PROCESS_VM_WRITE | PROCESS_VM_OPERATION | PROCESS_QUERY_INFORMATION;
        // Safety: plain system call, the handle is checked below
        let handle = unsafe { OpenProcess(access, 0, pid) };
        if handle == 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        Ok(Self {
            pid,
            handle,
            pointer_size: 4,
        })
    }
}

#[cfg(windows)]
impl Memory for ExternalMemory {
    fn read_bytes(&self, address: usize, buffer: &mut [u8]) -> Result<(), MemoryError> {
        use windows_sys::Win32::System::Diagnostics::Debug::ReadProcessMemory;

        let len = buffer.len();
        let mut read = 0;
        // Safety: the buffer is valid for `len` bytes
        let ok = unsafe {
            ReadProcessMemory(
                self.handle,
                address as *const _,
                buffer.as_mut_ptr() as *mut _,
                len,
                &mut read,
            )
        };
        if ok == 0 || read != len {
            return Err(MemoryError::Read { address, len });
        }
        Ok(())
    }

    fn write_bytes(&self, address: usize, data: &[u8]) -> Result<(), MemoryError> {
        use windows_sys::Win32::System::Diagnostics::Debug::WriteProcessMemory;

        let len = data.len();
        let mut written = 0;
        // Safety: the buffer is valid for `len` bytes
        let ok = unsafe {
            WriteProcessMemory(
                self.handle,
                address as *const _,
                data.as_ptr() as *const _,
                len,
                &mut written,
            )
        };
        if ok == 0 || written != len {
            return Err(MemoryError::Write { address, len });
        }
        Ok(())
    }

    fn pointer_size(&self) -> usize {
        self.pointer_size
    }
}

#[cfg(not(any(windows, target_os = "linux")))]
impl ExternalMemory {
    /// Cross-process access is not available on this platform
    pub fn open(_pid: u32) -> Result<Self, MemoryError> {
        Err(std::io::Error::from(std::io::ErrorKind::Unsupported).into())
    }
}

#[cfg(not(any(windows, target_os = "linux")))]
impl Memory for ExternalMemory {
    fn read_bytes(&self, address: usize, buffer: &mut [u8]) -> Result<(), MemoryError> {
        Err(MemoryError::Read {
            address,
            len: buffer.len(),
        })
    }

    fn write_bytes(&self, address: usize, data: &[u8]) -> Result<(), MemoryError> {
        Err(MemoryError::Write {
            address,
            len: data.len(),
        })
    }
}

#[cfg(windows)]
impl Drop for ExternalMemory {
    fn drop(&mut self) {
        // Safety: the handle was opened by `open` and is closed exactly once
        unsafe { windows_sys::Win32::Foundation::CloseHandle(self.handle) };
    }
}
