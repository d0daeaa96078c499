//! Memory of the current process

use std::ptr;

use region::Protection;

use super::{Memory, MemoryError};

/// Accessor for the memory of the process the crate is loaded into
///
/// Every range is validated through [`region::query_range`] before it is touched, so walking a stale
/// pointer chain yields an error instead of an access violation.
#[derive(Default, Clone, Copy)]
pub struct LocalMemory;

impl LocalMemory {
    /// Creates a new accessor
    pub fn new() -> Self {
        Self
    }

    /// Checks that every page of the range is committed and has `protection`
    ///
    /// The queried regions have to cover the whole range without gaps; unmapped pages are not
    /// reported as regions at all.
    fn is_accessible(address: usize, len: usize, protection: Protection) -> bool {
        let end = match address.checked_add(len) {
            Some(end) if address != 0 => end,
            _ => return false,
        };
        let regions = match region::query_range(address as *const u8, len) {
            Ok(regions) => regions,
            Err(_) => return false,
        };

        let mut covered = address;
        for region in regions {
            let region = match region {
                Ok(region) => region,
                Err(_) => return false,
            };
            let start = region.as_ptr::<u8>() as usize;
            if start > covered || region.is_guarded() || !region.protection().contains(protection) {
                return false;
            }
            covered = covered.max(start + region.len());
            if covered >= end {
                return true;
            }
        }
        false
    }
}

impl Memory for LocalMemory {
    fn read_bytes(&self, address: usize, buffer: &mut [u8]) -> Result<(), MemoryError> {
        if buffer.is_empty() {
            return Ok(());
        }
        if !Self::is_accessible(address, buffer.len(), Protection::READ) {
            return Err(MemoryError::Read {
                address,
                len: buffer.len(),
            });
        }

        // Safety: the whole range was verified to be readable
        unsafe { ptr::copy(address as *const u8, buffer.as_mut_ptr(), buffer.len()) };
        Ok(())
    }

    fn write_bytes(&self, address: usize, data: &[u8]) -> Result<(), MemoryError> {
        if data.is_empty() {
            return Ok(());
        }
        let error = || MemoryError::Write {
            address,
            len: data.len(),
        };
        if !Self::is_accessible(address, data.len(), Protection::READ) {
            return Err(error());
        }

        // the handle restores the previous protection when dropped
        let _guard = unsafe {
            region::protect_with_handle(
                address as *const u8,
                data.len(),
                Protection::READ_WRITE_EXECUTE,
            )
        }
        .map_err(|_| error())?;

        // Safety: the range is mapped and was just made writable
        unsafe { ptr::copy(data.as_ptr(), address as *mut u8, data.len()) };
        Ok(())
    }
}
