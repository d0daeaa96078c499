//! This module contains a byte patcher

use std::convert::Infallible;
use std::ptr;

use super::{PatchGuard, Patcher};

/// Patcher for patching memory locations with byte arrays.
/// This patcher never fails.
#[derive(Default, Clone, Copy)]
pub struct BytePatcher;
impl BytePatcher {
    /// Creates a new [`BytePatcher`]
    pub fn new() -> Self {
        Self
    }
}
unsafe impl Patcher for BytePatcher {
    type Error = Infallible;
    type Guard = BytePatchGuard;

    unsafe fn patch(&self, location: *mut u8, patch: &[u8]) -> Result<Self::Guard, Self::Error> {
        Ok(BytePatchGuard::patch(location, patch))
    }
}
/// Guard for byte-patches
///
/// See [`BytePatcher`].
pub struct BytePatchGuard {
    /// Original data from `location`
    original: Vec<u8>,
    /// Location of the patch
    location: *mut u8,
}
impl BytePatchGuard {
    /// Patches a location, returning a guard for unpatching
    ///
    /// # Safety
    ///
    /// `location` must be valid for reads and writes of `patch.len()` bytes
    unsafe fn patch(location: *mut u8, patch: &[u8]) -> Self {
        let mut original = vec![0; patch.len()];
        ptr::copy(location, original.as_mut_ptr(), patch.len());

        let guard = Self { original, location };
        ptr::copy(patch.as_ptr(), location, patch.len());

        guard
    }

    /// Bytes that were located at the patch before it was applied
    pub fn original(&self) -> &[u8] {
        &self.original
    }
}
// the location is owned by the client, not by the thread that created the guard
unsafe impl Send for BytePatchGuard {}
unsafe impl PatchGuard for BytePatchGuard {}
impl Drop for BytePatchGuard {
    fn drop(&mut self) {
        // Safety: creator must pass in a `location` pointer that is valid and writable for the full length of the patch
        unsafe {
            ptr::copy(self.original.as_ptr(), self.location, self.original.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::patcher::byte::BytePatcher;
    use crate::patcher::{PatchGuard, Patcher};

    #[test]
    /// Test patch and revert functionality
    fn test_patch() {
        let mut data = vec![1u8, 2, 3, 4];
        let ptr = data.as_mut_ptr();

        // get our patcher to test
        let patcher = BytePatcher::new();

        // patch the vec's data
        let patch = unsafe { patcher.patch(ptr, &[4, 3, 2, 1]).unwrap() };
        assert_eq!(patch.original(), [1, 2, 3, 4]);

        // make sure the data was actually changed
        assert_eq!(unsafe { std::slice::from_raw_parts(ptr, 4) }, [4, 3, 2, 1]);

        // restore the patch
        patch.restore();

        // make sure the patch was restored
        assert_eq!(data, [1, 2, 3, 4]);
    }

    #[test]
    /// Tests a partial patch of a block to ensure we're not overwriting outside the patch area
    fn test_partial_patch() {
        let mut data = vec![0x55u8, 0x8b, 0xec, 0x83, 0xc4, 0xec, 0x53];
        let ptr = data.as_mut_ptr();
        let patcher = BytePatcher::new();

        // a jump over the first five bytes, padded with a nop
        let patch = unsafe {
            patcher
                .patch(ptr.add(1), &[0xe9, 0, 0, 0, 0, 0x90])
                .unwrap()
        };
        assert_eq!(
            unsafe { std::slice::from_raw_parts(ptr, 7) },
            [0x55, 0xe9, 0, 0, 0, 0, 0x90]
        );

        drop(patch);
        assert_eq!(data, [0x55, 0x8b, 0xec, 0x83, 0xc4, 0xec, 0x53]);
    }
}
