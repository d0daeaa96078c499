//! This module contains a patcher which adjusts memory permissions to patch read-only code

use region::Protection;

use crate::error::BindingError;

use super::{PatchGuard, Patcher};

/// This struct wraps patchers to allow them to write to memory that's normally unwritable.
/// It achieves this result by changing the memory permissions of the target memory, triggering the patch, and then reverting the permissions.
///
/// # Safety
///
/// `PermissionWrapper` relies on the size of the patch value to determine how many pages to change write permissions,
/// pairing `PermissionWrapper` with a patcher that writes more memory than the size of the patch is undefined behavior.
///
/// The `*mut u8` **MUST** be memory not tracked by Rust, such as the code section of the client.
#[derive(Default, Clone, Copy)]
pub struct PermissionWrapper<P: Patcher> {
    /// Underlying patcher.
    patcher: P,
}
impl<P: Patcher> PermissionWrapper<P> {
    /// Creates a new PermissionWrapper
    pub fn new(patcher: P) -> Self {
        Self { patcher }
    }
}

unsafe impl<P> Patcher for PermissionWrapper<P>
where
    P: Patcher,
    BindingError: From<P::Error>,
{
    type Error = BindingError;
    type Guard = PermissionWrapperGuard<P::Guard>;

    unsafe fn patch(&self, location: *mut u8, patch: &[u8]) -> Result<Self::Guard, Self::Error> {
        let _handle =
            region::protect_with_handle(location, patch.len(), Protection::READ_WRITE_EXECUTE)?;
        let guard = self.patcher.patch(location, patch)?;
        Ok(PermissionWrapperGuard::guard(guard, location, patch.len()))
    }
}

/// Permission guard for the underlying patch guard
pub struct PermissionWrapperGuard<G: PatchGuard> {
    /// Underlying patch guard for the wrapped patcher. `Option` so that we can drop it in our [`Drop::drop`] impl
    guard: Option<G>,
    /// Location of the patch
    location: *const u8,
    /// Length of the patch
    len: usize,
}
impl<G: PatchGuard> PermissionWrapperGuard<G> {
    /// Wrap a patcher's guard. When this guard is dropped, the underlying guard will also be dropped with its target location made writable
    fn guard(guard: G, location: *const u8, len: usize) -> Self {
        Self {
            guard: Some(guard),
            location,
            len,
        }
    }
}
// the location is owned by the client, not by the thread that created the guard
unsafe impl<G: PatchGuard> Send for PermissionWrapperGuard<G> {}
unsafe impl<G: PatchGuard> PatchGuard for PermissionWrapperGuard<G> {}

impl<G: PatchGuard> Drop for PermissionWrapperGuard<G> {
    fn drop(&mut self) {
        // Safety: the permissions were already changed once to apply the patch
        let handle = unsafe {
            region::protect_with_handle(self.location, self.len, Protection::READ_WRITE_EXECUTE)
        };
        match (handle, self.guard.take()) {
            (Ok(_handle), Some(guard)) => guard.restore(),
            (Err(e), Some(guard)) => {
                log::error!("Could not unprotect {:p} to restore a patch: {e}", self.location);
                // restoring without write access would fault
                std::mem::forget(guard);
            }
            (_, None) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use region::Protection;

    use crate::patcher::byte::BytePatcher;
    use crate::patcher::mem::PermissionWrapper;
    use crate::patcher::{PatchGuard, Patcher};

    #[test]
    /// Tests to ensure permissions are set and reverted
    fn test_perms() {
        // map a read-executable page the way the code section of the client is mapped
        let mut allocation = region::alloc(0x1000, Protection::READ_WRITE).unwrap();
        let ptr = allocation.as_mut_ptr::<u8>();
        unsafe {
            ptr.copy_from([0x53u8, 0x56, 0x8b, 0xf2].as_ptr(), 4);
            region::protect(ptr, 0x1000, Protection::READ_EXECUTE).unwrap();
        }

        // sanity check
        let protection = region::query(ptr).unwrap().protection();
        assert_eq!(protection, Protection::READ_EXECUTE);

        // create the patcher and wrapper
        let wrapper = PermissionWrapper::new(BytePatcher::new());

        // patch the page
        let patch = unsafe { wrapper.patch(ptr, &[0xe9, 0, 0, 0]).unwrap() };

        // make sure the data was actually changed
        assert_eq!(unsafe { std::slice::from_raw_parts(ptr, 4) }, [0xe9, 0, 0, 0]);

        // make sure permissions reverted correctly after the patch
        assert_eq!(region::query(ptr).unwrap().protection(), Protection::READ_EXECUTE);

        // restore the patch
        patch.restore();

        // make sure the patch was restored
        assert_eq!(
            unsafe { std::slice::from_raw_parts(ptr, 4) },
            [0x53, 0x56, 0x8b, 0xf2]
        );

        // make sure permissions were restored
        assert_eq!(region::query(ptr).unwrap().protection(), Protection::READ_EXECUTE);
    }
}
