//! The one host-OS call this crate makes: reserve a single
//! read+write+execute anonymous mapping.
//! [`region`] covers `mprotect`/`VirtualProtect`-style reprotection
//! but not "map one big RWX region up front and keep its raw pointer
//! forever" in a way this allocator's header arithmetic can rely on, so the
//! two platform backends are hand-rolled here instead, the way
//! `wasmtime-runtime`'s own `mmap.rs` wraps `libc`/`winapi` directly rather
//! than going through a third-party mmap crate.

use crate::error::JitError;

/// A single large anonymous RWX mapping, released on drop.
pub struct ExecRegion {
    base: *mut u8,
    len: usize,
}

// SAFETY: the mapping is only ever touched from the one CPU thread that
// owns the `JitState` this region lives inside of; `ExecRegion` itself does
// no synchronization because its owner doesn't need any.
unsafe impl Send for ExecRegion {}

impl ExecRegion {
    pub fn reserve(len: usize) -> Result<Self, JitError> {
        let base = unsafe { os_reserve(len) }.ok_or(JitError::FailedAlloc { requested: len })?;
        Ok(ExecRegion { base, len })
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.base
    }

    pub fn len(&self) -> usize {
        self.len
    }
}

impl Drop for ExecRegion {
    fn drop(&mut self) {
        unsafe { os_release(self.base, self.len) }
    }
}

#[cfg(unix)]
unsafe fn os_reserve(len: usize) -> Option<*mut u8> {
    let ptr = libc::mmap(
        std::ptr::null_mut(),
        len,
        libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC,
        libc::MAP_ANON | libc::MAP_PRIVATE,
        -1,
        0,
    );
    if ptr == libc::MAP_FAILED {
        None
    } else {
        Some(ptr as *mut u8)
    }
}

#[cfg(unix)]
unsafe fn os_release(base: *mut u8, len: usize) {
    libc::munmap(base as *mut libc::c_void, len);
}

#[cfg(windows)]
unsafe fn os_reserve(len: usize) -> Option<*mut u8> {
    use winapi::um::memoryapi::VirtualAlloc;
    use winapi::um::winnt::{MEM_COMMIT, MEM_RESERVE, PAGE_EXECUTE_READWRITE};

    let ptr = VirtualAlloc(
        std::ptr::null_mut(),
        len,
        MEM_RESERVE | MEM_COMMIT,
        PAGE_EXECUTE_READWRITE,
    );
    if ptr.is_null() {
        None
    } else {
        Some(ptr as *mut u8)
    }
}

#[cfg(windows)]
unsafe fn os_release(base: *mut u8, _len: usize) {
    use winapi::um::memoryapi::VirtualFree;
    use winapi::um::winnt::MEM_RELEASE;

    VirtualFree(base as *mut _, 0, MEM_RELEASE);
}
