//! Windows-specific primitives.
//!
//! Whole-file opening, resizing and mapping goes through `std::fs` and
//! `memmap2` (already portable); this module carries only what those do not
//! expose: the allocation granularity, and a non-blocking advisory lock used
//! as a best-effort probe for "does another process still hold this file"
//! (see `region.rs`'s shrink-downgrade rule).

use std::fs::File;
use std::io;
use std::mem;
use std::os::windows::io::AsRawHandle;

use winapi::shared::minwindef::DWORD;
use winapi::um::fileapi::LockFileEx;
use winapi::um::fileapi::UnlockFile;
use winapi::um::minwinbase::{LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY, OVERLAPPED};
use winapi::um::sysinfoapi::{GetSystemInfo, SYSTEM_INFO};

/// Returns the OS allocation granularity.
pub fn get_alignment() -> usize {
    let mut system_info = SYSTEM_INFO::default();
    // SAFETY: system_info is a valid, correctly sized out-parameter.
    unsafe {
        GetSystemInfo(&mut system_info as *mut _);
    }
    system_info.dwAllocationGranularity as usize
}

/// Attempts a non-blocking exclusive advisory lock over the whole file.
/// Returns `Ok(true)` if acquired, `Ok(false)` if another process holds one.
pub fn try_lock_exclusive(file: &File) -> io::Result<bool> {
    let mut overlapped: OVERLAPPED = unsafe { mem::zeroed() };
    let flags: DWORD = LOCKFILE_EXCLUSIVE_LOCK | LOCKFILE_FAIL_IMMEDIATELY;

    // SAFETY: the handle is valid and open for the duration of this call; the
    // region covers the whole (64-bit) file; overlapped is zero-initialized
    // and lives on this stack frame for the duration of the call.
    let ok = unsafe {
        LockFileEx(
            file.as_raw_handle() as *mut _,
            flags,
            0,
            u32::MAX,
            u32::MAX,
            &mut overlapped,
        )
    };

    if ok != 0 {
        Ok(true)
    } else {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::WouldBlock || err.raw_os_error() == Some(33) {
            Ok(false)
        } else {
            Err(err)
        }
    }
}

/// Attempts a non-blocking *shared* advisory lock over the whole file.
/// Several holders may each succeed at once; a concurrent
/// [`try_lock_exclusive`] fails for as long as any shared holder remains.
/// Readers take this for the region's whole lifetime so the writer's
/// shrink-downgrade probe can actually see them (see `region.rs`).
pub fn try_lock_shared(file: &File) -> io::Result<bool> {
    let mut overlapped: OVERLAPPED = unsafe { mem::zeroed() };
    let flags: DWORD = LOCKFILE_FAIL_IMMEDIATELY;

    // SAFETY: same as `try_lock_exclusive`, minus the exclusive flag.
    let ok = unsafe {
        LockFileEx(
            file.as_raw_handle() as *mut _,
            flags,
            0,
            u32::MAX,
            u32::MAX,
            &mut overlapped,
        )
    };

    if ok != 0 {
        Ok(true)
    } else {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::WouldBlock || err.raw_os_error() == Some(33) {
            Ok(false)
        } else {
            Err(err)
        }
    }
}

/// Releases a lock previously taken by [`try_lock_exclusive`] or
/// [`try_lock_shared`].
pub fn unlock(file: &File) -> io::Result<()> {
    // SAFETY: the handle is valid and open for the duration of this call.
    let ok = unsafe { UnlockFile(file.as_raw_handle() as *mut _, 0, 0, u32::MAX, u32::MAX) };

    if ok != 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Attempts an exclusive create-new open, used by the sidecar writer-lock
/// protocol on platforms without a usable native share-mode path.
pub fn create_new(path: &std::path::Path) -> io::Result<Option<File>> {
    match std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
    {
        Ok(file) => Ok(Some(file)),
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Ok(None),
        Err(err) => Err(err),
    }
}
