//! Unix-specific primitives.
//!
//! Whole-file opening, resizing and mapping goes through `std::fs` and
//! `memmap2` (already portable); this module carries only what those do not
//! expose: the page size, and a non-blocking advisory lock used as a
//! best-effort probe for "does another process still hold this file" (see
//! `region.rs`'s shrink-downgrade rule and `lock.rs`'s sidecar protocol).

use std::fs::File;
use std::io;
use std::os::unix::io::AsRawFd;

/// Returns the OS page size (`sysconf(_SC_PAGESIZE)`), falling back to 4096
/// if the call fails (which should not happen for this POSIX.1 variable).
pub fn get_alignment() -> usize {
    // SAFETY: a simple call to the function with a valid, constant option name.
    let result = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };

    if result == -1 {
        4096
    } else {
        result as usize
    }
}

/// Attempts to take an exclusive, non-blocking advisory lock over the whole
/// file. Returns `Ok(true)` if it was acquired (no other process currently
/// holds one), `Ok(false)` if it would have blocked.
///
/// This is a point-in-time probe: the caller releases the lock immediately
/// via [`unlock`], it is not held for any extended duration.
pub fn try_lock_exclusive(file: &File) -> io::Result<bool> {
    // SAFETY: the descriptor is valid and open for the duration of this call.
    let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };

    if result == 0 {
        Ok(true)
    } else {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::WouldBlock {
            Ok(false)
        } else {
            Err(err)
        }
    }
}

/// Attempts a non-blocking *shared* advisory lock over the whole file.
/// Several holders may each succeed at once (that is the point); a
/// concurrent [`try_lock_exclusive`] fails for as long as any shared
/// holder remains. Readers take this for the region's whole lifetime so
/// the writer's shrink-downgrade probe can actually see them (see
/// `region.rs`).
pub fn try_lock_shared(file: &File) -> io::Result<bool> {
    // SAFETY: the descriptor is valid and open for the duration of this call.
    let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_SH | libc::LOCK_NB) };

    if result == 0 {
        Ok(true)
    } else {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::WouldBlock {
            Ok(false)
        } else {
            Err(err)
        }
    }
}

/// Releases a lock previously taken by [`try_lock_exclusive`] or
/// [`try_lock_shared`].
pub fn unlock(file: &File) -> io::Result<()> {
    // SAFETY: the descriptor is valid and open for the duration of this call.
    let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_UN) };

    if result == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Attempts an exclusive create-new open, used by the sidecar writer-lock
/// protocol. `Ok(None)` means the path already exists.
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
