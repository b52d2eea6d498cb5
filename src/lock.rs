//! Cross-process writer exclusivity.
//!
//! At most one process may hold the writer lock for a given data path at
//! any instant. Two strategies are selected at compile time: native
//! exclusive share-mode on Windows (the data file itself refuses a second
//! writer), and a sidecar lock file with stale-owner detection everywhere
//! else.

use std::fs::File;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Error, Result};

const LOCK_EXTENSION: &str = "lock";

fn lock_path_for(data_path: &Path) -> PathBuf {
    let mut name = data_path.as_os_str().to_owned();
    name.push(".");
    name.push(LOCK_EXTENSION);
    PathBuf::from(name)
}

/// A held writer-exclusivity token. Dropping it releases the lock.
pub struct WriterLock {
    inner: Inner,
}

enum Inner {
    /// Windows: the data file itself, opened with `share_mode(FILE_SHARE_READ)`.
    /// No sidecar file is used; the handle is later handed to `MappedRegion`.
    #[cfg(windows)]
    Native(File),
    /// Unix (and any platform without a usable native exclusive-share
    /// open): a sidecar `path.lock` file held open for the writer's
    /// lifetime.
    Sidecar { lock_path: PathBuf, file: File },
}

impl WriterLock {
    /// Acquires the writer lock for `data_path`.
    ///
    /// On Windows this also opens (and returns ownership of) the data file
    /// itself, since the exclusivity is expressed by the open mode; callers
    /// on that platform should obtain the data file handle via
    /// [`WriterLock::take_native_file`] rather than opening it again.
    #[cfg(windows)]
    pub fn acquire(data_path: &Path) -> Result<Self> {
        use std::os::windows::fs::OpenOptionsExt;
        use winapi::um::winnt::FILE_SHARE_READ;

        // `FILE_SHARE_READ` and nothing else: any number of readers may
        // still open this same path concurrently, but a second writer's
        // open (which needs write access) collides with this handle's
        // exclusive write claim and fails. `share_mode(0)` would instead
        // block readers too, which is more than a writer lock needs.
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .share_mode(FILE_SHARE_READ)
            .open(data_path)
            .map_err(|e| native_open_error(data_path, e))?;

        debug!(path = %data_path.display(), "writer lock acquired (native share-mode)");
        Ok(WriterLock {
            inner: Inner::Native(file),
        })
    }

    /// Acquires the writer lock for `data_path` via a sidecar `path.lock`
    /// file: created with `create_new` (atomically fails if another writer
    /// already holds it), with stale-lock reclamation if the file exists
    /// but nothing has it open.
    ///
    /// "Opened for writing exclusively" is expressed as a
    /// non-blocking `flock`: the live holder takes and keeps that same
    /// advisory lock for as long as it holds `WriterLock` (below), so a
    /// lock file left by a crashed owner is flock-free and reclaimable,
    /// while one held by a live writer is not. `create_new` alone cannot
    /// distinguish the two: it always fails once the path exists on disk,
    /// regardless of whether anything still has it open.
    #[cfg(unix)]
    pub fn acquire(data_path: &Path) -> Result<Self> {
        let lock_path = lock_path_for(data_path);

        if lock_path.exists() {
            let existing = std::fs::OpenOptions::new()
                .read(true)
                .write(true)
                .open(&lock_path)
                .map_err(|e| Error::io(&lock_path, e))?;

            if crate::os::try_lock_exclusive(&existing).map_err(|e| Error::io(&lock_path, e))? {
                // Nothing holds a flock on it: the previous owner crashed
                // without cleaning up. Reclaim it.
                crate::os::unlock(&existing).map_err(|e| Error::io(&lock_path, e))?;
                drop(existing);
                std::fs::remove_file(&lock_path).map_err(|e| Error::io(&lock_path, e))?;
            } else {
                return Err(Error::AlreadyOpen {
                    path: data_path.to_path_buf(),
                });
            }
        }

        let file = match crate::os::create_new(&lock_path).map_err(|e| Error::io(&lock_path, e))? {
            Some(file) => file,
            None => {
                // Lost the create-new race against another process.
                return Err(Error::AlreadyOpen {
                    path: data_path.to_path_buf(),
                });
            }
        };

        // Hold the flock for the lifetime of this token so the next
        // opener's staleness probe above can tell us apart from a crash.
        crate::os::try_lock_exclusive(&file)
            .map_err(|e| Error::io(&lock_path, e))
            .and_then(|acquired| {
                if acquired {
                    Ok(())
                } else {
                    Err(Error::AlreadyOpen {
                        path: data_path.to_path_buf(),
                    })
                }
            })?;

        debug!(path = %lock_path.display(), "writer lock acquired (sidecar)");
        Ok(WriterLock {
            inner: Inner::Sidecar { lock_path, file },
        })
    }

    /// On Windows, hands over the already-opened data file handle so the
    /// caller does not need to open it a second time (a second writer's
    /// open would fail anyway, since this handle's write access is not
    /// shared).
    #[cfg(windows)]
    pub fn take_native_file(&mut self) -> Option<File> {
        match &mut self.inner {
            Inner::Native(file) => file.try_clone().ok(),
            Inner::Sidecar { .. } => None,
        }
    }
}

#[cfg(windows)]
fn native_open_error(path: &Path, err: std::io::Error) -> Error {
    if err.kind() == std::io::ErrorKind::PermissionDenied {
        Error::AlreadyOpen {
            path: path.to_path_buf(),
        }
    } else {
        Error::io(path, err)
    }
}

impl Drop for WriterLock {
    fn drop(&mut self) {
        if let Inner::Sidecar { lock_path, .. } = &self.inner {
            let _ = std::fs::remove_file(lock_path);
            debug!(path = %lock_path.display(), "writer lock released (sidecar)");
        }
    }
}

#[cfg(test)]
#[cfg(unix)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_while_first_is_held() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");

        let first = WriterLock::acquire(&path).unwrap();
        let second = WriterLock::acquire(&path);
        assert!(matches!(second, Err(Error::AlreadyOpen { .. })));

        drop(first);
        let third = WriterLock::acquire(&path);
        assert!(third.is_ok());
    }

    #[test]
    fn stale_lock_is_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        let lock_path = lock_path_for(&path);

        // Simulate a crashed writer: lock file exists but nothing holds it open.
        std::fs::write(&lock_path, b"").unwrap();

        let lock = WriterLock::acquire(&path);
        assert!(lock.is_ok());
    }

    #[test]
    fn lock_file_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        let lock_path = lock_path_for(&path);

        let lock = WriterLock::acquire(&path).unwrap();
        assert!(lock_path.exists());
        drop(lock);
        assert!(!lock_path.exists());
    }
}
