//! The mapped region: owns the file handle and a single view spanning the
//! whole file. Rebuilt wholesale whenever the file grows or shrinks.
//!
//! Unlike a windowed LRU cache of partial mappings (useful when the backing
//! file is far larger than convenient to map at once), this always maps the
//! entire file in one view, so no caching machinery is needed here.

use std::fs::File;
use std::path::{Path, PathBuf};

use memmap2::MmapRaw;
use tracing::{debug, trace};

use crate::align::{page_round_up, PAGE_SIZE};
use crate::error::{Error, Result};
use crate::os;

/// Whether a region was opened for reading and writing, or read-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Opened with the writer lock held; may grow, shrink, and mutate.
    ReadWrite,
    /// Opened without the writer lock; never resizes the file.
    ReadOnly,
}

impl Mode {
    /// Whether this mode permits mutation and resizing.
    pub fn is_writable(self) -> bool {
        matches!(self, Mode::ReadWrite)
    }
}

/// Owns the OS file handle, an in-memory mapping, and a single view covering
/// the entire file.
pub struct MappedRegion {
    path: PathBuf,
    file: File,
    map: MmapRaw,
    mode: Mode,
    /// Whether this region holds a shared advisory lock on `file` (readers
    /// only, acquired once at open and held for the region's whole
    /// lifetime). Lets a writer's shrink-downgrade probe
    /// (`other_process_holds_file`) actually observe that a reader still
    /// has the file mapped, instead of only ever seeing itself.
    holds_shared_lock: bool,
}

impl MappedRegion {
    /// Opens (or creates) the mapped file and maps it in full.
    ///
    /// `file` must already be opened with the access matching `mode`; the
    /// writer-lock protocol (`lock.rs`) sometimes hands over an
    /// already-exclusively-opened handle (the Windows native-share path), in
    /// which case that same handle is reused here rather than reopened.
    pub fn open(path: &Path, file: File, requested_bytes: u64, mode: Mode) -> Result<Self> {
        if std::mem::size_of::<usize>() < 8 {
            return Err(Error::NotSupportedOnThisPlatform);
        }

        let current_len = file.metadata().map_err(|e| Error::io(path, e))?.len();
        let floor = requested_bytes.max(PAGE_SIZE as u64);
        let target_len = page_round_up(current_len.max(floor));

        if mode.is_writable() && target_len != current_len {
            file.set_len(target_len).map_err(|e| Error::io(path, e))?;
        }

        let map = MmapRaw::map_raw(&file).map_err(|e| Error::io(path, e))?;
        debug!(path = %path.display(), len = map.len(), mode = ?mode, "mapped region opened");

        // Readers hold a shared lock for as long as this region lives, so a
        // writer elsewhere attempting the exclusive shrink-probe below sees
        // them and downgrades the shrink to a no-op. Best-effort:
        // several readers taking LOCK_SH never conflict with each other, so
        // this should always succeed; a failure here is not fatal to
        // opening the reader, just to the shrink-visibility guarantee.
        let holds_shared_lock = if mode.is_writable() {
            false
        } else {
            os::try_lock_shared(&file).unwrap_or(false)
        };

        Ok(MappedRegion {
            path: path.to_path_buf(),
            file,
            map,
            mode,
            holds_shared_lock,
        })
    }

    /// The stale base pointer into the current view. Valid only until the
    /// next `remap`.
    pub fn base_ptr(&self) -> *mut u8 {
        self.map.as_mut_ptr()
    }

    /// The byte length of the current view (always a multiple of
    /// [`PAGE_SIZE`]).
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether this region was opened read-write or read-only.
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// The backing file's path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flushes the mapped view's writes back to the file (`msync`/
    /// `FlushViewOfFile` under the hood, via `memmap2`). A no-op on
    /// read-only regions.
    pub fn flush(&self) -> Result<()> {
        if self.mode.is_writable() {
            self.map.flush().map_err(|e| Error::io(&self.path, e))?;
        }
        Ok(())
    }

    /// Disposes the current view, resizes the file if necessary (writers
    /// only), creates a fresh view, and returns the new base pointer.
    ///
    /// If `new_byte_capacity` is less than the current file length and
    /// another process appears to still hold the file, the shrink is
    /// silently downgraded to a no-op: the file (and view) keep their
    /// current size.
    pub fn remap(&mut self, new_byte_capacity: u64) -> Result<*mut u8> {
        let new_len = page_round_up(new_byte_capacity.max(PAGE_SIZE as u64));
        let current_len = self
            .file
            .metadata()
            .map_err(|e| Error::io(&self.path, e))?
            .len();

        if self.mode.is_writable() {
            if new_len < current_len {
                if self.other_process_holds_file()? {
                    trace!(
                        path = %self.path.display(),
                        "shrink to {} downgraded: another process still holds the file",
                        new_len
                    );
                    return Ok(self.map.as_mut_ptr());
                }
            }

            if new_len != current_len {
                self.file
                    .set_len(new_len)
                    .map_err(|e| Error::io(&self.path, e))?;
            }
        }
        // Readers never resize; they only re-map to observe a writer's growth.

        let map = MmapRaw::map_raw(&self.file).map_err(|e| Error::io(&self.path, e))?;
        self.map = map;
        debug!(path = %self.path.display(), len = self.map.len(), "region remapped");

        Ok(self.map.as_mut_ptr())
    }

    /// Heuristic used by the shrink rule: attempts a non-blocking exclusive
    /// advisory lock and immediately releases it. If it cannot be acquired,
    /// some other process is assumed to still be using the file (in
    /// practice, a reader's region holding the shared lock it took at open,
    /// see [`MappedRegion::open`], is exactly what makes this succeed).
    fn other_process_holds_file(&self) -> Result<bool> {
        let acquired =
            os::try_lock_exclusive(&self.file).map_err(|e| Error::io(&self.path, e))?;

        if acquired {
            os::unlock(&self.file).map_err(|e| Error::io(&self.path, e))?;
        }

        Ok(!acquired)
    }
}

impl std::fmt::Debug for MappedRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedRegion")
            .field("path", &self.path)
            .field("len", &self.map.len())
            .field("mode", &self.mode)
            .field("holds_shared_lock", &self.holds_shared_lock)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;

    fn open_rw(path: &Path, requested: u64) -> MappedRegion {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .unwrap();
        MappedRegion::open(path, file, requested, Mode::ReadWrite).unwrap()
    }

    #[test]
    fn opens_and_rounds_to_page() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("region.bin");
        let region = open_rw(&path, 1);
        assert_eq!(region.len(), PAGE_SIZE);
    }

    #[test]
    fn remap_grows_and_preserves_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("region.bin");
        let mut region = open_rw(&path, 1);

        unsafe {
            *region.base_ptr() = 0xAB;
        }

        let new_ptr = region.remap((PAGE_SIZE as u64) * 3).unwrap();
        assert_eq!(region.len(), PAGE_SIZE * 3);
        unsafe {
            assert_eq!(*new_ptr, 0xAB);
        }
    }

    #[test]
    fn remap_shrinks_when_sole_holder() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("region.bin");
        let mut region = open_rw(&path, (PAGE_SIZE as u64) * 4);

        region.remap(PAGE_SIZE as u64).unwrap();
        assert_eq!(region.len(), PAGE_SIZE);
    }

    #[test]
    fn remap_shrink_downgraded_while_a_reader_holds_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("region.bin");
        let mut writer = open_rw(&path, (PAGE_SIZE as u64) * 4);

        let reader_file = OpenOptions::new().read(true).open(&path).unwrap();
        let reader = MappedRegion::open(&path, reader_file, 0, Mode::ReadOnly).unwrap();
        assert!(reader.holds_shared_lock);

        writer.remap(PAGE_SIZE as u64).unwrap();
        assert_eq!(
            writer.len(),
            (PAGE_SIZE as u64 * 4) as usize,
            "shrink must be downgraded to a no-op while the reader's region is alive"
        );

        drop(reader);
        writer.remap(PAGE_SIZE as u64).unwrap();
        assert_eq!(writer.len(), PAGE_SIZE, "shrink proceeds once the reader is gone");
    }
}
