//! Byte / `i64` adapters: two read paths for compact-integer ranges
//! consumed as `i64`.
//!
//! - *Zero-copy*: when the on-disk encoding already matches `i64` width
//!   (`I64`/`U64`), the mapped bytes are reinterpreted in place, no copy.
//! - *Pooled decode*: for every narrower encoding, a buffer is rented from a
//!   [`BufferPool`], the requested range is decoded into it, and the buffer
//!   returns to the pool when the view is dropped.
//!
//! Neither path extends the mapped view's lifetime past the call that
//! produced it: the zero-copy view borrows directly from [`CompactList`],
//! and the pooled view owns a private, already-decoded copy.

use std::sync::Mutex;

use crate::compact::CompactList;
use crate::error::Result;

/// A free list of reusable `i64` scratch buffers, shared across however many
/// [`CompactList`] readers the caller wants to pool decodes for.
///
/// Diagnostics-only in spirit (nothing about correctness depends on reuse;
/// a cold pool just allocates), matching the non-load-bearing posture of
/// [`crate::registry`].
pub struct BufferPool {
    buffers: Mutex<Vec<Vec<i64>>>,
}

impl BufferPool {
    pub fn new() -> Self {
        BufferPool {
            buffers: Mutex::new(Vec::new()),
        }
    }

    fn acquire(&self, min_len: usize) -> Vec<i64> {
        let mut buffers = self.buffers.lock().expect("buffer pool mutex poisoned");
        let mut buf = buffers.pop().unwrap_or_default();
        buf.clear();
        buf.resize(min_len, 0);
        buf
    }

    fn release(&self, buf: Vec<i64>) {
        let mut buffers = self.buffers.lock().expect("buffer pool mutex poisoned");
        buffers.push(buf);
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

/// A view over a decoded `i64` range: either borrowed straight out of the
/// mapped file, or a pooled scratch buffer that returns itself on drop.
pub enum Int64Range<'a> {
    Borrowed(&'a [i64]),
    Pooled { data: Vec<i64>, pool: &'a BufferPool },
}

impl<'a> std::ops::Deref for Int64Range<'a> {
    type Target = [i64];

    fn deref(&self) -> &[i64] {
        match self {
            Int64Range::Borrowed(slice) => slice,
            Int64Range::Pooled { data, .. } => data,
        }
    }
}

impl<'a> Drop for Int64Range<'a> {
    fn drop(&mut self) {
        if let Int64Range::Pooled { data, pool } = self {
            pool.release(std::mem::take(data));
        }
    }
}

/// Reads `[i, i+n)` as `i64`, choosing zero-copy or pooled-decode based on
/// the list's current encoding.
///
/// The borrow on `list` (zero-copy path) or `pool` (pooled path) bounds how
/// long the returned view may live; neither outlives the call that produced
/// it plus whatever scope the caller holds `list`/`pool` open for.
pub fn read_range<'a>(
    list: &'a CompactList,
    pool: &'a BufferPool,
    i: u64,
    n: u64,
) -> Result<Int64Range<'a>> {
    // Zero-copy is sound only when the on-disk width is a full i64 (8
    // bytes) *and* the platform's native byte order already matches the
    // little-endian on-disk format, since the bytes are reinterpreted
    // without any byte-swap.
    if list.encoding().bytes() == 8 && cfg!(target_endian = "little") {
        let bytes = list.range(i, n)?;
        // SAFETY: `bytes` is a contiguous run of `n` 8-byte little-endian
        // elements starting at an offset that is a multiple of 8 (the
        // header's fixed fields and reserved prefix are both 8-byte
        // aligned, and each element is 8 bytes wide), and the mapping's
        // base address is page-aligned, so every element is naturally
        // aligned for `i64`.
        let slice = unsafe { std::slice::from_raw_parts(bytes.as_ptr() as *const i64, n as usize) };
        return Ok(Int64Range::Borrowed(slice));
    }

    let width = list.encoding().bytes();
    let bytes = list.range(i, n)?;
    let mut buf = pool.acquire(n as usize);
    for (idx, slot) in buf.iter_mut().enumerate() {
        let start = idx * width;
        *slot = list.encoding().decode_from(&bytes[start..start + width]);
    }
    Ok(Int64Range::Pooled { data: buf, pool })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compact::Encoding;

    #[test]
    fn zero_copy_path_for_i64_encoding() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("i64.bin");
        let mut list = CompactList::create_writer(&path, 0, Encoding::I64, 4).unwrap();
        for v in [10i64, -20, 30, -40] {
            list.append(v).unwrap();
        }

        let pool = BufferPool::new();
        let view = read_range(&list, &pool, 0, 4).unwrap();
        assert!(matches!(*view, [10, -20, 30, -40]));
        assert!(matches!(view, Int64Range::Borrowed(_)));
    }

    #[test]
    fn pooled_decode_path_for_narrow_encoding() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("i16.bin");
        let mut list = CompactList::create_writer(&path, 0, Encoding::I16, 4).unwrap();
        for v in [1i64, -2, 3, -4] {
            list.append(v).unwrap();
        }

        let pool = BufferPool::new();
        {
            let view = read_range(&list, &pool, 0, 4).unwrap();
            assert_eq!(&*view, &[1, -2, 3, -4]);
            assert!(matches!(view, Int64Range::Pooled { .. }));
        }
        // Buffer returned to the pool on drop; a second decode reuses it
        // rather than allocating fresh.
        let reused = pool.acquire(4);
        assert_eq!(reused.len(), 4);
    }
}
