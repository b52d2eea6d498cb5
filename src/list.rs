//! The generic typed random-access container: append, indexed
//! read/write, truncation, bulk range, and growth, over a fixed-width
//! element type layered on a [`MappedRegion`] and a [`Header`].

use std::cell::{Cell, RefCell};
use std::marker::PhantomData;
use std::path::Path;
use std::slice;

use tracing::trace;

use crate::align::page_round_up;
use crate::error::{Error, Result};
use crate::header::Header;
use crate::lock::WriterLock;
use crate::region::{MappedRegion, Mode};
use crate::registry;

/// An item upgrades past this many of itself per growth step (`current
/// + min(current, 1 GiB)`), expressed in items rather than bytes.
const GROWTH_CAP_ITEMS: u64 = 1 << 30;

/// A fixed-width value that can be packed into and out of a byte slice.
///
/// Implemented for the native primitive types used directly by
/// [`crate::bitlist`] (8-byte words) and [`crate::timeseries`] (32-bit
/// seconds), and for raw byte arrays of every width the compact-integer
/// family needs (1 through 8 bytes).
pub trait Element: Copy {
    /// The element's fixed on-disk width, in bytes.
    const WIDTH: usize;

    /// Writes `self` into `dst[..Self::WIDTH]`, little-endian.
    fn to_bytes(self, dst: &mut [u8]);
    /// Reads a value from `src[..Self::WIDTH]`.
    fn from_bytes(src: &[u8]) -> Self;
}

macro_rules! impl_element_for_int {
    ($ty:ty, $width:expr) => {
        impl Element for $ty {
            const WIDTH: usize = $width;

            fn to_bytes(self, dst: &mut [u8]) {
                dst.copy_from_slice(&self.to_le_bytes());
            }

            fn from_bytes(src: &[u8]) -> Self {
                let mut buf = [0u8; $width];
                buf.copy_from_slice(src);
                <$ty>::from_le_bytes(buf)
            }
        }
    };
}

impl_element_for_int!(i8, 1);
impl_element_for_int!(u8, 1);
impl_element_for_int!(i16, 2);
impl_element_for_int!(u16, 2);
impl_element_for_int!(i32, 4);
impl_element_for_int!(u32, 4);
impl_element_for_int!(i64, 8);
impl_element_for_int!(u64, 8);
impl_element_for_int!(f32, 4);
impl_element_for_int!(f64, 8);

macro_rules! impl_element_for_array {
    ($n:expr) => {
        impl Element for [u8; $n] {
            const WIDTH: usize = $n;

            fn to_bytes(self, dst: &mut [u8]) {
                dst.copy_from_slice(&self);
            }

            fn from_bytes(src: &[u8]) -> Self {
                let mut buf = [0u8; $n];
                buf.copy_from_slice(src);
                buf
            }
        }
    };
}

impl_element_for_array!(1);
impl_element_for_array!(2);
impl_element_for_array!(3);
impl_element_for_array!(4);
impl_element_for_array!(5);
impl_element_for_array!(6);
impl_element_for_array!(7);
impl_element_for_array!(8);

/// A persistent, mmap-backed, random-access list of `T`.
///
/// Wrapped in `RefCell` rather than requiring `&mut self` everywhere: reads
/// (`get`, `range`) can trigger a reader's self-remap without taking
/// `&mut self`, matching the single-threaded, convention-based sharing
/// model described in the concurrency section.
pub struct List<T: Element> {
    region: RefCell<MappedRegion>,
    header: Header,
    data_type: u32,
    capacity_locked: Cell<bool>,
    writer_lock: Option<WriterLock>,
    registry_id: u64,
    _marker: PhantomData<T>,
}

impl<T: Element> List<T> {
    /// Creates (or reopens for writing) the list at `path`, acquiring the
    /// writer lock. `data_type` is written once, only when the file is new.
    pub fn create_writer(
        path: &Path,
        reserved: usize,
        data_type: u32,
        minimum_capacity_items: u64,
    ) -> Result<Self> {
        if reserved % 8 != 0 {
            return Err(Error::invalid_argument(format!(
                "reserved header size {} is not a multiple of 8",
                reserved
            )));
        }

        #[allow(unused_mut)]
        let mut writer_lock = WriterLock::acquire(path)?;
        let header = Header::new(reserved);

        #[cfg(windows)]
        let file = writer_lock
            .take_native_file()
            .expect("native lock owns the file handle");

        #[cfg(unix)]
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .map_err(|e| Error::io(path, e))?;

        let is_new = file.metadata().map_err(|e| Error::io(path, e))?.len() == 0;

        let requested_bytes =
            header.elements_offset() as u64 + minimum_capacity_items * (T::WIDTH as u64);
        let region = MappedRegion::open(path, file, requested_bytes, Mode::ReadWrite)?;

        if is_new {
            unsafe {
                header.set_data_type(region.base_ptr(), data_type);
                header.set_count(region.base_ptr(), 0);
            }
        }

        let registry_id = registry::register(path.to_path_buf(), "list", data_type, true);

        Ok(List {
            region: RefCell::new(region),
            header,
            data_type,
            capacity_locked: Cell::new(false),
            writer_lock: Some(writer_lock),
            registry_id,
            _marker: PhantomData,
        })
    }

    /// Opens an existing list read-only. Never acquires the writer lock.
    pub fn open_reader(path: &Path, reserved: usize) -> Result<Self> {
        if reserved % 8 != 0 {
            return Err(Error::invalid_argument(format!(
                "reserved header size {} is not a multiple of 8",
                reserved
            )));
        }

        let file = std::fs::OpenOptions::new()
            .read(true)
            .open(path)
            .map_err(|e| Error::io(path, e))?;

        let header = Header::new(reserved);
        let region = MappedRegion::open(path, file, 0, Mode::ReadOnly)?;
        let data_type = unsafe { header.data_type(region.base_ptr()) };
        let registry_id = registry::register(path.to_path_buf(), "list", data_type, false);

        Ok(List {
            region: RefCell::new(region),
            header,
            data_type,
            capacity_locked: Cell::new(false),
            writer_lock: None,
            registry_id,
            _marker: PhantomData,
        })
    }

    /// The on-disk data-type tag, read once at open.
    pub fn data_type(&self) -> u32 {
        self.data_type
    }

    /// Whether this instance holds the writer lock.
    pub fn is_writer(&self) -> bool {
        self.writer_lock.is_some()
    }

    /// Switches the list into one-way capacity-locked mode: every later
    /// operation that would remap (grow, shrink, trim) fails with
    /// [`Error::CapacityLocked`].
    pub fn lock_capacity(&self) {
        self.capacity_locked.set(true);
    }

    /// Whether [`List::lock_capacity`] has been called.
    pub fn is_capacity_locked(&self) -> bool {
        self.capacity_locked.get()
    }

    /// Forces the mapped view's pending writes to disk.
    pub fn flush(&self) -> Result<()> {
        self.region.borrow().flush()
    }

    /// The size of the caller-defined reserved prefix, in bytes.
    pub fn reserved_len(&self) -> usize {
        self.header.reserved()
    }

    /// Raw pointer to the start of the reserved prefix (sub-class header
    /// space below the fixed version/data-type/count fields). Used by
    /// callers that stash their own fields there, e.g. [`crate::bitlist`]'s
    /// logical bit length.
    ///
    /// SAFETY: valid only until the next mutating call that can remap
    /// (append, bulk_append, truncate, trim); callers must not hold it
    /// across one.
    pub unsafe fn reserved_ptr(&self) -> *mut u8 {
        self.region.borrow().base_ptr()
    }

    /// The current logical element count, loaded with acquire ordering.
    pub fn count(&self) -> u64 {
        let region = self.region.borrow();
        unsafe { self.header.count(region.base_ptr()) }
    }

    /// The number of elements the current mapped view has room for, without
    /// a remap.
    pub fn capacity(&self) -> u64 {
        let region = self.region.borrow();
        ((region.len() - self.header.elements_offset()) / T::WIDTH) as u64
    }

    /// Appends `value`, growing the mapped view first if needed. Returns
    /// the index it was written at.
    pub fn append(&mut self, value: T) -> Result<u64> {
        self.ensure_writable()?;
        let count = self.count();
        let required = count
            .checked_add(1)
            .ok_or_else(|| Error::invalid_argument("count overflow on append"))?;

        if required > self.capacity() {
            self.grow_to(required)?;
        }

        let region = self.region.borrow();
        unsafe {
            let ptr = Self::element_ptr(&region, &self.header, count);
            value.to_bytes(slice::from_raw_parts_mut(ptr, T::WIDTH));
            self.header.set_count(region.base_ptr(), required);
        }
        Ok(count)
    }

    /// Appends every item in `items` in one grow step. Returns the index
    /// the first item was written at.
    pub fn bulk_append(&mut self, items: &[T]) -> Result<u64> {
        self.ensure_writable()?;
        let n = items.len() as u64;
        if n == 0 {
            return Ok(self.count());
        }

        let count = self.count();
        let required = count
            .checked_add(n)
            .ok_or_else(|| Error::invalid_argument("count overflow on bulk_append"))?;

        if required > self.capacity() {
            self.grow_to(required)?;
        }

        let region = self.region.borrow();
        unsafe {
            for (offset, item) in items.iter().enumerate() {
                let idx = count + offset as u64;
                let ptr = Self::element_ptr(&region, &self.header, idx);
                item.to_bytes(slice::from_raw_parts_mut(ptr, T::WIDTH));
            }
            self.header.set_count(region.base_ptr(), required);
        }

        Ok(count)
    }

    /// Reads the element at `i`, re-mapping first if a writer has grown
    /// the file past this reader's own view.
    pub fn get(&self, i: u64) -> Result<T> {
        let count = self.count();
        if i >= count {
            return Err(Error::OutOfBounds { index: i, count });
        }

        self.ensure_own_capacity(i)?;
        let region = self.region.borrow();
        unsafe {
            let ptr = Self::element_ptr(&region, &self.header, i);
            Ok(T::from_bytes(slice::from_raw_parts(ptr, T::WIDTH)))
        }
    }

    /// Reads the element at `i`, distinguishing an index that was never
    /// valid from one that was valid as of `observed_count` (typically a
    /// count a caller cached earlier, e.g. from a prior [`List::count`] or
    /// [`TimeSeries::count`](crate::timeseries::TimeSeries::count) call) but
    /// has since been removed by a concurrent writer's truncation: the
    /// former is [`Error::OutOfBounds`], the latter [`Error::Truncated`].
    /// Plain [`List::get`] cannot make this distinction on its own,
    /// since from its perspective both cases look identical (`i >= count`).
    pub fn get_since(&self, i: u64, observed_count: u64) -> Result<T> {
        let count = self.count();
        if i >= count {
            if i < observed_count {
                return Err(Error::Truncated { index: i, count });
            }
            return Err(Error::OutOfBounds { index: i, count });
        }

        self.ensure_own_capacity(i)?;
        let region = self.region.borrow();
        unsafe {
            let ptr = Self::element_ptr(&region, &self.header, i);
            Ok(T::from_bytes(slice::from_raw_parts(ptr, T::WIDTH)))
        }
    }

    /// Overwrites the element at `i`. Never remaps or changes `count`.
    pub fn set(&mut self, i: u64, value: T) -> Result<()> {
        self.ensure_writable()?;
        let count = self.count();
        if i >= count {
            return Err(Error::OutOfBounds { index: i, count });
        }

        let region = self.region.borrow();
        unsafe {
            let ptr = Self::element_ptr(&region, &self.header, i);
            value.to_bytes(slice::from_raw_parts_mut(ptr, T::WIDTH));
        }
        Ok(())
    }

    /// Overwrites the last element. Fails with [`Error::OutOfBounds`] on an
    /// empty list.
    pub fn set_last(&mut self, value: T) -> Result<()> {
        let count = self.count();
        if count == 0 {
            return Err(Error::OutOfBounds { index: 0, count: 0 });
        }
        self.set(count - 1, value)
    }

    /// Drops every element past `new_count`, shrinking the mapped view to
    /// nothing once the list is emptied.
    pub fn truncate_tail(&mut self, new_count: u64) -> Result<()> {
        self.ensure_writable()?;
        let count = self.count();
        if new_count > count {
            return Err(Error::invalid_argument(format!(
                "truncate_tail: new_count {} exceeds count {}",
                new_count, count
            )));
        }

        let region = self.region.borrow();
        unsafe {
            self.header.set_count(region.base_ptr(), new_count);
        }
        drop(region);

        if new_count == 0 {
            self.shrink_to(0)?;
        }
        Ok(())
    }

    /// Drops every element before the last `keep`, shifting the surviving
    /// suffix down to index 0.
    pub fn truncate_head(&mut self, keep: u64) -> Result<()> {
        self.ensure_writable()?;
        let count = self.count();
        if keep > count {
            return Err(Error::invalid_argument(format!(
                "truncate_head: keep {} exceeds count {}",
                keep, count
            )));
        }

        let dropped = count - keep;
        if dropped > 0 {
            let region = self.region.borrow();
            unsafe {
                let elems_off = self.header.elements_offset();
                let base = region.base_ptr();
                let src = base.add(elems_off + (dropped as usize) * T::WIDTH);
                let dst = base.add(elems_off);
                std::ptr::copy(src, dst, (keep as usize) * T::WIDTH);
                self.header.set_count(base, keep);
            }
        }
        Ok(())
    }

    /// Borrowed view over the raw element bytes of `[i, i+n)`, valid until
    /// the next mutating call on this list.
    pub fn range(&self, i: u64, n: u64) -> Result<&[u8]> {
        if n > i32::MAX as u64 {
            return Err(Error::IntegerRangeOnly { requested: n });
        }

        let count = self.count();
        let end = i
            .checked_add(n)
            .ok_or(Error::OutOfBounds { index: i, count })?;
        if end > count {
            return Err(Error::OutOfBounds { index: i, count });
        }

        if n > 0 {
            self.ensure_own_capacity(end - 1)?;
        }

        let region = self.region.borrow();
        unsafe {
            let elems_off = self.header.elements_offset();
            let ptr = region.base_ptr().add(elems_off + (i as usize) * T::WIDTH);
            // SAFETY: region is borrowed for the duration of this unsafe
            // block; the returned slice's lifetime is tied to `&self`, not
            // to `region`, which matches the documented "valid until next
            // mutation" contract enforced by the caller.
            Ok(slice::from_raw_parts(ptr, (n as usize) * T::WIDTH))
        }
    }

    /// Shrinks capacity toward `count` when current capacity exceeds
    /// `count / 0.9` (expressed without floating point as `capacity * 9 >
    /// count * 10`).
    pub fn trim_to_count(&mut self) -> Result<()> {
        self.ensure_writable()?;
        let count = self.count();
        let capacity = self.capacity();

        if (capacity as u128) * 9 > (count as u128) * 10 {
            self.shrink_to(count)?;
        }
        Ok(())
    }

    fn ensure_writable(&self) -> Result<()> {
        let region = self.region.borrow();
        if !region.mode().is_writable() {
            return Err(Error::invalid_argument("list was opened read-only"));
        }
        Ok(())
    }

    fn grow_to(&mut self, required_items: u64) -> Result<()> {
        if self.capacity_locked.get() {
            return Err(Error::CapacityLocked);
        }

        let current = self.capacity();
        let growth = current.min(GROWTH_CAP_ITEMS);
        let new_capacity = required_items.max(current.saturating_add(growth));
        let bytes =
            self.header.elements_offset() as u64 + new_capacity * (T::WIDTH as u64);

        let mut region = self.region.borrow_mut();
        region.remap(bytes)?;
        trace!(capacity = new_capacity, "list grown");
        Ok(())
    }

    fn shrink_to(&mut self, target_items: u64) -> Result<()> {
        if self.capacity_locked.get() {
            return Err(Error::CapacityLocked);
        }

        let bytes = self.header.elements_offset() as u64 + target_items * (T::WIDTH as u64);
        let mut region = self.region.borrow_mut();
        region.remap(bytes)?;
        Ok(())
    }

    /// A reader whose mapped view was sized before the writer last grew the
    /// file re-maps itself the moment it needs an index past its own
    /// capacity.
    fn ensure_own_capacity(&self, index: u64) -> Result<()> {
        if index < self.capacity() {
            return Ok(());
        }
        if self.capacity_locked.get() {
            return Err(Error::CapacityLocked);
        }

        let needed_bytes =
            self.header.elements_offset() as u64 + (index + 1) * (T::WIDTH as u64);
        let mut region = self.region.borrow_mut();
        region.remap(page_round_up(needed_bytes))?;
        Ok(())
    }

    unsafe fn element_ptr(region: &MappedRegion, header: &Header, index: u64) -> *mut u8 {
        let elems_off = header.elements_offset();
        region.base_ptr().add(elems_off + (index as usize) * T::WIDTH)
    }
}

impl<T: Element> Drop for List<T> {
    fn drop(&mut self) {
        registry::unregister(self.registry_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_get_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("list.bin");
        let mut list: List<i64> = List::create_writer(&path, 0, 9, 4).unwrap();

        for v in [1i64, 2, 3, 4, 5] {
            list.append(v).unwrap();
        }

        assert_eq!(list.count(), 5);
        for (i, expected) in [1i64, 2, 3, 4, 5].into_iter().enumerate() {
            assert_eq!(list.get(i as u64).unwrap(), expected);
        }
    }

    #[test]
    fn out_of_bounds_get_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("list.bin");
        let list: List<i64> = List::create_writer(&path, 0, 9, 4).unwrap();
        assert!(matches!(
            list.get(0),
            Err(Error::OutOfBounds { index: 0, count: 0 })
        ));
    }

    #[test]
    fn truncate_tail_then_reappend() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("list.bin");
        let mut list: List<i64> = List::create_writer(&path, 0, 9, 4).unwrap();
        for v in 0..10 {
            list.append(v).unwrap();
        }

        list.truncate_tail(3).unwrap();
        assert_eq!(list.count(), 3);
        assert_eq!(list.get(2).unwrap(), 2);

        list.append(99).unwrap();
        assert_eq!(list.count(), 4);
        assert_eq!(list.get(3).unwrap(), 99);
    }

    #[test]
    fn truncate_head_shifts_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("list.bin");
        let mut list: List<i64> = List::create_writer(&path, 0, 9, 4).unwrap();
        for v in 0..10 {
            list.append(v).unwrap();
        }

        list.truncate_head(4).unwrap();
        assert_eq!(list.count(), 4);
        assert_eq!(list.get(0).unwrap(), 6);
        assert_eq!(list.get(3).unwrap(), 9);
    }

    #[test]
    fn bulk_append_matches_individual_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("list.bin");
        let mut list: List<i64> = List::create_writer(&path, 0, 9, 4).unwrap();
        let start = list.bulk_append(&[10, 20, 30]).unwrap();
        assert_eq!(start, 0);
        assert_eq!(list.get(1).unwrap(), 20);
    }

    #[test]
    fn range_borrows_raw_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("list.bin");
        let mut list: List<i64> = List::create_writer(&path, 0, 9, 4).unwrap();
        list.bulk_append(&[7, 8, 9]).unwrap();

        let bytes = list.range(1, 2).unwrap();
        assert_eq!(bytes.len(), 16);
        assert_eq!(i64::from_le_bytes(bytes[0..8].try_into().unwrap()), 8);
    }

    #[test]
    fn capacity_lock_rejects_growth() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("list.bin");
        let mut list: List<i64> = List::create_writer(&path, 0, 9, 1).unwrap();
        list.lock_capacity();
        let big = vec![0i64; 1_000_000];
        assert!(matches!(
            list.bulk_append(&big),
            Err(Error::CapacityLocked)
        ));
    }

    #[test]
    fn get_since_distinguishes_truncated_from_never_valid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("list.bin");
        let mut list: List<i64> = List::create_writer(&path, 0, 9, 4).unwrap();
        for v in 0..10 {
            list.append(v).unwrap();
        }
        let observed_count = list.count();

        list.truncate_tail(3).unwrap();

        assert!(matches!(
            list.get_since(7, observed_count),
            Err(Error::Truncated { index: 7, count: 3 })
        ));
        assert!(matches!(
            list.get_since(50, observed_count),
            Err(Error::OutOfBounds { index: 50, count: 3 })
        ));
        assert_eq!(list.get_since(2, observed_count).unwrap(), 2);
    }

    #[test]
    fn writer_then_reader_sees_growth() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("list.bin");
        let mut writer: List<i64> = List::create_writer(&path, 0, 9, 1).unwrap();
        writer.append(1).unwrap();
        writer.append(2).unwrap();
        writer.append(3).unwrap();
        drop(writer);

        let reader: List<i64> = List::open_reader(&path, 0).unwrap();
        assert_eq!(reader.count(), 3);
        assert_eq!(reader.get(2).unwrap(), 3);
    }
}
