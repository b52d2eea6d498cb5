//! The compact-integer family: concrete [`encodings::Encoding`]
//! variants plus [`CompactList`], the façade that presents any of them as a
//! uniform 64-bit logical list with overflow detection and online
//! utilization tracking.

pub mod encodings;
pub mod upgrade;

pub use encodings::Encoding;

use std::cell::{Cell, RefCell};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::list::List;

/// Dispatches list operations to the `List<[u8; N]>` matching the current
/// encoding's byte width. A thin enum rather than a trait object: the width
/// is fixed for the lifetime of one `CompactList`, chosen once at open.
enum RawList {
    W1(List<[u8; 1]>),
    W2(List<[u8; 2]>),
    W3(List<[u8; 3]>),
    W4(List<[u8; 4]>),
    W5(List<[u8; 5]>),
    W6(List<[u8; 6]>),
    W7(List<[u8; 7]>),
    W8(List<[u8; 8]>),
}

macro_rules! raw_dispatch {
    ($self:expr, |$l:ident| $body:expr) => {
        match $self {
            RawList::W1($l) => $body,
            RawList::W2($l) => $body,
            RawList::W3($l) => $body,
            RawList::W4($l) => $body,
            RawList::W5($l) => $body,
            RawList::W6($l) => $body,
            RawList::W7($l) => $body,
            RawList::W8($l) => $body,
        }
    };
}

impl RawList {
    fn create_writer(
        path: &Path,
        reserved: usize,
        data_type: u32,
        minimum_capacity_items: u64,
        width: usize,
    ) -> Result<Self> {
        Ok(match width {
            1 => RawList::W1(List::create_writer(path, reserved, data_type, minimum_capacity_items)?),
            2 => RawList::W2(List::create_writer(path, reserved, data_type, minimum_capacity_items)?),
            3 => RawList::W3(List::create_writer(path, reserved, data_type, minimum_capacity_items)?),
            4 => RawList::W4(List::create_writer(path, reserved, data_type, minimum_capacity_items)?),
            5 => RawList::W5(List::create_writer(path, reserved, data_type, minimum_capacity_items)?),
            6 => RawList::W6(List::create_writer(path, reserved, data_type, minimum_capacity_items)?),
            7 => RawList::W7(List::create_writer(path, reserved, data_type, minimum_capacity_items)?),
            8 => RawList::W8(List::create_writer(path, reserved, data_type, minimum_capacity_items)?),
            _ => unreachable!("compact encodings are 1..=8 bytes wide"),
        })
    }

    fn open_reader(path: &Path, reserved: usize, width: usize) -> Result<Self> {
        Ok(match width {
            1 => RawList::W1(List::open_reader(path, reserved)?),
            2 => RawList::W2(List::open_reader(path, reserved)?),
            3 => RawList::W3(List::open_reader(path, reserved)?),
            4 => RawList::W4(List::open_reader(path, reserved)?),
            5 => RawList::W5(List::open_reader(path, reserved)?),
            6 => RawList::W6(List::open_reader(path, reserved)?),
            7 => RawList::W7(List::open_reader(path, reserved)?),
            8 => RawList::W8(List::open_reader(path, reserved)?),
            _ => unreachable!("compact encodings are 1..=8 bytes wide"),
        })
    }

    fn count(&self) -> u64 {
        raw_dispatch!(self, |l| l.count())
    }

    fn capacity(&self) -> u64 {
        raw_dispatch!(self, |l| l.capacity())
    }

    fn data_type(&self) -> u32 {
        raw_dispatch!(self, |l| l.data_type())
    }

    fn lock_capacity(&self) {
        raw_dispatch!(self, |l| l.lock_capacity())
    }

    fn is_capacity_locked(&self) -> bool {
        raw_dispatch!(self, |l| l.is_capacity_locked())
    }

    fn truncate_tail(&mut self, new_count: u64) -> Result<()> {
        raw_dispatch!(self, |l| l.truncate_tail(new_count))
    }

    fn truncate_head(&mut self, keep: u64) -> Result<()> {
        raw_dispatch!(self, |l| l.truncate_head(keep))
    }

    fn trim_to_count(&mut self) -> Result<()> {
        raw_dispatch!(self, |l| l.trim_to_count())
    }

    fn range_bytes(&self, i: u64, n: u64) -> Result<&[u8]> {
        raw_dispatch!(self, |l| l.range(i, n))
    }

    fn get_bytes(&self, i: u64, out: &mut [u8]) -> Result<()> {
        match self {
            RawList::W1(l) => out[..1].copy_from_slice(&l.get(i)?),
            RawList::W2(l) => out[..2].copy_from_slice(&l.get(i)?),
            RawList::W3(l) => out[..3].copy_from_slice(&l.get(i)?),
            RawList::W4(l) => out[..4].copy_from_slice(&l.get(i)?),
            RawList::W5(l) => out[..5].copy_from_slice(&l.get(i)?),
            RawList::W6(l) => out[..6].copy_from_slice(&l.get(i)?),
            RawList::W7(l) => out[..7].copy_from_slice(&l.get(i)?),
            RawList::W8(l) => out[..8].copy_from_slice(&l.get(i)?),
        }
        Ok(())
    }

    fn append_bytes(&mut self, bytes: &[u8]) -> Result<u64> {
        match self {
            RawList::W1(l) => l.append(bytes.try_into().unwrap()),
            RawList::W2(l) => l.append(bytes.try_into().unwrap()),
            RawList::W3(l) => l.append(bytes.try_into().unwrap()),
            RawList::W4(l) => l.append(bytes.try_into().unwrap()),
            RawList::W5(l) => l.append(bytes.try_into().unwrap()),
            RawList::W6(l) => l.append(bytes.try_into().unwrap()),
            RawList::W7(l) => l.append(bytes.try_into().unwrap()),
            RawList::W8(l) => l.append(bytes.try_into().unwrap()),
        }
    }

    /// Appends every `width`-byte element packed in `flat` (length a
    /// multiple of `width`) in one grow step, via the matching width's
    /// `List::bulk_append`: a single capacity check and a single `count`
    /// publication for the whole batch, per the typed list's own contract.
    fn bulk_append_bytes(&mut self, width: usize, flat: &[u8]) -> Result<u64> {
        debug_assert_eq!(flat.len() % width, 0);
        macro_rules! chunks {
            ($n:expr) => {
                flat.chunks_exact($n)
                    .map(|c| c.try_into().unwrap())
                    .collect::<Vec<[u8; $n]>>()
            };
        }
        match self {
            RawList::W1(l) => l.bulk_append(&chunks!(1)),
            RawList::W2(l) => l.bulk_append(&chunks!(2)),
            RawList::W3(l) => l.bulk_append(&chunks!(3)),
            RawList::W4(l) => l.bulk_append(&chunks!(4)),
            RawList::W5(l) => l.bulk_append(&chunks!(5)),
            RawList::W6(l) => l.bulk_append(&chunks!(6)),
            RawList::W7(l) => l.bulk_append(&chunks!(7)),
            RawList::W8(l) => l.bulk_append(&chunks!(8)),
        }
    }

    fn set_bytes(&mut self, i: u64, bytes: &[u8]) -> Result<()> {
        match self {
            RawList::W1(l) => l.set(i, bytes.try_into().unwrap()),
            RawList::W2(l) => l.set(i, bytes.try_into().unwrap()),
            RawList::W3(l) => l.set(i, bytes.try_into().unwrap()),
            RawList::W4(l) => l.set(i, bytes.try_into().unwrap()),
            RawList::W5(l) => l.set(i, bytes.try_into().unwrap()),
            RawList::W6(l) => l.set(i, bytes.try_into().unwrap()),
            RawList::W7(l) => l.set(i, bytes.try_into().unwrap()),
            RawList::W8(l) => l.set(i, bytes.try_into().unwrap()),
        }
    }
}

/// Presents a compact-integer file as a logical `i64` list.
pub struct CompactList {
    path: PathBuf,
    reserved: usize,
    encoding: Encoding,
    raw: RawList,
    observed_min: Cell<i64>,
    observed_max: Cell<i64>,
    warn_threshold: Cell<Option<f64>>,
    warned: Cell<bool>,
    warn_callback: RefCell<Option<Box<dyn FnMut(f64)>>>,
}

/// Sentinel meaning "no value observed yet".
const UNSEEN_MIN: i64 = i64::MAX;
const UNSEEN_MAX: i64 = i64::MIN;

impl CompactList {
    pub fn create_writer(
        path: &Path,
        reserved: usize,
        encoding: Encoding,
        minimum_capacity_items: u64,
    ) -> Result<Self> {
        upgrade::recover_crash(path)?;
        let raw = RawList::create_writer(
            path,
            reserved,
            encoding.data_type_tag(),
            minimum_capacity_items,
            encoding.bytes(),
        )?;
        let (observed_min, observed_max) = Self::seed_observed_range(&raw, encoding);

        Ok(CompactList {
            path: path.to_path_buf(),
            reserved,
            encoding,
            raw,
            observed_min: Cell::new(observed_min),
            observed_max: Cell::new(observed_max),
            warn_threshold: Cell::new(None),
            warned: Cell::new(false),
            warn_callback: RefCell::new(None),
        })
    }

    pub fn open_reader(path: &Path, reserved: usize, encoding: Encoding) -> Result<Self> {
        upgrade::recover_crash(path)?;
        let raw = RawList::open_reader(path, reserved, encoding.bytes())?;
        let (observed_min, observed_max) = Self::seed_observed_range(&raw, encoding);

        Ok(CompactList {
            path: path.to_path_buf(),
            reserved,
            encoding,
            raw,
            observed_min: Cell::new(observed_min),
            observed_max: Cell::new(observed_max),
            warn_threshold: Cell::new(None),
            warned: Cell::new(false),
            warn_callback: RefCell::new(None),
        })
    }

    /// A reopened non-empty file already holds values guaranteed to lie
    /// within the current encoding's full range; without an O(n) scan at
    /// open, that range is the most precise lower/upper bound available, so
    /// it seeds the observed min/max. A fresh or still-empty file starts
    /// from the "unseen" sentinels instead.
    fn seed_observed_range(raw: &RawList, encoding: Encoding) -> (i64, i64) {
        if raw.count() == 0 {
            (UNSEEN_MIN, UNSEEN_MAX)
        } else {
            (encoding.min_value(), encoding.max_value())
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    pub fn count(&self) -> u64 {
        self.raw.count()
    }

    pub fn capacity(&self) -> u64 {
        self.raw.capacity()
    }

    pub fn lock_capacity(&self) {
        self.raw.lock_capacity()
    }

    pub fn is_capacity_locked(&self) -> bool {
        self.raw.is_capacity_locked()
    }

    pub fn get(&self, i: u64) -> Result<i64> {
        let mut buf = [0u8; 8];
        self.raw.get_bytes(i, &mut buf[..self.encoding.bytes()])?;
        Ok(self.encoding.decode_from(&buf))
    }

    pub fn append(&mut self, value: i64) -> Result<u64> {
        self.check_range(value)?;
        let mut buf = [0u8; 8];
        self.encoding.encode_into(value, &mut buf);
        let idx = self.raw.append_bytes(&buf[..self.encoding.bytes()])?;
        self.record_observation(value);
        Ok(idx)
    }

    pub fn set(&mut self, i: u64, value: i64) -> Result<()> {
        self.check_range(value)?;
        let mut buf = [0u8; 8];
        self.encoding.encode_into(value, &mut buf);
        self.raw.set_bytes(i, &buf[..self.encoding.bytes()])?;
        self.record_observation(value);
        Ok(())
    }

    pub fn set_last(&mut self, value: i64) -> Result<()> {
        let count = self.count();
        if count == 0 {
            return Err(Error::OutOfBounds { index: 0, count: 0 });
        }
        self.set(count - 1, value)
    }

    pub fn bulk_append(&mut self, values: &[i64]) -> Result<u64> {
        if values.is_empty() {
            return Ok(self.count());
        }
        for &v in values {
            self.check_range(v)?;
        }

        let width = self.encoding.bytes();
        let mut flat = vec![0u8; values.len() * width];
        for (slot, &v) in flat.chunks_exact_mut(width).zip(values) {
            let mut buf = [0u8; 8];
            self.encoding.encode_into(v, &mut buf);
            slot.copy_from_slice(&buf[..width]);
        }

        let first_index = self.raw.bulk_append_bytes(width, &flat)?;
        for &v in values {
            self.record_observation(v);
        }
        Ok(first_index)
    }

    pub fn truncate_tail(&mut self, new_count: u64) -> Result<()> {
        self.raw.truncate_tail(new_count)
    }

    pub fn truncate_head(&mut self, keep: u64) -> Result<()> {
        self.raw.truncate_head(keep)
    }

    pub fn trim_to_count(&mut self) -> Result<()> {
        self.raw.trim_to_count()
    }

    /// Borrowed raw-byte view; callers decode with [`Encoding::decode_from`]
    /// at `self.encoding().bytes()`-wide strides.
    pub fn range(&self, i: u64, n: u64) -> Result<&[u8]> {
        self.raw.range_bytes(i, n)
    }

    /// `observed_max(|value|) / allowed_max`, `0.0` on an encoding whose max
    /// is zero (unreachable for any real encoding, guarded defensively).
    pub fn utilization(&self) -> f64 {
        if self.observed_min.get() == UNSEEN_MIN {
            return 0.0;
        }
        let peak = self
            .observed_max
            .get()
            .unsigned_abs()
            .max(self.observed_min.get().unsigned_abs()) as f64;
        let allowed = self.encoding.max_value().unsigned_abs().max(1) as f64;
        peak / allowed
    }

    /// Registers a one-shot callback fired the first time `utilization()`
    /// reaches `threshold` after a write.
    pub fn set_utilization_warning(&self, threshold: f64, callback: impl FnMut(f64) + 'static) {
        self.warn_threshold.set(Some(threshold));
        self.warned.set(false);
        *self.warn_callback.borrow_mut() = Some(Box::new(callback));
    }

    fn check_range(&self, value: i64) -> Result<()> {
        if value < self.encoding.min_value() || value > self.encoding.max_value() {
            let span_min = self.observed_min.get().min(value);
            let span_max = self.observed_max.get().max(value);
            let span_min = if span_min == UNSEEN_MIN { value } else { span_min };
            let span_max = if span_max == UNSEEN_MAX { value } else { span_max };

            return Err(Error::RangeExceeded {
                value,
                encoding: self.encoding,
                suggested: encodings_helpers::smallest_encoding_for(span_min, span_max),
            });
        }
        Ok(())
    }

    fn record_observation(&self, value: i64) {
        let min = self.observed_min.get();
        let max = self.observed_max.get();
        self.observed_min.set(if min == UNSEEN_MIN { value } else { min.min(value) });
        self.observed_max.set(if max == UNSEEN_MAX { value } else { max.max(value) });

        if self.warned.get() {
            return;
        }
        if let Some(threshold) = self.warn_threshold.get() {
            let utilization = self.utilization();
            if utilization >= threshold {
                self.warned.set(true);
                if let Some(cb) = self.warn_callback.borrow_mut().as_mut() {
                    cb(utilization);
                }
            }
        }
    }
}

mod encodings_helpers {
    use super::Encoding;

    const SIGNED_ASCENDING: [Encoding; 8] = [
        Encoding::I8,
        Encoding::I16,
        Encoding::I24,
        Encoding::I32,
        Encoding::I40,
        Encoding::I48,
        Encoding::I56,
        Encoding::I64,
    ];
    const UNSIGNED_ASCENDING: [Encoding; 8] = [
        Encoding::U8,
        Encoding::U16,
        Encoding::U24,
        Encoding::U32,
        Encoding::U40,
        Encoding::U48,
        Encoding::U56,
        Encoding::U64,
    ];

    /// The narrowest encoding that can hold every value in `[min, max]`,
    /// preserving signedness when the span includes a negative value.
    pub fn smallest_encoding_for(min: i64, max: i64) -> Encoding {
        let candidates = if min < 0 { &SIGNED_ASCENDING } else { &UNSIGNED_ASCENDING };
        for &enc in candidates {
            if min >= enc.min_value() && max <= enc.max_value() {
                return enc;
            }
        }
        if min < 0 {
            Encoding::I64
        } else {
            Encoding::U64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overflow_suggests_next_width() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("compact.bin");
        let mut list = CompactList::create_writer(&path, 0, Encoding::U24, 4).unwrap();

        list.append(0).unwrap();
        list.append(1_000_000).unwrap();

        let err = list.append(16_777_216).unwrap_err();
        match err {
            Error::RangeExceeded { suggested, .. } => assert_eq!(suggested, Encoding::U32),
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(list.count(), 2);
    }

    #[test]
    fn bulk_append_matches_individual_appends_and_rejects_whole_batch_on_overflow() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("compact.bin");
        let mut list = CompactList::create_writer(&path, 0, Encoding::I16, 4).unwrap();

        let start = list.bulk_append(&[1, -2, 3, -4]).unwrap();
        assert_eq!(start, 0);
        assert_eq!(list.count(), 4);
        for (i, expected) in [1i64, -2, 3, -4].into_iter().enumerate() {
            assert_eq!(list.get(i as u64).unwrap(), expected);
        }

        let err = list.bulk_append(&[5, 40_000]).unwrap_err();
        assert!(matches!(err, Error::RangeExceeded { .. }));
        assert_eq!(list.count(), 4, "a batch with any out-of-range value must not append any of it");
    }

    #[test]
    fn utilization_warning_fires_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("compact.bin");
        let mut list = CompactList::create_writer(&path, 0, Encoding::I16, 4).unwrap();

        let fired = std::rc::Rc::new(Cell::new(0u32));
        let fired_clone = fired.clone();
        list.set_utilization_warning(0.5, move |_| {
            fired_clone.set(fired_clone.get() + 1);
        });

        list.append(100).unwrap();
        list.append(20_000).unwrap();
        list.append(20_001).unwrap();

        assert_eq!(fired.get(), 1);
    }
}
