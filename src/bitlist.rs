//! A 1-bit-per-element list layered over a typed list
//! of 8-byte words, with word-parallel boolean operations.
//!
//! The logical bit count is not recoverable from the word count alone (the
//! last word may be partially used), so it is kept in the file's reserved
//! sub-header (the reserved `H` prefix) rather than only in memory.

use std::path::Path;

use crate::error::{Error, Result};
use crate::list::List;

const BITS_PER_WORD: u64 = 64;

/// Reserved prefix size: one 8-byte slot holding the logical bit length.
const RESERVED_BYTES: usize = 8;

/// A 1-bit-per-element list. The underlying word list always holds a whole
/// number of 8-byte words; the logical length is tracked separately (in the
/// reserved header slot) so the last partial word's unused high bits never
/// leak into `popcount`/`and`/`or`/`xor`/`not`.
pub struct BitList {
    words: List<u64>,
}

fn word_count_for(bits: u64) -> u64 {
    (bits + BITS_PER_WORD - 1) / BITS_PER_WORD
}

impl BitList {
    pub fn create_writer(path: &Path, minimum_bits: u64) -> Result<Self> {
        let words = List::create_writer(
            path,
            RESERVED_BYTES,
            crate::tags::BIT,
            word_count_for(minimum_bits),
        )?;
        let list = BitList { words };
        list.store_len(0);
        Ok(list)
    }

    pub fn open_reader(path: &Path) -> Result<Self> {
        let words = List::open_reader(path, RESERVED_BYTES)?;
        Ok(BitList { words })
    }

    fn load_len(&self) -> u64 {
        // SAFETY: the reserved slot is written before any bit op returns and
        // is exactly RESERVED_BYTES (8) bytes, matching a u64.
        unsafe { (self.words.reserved_ptr() as *const u64).read_unaligned() }
    }

    fn store_len(&self, len: u64) {
        // SAFETY: same as `load_len`; writers only.
        unsafe {
            (self.words.reserved_ptr() as *mut u64).write_unaligned(len);
        }
    }

    pub fn len(&self) -> u64 {
        self.load_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, i: u64) -> Result<bool> {
        let len = self.len();
        if i >= len {
            return Err(Error::OutOfBounds { index: i, count: len });
        }
        let word = self.words.get(i / BITS_PER_WORD)?;
        Ok((word >> (i % BITS_PER_WORD)) & 1 == 1)
    }

    pub fn set(&mut self, i: u64, value: bool) -> Result<()> {
        let len = self.len();
        if i >= len {
            return Err(Error::OutOfBounds { index: i, count: len });
        }
        let word_idx = i / BITS_PER_WORD;
        let bit = i % BITS_PER_WORD;
        let mut word = self.words.get(word_idx)?;
        if value {
            word |= 1 << bit;
        } else {
            word &= !(1 << bit);
        }
        self.words.set(word_idx, word)
    }

    pub fn append(&mut self, value: bool) -> Result<u64> {
        let len = self.len();
        let word_idx = len / BITS_PER_WORD;
        let bit = len % BITS_PER_WORD;

        if bit == 0 {
            self.words.append(if value { 1 } else { 0 })?;
        } else if value {
            let mut word = self.words.get(word_idx)?;
            word |= 1 << bit;
            self.words.set(word_idx, word)?;
        }

        self.store_len(len + 1);
        Ok(len)
    }

    pub fn truncate_tail(&mut self, new_len: u64) -> Result<()> {
        let len = self.len();
        if new_len > len {
            return Err(Error::invalid_argument(format!(
                "truncate_tail: new_len {} exceeds len {}",
                new_len, len
            )));
        }
        self.words.truncate_tail(word_count_for(new_len))?;
        self.store_len(new_len);
        Ok(())
    }

    /// Clears bits past `len` in the final word so word-parallel ops never
    /// see stale high bits as logical elements.
    fn masked_last_word(&self, len: u64, word: u64) -> u64 {
        let total_words = word_count_for(len);
        if total_words == 0 {
            return 0;
        }
        let used_bits_in_last = len - (total_words - 1) * BITS_PER_WORD;
        if used_bits_in_last >= BITS_PER_WORD {
            word
        } else {
            word & ((1u64 << used_bits_in_last) - 1)
        }
    }

    /// Word-parallel `self & other`, written into a freshly created list at
    /// `out_path`.
    pub fn and(&self, other: &BitList, out_path: &Path) -> Result<BitList> {
        self.zip_with(other, out_path, |a, b| a & b)
    }

    pub fn or(&self, other: &BitList, out_path: &Path) -> Result<BitList> {
        self.zip_with(other, out_path, |a, b| a | b)
    }

    pub fn xor(&self, other: &BitList, out_path: &Path) -> Result<BitList> {
        self.zip_with(other, out_path, |a, b| a ^ b)
    }

    pub fn not(&self, out_path: &Path) -> Result<BitList> {
        let len = self.len();
        let words = word_count_for(len);
        let mut out = BitList::create_writer(out_path, len)?;
        for idx in 0..words {
            let word = self.masked_last_word(len, !self.words.get(idx)?);
            out.words.append(word)?;
        }
        out.store_len(len);
        Ok(out)
    }

    fn zip_with(
        &self,
        other: &BitList,
        out_path: &Path,
        op: impl Fn(u64, u64) -> u64,
    ) -> Result<BitList> {
        let len = self.len();
        if len != other.len() {
            return Err(Error::invalid_argument(format!(
                "bit list length mismatch: {} vs {}",
                len,
                other.len()
            )));
        }

        let words = word_count_for(len);
        let mut out = BitList::create_writer(out_path, len)?;
        for idx in 0..words {
            let a = self.words.get(idx)?;
            let b = other.words.get(idx)?;
            let combined = self.masked_last_word(len, op(a, b));
            out.words.append(combined)?;
        }
        out.store_len(len);
        Ok(out)
    }

    /// Total number of set bits across the logical length.
    pub fn popcount(&self) -> Result<u64> {
        let len = self.len();
        let words = word_count_for(len);
        let mut total = 0u64;
        for idx in 0..words {
            let word = self.masked_last_word(len, self.words.get(idx)?);
            total += word.count_ones() as u64;
        }
        Ok(total)
    }
}
