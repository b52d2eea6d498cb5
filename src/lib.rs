//! A memory-mapped, append-only, cross-process time-series list storage
//! engine.
//!
//! In short, *tsmmap* opens a file, maps it wholly into virtual memory, and
//! provides a typed, random-access, append-optimized list over it, shared
//! safely between exactly one writer and any number of readers in any
//! process on the machine. The use case is time-series data (ticks, ticks of
//! ticks, compact sensor readings) that needs to be appended by one process
//! and observed live by others without a broker, a socket, or a copy.
//!
//! *CAUTION:* This crate uses a lot of *unsafe* and OS-specific APIs.
//! Correctness across the writer/reader boundary hinges on exactly two
//! invariants: the count field is updated with single-instruction atomicity,
//! and an element's payload is always written before the count that exposes
//! it. Read the concurrency section below before reaching for these types in
//! a context that can't guarantee them.
//!
//! # Usage
//!
//! Add this to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! tsmmap = "0.1"
//! ```
//!
//! Then reach for the list flavor matching your data:
//!
//! * [`List<T>`], fixed-width elements (`i8`..`u64`, `f32`, `f64`), no
//!   range checks beyond bounds.
//! * [`compact::CompactList`], logically `i64`-typed, with the narrowest
//!   on-disk width that currently fits the observed range, and an explicit
//!   width-upgrade path (`compact::upgrade`).
//! * [`TimeSeries`], a [`List<i32>`] of Unix-second timestamps with an
//!   ordering policy and binary/interpolation search.
//! * [`BitList`], one bit per element, word-parallel boolean ops.
//!
//! # Examples
//!
//! Append ticks from one process, observe them from another without ever
//! closing the reader's handle.
//!
//! ```no_run
//! use tsmmap::List;
//!
//! let mut writer: List<i64> = List::create_writer(
//!     "ticks.bin".as_ref(), 0, tsmmap::tags::I64, 1024,
//! ).unwrap();
//! writer.append(1).unwrap();
//! writer.append(2).unwrap();
//!
//! let reader: List<i64> = List::open_reader("ticks.bin".as_ref(), 0).unwrap();
//! assert_eq!(reader.count(), 2);
//! ```
//!
//! # Errors
//!
//! Every fallible operation returns [`Error`]: wrapped I/O failures, bounds
//! violations, capacity-lock rejections, time-series ordering violations,
//! and compact-encoding range overflows all carry the context needed to act
//! on them without re-deriving it at the call site.
//!
//! # Panics
//!
//! This crate does not panic on caller-reachable misuse; out-of-range
//! indices, capacity-lock violations, and encoding overflows are all
//! reported through [`Error`]. Internal invariant violations (a corrupt
//! reserved-header slot, a poisoned internal mutex) still panic, since they
//! indicate a bug rather than a recoverable runtime condition.
//!
//! # Concurrency & sharing
//!
//! At most one writer may hold a given file, enforced process-wide by
//! [`lock::WriterLock`]. Any number of readers may observe it concurrently,
//! in any process, with no per-operation locking inside the container:
//! correctness rests entirely on the count field's atomic publication and
//! write-before-publish ordering. A reader whose own mapped view predates a
//! writer's growth re-maps itself lazily, on the next access past its own
//! capacity.
//!
//! # Locking
//!
//! *tsmmap* enforces single-writer exclusivity two ways depending on
//! platform: a native exclusive share-mode open on Windows, and a sidecar
//! lock file with create-new/stale-reclaim semantics on Unix (see
//! [`lock`]). Neither depends on advisory locking being honored by other
//! processes for *correctness* (only the writer-exclusivity guarantee is
//! load-bearing; best-effort external-modification resistance on Unix is a
//! secondary, non-load-bearing convenience).
//!
//! # Name
//!
//! A time-series list, memory-mapped. No deeper metaphor than that.

#![deny(missing_docs)]

use std::path::Path;

mod align;
mod ext;

pub mod adapters;
pub mod bitlist;
pub mod compact;
pub mod datetime;
pub mod error;
pub mod header;
pub mod list;
pub mod lock;
pub mod os;
pub mod region;
pub mod registry;
pub mod tags;
pub mod timeseries;

#[cfg(unix)]
mod unix;
#[cfg(windows)]
mod windows;

pub use bitlist::BitList;
pub use compact::{CompactList, Encoding};
pub use error::{Error, Result};
pub use list::{Element, List};
pub use timeseries::{Ordering, Strategy, TimeSeries};

/// Open-time configuration shared by the [`open_writer`]/[`open_reader`]
/// convenience constructors: a plain builder struct rather than a
/// file-format config (the crate consumes no environment variables and owns
/// no config file), matching the direct-argument constructor style of
/// [`List::create_writer`]/[`List::open_reader`] themselves.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    reserved: usize,
    minimum_capacity_items: u64,
    lock_capacity_on_open: bool,
}

impl Config {
    /// Starts from the defaults: no reserved prefix, no initial capacity
    /// hint, capacity not locked.
    pub fn new() -> Self {
        Config {
            reserved: 0,
            minimum_capacity_items: 0,
            lock_capacity_on_open: false,
        }
    }

    /// Sets the reserved sub-header prefix size, in bytes. Must be a
    /// multiple of 8.
    pub fn reserved(mut self, bytes: usize) -> Self {
        self.reserved = bytes;
        self
    }

    /// Sets the initial capacity hint, in elements. Only meaningful for a
    /// writer; ignored when opening a reader.
    pub fn minimum_capacity(mut self, items: u64) -> Self {
        self.minimum_capacity_items = items;
        self
    }

    /// Locks capacity immediately after open, rejecting any later operation
    /// that would otherwise remap (see [`List::lock_capacity`]).
    pub fn lock_capacity_on_open(mut self, lock: bool) -> Self {
        self.lock_capacity_on_open = lock;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

/// Creates (or reopens for writing) a fixed-width list at `path`, per
/// `config`. Convenience wrapper over [`List::create_writer`].
pub fn open_writer<T: Element>(path: &Path, data_type: u32, config: &Config) -> Result<List<T>> {
    let mut list = List::create_writer(
        path,
        config.reserved,
        data_type,
        config.minimum_capacity_items,
    )?;
    if config.lock_capacity_on_open {
        list.lock_capacity();
    }
    Ok(list)
}

/// Opens an existing fixed-width list read-only, per `config`. Convenience
/// wrapper over [`List::open_reader`].
pub fn open_reader<T: Element>(path: &Path, config: &Config) -> Result<List<T>> {
    let list = List::open_reader(path, config.reserved)?;
    if config.lock_capacity_on_open {
        list.lock_capacity();
    }
    Ok(list)
}

/// Test-only support shared across this crate's unit-test modules.
#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Once;

    static INIT: Once = Once::new();

    /// Installs a `tracing_subscriber` fmt layer once per test binary, so
    /// `RUST_LOG=tsmmap=trace cargo test -- --nocapture` surfaces the
    /// `debug!`/`trace!` calls in `region.rs`/`lock.rs`/`compact/upgrade.rs`.
    /// Safe to call from every test; only the first call installs anything.
    pub fn init_tracing() {
        INIT.call_once(|| {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                .with_test_writer()
                .try_init();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_writer_then_open_reader_round_trip() {
        test_support::init_tracing();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.bin");
        let config = Config::new().minimum_capacity(4);

        let mut writer: List<i64> = open_writer(&path, tags::I64, &config).unwrap();
        writer.append(42).unwrap();
        drop(writer);

        let reader: List<i64> = open_reader(&path, &Config::new()).unwrap();
        assert_eq!(reader.count(), 1);
        assert_eq!(reader.get(0).unwrap(), 42);
    }

    #[test]
    fn lock_capacity_on_open_rejects_growth() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("locked.bin");
        let config = Config::new().minimum_capacity(1).lock_capacity_on_open(true);

        let mut writer: List<i64> = open_writer(&path, tags::I64, &config).unwrap();
        let big = vec![0i64; 1_000_000];
        assert!(matches!(
            writer.bulk_append(&big),
            Err(Error::CapacityLocked)
        ));
    }
}
