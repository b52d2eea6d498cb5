//! The typed error taxonomy.
//!
//! Every fallible operation in this crate returns one of these variants
//! rather than an opaque `io::Error`; each variant carries enough context
//! (path, offending value, observed count) to act on without re-deriving it
//! from the call site.

use std::path::PathBuf;

use crate::compact::Encoding;

/// The crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong when opening or operating on a mapped list.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Another writer already holds the file, system-wide.
    #[error("{path:?} is already open for writing by another process")]
    AlreadyOpen {
        /// The data file path.
        path: PathBuf,
    },

    /// The host is not a 64-bit address space.
    #[error("this platform is not supported: 64-bit addressing is required")]
    NotSupportedOnThisPlatform,

    /// A constructor argument was out of its documented range.
    #[error("invalid argument: {reason}")]
    InvalidArgument {
        /// Human-readable explanation.
        reason: String,
    },

    /// An index fell outside `[0, count)`.
    #[error("index {index} out of bounds (count = {count})")]
    OutOfBounds {
        /// The offending index.
        index: u64,
        /// The count at the time of the access.
        count: u64,
    },

    /// The list was switched into capacity-locked mode and the operation
    /// would have required a remap.
    #[error("list is capacity-locked, cannot remap")]
    CapacityLocked,

    /// An append or update would have broken the configured time-series
    /// ordering.
    #[error("value {value} violates {ordering:?} ordering (previous = {previous})")]
    OrderViolation {
        /// The value that was rejected.
        value: i64,
        /// The previous value it was compared against.
        previous: i64,
        /// The ordering policy in effect.
        ordering: crate::timeseries::Ordering,
    },

    /// A compact-integer write fell outside the encoding's representable
    /// range.
    #[error("value {value} exceeds the range of {encoding:?}, consider upgrading to {suggested:?}")]
    RangeExceeded {
        /// The value that was rejected.
        value: i64,
        /// The encoding currently in use.
        encoding: Encoding,
        /// The smallest encoding that could hold the value (and any
        /// already-observed range).
        suggested: Encoding,
    },

    /// A requested span exceeds the 32-bit span-length limit.
    #[error("span length {requested} exceeds the 32-bit span limit")]
    IntegerRangeOnly {
        /// The length that was requested.
        requested: u64,
    },

    /// A read observed an index that was valid before a concurrent
    /// truncation removed it.
    #[error("index {index} was truncated away (count is now {count})")]
    Truncated {
        /// The index that is no longer valid.
        index: u64,
        /// The count observed after truncation.
        count: u64,
    },

    /// A wrapped OS error.
    #[error("I/O error on {path:?}: {source}")]
    Io {
        /// The path the operation concerned, if known.
        path: PathBuf,
        /// The underlying OS error.
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn invalid_argument(reason: impl Into<String>) -> Self {
        Error::InvalidArgument {
            reason: reason.into(),
        }
    }
}
