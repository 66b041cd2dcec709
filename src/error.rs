use std::error;
use std::fmt;

/// An error raised while constructing an [`Index`](crate::Index).
///
/// This is the crate's only recoverable error: once an index is constructed, every other
/// operation is total (see the crate-level docs for the failure model).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LshError {
    /// `L`, the number of hash tables, was zero.
    ///
    /// An index with no tables cannot store or retrieve anything, so this is rejected rather
    /// than silently constructing a useless index.
    NoTables,
    /// `reservoir_capacity` was zero.
    ///
    /// A zero-capacity reservoir can never retain a sampled id, which is never what a caller
    /// actually wants.
    EmptyReservoir,
    /// `range_pow` is too large to compute `1usize << range_pow` on this platform, or the
    /// resulting bucket count would make `L * R` overflow `usize`.
    RangeTooLarge,
}

impl fmt::Display for LshError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            LshError::NoTables => write!(f, "LSH index must have at least one hash table (L > 0)"),
            LshError::EmptyReservoir => write!(f, "reservoir capacity must be greater than zero"),
            LshError::RangeTooLarge => write!(f, "range_pow is too large for this platform's usize"),
        }
    }
}

impl error::Error for LshError {}
