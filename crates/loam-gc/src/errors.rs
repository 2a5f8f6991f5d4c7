//! Mutator-visible, recoverable errors.
//!
//! Fatal conditions (out-of-memory, ID-space exhaustion, invariant
//! violations) never surface here: OOM aborts the process and invariant
//! violations panic under strict mode. This type only carries errors the
//! embedding program is expected to catch, and they are raised before any
//! allocation is attempted.

use thiserror::Error;

/// A recoverable error from a mutator-level heap API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GcError {
    /// An array capacity request exceeded the maximum representable element
    /// count.
    #[error("Requested an array size larger than the max allowable: Requested elements = {requested}, max elements = {max}")]
    ExcessiveCapacity {
        /// The capacity the caller asked for.
        requested: u32,
        /// The largest capacity the storage can represent.
        max: u32,
    },
}

/// Result alias for mutator-level heap APIs.
pub type GcResult<T> = Result<T, GcError>;
