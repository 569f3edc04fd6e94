//! Error types for bus operations.

use thiserror::Error;

/// Errors that can occur during object bus operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BusError {
    /// Instance index beyond the record's instance count.
    #[error("no such instance: {index} (record has {count})")]
    NoSuchInstance {
        /// Requested instance index.
        index: usize,
        /// Number of instances the record holds.
        count: usize,
    },
}
