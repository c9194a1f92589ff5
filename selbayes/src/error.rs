//! Error types shared by the grid, column-store and selection subsystems.

use thiserror::Error;

/// Errors reported by the preparation and training entry points.
#[derive(Debug, Error)]
pub enum Error {
    /// A structural precondition of a public operation does not hold, e.g. a
    /// cell added outside cell-update mode or a duplicate part tuple. The
    /// message names the offending entity.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
    /// The recoding-vector pool could not be sized for even a single column.
    #[error("insufficient memory: {0}")]
    InsufficientMemory(String),
    /// The temp directory cannot hold the chunk files about to be written.
    #[error("insufficient disk space on temp dir: needs at least {needed} bytes of {available} available")]
    InsufficientDiskSpace {
        /// Estimated number of bytes the chunk files require.
        needed: u64,
        /// Configured number of bytes available on the temp directory.
        available: u64,
    },
    /// A chunk file could not be read or written.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// The cancellation token was observed during a blocking operation.
    #[error("training interrupted")]
    Cancelled,
    /// An invalid combination of configuration parameters.
    #[error("invalid configuration: {0}")]
    Configuration(String),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
