//! # Memory Error Types
//!
//! All errors that can occur in the memory subsystem.
//!
//! These only surface on construction, configuration, and lifecycle paths.
//! Allocation failure on the hot path is signaled by returning `None`,
//! never by an error value.

use thiserror::Error;

/// Errors that can occur in the memory subsystem.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    /// The system refused to commit an arena of the requested size.
    ///
    /// Fatal for stack allocators, which have no degraded mode. Pools
    /// survive it and retry through on-demand growth.
    #[error("arena commit failed: requested {requested} bytes")]
    ArenaCommitFailed {
        /// Bytes requested from the system allocator.
        requested: usize,
    },

    /// A size/alignment pair cannot form a valid memory layout.
    #[error("invalid layout: size {size}, alignment {align}")]
    InvalidLayout {
        /// Requested size in bytes.
        size: usize,
        /// Requested alignment in bytes.
        align: usize,
    },

    /// A configuration value violated an invariant.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A configuration file could not be read or parsed.
    #[error("config file error: {path}: {message}")]
    ConfigFile {
        /// Path of the offending file.
        path: String,
        /// Underlying read or parse failure.
        message: String,
    },
}

/// Result type for memory operations.
pub type MemoryResult<T> = Result<T, MemoryError>;
