//! # Pool Configuration
//!
//! Plain data record describing a pool, loadable from TOML.
//!
//! Config files are read once at startup. Every field has a default so a
//! partial `[pool]` table (or an empty one) still produces a valid config.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{MemoryError, MemoryResult};

/// Default initial arena size: 1 MiB.
pub const DEFAULT_INITIAL_SIZE: usize = 1024 * 1024;

/// Default maximum total size: 100 MiB.
pub const DEFAULT_MAX_SIZE: usize = 100 * 1024 * 1024;

/// Default minimum split granularity: 4 KiB.
pub const DEFAULT_BLOCK_GRANULARITY: usize = 4096;

/// Default allocation alignment: 16 bytes.
pub const DEFAULT_ALIGNMENT: usize = 16;

/// Configuration for a [`MemoryPool`](crate::pool::MemoryPool).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Size of the first arena committed at construction, in bytes.
    ///
    /// Zero is allowed: the pool starts empty and commits its first
    /// arena on demand.
    pub initial_size: usize,
    /// Upper bound on the total bytes the pool may commit across all
    /// arenas. Growth stops here.
    pub max_size: usize,
    /// Minimum viable split size in bytes. A free block is only split
    /// when the leftover tail would be at least this large; growth
    /// commits at least this many bytes.
    pub block_granularity: usize,
    /// Default alignment in bytes for requests that do not specify one.
    /// Must be a power of two. Arenas are committed at this alignment.
    pub alignment: usize,
    /// Whether allocations from this pool are reported to the tracker.
    pub tracking_enabled: bool,
    /// Human-readable name used in diagnostics and as the tracking tag.
    pub name: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            initial_size: DEFAULT_INITIAL_SIZE,
            max_size: DEFAULT_MAX_SIZE,
            block_granularity: DEFAULT_BLOCK_GRANULARITY,
            alignment: DEFAULT_ALIGNMENT,
            tracking_enabled: true,
            name: "DefaultPool".to_string(),
        }
    }
}

impl PoolConfig {
    /// Returns the default config with a custom diagnostic name.
    ///
    /// # Arguments
    ///
    /// * `name` - Pool name used in logs and tracking tags
    #[must_use]
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    /// Loads and validates a config from a TOML file.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to a TOML file whose top level is a `PoolConfig` table
    ///
    /// # Errors
    ///
    /// [`MemoryError::ConfigFile`] if the file cannot be read or parsed,
    /// [`MemoryError::InvalidConfig`] if a field violates an invariant.
    pub fn from_toml<P: AsRef<Path>>(path: P) -> MemoryResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| MemoryError::ConfigFile {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        let config: Self = toml::from_str(&text).map_err(|e| MemoryError::ConfigFile {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Checks the config invariants.
    ///
    /// # Errors
    ///
    /// [`MemoryError::InvalidConfig`] when `max_size < initial_size`,
    /// `block_granularity` is zero, or `alignment` is not a power of two.
    pub fn validate(&self) -> MemoryResult<()> {
        if self.max_size < self.initial_size {
            return Err(MemoryError::InvalidConfig(format!(
                "max_size ({}) must be >= initial_size ({})",
                self.max_size, self.initial_size
            )));
        }
        if self.block_granularity == 0 {
            return Err(MemoryError::InvalidConfig(
                "block_granularity must be nonzero".to_string(),
            ));
        }
        if !self.alignment.is_power_of_two() {
            return Err(MemoryError::InvalidConfig(format!(
                "alignment ({}) must be a power of two",
                self.alignment
            )));
        }
        Ok(())
    }
}
