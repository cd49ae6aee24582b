//! Engine-wide constants
//!
//! Single source of truth for defaults used by [`EngineConfig`](crate::EngineConfig)
//! and the combinators.

/// Default values for engine configuration
pub mod defaults {
    /// Iteration bound used by loops that do not set their own
    pub const MAX_ITERATIONS: u32 = 10;
    /// First retry delay
    pub const RETRY_BACKOFF_BASE_MS: u64 = 250;
    /// Upper bound on any single retry delay
    pub const RETRY_BACKOFF_MAX_MS: u64 = 10_000;
    /// Whether finished-worker events keep their payloads
    pub const RECORD_PAYLOADS: bool = true;
    /// Config file name inside a config directory
    pub const CONFIG_FILE: &str = "switchyard.json";
}

/// Prefixes for generated identifiers
pub mod ids {
    /// Prefix of generated run identifiers
    pub const RUN_PREFIX: &str = "run";
}
