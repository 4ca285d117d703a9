use bitflags::bitflags;
use once_cell::sync::Lazy;

// Request flags
bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct RequestFlags: u32 {
        /// The operation has run (or the open/delete algorithm has passed its queue)
        const PROCESSED = 0x01;
        /// The result or error has been delivered
        const DONE = 0x02;
    }
}

// Index flags
bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct IndexFlags: u32 {
        /// No two index records may share a key
        const UNIQUE = 0x01;
        /// Array-valued keys produce one index record per element
        const MULTI_ENTRY = 0x02;
    }
}

/// Largest number a key generator hands out (2^53)
pub const MAX_GENERATED_KEY: u64 = 9_007_199_254_740_992;

/// First number handed out by a fresh key generator
pub const KEY_GENERATOR_START: u64 = 1;

/// Version used when opening a database that does not exist yet without a version
pub const DEFAULT_OPEN_VERSION: u64 = 1;

/// Upper bound on tasks and continuations processed by one `run_until_idle` call
pub const DEFAULT_MAX_TURNS: usize = 1_000_000;

/// Environment variable overriding [`DEFAULT_MAX_TURNS`]
pub const MAX_TURNS_VAR: &str = "LUMIDB_MAX_TURNS";

/// Process default for the run-loop budget, read once from the environment
pub static MAX_TURNS: Lazy<usize> = Lazy::new(|| {
    std::env::var(MAX_TURNS_VAR)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .filter(|turns| *turns > 0)
        .unwrap_or(DEFAULT_MAX_TURNS)
});
