/// L2 capacity is fixed at this multiple of the L1 capacity.
pub const L2_SIZE_MULTIPLIER: u64 = 8;

pub const L1_LEVEL_ID: u8 = 1;
pub const L2_LEVEL_ID: u8 = 2;

/// Upper bound on the lines of a single cache level.
pub const MAX_CACHE_LINES: u64 = 1 << 20;

// Defaults used by the CLI when a subsystem is pre-initialized without
// explicit geometry.
pub const DEFAULT_MEMORY_SIZE: u64 = 1024;
pub const DEFAULT_CACHE_SIZE: u64 = 256;
pub const DEFAULT_BLOCK_SIZE: u64 = 16;
pub const DEFAULT_ASSOCIATIVITY: u64 = 2;
pub const DEFAULT_PAGE_SIZE: u64 = 64;

pub const STRATEGY_FIRST: &str = "first";
pub const STRATEGY_BEST: &str = "best";
pub const STRATEGY_WORST: &str = "worst";

/// Environment variable consulted for the log level.
pub const LOG_ENV: &str = "LOG";
