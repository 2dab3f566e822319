// ABOUTME: Small constants bag: version, REPL prompt, default heap ceiling

/// Test-time setting per the original's own comment: `2500 //15000 //1GB`.
pub const DEFAULT_HEAP_LIMIT: usize = 1 << 20;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub const REPL_PROMPT: &str = "> ";
