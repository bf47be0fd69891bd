//! Application-wide constants

pub const DEFAULT_SESSION_TTL_SECS: u64 = 24 * 60 * 60;
pub const DEFAULT_SESSION_KEY_PREFIX: &str = "session:user:";
pub const DEFAULT_GLOBAL_RPS: f64 = 30.0;
pub const DEFAULT_GLOBAL_BURST: u32 = 1;
pub const DEFAULT_MESSAGE_RPS: f64 = 1.0;
pub const DEFAULT_MESSAGE_BURST: u32 = 1;
pub const DEFAULT_BUCKET_IDLE_SECS: u64 = 600;
pub const DEFAULT_HANDLER_TIMEOUT_MS: u64 = 10_000;
pub const METRICS_PREFIX: &str = "bot_";
pub const GLOBAL_LIMITER_KEY: &str = "global";
