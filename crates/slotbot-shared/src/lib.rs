//! # Slotbot Shared
//! 
//! Shared configuration, telemetry, metrics, and error types for the slot booking bot.

pub mod constants;
pub mod config;
pub mod error;
pub mod metrics;
pub mod telemetry;

pub use config::AppConfig;
pub use error::AppError;
pub use metrics::Metrics;
