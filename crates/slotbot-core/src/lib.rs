//! # Slotbot Core
//! 
//! Domain entities, ports, and the concurrency primitives of the booking flow:
//! request contexts, the keyed token-bucket limiter, and the session store.

pub mod context;
pub mod domain;
pub mod error;
pub mod ratelimit;
pub mod repositories;
pub mod services;

// Re-export domain entities
pub use context::{Interrupted, RequestContext};
pub use domain::*;
pub use error::DomainError;
