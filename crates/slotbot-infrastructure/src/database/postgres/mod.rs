//! PostgreSQL repository implementations

pub mod booking_repo_impl;
pub mod user_repo_impl;

pub use booking_repo_impl::PgBookingRepository;
pub use user_repo_impl::PgUserRepository;
