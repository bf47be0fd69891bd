//! Repository traits (ports)

pub mod booking_repository;
pub mod key_value_store;
pub mod user_repository;

pub use booking_repository::BookingRepository;
pub use key_value_store::KeyValueStore;
pub use user_repository::UserRepository;
