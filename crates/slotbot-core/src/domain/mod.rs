//! # Slotbot Core - Domain Module
//! 
//! Domain entities for bookings, registered users and conversation sessions.

pub mod booking;
pub mod session;
pub mod user;

pub use booking::{
    Booking, BookingId, BookingStatus, GuestInfo, ReservationRequest, ReserveOutcome, SlotKey,
};
pub use session::{Session, StateData};
pub use user::{NewUser, User};
