// ============================================================================
// Slotbot - Booking Conversation Handler
// File: crates/slotbot-bot/src/handlers/booking.rs
// ============================================================================
//! Text-command booking conversation.
//!
//! `/start` registers the sender when a user registry is attached.
//! `/book` opens a draft in the session (`awaiting_guest_name`), the next
//! message names the guest (`awaiting_confirmation`), and `yes` moves the
//! session to `reserving` before the slot is claimed.

use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime, Utc};
use serde_json::{json, Value};
use slotbot_core::repositories::{BookingRepository, KeyValueStore, UserRepository};
use slotbot_core::services::SessionStore;
use slotbot_core::{
    BookingId, BookingStatus, DomainError, GuestInfo, NewUser, RequestContext,
    ReservationRequest, ReserveOutcome, Session, StateData,
};
use slotbot_shared::config::ServiceEntry;
use slotbot_shared::Metrics;
use tracing::{debug, info};

use super::UpdateHandler;
use crate::transport::InboundEvent;

pub const STATE_MENU: &str = "menu";
pub const STATE_AWAITING_GUEST_NAME: &str = "awaiting_guest_name";
pub const STATE_AWAITING_CONFIRMATION: &str = "awaiting_confirmation";
pub const STATE_RESERVING: &str = "reserving";

pub const SLOT_TAKEN_REPLY: &str =
    "Sorry, this slot was just taken by someone else. Pick another one with /slots.";

const HELP: &str = "Commands:\n\
/services - list services\n\
/slots <service> <YYYY-MM-DD> - open slots\n\
/book <service> <YYYY-MM-DD> [HH:MM] - book a slot\n\
/my - your bookings\n\
/cancel <id> - cancel a booking\n\
/reset - start over";

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Start,
    Services,
    Slots { service_id: i32, date: NaiveDate },
    Book { service_id: i32, date: NaiveDate, time: Option<NaiveTime> },
    My,
    Cancel(BookingId),
    Reset,
    Text(String),
}

/// `Err` carries the usage text to send back.
fn parse_command(text: &str) -> Result<Command, String> {
    let text = text.trim();
    if !text.starts_with('/') {
        return Ok(Command::Text(text.to_string()));
    }

    let mut parts = text.split_whitespace();
    let name = parts.next().unwrap_or_default();
    let args: Vec<&str> = parts.collect();

    match (name, args.as_slice()) {
        ("/start", _) => Ok(Command::Start),
        ("/help", _) => Ok(Command::Start),
        ("/services", _) => Ok(Command::Services),
        ("/my", _) => Ok(Command::My),
        ("/reset", _) => Ok(Command::Reset),
        ("/slots", [service, date]) => Ok(Command::Slots {
            service_id: parse_service(service)?,
            date: parse_date(date)?,
        }),
        ("/slots", _) => Err("Usage: /slots <service> <YYYY-MM-DD>".into()),
        ("/book", [service, date, rest @ ..]) if rest.len() <= 1 => Ok(Command::Book {
            service_id: parse_service(service)?,
            date: parse_date(date)?,
            time: rest.first().map(|t| parse_time(t)).transpose()?,
        }),
        ("/book", _) => Err("Usage: /book <service> <YYYY-MM-DD> [HH:MM]".into()),
        ("/cancel", [id]) => id
            .parse::<BookingId>()
            .map(Command::Cancel)
            .map_err(|_| format!("'{}' is not a booking number", id)),
        ("/cancel", _) => Err("Usage: /cancel <id>".into()),
        (other, _) => Err(format!("Unknown command {}. Send /start for help.", other)),
    }
}

fn parse_service(s: &str) -> Result<i32, String> {
    s.parse().map_err(|_| format!("'{}' is not a service number", s))
}

fn parse_date(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| format!("'{}' is not a date (YYYY-MM-DD)", s))
}

fn parse_time(s: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(s, "%H:%M").map_err(|_| format!("'{}' is not a time (HH:MM)", s))
}

fn format_time(t: Option<NaiveTime>) -> String {
    match t {
        Some(t) => t.format("%H:%M").to_string(),
        None => "any time".to_string(),
    }
}

/// A booking draft as stored in the session.
struct Draft {
    service_id: i32,
    date: NaiveDate,
    time: Option<NaiveTime>,
    guest_name: Option<String>,
}

impl Draft {
    fn to_data(&self) -> StateData {
        let mut data = StateData::new();
        data.insert("service_id".into(), json!(self.service_id));
        data.insert("date".into(), json!(self.date.format("%Y-%m-%d").to_string()));
        if let Some(t) = self.time {
            data.insert("time".into(), json!(t.format("%H:%M").to_string()));
        }
        if let Some(name) = &self.guest_name {
            data.insert("guest_name".into(), Value::String(name.clone()));
        }
        data
    }

    fn from_session(session: &Session) -> Option<Self> {
        let service_id = i32::try_from(session.get_i64("service_id")?).ok()?;
        let date = parse_date(session.get_str("date")?).ok()?;
        let time = match session.get_str("time") {
            Some(t) => Some(parse_time(t).ok()?),
            None => None,
        };
        Some(Self {
            service_id,
            date,
            time,
            guest_name: session.get_str("guest_name").map(str::to_string),
        })
    }
}

pub struct BookingHandler<R: BookingRepository + ?Sized, K: KeyValueStore + ?Sized> {
    bookings: Arc<R>,
    sessions: SessionStore<K>,
    services: Vec<ServiceEntry>,
    users: Option<Arc<dyn UserRepository>>,
    metrics: Option<Arc<Metrics>>,
}

impl<R, K> BookingHandler<R, K>
where
    R: BookingRepository + ?Sized,
    K: KeyValueStore + ?Sized,
{
    pub fn new(bookings: Arc<R>, sessions: SessionStore<K>, services: Vec<ServiceEntry>) -> Self {
        Self {
            bookings,
            sessions,
            services,
            users: None,
            metrics: None,
        }
    }

    pub fn with_users(mut self, users: Arc<dyn UserRepository>) -> Self {
        self.users = Some(users);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn service_name(&self, service_id: i32) -> Option<&str> {
        self.services
            .iter()
            .find(|s| s.id == service_id)
            .map(|s| s.name.as_str())
    }

    fn unknown_service(service_id: i32) -> String {
        format!("Unknown service {}. See /services.", service_id)
    }

    async fn current_session(
        &self,
        ctx: &RequestContext,
        user_id: i64,
    ) -> Result<Option<Session>, DomainError> {
        match self.sessions.get(ctx, user_id).await {
            Ok(s) => Ok(Some(s)),
            Err(DomainError::SessionNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn start(&self, ctx: &RequestContext, event: &InboundEvent) -> Result<String, DomainError> {
        let user_id = event.requester_id;
        let greeting = match &self.users {
            Some(users) => {
                let mut profile = NewUser::new(user_id);
                profile.username = event.username.clone();
                let user = users.register(ctx, &profile).await?;
                info!(user_id, username = ?user.username, "start command");
                format!("Welcome, {}!", user.display_name())
            }
            None => "Welcome!".to_string(),
        };
        self.sessions.save(ctx, user_id, STATE_MENU, StateData::new()).await?;
        Ok(format!("{} I can book a visit for you.\n{}", greeting, HELP))
    }

    fn list_services(&self) -> String {
        if self.services.is_empty() {
            return "No services are available right now.".into();
        }
        let mut out = String::from("Services:");
        for s in &self.services {
            let _ = write!(out, "\n{} - {}", s.id, s.name);
        }
        out
    }

    async fn open_slots(
        &self,
        ctx: &RequestContext,
        service_id: i32,
        date: NaiveDate,
    ) -> Result<String, DomainError> {
        let Some(name) = self.service_name(service_id) else {
            return Ok(Self::unknown_service(service_id));
        };
        let slots = self.bookings.list_available_slots(ctx, service_id, date).await?;
        if slots.is_empty() {
            return Ok(format!("No open slots for {} on {}.", name, date));
        }
        let times: Vec<String> = slots.iter().map(|t| t.format("%H:%M").to_string()).collect();
        Ok(format!("Open slots for {} on {}: {}", name, date, times.join(", ")))
    }

    async fn begin_booking(
        &self,
        ctx: &RequestContext,
        user_id: i64,
        draft: Draft,
    ) -> Result<String, DomainError> {
        if self.service_name(draft.service_id).is_none() {
            return Ok(Self::unknown_service(draft.service_id));
        }
        if draft.date < Utc::now().date_naive() {
            return Ok("That date is in the past.".into());
        }
        self.sessions
            .save(ctx, user_id, STATE_AWAITING_GUEST_NAME, draft.to_data())
            .await?;
        Ok("Who is the guest? Send their full name.".into())
    }

    async fn guest_name(
        &self,
        ctx: &RequestContext,
        session: &Session,
        name: &str,
    ) -> Result<String, DomainError> {
        let name = name.trim();
        if name.is_empty() {
            return Ok("Please send the guest's full name.".into());
        }
        let Some(mut draft) = Draft::from_session(session) else {
            return self.lost_draft(ctx, session.user_id).await;
        };
        draft.guest_name = Some(name.to_string());
        self.sessions
            .save(ctx, session.user_id, STATE_AWAITING_CONFIRMATION, draft.to_data())
            .await?;

        let service = self.service_name(draft.service_id).unwrap_or("this service");
        Ok(format!(
            "Book {} on {} at {} for {}? Reply yes or no.",
            service,
            draft.date,
            format_time(draft.time),
            name
        ))
    }

    async fn confirmation(
        &self,
        ctx: &RequestContext,
        session: &Session,
        answer: &str,
    ) -> Result<String, DomainError> {
        match answer.trim().to_lowercase().as_str() {
            "yes" | "y" => self.reserve(ctx, session).await,
            "no" | "n" => {
                self.sessions.clear(ctx, session.user_id).await?;
                Ok("Okay, nothing was booked.".into())
            }
            _ => Ok("Please reply yes or no.".into()),
        }
    }

    async fn reserve(&self, ctx: &RequestContext, session: &Session) -> Result<String, DomainError> {
        let user_id = session.user_id;
        let Some(Draft {
            service_id,
            date,
            time,
            guest_name: Some(guest_name),
        }) = Draft::from_session(session)
        else {
            return self.lost_draft(ctx, user_id).await;
        };

        // A repeated "yes" after a failure lands here again; retrying cannot double-book.
        self.sessions.update_state(ctx, user_id, STATE_RESERVING).await?;

        let request =
            ReservationRequest::new(user_id, service_id, date, time, GuestInfo::named(guest_name));
        let outcome = match self.bookings.reserve(ctx, &request).await {
            Ok(outcome) => outcome,
            Err(DomainError::InvalidInput(msg)) => {
                self.sessions.clear(ctx, user_id).await?;
                return Ok(format!("That booking is not valid: {}", msg));
            }
            Err(e) => return Err(e),
        };

        self.sessions.clear(ctx, user_id).await?;
        match outcome {
            ReserveOutcome::Created { booking_id } => {
                if let Some(m) = &self.metrics {
                    m.inc_bookings_total();
                }
                info!(user_id, booking_id, "Booking confirmed");
                Ok(format!(
                    "Booked! Your booking number is #{} ({} at {}).",
                    booking_id,
                    date,
                    format_time(time)
                ))
            }
            ReserveOutcome::SlotOccupied => Ok(SLOT_TAKEN_REPLY.into()),
        }
    }

    async fn lost_draft(&self, ctx: &RequestContext, user_id: i64) -> Result<String, DomainError> {
        self.sessions.clear(ctx, user_id).await?;
        Ok("Your booking draft was lost. Please start again with /book.".into())
    }

    async fn my_bookings(&self, ctx: &RequestContext, user_id: i64) -> Result<String, DomainError> {
        let bookings = self.bookings.list_by_requester(ctx, user_id).await?;
        if bookings.is_empty() {
            return Ok("You have no bookings yet.".into());
        }
        let mut out = String::from("Your bookings:");
        for b in &bookings {
            let _ = write!(
                out,
                "\n#{} {} {} {} ({})",
                b.id,
                self.service_name(b.service_id).unwrap_or("service"),
                b.date,
                format_time(b.time_slot),
                b.status
            );
        }
        Ok(out)
    }

    async fn cancel(
        &self,
        ctx: &RequestContext,
        user_id: i64,
        booking_id: BookingId,
    ) -> Result<String, DomainError> {
        let bookings = self.bookings.list_by_requester(ctx, user_id).await?;
        let Some(booking) = bookings.iter().find(|b| b.id == booking_id) else {
            return Ok(format!("No booking #{} found.", booking_id));
        };
        if booking.status == BookingStatus::Cancelled {
            return Ok(format!("Booking #{} is already cancelled.", booking_id));
        }
        self.bookings
            .update_status(ctx, booking_id, BookingStatus::Cancelled)
            .await?;
        info!(user_id, booking_id, "Booking cancelled");
        Ok(format!("Booking #{} cancelled.", booking_id))
    }

    async fn free_text(
        &self,
        ctx: &RequestContext,
        user_id: i64,
        text: &str,
    ) -> Result<String, DomainError> {
        let Some(session) = self.current_session(ctx, user_id).await? else {
            return Ok("Send /start to see what I can do.".into());
        };
        match session.current_state.as_str() {
            STATE_AWAITING_GUEST_NAME => self.guest_name(ctx, &session, text).await,
            STATE_AWAITING_CONFIRMATION | STATE_RESERVING => {
                self.confirmation(ctx, &session, text).await
            }
            _ => Ok(format!("I did not understand that.\n{}", HELP)),
        }
    }
}

#[async_trait]
impl<R, K> UpdateHandler for BookingHandler<R, K>
where
    R: BookingRepository + ?Sized,
    K: KeyValueStore + ?Sized,
{
    async fn handle(&self, ctx: &RequestContext, event: &InboundEvent) -> Result<String, DomainError> {
        let user_id = event.requester_id;
        let command = match parse_command(&event.text) {
            Ok(c) => c,
            Err(usage) => return Ok(usage),
        };
        debug!(user_id, command = ?command, "handling update");

        match command {
            Command::Start => self.start(ctx, event).await,
            Command::Services => Ok(self.list_services()),
            Command::Slots { service_id, date } => self.open_slots(ctx, service_id, date).await,
            Command::Book { service_id, date, time } => {
                let draft = Draft {
                    service_id,
                    date,
                    time,
                    guest_name: None,
                };
                self.begin_booking(ctx, user_id, draft).await
            }
            Command::My => self.my_bookings(ctx, user_id).await,
            Command::Cancel(id) => self.cancel(ctx, user_id, id).await,
            Command::Reset => {
                self.sessions.clear(ctx, user_id).await?;
                Ok("Conversation reset. Send /start to begin again.".into())
            }
            Command::Text(text) => self.free_text(ctx, user_id, &text).await,
        }
    }
}
