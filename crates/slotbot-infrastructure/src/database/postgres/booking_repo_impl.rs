// ============================================================================
// Slotbot Infrastructure - PostgreSQL Booking Repository
// File: crates/slotbot-infrastructure/src/database/postgres/booking_repo_impl.rs
// ============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use slotbot_core::domain::{
    Booking, BookingId, BookingStatus, GuestInfo, ReservationRequest, ReserveOutcome, SlotKey,
};
use slotbot_core::error::DomainError;
use slotbot_core::repositories::BookingRepository;
use slotbot_core::RequestContext;
use slotbot_shared::Metrics;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use tracing::{debug, info};

use crate::instrument::{observe, Backend};

const ADVISORY_LOCK_SQL: &str = "SELECT pg_advisory_xact_lock(hashtext($1))";

const RESERVE_SQL: &str = r#"
    INSERT INTO bookings (
        user_id, service_id, booking_date, booking_time,
        guest_name, guest_organization, guest_position,
        visit_type, tracker_ticket_id, status
    )
    SELECT $1, $2, $3, $4, $5, $6, $7, $8, $9, $10
    WHERE NOT EXISTS (
        SELECT 1 FROM bookings
        WHERE service_id = $2
          AND booking_date = $3
          AND booking_time IS NOT DISTINCT FROM $4
          AND status = 'confirmed'
    )
    RETURNING id
"#;

const CONFIRM_SQL: &str = r#"
    UPDATE bookings
    SET status = 'confirmed', updated_at = NOW()
    WHERE id = $1
      AND NOT EXISTS (
        SELECT 1 FROM bookings
        WHERE service_id = $2
          AND booking_date = $3
          AND booking_time IS NOT DISTINCT FROM $4
          AND status = 'confirmed'
          AND id <> $1
      )
"#;

pub struct PgBookingRepository {
    pool: PgPool,
    metrics: Option<Arc<Metrics>>,
}

impl PgBookingRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool, metrics: None }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn metrics(&self) -> Option<&Metrics> {
        self.metrics.as_deref()
    }

    async fn lock_slot(
        tx: &mut Transaction<'_, Postgres>,
        slot: &SlotKey,
        operation: &'static str,
    ) -> Result<(), DomainError> {
        sqlx::query(ADVISORY_LOCK_SQL)
            .bind(slot.lock_key())
            .execute(&mut **tx)
            .await
            .map_err(|e| db_error(operation, e))?;
        Ok(())
    }

    async fn reserve_in_tx(&self, request: &ReservationRequest) -> Result<ReserveOutcome, DomainError> {
        const OP: &str = "create_booking";

        let mut tx = self.pool.begin().await.map_err(|e| db_error(OP, e))?;
        Self::lock_slot(&mut tx, &request.slot(), OP).await?;

        let inserted: Option<i64> = match sqlx::query_scalar(RESERVE_SQL)
            .bind(request.requester_id)
            .bind(request.service_id)
            .bind(request.date)
            .bind(request.time_slot)
            .bind(&request.guest.name)
            .bind(&request.guest.organization)
            .bind(&request.guest.position)
            .bind(&request.guest.visit_type)
            .bind(&request.tracker_ticket_id)
            .bind(request.initial_status.as_str())
            .fetch_optional(&mut *tx)
            .await
        {
            Ok(id) => id,
            // The partial unique index caught a writer that skipped the lock.
            Err(e) if is_unique_violation(&e) => None,
            Err(e) => return Err(db_error(OP, e)),
        };

        match inserted {
            Some(booking_id) => {
                tx.commit().await.map_err(|e| db_error(OP, e))?;
                info!(
                    booking_id,
                    service_id = request.service_id,
                    date = %request.date,
                    status = %request.initial_status,
                    "Booking created"
                );
                Ok(ReserveOutcome::Created { booking_id })
            }
            None => {
                tx.rollback().await.map_err(|e| db_error(OP, e))?;
                info!(
                    service_id = request.service_id,
                    lock_key = %request.slot().lock_key(),
                    "slot_is_already_occupied"
                );
                Ok(ReserveOutcome::SlotOccupied)
            }
        }
    }

    async fn update_status_in_tx(
        &self,
        booking_id: BookingId,
        status: BookingStatus,
    ) -> Result<(), DomainError> {
        const OP: &str = "update_booking_status";

        let mut tx = self.pool.begin().await.map_err(|e| db_error(OP, e))?;

        let row: Option<SlotRow> = sqlx::query_as(
            r#"
            SELECT status, service_id, booking_date, booking_time
            FROM bookings
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(booking_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| db_error(OP, e))?;

        let row = row.ok_or_else(|| DomainError::NotFound(format!("booking {}", booking_id)))?;
        let current: BookingStatus = row
            .status
            .parse()
            .map_err(|e| DomainError::storage(OP, e))?;

        if !current.can_transition_to(status) {
            return Err(DomainError::InvalidInput(format!(
                "booking {} cannot move from {} to {}",
                booking_id, current, status
            )));
        }

        if status == BookingStatus::Confirmed && current != BookingStatus::Confirmed {
            let slot = SlotKey::new(row.service_id, row.booking_date, row.booking_time);
            Self::lock_slot(&mut tx, &slot, OP).await?;

            let result = sqlx::query(CONFIRM_SQL)
                .bind(booking_id)
                .bind(slot.service_id)
                .bind(slot.date)
                .bind(slot.time_slot)
                .execute(&mut *tx)
                .await;
            let affected = match result {
                Ok(done) => done.rows_affected(),
                Err(e) if is_unique_violation(&e) => 0,
                Err(e) => return Err(db_error(OP, e)),
            };
            if affected == 0 {
                return Err(DomainError::SlotOccupied);
            }
        } else {
            let done = sqlx::query(
                "UPDATE bookings SET status = $1, updated_at = NOW() WHERE id = $2",
            )
            .bind(status.as_str())
            .bind(booking_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error(OP, e))?;
            if done.rows_affected() == 0 {
                return Err(DomainError::NotFound(format!("booking {}", booking_id)));
            }
        }

        tx.commit().await.map_err(|e| db_error(OP, e))?;
        debug!(booking_id, from = %current, to = %status, "Booking status updated");
        Ok(())
    }
}

// Internal row types for SQLx mapping
#[derive(Debug, FromRow)]
struct BookingRow {
    id: i64,
    user_id: i64,
    service_id: i32,
    booking_date: NaiveDate,
    booking_time: Option<NaiveTime>,
    guest_name: String,
    guest_organization: Option<String>,
    guest_position: Option<String>,
    visit_type: Option<String>,
    status: String,
    tracker_ticket_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct SlotRow {
    status: String,
    service_id: i32,
    booking_date: NaiveDate,
    booking_time: Option<NaiveTime>,
}

impl TryFrom<BookingRow> for Booking {
    type Error = DomainError;

    fn try_from(row: BookingRow) -> Result<Self, Self::Error> {
        Ok(Booking {
            id: row.id,
            requester_id: row.user_id,
            service_id: row.service_id,
            date: row.booking_date,
            time_slot: row.booking_time,
            guest: GuestInfo {
                name: row.guest_name,
                organization: row.guest_organization,
                position: row.guest_position,
                visit_type: row.visit_type,
            },
            tracker_ticket_id: row.tracker_ticket_id,
            status: row
                .status
                .parse()
                .map_err(|e| DomainError::storage("get_bookings_by_user", e))?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn db_error(operation: &'static str, e: sqlx::Error) -> DomainError {
    DomainError::storage(operation, e)
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .map(|db| db.is_unique_violation())
        .unwrap_or(false)
}

#[async_trait]
impl BookingRepository for PgBookingRepository {
    async fn reserve(
        &self,
        ctx: &RequestContext,
        request: &ReservationRequest,
    ) -> Result<ReserveOutcome, DomainError> {
        request.check()?;
        observe(ctx, self.metrics(), Backend::Postgres, "create_booking", || {
            self.reserve_in_tx(request)
        })
        .await
    }

    async fn list_available_slots(
        &self,
        ctx: &RequestContext,
        service_id: i32,
        date: NaiveDate,
    ) -> Result<Vec<NaiveTime>, DomainError> {
        observe(ctx, self.metrics(), Backend::Postgres, "get_available_slots", || async {
            sqlx::query_scalar(
                r#"
                SELECT DISTINCT b.booking_time
                FROM bookings b
                WHERE b.service_id = $1
                  AND b.booking_date = $2
                  AND b.status <> 'confirmed'
                  AND b.booking_time IS NOT NULL
                  AND NOT EXISTS (
                    SELECT 1 FROM bookings c
                    WHERE c.service_id = b.service_id
                      AND c.booking_date = b.booking_date
                      AND c.booking_time = b.booking_time
                      AND c.status = 'confirmed'
                  )
                ORDER BY b.booking_time ASC
                "#,
            )
            .bind(service_id)
            .bind(date)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("get_available_slots", e))
        })
        .await
    }

    async fn list_by_requester(
        &self,
        ctx: &RequestContext,
        requester_id: i64,
    ) -> Result<Vec<Booking>, DomainError> {
        observe(ctx, self.metrics(), Backend::Postgres, "get_bookings_by_user", || async {
            let rows: Vec<BookingRow> = sqlx::query_as(
                r#"
                SELECT id, user_id, service_id, booking_date, booking_time,
                       guest_name, guest_organization, guest_position,
                       visit_type, status, tracker_ticket_id, created_at, updated_at
                FROM bookings
                WHERE user_id = $1
                ORDER BY booking_date DESC, booking_time DESC NULLS LAST, id DESC
                "#,
            )
            .bind(requester_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("get_bookings_by_user", e))?;

            rows.into_iter().map(Booking::try_from).collect()
        })
        .await
    }

    async fn update_status(
        &self,
        ctx: &RequestContext,
        booking_id: BookingId,
        status: BookingStatus,
    ) -> Result<(), DomainError> {
        if booking_id <= 0 {
            return Err(DomainError::InvalidInput(format!("invalid booking id {}", booking_id)));
        }
        observe(ctx, self.metrics(), Backend::Postgres, "update_booking_status", || {
            self.update_status_in_tx(booking_id, status)
        })
        .await
    }
}
