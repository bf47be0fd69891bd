//! PostgreSQL reservation engine tests.
//!
//! These need a live server: set `DATABASE_URL` and run with `--ignored`.
//! `sqlx::test` creates a fresh database per test and applies `./migrations`.

use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, NaiveTime};
use slotbot_core::repositories::BookingRepository;
use slotbot_core::{
    BookingStatus, DomainError, GuestInfo, RequestContext, ReservationRequest, ReserveOutcome,
};
use slotbot_infrastructure::PgBookingRepository;
use sqlx::PgPool;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, 1).unwrap()
}

fn at(h: u32) -> Option<NaiveTime> {
    NaiveTime::from_hms_opt(h, 0, 0)
}

fn request(requester_id: i64, service_id: i32, time: Option<NaiveTime>) -> ReservationRequest {
    ReservationRequest::new(requester_id, service_id, date(), time, GuestInfo::named("Ada"))
}

async fn created(repo: &PgBookingRepository, req: ReservationRequest) -> i64 {
    match repo.reserve(&RequestContext::new(), &req).await.unwrap() {
        ReserveOutcome::Created { booking_id } => booking_id,
        ReserveOutcome::SlotOccupied => panic!("slot unexpectedly occupied"),
    }
}

// ---------------------------------------------------------------------------
// Reserve
// ---------------------------------------------------------------------------

#[sqlx::test]
#[ignore = "requires DATABASE_URL"]
async fn concurrent_reservations_grant_exactly_one(pool: PgPool) {
    let repo = Arc::new(PgBookingRepository::new(pool));

    let mut handles = Vec::new();
    for requester in 1..=10 {
        let repo = Arc::clone(&repo);
        handles.push(tokio::spawn(async move {
            repo.reserve(&RequestContext::new(), &request(requester, 50, at(11)))
                .await
        }));
    }

    let mut created = 0;
    let mut occupied = 0;
    for h in handles {
        match h.await.unwrap().unwrap() {
            ReserveOutcome::Created { .. } => created += 1,
            ReserveOutcome::SlotOccupied => occupied += 1,
        }
    }
    assert_eq!(created, 1);
    assert_eq!(occupied, 9);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL"]
async fn different_slots_do_not_conflict(pool: PgPool) {
    let repo = PgBookingRepository::new(pool);
    created(&repo, request(1, 50, at(10))).await;
    created(&repo, request(2, 50, at(11))).await;
    created(&repo, request(3, 51, at(10))).await;
    created(&repo, request(4, 50, None)).await;

    let again = repo
        .reserve(&RequestContext::new(), &request(5, 50, None))
        .await
        .unwrap();
    assert_eq!(again, ReserveOutcome::SlotOccupied);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL"]
async fn held_slot_lock_blocks_only_its_own_slot(pool: PgPool) {
    let repo = PgBookingRepository::new(pool.clone());
    let blocked = request(1, 50, at(10));
    let other = request(2, 50, at(11));

    let mut holder = pool.begin().await.unwrap();
    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
        .bind(blocked.slot().lock_key())
        .execute(&mut *holder)
        .await
        .unwrap();

    let res = repo
        .reserve(&RequestContext::with_timeout(Duration::from_secs(2)), &other)
        .await;
    assert!(matches!(res, Ok(ReserveOutcome::Created { .. })), "got {:?}", res);

    let res = repo
        .reserve(&RequestContext::with_timeout(Duration::from_millis(300)), &blocked)
        .await;
    assert_eq!(res, Err(DomainError::Timeout));

    holder.rollback().await.unwrap();

    let res = repo
        .reserve(&RequestContext::with_timeout(Duration::from_secs(2)), &blocked)
        .await;
    assert!(matches!(res, Ok(ReserveOutcome::Created { .. })), "got {:?}", res);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL"]
async fn invalid_request_never_reaches_storage(pool: PgPool) {
    let repo = PgBookingRepository::new(pool.clone());
    let mut req = request(1, 5, at(10));
    req.guest.name.clear();

    let res = repo.reserve(&RequestContext::new(), &req).await;
    assert!(matches!(res, Err(DomainError::InvalidInput(_))));

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM bookings")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 0);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL"]
async fn cancelled_context_surfaces_as_cancelled(pool: PgPool) {
    let repo = PgBookingRepository::new(pool);
    let ctx = RequestContext::new();
    ctx.cancel();

    let res = repo.reserve(&ctx, &request(1, 5, at(10))).await;
    assert_eq!(res, Err(DomainError::Cancelled));
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

#[sqlx::test]
#[ignore = "requires DATABASE_URL"]
async fn available_slots_exclude_confirmed(pool: PgPool) {
    let repo = PgBookingRepository::new(pool);
    created(&repo, request(1, 5, at(10)).with_status(BookingStatus::Pending)).await;
    created(&repo, request(2, 5, at(11))).await;

    let slots = repo
        .list_available_slots(&RequestContext::new(), 5, date())
        .await
        .unwrap();
    assert_eq!(slots, vec![at(10).unwrap()]);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL"]
async fn bookings_by_requester_are_most_recent_first(pool: PgPool) {
    let repo = PgBookingRepository::new(pool);
    let later = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();

    let a = created(&repo, request(7, 5, at(9))).await;
    let b = created(&repo, request(7, 5, at(15))).await;
    let mut next_day = request(7, 5, at(8));
    next_day.date = later;
    let c = created(&repo, next_day).await;
    created(&repo, request(8, 5, at(12))).await;

    let ids: Vec<i64> = repo
        .list_by_requester(&RequestContext::new(), 7)
        .await
        .unwrap()
        .into_iter()
        .map(|b| b.id)
        .collect();
    assert_eq!(ids, vec![c, b, a]);
}

// ---------------------------------------------------------------------------
// Status updates
// ---------------------------------------------------------------------------

#[sqlx::test]
#[ignore = "requires DATABASE_URL"]
async fn update_status_missing_booking(pool: PgPool) {
    let repo = PgBookingRepository::new(pool);
    let res = repo
        .update_status(&RequestContext::new(), 999, BookingStatus::Cancelled)
        .await;
    assert!(matches!(res, Err(DomainError::NotFound(_))));
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL"]
async fn cancelling_frees_the_slot(pool: PgPool) {
    let repo = PgBookingRepository::new(pool);
    let ctx = RequestContext::new();
    let id = created(&repo, request(1, 5, at(10))).await;

    repo.update_status(&ctx, id, BookingStatus::Cancelled).await.unwrap();
    created(&repo, request(2, 5, at(10))).await;

    let res = repo.update_status(&ctx, id, BookingStatus::Confirmed).await;
    assert!(matches!(res, Err(DomainError::InvalidInput(_))));
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL"]
async fn confirming_pending_respects_existing_holder(pool: PgPool) {
    let repo = PgBookingRepository::new(pool);
    let ctx = RequestContext::new();
    let pending = created(&repo, request(1, 5, at(10)).with_status(BookingStatus::Pending)).await;
    let holder = created(&repo, request(2, 5, at(10))).await;

    let res = repo.update_status(&ctx, pending, BookingStatus::Confirmed).await;
    assert_eq!(res, Err(DomainError::SlotOccupied));

    repo.update_status(&ctx, holder, BookingStatus::Cancelled).await.unwrap();
    repo.update_status(&ctx, pending, BookingStatus::Confirmed).await.unwrap();
}
