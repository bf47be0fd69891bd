// ============================================================================
// Slotbot Infrastructure - PostgreSQL User Repository
// File: crates/slotbot-infrastructure/src/database/postgres/user_repo_impl.rs
// ============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use slotbot_core::domain::{NewUser, User};
use slotbot_core::error::DomainError;
use slotbot_core::repositories::UserRepository;
use slotbot_core::RequestContext;
use slotbot_shared::Metrics;
use sqlx::{FromRow, PgPool};
use tracing::debug;

use crate::instrument::{observe, Backend};

pub struct PgUserRepository {
    pool: PgPool,
    metrics: Option<Arc<Metrics>>,
}

impl PgUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool, metrics: None }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn metrics(&self) -> Option<&Metrics> {
        self.metrics.as_deref()
    }
}

// Internal row type for SQLx mapping
#[derive(Debug, FromRow)]
struct UserRow {
    id: i64,
    external_id: i64,
    username: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
    grade: i32,
    is_admin: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: row.id,
            external_id: row.external_id,
            username: row.username,
            first_name: row.first_name,
            last_name: row.last_name,
            grade: row.grade,
            is_admin: row.is_admin,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

fn user_not_found(external_id: i64) -> DomainError {
    DomainError::NotFound(format!("user {}", external_id))
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn register(&self, ctx: &RequestContext, user: &NewUser) -> Result<User, DomainError> {
        user.check()?;
        observe(ctx, self.metrics(), Backend::Postgres, "create_user", || async {
            let row: UserRow = sqlx::query_as(
                r#"
                INSERT INTO users (external_id, username, first_name, last_name)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (external_id)
                DO UPDATE SET username = EXCLUDED.username, updated_at = NOW()
                RETURNING id, external_id, username, first_name, last_name,
                          grade, is_admin, created_at, updated_at
                "#,
            )
            .bind(user.external_id)
            .bind(&user.username)
            .bind(&user.first_name)
            .bind(&user.last_name)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| DomainError::storage("create_user", e))?;

            debug!(external_id = user.external_id, user_id = row.id, "User registered");
            Ok(row.into())
        })
        .await
    }

    async fn find_by_external_id(
        &self,
        ctx: &RequestContext,
        external_id: i64,
    ) -> Result<Option<User>, DomainError> {
        observe(ctx, self.metrics(), Backend::Postgres, "get_user", || async {
            let row: Option<UserRow> = sqlx::query_as(
                r#"
                SELECT id, external_id, username, first_name, last_name,
                       grade, is_admin, created_at, updated_at
                FROM users
                WHERE external_id = $1
                "#,
            )
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| DomainError::storage("get_user", e))?;

            Ok(row.map(User::from))
        })
        .await
    }

    async fn update_grade(
        &self,
        ctx: &RequestContext,
        external_id: i64,
        grade: i32,
    ) -> Result<(), DomainError> {
        observe(ctx, self.metrics(), Backend::Postgres, "update_user_grade", || async {
            let done = sqlx::query(
                "UPDATE users SET grade = $1, updated_at = NOW() WHERE external_id = $2",
            )
            .bind(grade)
            .bind(external_id)
            .execute(&self.pool)
            .await
            .map_err(|e| DomainError::storage("update_user_grade", e))?;

            if done.rows_affected() == 0 {
                return Err(user_not_found(external_id));
            }
            Ok(())
        })
        .await
    }

    async fn is_admin(&self, ctx: &RequestContext, external_id: i64) -> Result<bool, DomainError> {
        observe(ctx, self.metrics(), Backend::Postgres, "check_is_admin", || async {
            let flag: Option<bool> =
                sqlx::query_scalar("SELECT is_admin FROM users WHERE external_id = $1")
                    .bind(external_id)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(|e| DomainError::storage("check_is_admin", e))?;

            flag.ok_or_else(|| user_not_found(external_id))
        })
        .await
    }
}
