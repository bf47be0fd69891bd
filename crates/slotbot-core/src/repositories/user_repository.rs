//! User repository trait (port)

use async_trait::async_trait;

use crate::context::RequestContext;
use crate::domain::{NewUser, User};
use crate::error::DomainError;

#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Inserts the user, or refreshes the username of an existing one.
    /// Grade and admin flag are never touched.
    async fn register(&self, ctx: &RequestContext, user: &NewUser) -> Result<User, DomainError>;

    async fn find_by_external_id(
        &self,
        ctx: &RequestContext,
        external_id: i64,
    ) -> Result<Option<User>, DomainError>;

    /// `NotFound` when no such user is registered.
    async fn update_grade(
        &self,
        ctx: &RequestContext,
        external_id: i64,
        grade: i32,
    ) -> Result<(), DomainError>;

    /// `NotFound` when no such user is registered.
    async fn is_admin(&self, ctx: &RequestContext, external_id: i64) -> Result<bool, DomainError>;
}
