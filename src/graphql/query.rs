use async_graphql::{Context, ErrorExtensions, Object, Result, ResultExt};
use sqlx::PgPool;

use crate::error::AppError;
use crate::graphql::guards::{current_user, LoggedIn, RoleGuard};
use crate::models::branch::join_code::JoinCode;
use crate::models::branch::Branch;
use crate::models::event::signup::{EventSignup, Registration};
use crate::models::event::Event;
use crate::models::hours::review::HoursRequestStatus;
use crate::models::hours::HoursRequest;
use crate::models::sponsor::Sponsor;
use crate::models::stats::{BranchStats, OrganizationTotals};
use crate::models::user::session::SessionContext;
use crate::models::user::User;
use crate::routes::{RouteAccess, RouteGuard};

pub struct QueryRoot;

#[Object]
impl QueryRoot {
    /// The current user, if logged in
    pub async fn user(&self, ctx: &Context<'_>) -> Option<User> {
        ctx.data_opt::<SessionContext>()
            .map(|session| session.user.clone())
    }

    /// Whether the current visitor may open a page, and where to go if not
    pub async fn route_access(&self, ctx: &Context<'_>, path: String) -> RouteAccess {
        let role = ctx
            .data_opt::<SessionContext>()
            .map(|session| session.user.role);

        RouteGuard::check(&path, role).into()
    }

    /// A user in the current admin's branch
    #[graphql(guard = "RoleGuard::ADMIN")]
    pub async fn member(&self, ctx: &Context<'_>, id: i64) -> Result<User> {
        let pool: &PgPool = ctx.data_unchecked();
        let actor = current_user(ctx)?;
        let member = User::with_id(id, pool).await.extend()?;
        actor.ensure_admin_of(member.branch_id).extend()?;

        Ok(member)
    }

    /// The members of a branch; super-admins see everyone unless they pick a branch
    #[graphql(guard = "RoleGuard::ADMIN")]
    pub async fn members(&self, ctx: &Context<'_>, branch_id: Option<i64>) -> Result<Vec<User>> {
        let pool: &PgPool = ctx.data_unchecked();
        let actor = current_user(ctx)?;
        if actor.is_super_admin() && branch_id.is_none() {
            return User::all(pool).await.extend();
        }

        let branch_id = actor.acting_branch(branch_id).extend()?;
        User::for_branch(branch_id, pool).await.extend()
    }

    pub async fn branch(&self, ctx: &Context<'_>, id: i64) -> Result<Branch> {
        let pool: &PgPool = ctx.data_unchecked();
        Branch::with_id(id, pool).await.extend()
    }

    pub async fn branches(&self, ctx: &Context<'_>) -> Result<Vec<Branch>> {
        let pool: &PgPool = ctx.data_unchecked();
        Branch::all(pool).await.extend()
    }

    /// Looks up the branch a join code belongs to, for the sign-up form
    pub async fn branch_by_code(&self, ctx: &Context<'_>, code: String) -> Result<Option<Branch>> {
        let pool: &PgPool = ctx.data_unchecked();
        let code = JoinCode::parse(&code).extend()?;
        Branch::with_join_code_opt(&code, pool).await.extend()
    }

    #[graphql(guard = "RoleGuard::ADMIN")]
    pub async fn branch_stats(&self, ctx: &Context<'_>, branch_id: i64) -> Result<BranchStats> {
        let pool: &PgPool = ctx.data_unchecked();
        let actor = current_user(ctx)?;
        BranchStats::for_branch(actor, branch_id, pool).await.extend()
    }

    pub async fn organization_totals(&self, ctx: &Context<'_>) -> Result<OrganizationTotals> {
        let pool: &PgPool = ctx.data_unchecked();
        OrganizationTotals::compute(pool).await.extend()
    }

    #[graphql(guard = "LoggedIn")]
    pub async fn event(&self, ctx: &Context<'_>, id: i64) -> Result<Event> {
        let pool: &PgPool = ctx.data_unchecked();
        let user = current_user(ctx)?;
        let event = Event::with_id(id, pool).await.extend()?;
        event.ensure_visible_to(user).extend()?;

        Ok(event)
    }

    /// Events for the current user's branch, soonest first
    #[graphql(guard = "LoggedIn")]
    pub async fn events(&self, ctx: &Context<'_>, branch_id: Option<i64>) -> Result<Vec<Event>> {
        let pool: &PgPool = ctx.data_unchecked();
        let user = current_user(ctx)?;
        Event::visible_to(user, branch_id, pool).await.extend()
    }

    /// The current user's event sign-ups
    #[graphql(guard = "LoggedIn")]
    pub async fn my_signups(&self, ctx: &Context<'_>) -> Result<Vec<EventSignup>> {
        let pool: &PgPool = ctx.data_unchecked();
        let user = current_user(ctx)?;
        EventSignup::for_user(user.id, pool).await.extend()
    }

    /// The members registered for an event
    #[graphql(guard = "RoleGuard::ADMIN")]
    pub async fn registrations(&self, ctx: &Context<'_>, event_id: i64) -> Result<Vec<Registration>> {
        let pool: &PgPool = ctx.data_unchecked();
        let actor = current_user(ctx)?;
        EventSignup::registrations(actor, event_id, pool).await.extend()
    }

    /// The review queue, optionally only requests in one state
    #[graphql(guard = "RoleGuard::ADMIN")]
    pub async fn hours_requests(
        &self,
        ctx: &Context<'_>,
        status: Option<HoursRequestStatus>,
        branch_id: Option<i64>,
    ) -> Result<Vec<HoursRequest>> {
        let pool: &PgPool = ctx.data_unchecked();
        let reviewer = current_user(ctx)?;
        HoursRequest::for_reviewer(reviewer, branch_id, status, pool)
            .await
            .extend()
    }

    #[graphql(guard = "LoggedIn")]
    pub async fn my_hours_requests(&self, ctx: &Context<'_>) -> Result<Vec<HoursRequest>> {
        let pool: &PgPool = ctx.data_unchecked();
        let user = current_user(ctx)?;
        HoursRequest::for_user(user.id, pool).await.extend()
    }

    #[graphql(guard = "LoggedIn")]
    pub async fn hours_request(&self, ctx: &Context<'_>, id: i64) -> Result<HoursRequest> {
        let pool: &PgPool = ctx.data_unchecked();
        let user = current_user(ctx)?;
        let request = HoursRequest::with_id(id, pool).await.extend()?;

        if request.is_visible_to(user, pool).await.extend()? {
            Ok(request)
        } else {
            Err(AppError::forbidden("this hours request belongs to someone else").extend())
        }
    }

    pub async fn sponsors(&self, ctx: &Context<'_>) -> Result<Vec<Sponsor>> {
        let pool: &PgPool = ctx.data_unchecked();
        Sponsor::all(pool).await.extend()
    }
}
