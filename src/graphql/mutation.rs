use async_graphql::{Context, ErrorExtensions, Object, Result, ResultExt};
use rust_decimal::Decimal;
use sqlx::PgPool;

use crate::config::Config;
use crate::email::reset_password::ResetPasswordEmail;
use crate::email::send_email;
use crate::error::AppError;
use crate::graphql::guards::{current_session, current_user, LoggedIn, RoleGuard};
use crate::graphql::SUCCESS_MESSAGE;
use crate::models::branch::leader::{BranchLeader, NewLeader};
use crate::models::branch::transfer::transfer;
use crate::models::branch::{Branch, BranchCreation, BranchDeletionSummary, BranchUpdate, NewBranch};
use crate::models::event::signup::EventSignup;
use crate::models::event::{Event, EventStatus, NewEvent};
use crate::models::hours::{HoursRequest, NewHoursRequest};
use crate::models::sponsor::{NewSponsor, Sponsor};
use crate::models::stats::recompute_branch_counters;
use crate::models::user::session::{Credential, PasswordReset, Session};
use crate::models::user::{NewUser, ProfileUpdate, Role, User};
use crate::storage::Storage;

pub struct MutationRoot;

#[Object]
impl MutationRoot {
    /// Gets a login token on successful login
    pub async fn login(&self, ctx: &Context<'_>, email: String, password: String) -> Result<String> {
        let pool: &PgPool = ctx.data_unchecked();
        let email = email.trim().to_lowercase();
        if !Credential::login_is_valid(&email, &password, pool).await.extend()? {
            return Err(AppError::validation("Invalid email or password").extend());
        }

        Session::get_or_generate_token(&email, pool).await.extend()
    }

    /// Ends the current session
    #[graphql(guard = "LoggedIn")]
    pub async fn logout(&self, ctx: &Context<'_>) -> Result<&'static str> {
        let pool: &PgPool = ctx.data_unchecked();
        let session = current_session(ctx)?;
        Session::remove(&session.token, pool).await.extend()?;

        Ok(SUCCESS_MESSAGE)
    }

    /// Emails a reset link. Succeeds whether or not the email has an account.
    pub async fn forgot_password(&self, ctx: &Context<'_>, email: String) -> Result<&'static str> {
        let pool: &PgPool = ctx.data_unchecked();
        let config: &Config = ctx.data_unchecked();
        let email = email.trim().to_lowercase();

        let token = PasswordReset::generate(&email, pool).await.extend()?;
        let user = User::with_email_opt(&email, pool).await.extend()?;
        if let (Some(token), Some(user)) = (token, user) {
            let reset_email = ResetPasswordEmail::new(&user, &config.app_base_url, &token);
            if let Err(error) = send_email(&reset_email, config).await {
                tracing::warn!(user = user.id, %error, "failed to send password reset email");
            }
        }

        Ok(SUCCESS_MESSAGE)
    }

    pub async fn reset_password(
        &self,
        ctx: &Context<'_>,
        token: String,
        password: String,
    ) -> Result<&'static str> {
        let pool: &PgPool = ctx.data_unchecked();
        PasswordReset::reset_from_token(&token, &password, pool)
            .await
            .extend()?;

        Ok(SUCCESS_MESSAGE)
    }

    /// Creates an account in the branch the join code belongs to
    pub async fn sign_up(&self, ctx: &Context<'_>, new_user: NewUser) -> Result<User> {
        let pool: &PgPool = ctx.data_unchecked();
        User::register(new_user, pool).await.extend()
    }

    #[graphql(guard = "LoggedIn")]
    pub async fn update_profile(&self, ctx: &Context<'_>, update: ProfileUpdate) -> Result<User> {
        let pool: &PgPool = ctx.data_unchecked();
        let user = current_user(ctx)?;
        User::update_profile(user.id, update, pool).await.extend()
    }

    /// Moves the current user to the branch with the given join code
    #[graphql(guard = "LoggedIn")]
    pub async fn transfer_branch(&self, ctx: &Context<'_>, join_code: String) -> Result<User> {
        let pool: &PgPool = ctx.data_unchecked();
        let user = current_user(ctx)?;
        transfer(user.id, &join_code, pool).await.extend()
    }

    /// Deletes the current user's own account
    #[graphql(guard = "LoggedIn")]
    pub async fn delete_account(&self, ctx: &Context<'_>, confirmation: String) -> Result<&'static str> {
        let pool: &PgPool = ctx.data_unchecked();
        let storage: &Storage = ctx.data_unchecked();
        let user = current_user(ctx)?;
        User::delete(user, user.id, &confirmation, storage, pool)
            .await
            .extend()?;

        Ok(SUCCESS_MESSAGE)
    }

    #[graphql(guard = "RoleGuard::ADMIN")]
    pub async fn delete_user(
        &self,
        ctx: &Context<'_>,
        id: i64,
        confirmation: String,
    ) -> Result<&'static str> {
        let pool: &PgPool = ctx.data_unchecked();
        let storage: &Storage = ctx.data_unchecked();
        let actor = current_user(ctx)?;
        User::delete(actor, id, &confirmation, storage, pool)
            .await
            .extend()?;

        Ok(SUCCESS_MESSAGE)
    }

    #[graphql(guard = "RoleGuard::ADMIN")]
    pub async fn set_role(&self, ctx: &Context<'_>, user_id: i64, role: Role) -> Result<User> {
        let pool: &PgPool = ctx.data_unchecked();
        let actor = current_user(ctx)?;
        User::set_role(actor, user_id, role, pool).await.extend()
    }

    #[graphql(guard = "RoleGuard::SUPER_ADMIN")]
    pub async fn create_branch(&self, ctx: &Context<'_>, branch: NewBranch) -> Result<BranchCreation> {
        let pool: &PgPool = ctx.data_unchecked();
        let storage: &Storage = ctx.data_unchecked();
        let config: &Config = ctx.data_unchecked();
        let actor = current_user(ctx)?;
        Branch::create(actor, branch, config.join_code_attempts, storage, pool)
            .await
            .extend()
    }

    #[graphql(guard = "RoleGuard::SUPER_ADMIN")]
    pub async fn update_branch(
        &self,
        ctx: &Context<'_>,
        id: i64,
        update: BranchUpdate,
    ) -> Result<Branch> {
        let pool: &PgPool = ctx.data_unchecked();
        let storage: &Storage = ctx.data_unchecked();
        let actor = current_user(ctx)?;
        Branch::update(actor, id, update, storage, pool).await.extend()
    }

    /// Deletes a branch with everything in it
    #[graphql(guard = "RoleGuard::SUPER_ADMIN")]
    pub async fn delete_branch(
        &self,
        ctx: &Context<'_>,
        id: i64,
        confirmation: String,
    ) -> Result<BranchDeletionSummary> {
        let pool: &PgPool = ctx.data_unchecked();
        let storage: &Storage = ctx.data_unchecked();
        let actor = current_user(ctx)?;
        Branch::delete(actor, id, &confirmation, storage, pool)
            .await
            .extend()
    }

    #[graphql(guard = "RoleGuard::SUPER_ADMIN")]
    pub async fn add_leader(
        &self,
        ctx: &Context<'_>,
        branch_id: i64,
        leader: NewLeader,
    ) -> Result<BranchLeader> {
        let pool: &PgPool = ctx.data_unchecked();
        let storage: &Storage = ctx.data_unchecked();
        let actor = current_user(ctx)?;
        BranchLeader::add(actor, branch_id, leader, storage, pool)
            .await
            .extend()
    }

    #[graphql(guard = "RoleGuard::SUPER_ADMIN")]
    pub async fn remove_leader(&self, ctx: &Context<'_>, id: i64) -> Result<&'static str> {
        let pool: &PgPool = ctx.data_unchecked();
        let storage: &Storage = ctx.data_unchecked();
        let actor = current_user(ctx)?;
        BranchLeader::remove(actor, id, storage, pool).await.extend()?;

        Ok(SUCCESS_MESSAGE)
    }

    /// Rewrites a branch's stored totals from its members
    #[graphql(guard = "RoleGuard::SUPER_ADMIN")]
    pub async fn recompute_branch_counters(&self, ctx: &Context<'_>, branch_id: i64) -> Result<Branch> {
        let pool: &PgPool = ctx.data_unchecked();
        let actor = current_user(ctx)?;
        recompute_branch_counters(actor, branch_id, pool).await.extend()
    }

    /// Creates an event in the admin's branch, or the given one for super-admins
    #[graphql(guard = "RoleGuard::ADMIN")]
    pub async fn create_event(
        &self,
        ctx: &Context<'_>,
        branch_id: Option<i64>,
        event: NewEvent,
    ) -> Result<Event> {
        let pool: &PgPool = ctx.data_unchecked();
        let actor = current_user(ctx)?;
        Event::create(actor, branch_id, event, pool).await.extend()
    }

    #[graphql(guard = "RoleGuard::ADMIN")]
    pub async fn update_event(&self, ctx: &Context<'_>, id: i64, event: NewEvent) -> Result<Event> {
        let pool: &PgPool = ctx.data_unchecked();
        let actor = current_user(ctx)?;
        Event::update(actor, id, event, pool).await.extend()
    }

    #[graphql(guard = "RoleGuard::ADMIN")]
    pub async fn set_event_status(
        &self,
        ctx: &Context<'_>,
        id: i64,
        status: EventStatus,
    ) -> Result<Event> {
        let pool: &PgPool = ctx.data_unchecked();
        let actor = current_user(ctx)?;
        Event::set_status(actor, id, status, pool).await.extend()
    }

    #[graphql(guard = "RoleGuard::ADMIN")]
    pub async fn delete_event(&self, ctx: &Context<'_>, id: i64) -> Result<&'static str> {
        let pool: &PgPool = ctx.data_unchecked();
        let actor = current_user(ctx)?;
        Event::delete(actor, id, pool).await.extend()?;

        Ok(SUCCESS_MESSAGE)
    }

    #[graphql(guard = "LoggedIn")]
    pub async fn register_for_event(&self, ctx: &Context<'_>, event_id: i64) -> Result<EventSignup> {
        let pool: &PgPool = ctx.data_unchecked();
        let user = current_user(ctx)?;
        EventSignup::register(user, event_id, pool).await.extend()
    }

    #[graphql(guard = "LoggedIn")]
    pub async fn cancel_registration(&self, ctx: &Context<'_>, event_id: i64) -> Result<EventSignup> {
        let pool: &PgPool = ctx.data_unchecked();
        let user = current_user(ctx)?;
        EventSignup::cancel(user, event_id, pool).await.extend()
    }

    /// Asks for hours to be credited, with a proof image
    #[graphql(guard = "LoggedIn")]
    pub async fn submit_hours_request(
        &self,
        ctx: &Context<'_>,
        request: NewHoursRequest,
    ) -> Result<HoursRequest> {
        let pool: &PgPool = ctx.data_unchecked();
        let storage: &Storage = ctx.data_unchecked();
        let user = current_user(ctx)?;
        HoursRequest::submit(user, request, storage, pool).await.extend()
    }

    /// Approves a pending request, crediting the member and their branch
    #[graphql(guard = "RoleGuard::ADMIN")]
    pub async fn approve_hours_request(
        &self,
        ctx: &Context<'_>,
        id: i64,
        awarded_hours: Option<Decimal>,
        notes: Option<String>,
    ) -> Result<HoursRequest> {
        let pool: &PgPool = ctx.data_unchecked();
        let reviewer = current_user(ctx)?;
        HoursRequest::approve(reviewer, id, awarded_hours, notes, pool)
            .await
            .extend()
    }

    #[graphql(guard = "RoleGuard::ADMIN")]
    pub async fn decline_hours_request(
        &self,
        ctx: &Context<'_>,
        id: i64,
        notes: Option<String>,
    ) -> Result<HoursRequest> {
        let pool: &PgPool = ctx.data_unchecked();
        let reviewer = current_user(ctx)?;
        HoursRequest::decline(reviewer, id, notes, pool).await.extend()
    }

    #[graphql(guard = "RoleGuard::SUPER_ADMIN")]
    pub async fn create_sponsor(&self, ctx: &Context<'_>, sponsor: NewSponsor) -> Result<Sponsor> {
        let pool: &PgPool = ctx.data_unchecked();
        let storage: &Storage = ctx.data_unchecked();
        let actor = current_user(ctx)?;
        Sponsor::create(actor, sponsor, storage, pool).await.extend()
    }

    #[graphql(guard = "RoleGuard::SUPER_ADMIN")]
    pub async fn delete_sponsor(&self, ctx: &Context<'_>, id: i64) -> Result<&'static str> {
        let pool: &PgPool = ctx.data_unchecked();
        let storage: &Storage = ctx.data_unchecked();
        let actor = current_user(ctx)?;
        Sponsor::delete(actor, id, storage, pool).await.extend()?;

        Ok(SUCCESS_MESSAGE)
    }
}
