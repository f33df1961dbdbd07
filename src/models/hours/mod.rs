use async_graphql::{ComplexObject, Context, InputObject, Result, ResultExt, SimpleObject};
use rust_decimal::Decimal;
use sqlx::{Acquire, PgExecutor, PgPool, Postgres, Transaction};
use time::OffsetDateTime;

use crate::error::{AppError, AppResult};
use crate::models::branch::totals::BranchTotals;
use crate::models::event::signup::EventSignup;
use crate::models::event::Event;
use crate::models::user::session::SessionContext;
use crate::models::user::User;
use crate::models::DateTime;
use crate::storage::{Bucket, NewUpload, Storage};
use crate::util::{current_time, optional_text, require_text};

pub mod review;

use review::{
    awarded_hours, validate_hours, ApprovalEffects, EventLink, HoursRequestStatus,
    ReviewDecision,
};

/// A member's claim of volunteer time, waiting for or past review
#[derive(SimpleObject, sqlx::FromRow, Clone, Debug)]
#[graphql(complex)]
pub struct HoursRequest {
    /// The ID of the request
    pub id: i64,
    /// The member claiming the hours
    pub user_id: i64,
    /// The event the hours were for, if any
    pub event_id: Option<i64>,
    /// The hours the member claimed
    pub hours_requested: Decimal,
    /// What the member did
    pub description: String,
    pub status: HoursRequestStatus,
    /// The hours actually credited, once approved
    pub admin_hours_awarded: Option<Decimal>,
    /// Notes from the reviewing admin
    pub admin_notes: Option<String>,
    /// The admin who reviewed the request
    pub reviewed_by: Option<i64>,

    #[graphql(skip)]
    pub image_path: String,
    #[graphql(skip)]
    pub reviewed_at: Option<OffsetDateTime>,
    #[graphql(skip)]
    pub created_at: OffsetDateTime,
}

#[ComplexObject]
impl HoursRequest {
    pub async fn user(&self, ctx: &Context<'_>) -> Result<User> {
        let pool: &PgPool = ctx.data_unchecked();
        User::with_id(self.user_id, pool).await.extend()
    }

    pub async fn event(&self, ctx: &Context<'_>) -> Result<Option<Event>> {
        let pool: &PgPool = ctx.data_unchecked();
        match self.event_id {
            Some(event_id) => Event::with_id_opt(event_id, pool).await.extend(),
            None => Ok(None),
        }
    }

    pub async fn reviewer(&self, ctx: &Context<'_>) -> Result<Option<User>> {
        let pool: &PgPool = ctx.data_unchecked();
        match self.reviewed_by {
            Some(reviewer) => User::with_id_opt(reviewer, pool).await.extend(),
            None => Ok(None),
        }
    }

    pub async fn reviewed_at(&self) -> Option<DateTime> {
        self.reviewed_at.map(DateTime::from)
    }

    /// When the request was submitted
    pub async fn created_at(&self) -> DateTime {
        DateTime::from(self.created_at)
    }

    /// A short-lived link to the proof photo, for the requester and their
    /// branch's admins only
    pub async fn proof_url(&self, ctx: &Context<'_>) -> Result<Option<String>> {
        let pool: &PgPool = ctx.data_unchecked();
        let storage: &Storage = ctx.data_unchecked();
        let session = match ctx.data_opt::<SessionContext>() {
            Some(session) => session,
            None => return Ok(None),
        };

        if !self.is_visible_to(&session.user, pool).await.extend()? {
            return Ok(None);
        }

        storage
            .signed_url(&self.image_path, current_time())
            .map(Some)
            .extend()
    }
}

const HOURS_COLUMNS: &str = "hr.id, hr.user_id, hr.event_id, hr.hours_requested, hr.description,
     hr.status, hr.admin_hours_awarded, hr.admin_notes, hr.reviewed_by, hr.image_path,
     hr.reviewed_at, hr.created_at";

impl HoursRequest {
    /// The requester and admins of the requester's branch may see a request.
    pub async fn is_visible_to(&self, user: &User, pool: &PgPool) -> AppResult<bool> {
        if user.id == self.user_id || user.is_super_admin() {
            return Ok(true);
        }

        let requester = User::with_id(self.user_id, pool).await?;
        Ok(user.is_admin_of(requester.branch_id))
    }

    pub async fn with_id(id: i64, conn: impl PgExecutor<'_>) -> AppResult<Self> {
        sqlx::query_as::<_, Self>(&format!(
            "SELECT {} FROM hours_requests hr WHERE hr.id = $1",
            HOURS_COLUMNS
        ))
        .bind(id)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| AppError::not_found(format!("No hours request with id {}", id)))
    }

    async fn lock(id: i64, tx: &mut Transaction<'_, Postgres>) -> AppResult<Self> {
        sqlx::query_as::<_, Self>(&format!(
            "SELECT {} FROM hours_requests hr WHERE hr.id = $1 FOR UPDATE",
            HOURS_COLUMNS
        ))
        .bind(id)
        .fetch_optional(tx)
        .await?
        .ok_or_else(|| AppError::not_found(format!("No hours request with id {}", id)))
    }

    pub async fn for_user(user_id: i64, pool: &PgPool) -> AppResult<Vec<Self>> {
        sqlx::query_as::<_, Self>(&format!(
            "SELECT {} FROM hours_requests hr WHERE hr.user_id = $1 ORDER BY hr.created_at DESC",
            HOURS_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }

    /// Requests from a branch's members, optionally only those in one state.
    pub async fn for_branch(
        branch_id: i64,
        status: Option<HoursRequestStatus>,
        pool: &PgPool,
    ) -> AppResult<Vec<Self>> {
        sqlx::query_as::<_, Self>(&format!(
            "SELECT {} FROM hours_requests hr
             JOIN users u ON u.id = hr.user_id
             WHERE u.branch_id = $1 AND ($2::hours_request_status IS NULL OR hr.status = $2)
             ORDER BY hr.created_at DESC",
            HOURS_COLUMNS
        ))
        .bind(branch_id)
        .bind(status)
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }

    pub async fn all(status: Option<HoursRequestStatus>, pool: &PgPool) -> AppResult<Vec<Self>> {
        sqlx::query_as::<_, Self>(&format!(
            "SELECT {} FROM hours_requests hr
             WHERE ($1::hours_request_status IS NULL OR hr.status = $1)
             ORDER BY hr.created_at DESC",
            HOURS_COLUMNS
        ))
        .bind(status)
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }

    /// The review queue for an admin: their own branch, or any (or every)
    /// branch for super-admins.
    pub async fn for_reviewer(
        reviewer: &User,
        branch_id: Option<i64>,
        status: Option<HoursRequestStatus>,
        pool: &PgPool,
    ) -> AppResult<Vec<Self>> {
        if reviewer.is_super_admin() && branch_id.is_none() {
            return Self::all(status, pool).await;
        }

        let branch_id = reviewer.acting_branch(branch_id)?;
        reviewer.ensure_admin_of(Some(branch_id))?;
        Self::for_branch(branch_id, status, pool).await
    }

    pub async fn submit(
        user: &User,
        new_request: NewHoursRequest,
        storage: &Storage,
        pool: &PgPool,
    ) -> AppResult<Self> {
        let (hours, description) = new_request.validate()?;

        if let Some(event_id) = new_request.event_id {
            let signup = EventSignup::for_user_at_event_opt(user.id, event_id, pool).await?;
            if !signup.map_or(false, |signup| signup.signup_status.is_active()) {
                return Err(AppError::validation(
                    "You can only log hours for events you signed up for",
                ));
            }
        }

        let image_path = storage
            .upload(
                Bucket::HourProofs,
                &user.id.to_string(),
                &new_request.proof,
                current_time(),
            )
            .await?;

        let inserted = sqlx::query_as::<_, Self>(&format!(
            "INSERT INTO hours_requests AS hr
                 (user_id, event_id, hours_requested, description, image_path, status)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING {}",
            HOURS_COLUMNS
        ))
        .bind(user.id)
        .bind(new_request.event_id)
        .bind(hours)
        .bind(&description)
        .bind(&image_path)
        .bind(HoursRequestStatus::Pending)
        .fetch_one(pool)
        .await;

        match inserted {
            Ok(request) => {
                tracing::info!(user = user.id, request = request.id, %hours, "submitted hours request");
                Ok(request)
            }
            Err(err) => {
                storage
                    .delete_best_effort(Bucket::HourProofs, [&image_path])
                    .await;
                Err(err.into())
            }
        }
    }

    /// Approves a pending request and credits the member, all in one
    /// transaction. A failure anywhere leaves the request pending, so the
    /// approval can simply be retried.
    pub async fn approve(
        reviewer: &User,
        id: i64,
        awarded: Option<Decimal>,
        notes: Option<String>,
        pool: &PgPool,
    ) -> AppResult<Self> {
        let mut tx = pool.begin().await?;
        let request = Self::lock(id, &mut tx).await?;
        let requester = User::lock(request.user_id, &mut tx).await?;
        reviewer.ensure_admin_of(requester.branch_id)?;

        let status = request.status.review(ReviewDecision::Approve)?;
        let awarded = awarded_hours(request.hours_requested, awarded)?;
        let link = Self::event_link(&request, &mut tx).await?;
        let effects = ApprovalEffects::plan(awarded, link);

        let approved = Self::stamp_review(
            id,
            status,
            Some(awarded),
            optional_text(notes),
            reviewer.id,
            &mut tx,
        )
        .await?;

        add_user_hours(requester.id, awarded, &mut tx).await?;
        if effects.credit_event {
            sqlx::query(
                "UPDATE users SET total_events_attended = total_events_attended + 1 WHERE id = $1",
            )
            .bind(requester.id)
            .execute(&mut tx)
            .await?;
        }
        if let Some(signup_id) = effects.mark_attended {
            sqlx::query(
                "UPDATE event_signups SET signup_status = 'attended', hours_earned = $1
                 WHERE id = $2",
            )
            .bind(awarded)
            .bind(signup_id)
            .execute(&mut tx)
            .await?;
        }
        if let Some(branch_id) = requester.branch_id {
            BranchTotals::add_to(branch_id, effects.contribution(), &mut tx).await?;
        }
        tx.commit().await?;

        tracing::info!(
            reviewer = reviewer.id,
            request = id,
            user = requester.id,
            %awarded,
            credit_event = effects.credit_event,
            "approved hours request"
        );
        Ok(approved)
    }

    pub async fn decline(
        reviewer: &User,
        id: i64,
        notes: Option<String>,
        pool: &PgPool,
    ) -> AppResult<Self> {
        let mut tx = pool.begin().await?;
        let request = Self::lock(id, &mut tx).await?;
        let requester = User::with_id(request.user_id, &mut tx).await?;
        reviewer.ensure_admin_of(requester.branch_id)?;

        let status = request.status.review(ReviewDecision::Decline)?;
        let declined =
            Self::stamp_review(id, status, None, optional_text(notes), reviewer.id, &mut tx)
                .await?;
        tx.commit().await?;

        tracing::info!(reviewer = reviewer.id, request = id, "declined hours request");
        Ok(declined)
    }

    async fn event_link(request: &Self, tx: &mut Transaction<'_, Postgres>) -> AppResult<EventLink> {
        let event_id = match request.event_id {
            Some(event_id) => event_id,
            None => return Ok(EventLink::None),
        };

        match EventSignup::for_user_at_event_opt(request.user_id, event_id, &mut *tx).await? {
            Some(signup) => Ok(EventLink::Signup {
                id: signup.id,
                status: signup.signup_status,
            }),
            None => {
                let already_credited: bool = sqlx::query_scalar(
                    "SELECT EXISTS (
                         SELECT 1 FROM hours_requests
                         WHERE user_id = $1 AND event_id = $2 AND status = $3 AND id <> $4
                     )",
                )
                .bind(request.user_id)
                .bind(event_id)
                .bind(HoursRequestStatus::Approved)
                .bind(request.id)
                .fetch_one(&mut *tx)
                .await?;

                Ok(EventLink::NoSignup { already_credited })
            }
        }
    }

    async fn stamp_review(
        id: i64,
        status: HoursRequestStatus,
        awarded: Option<Decimal>,
        notes: Option<String>,
        reviewer_id: i64,
        tx: &mut Transaction<'_, Postgres>,
    ) -> AppResult<Self> {
        sqlx::query_as::<_, Self>(&format!(
            "UPDATE hours_requests AS hr
             SET status = $1, admin_hours_awarded = $2, admin_notes = $3,
                 reviewed_by = $4, reviewed_at = $5
             WHERE hr.id = $6 AND hr.status = $7
             RETURNING {}",
            HOURS_COLUMNS
        ))
        .bind(status)
        .bind(awarded)
        .bind(notes)
        .bind(reviewer_id)
        .bind(current_time())
        .bind(id)
        .bind(HoursRequestStatus::Pending)
        .fetch_optional(tx)
        .await?
        .ok_or_else(|| AppError::InvalidTransition(status.as_str().to_owned()))
    }
}

/// Credits hours through the `increment_user_hours` procedure, falling back
/// to a plain update if the procedure call fails. The savepoint keeps a
/// failed call from aborting the surrounding transaction.
async fn add_user_hours(
    user_id: i64,
    hours: Decimal,
    tx: &mut Transaction<'_, Postgres>,
) -> AppResult<()> {
    let mut savepoint = (&mut *tx).begin().await?;
    let called = sqlx::query("SELECT increment_user_hours($1, $2)")
        .bind(user_id)
        .bind(hours)
        .execute(&mut savepoint)
        .await;

    match called {
        Ok(_) => savepoint.commit().await?,
        Err(err) => {
            tracing::warn!(user = user_id, "increment_user_hours failed, updating directly: {}", err);
            savepoint.rollback().await?;
            sqlx::query("UPDATE users SET total_hours = total_hours + $1 WHERE id = $2")
                .bind(hours)
                .bind(user_id)
                .execute(&mut *tx)
                .await?;
        }
    }

    Ok(())
}

#[derive(InputObject)]
pub struct NewHoursRequest {
    /// More than zero and at most 24
    pub hours_requested: Decimal,
    pub description: String,
    /// An event the member signed up for, if the hours were for one
    pub event_id: Option<i64>,
    /// A photo proving the hours were worked
    pub proof: NewUpload,
}

impl NewHoursRequest {
    /// The claimed hours and the trimmed description, checked before the
    /// proof photo is stored.
    pub fn validate(&self) -> AppResult<(Decimal, String)> {
        let hours = validate_hours("Hours", self.hours_requested)?;
        let description = require_text("Description", &self.description)?;

        Ok((hours, description))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_request(hours: Decimal, description: &str) -> NewHoursRequest {
        NewHoursRequest {
            hours_requested: hours,
            description: description.to_owned(),
            event_id: None,
            proof: NewUpload {
                file_name: "proof.jpg".to_owned(),
                content: base64::encode(b"photo"),
            },
        }
    }

    #[test]
    fn submissions_are_checked_before_upload() {
        let (hours, description) = new_request(Decimal::new(25, 1), "  Food bank shift ")
            .validate()
            .unwrap();
        assert_eq!(hours, Decimal::new(25, 1));
        assert_eq!(description, "Food bank shift");

        for (hours, description) in [
            (Decimal::ZERO, "Food bank shift"),
            (Decimal::new(1, 3), "Food bank shift"),
            (Decimal::new(25, 0), "Food bank shift"),
            (Decimal::new(2, 0), "   "),
        ] {
            assert!(matches!(
                new_request(hours, description).validate(),
                Err(AppError::Validation(_))
            ));
        }
    }
}
