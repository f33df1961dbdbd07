use async_graphql::{ComplexObject, Context, Enum, Result, ResultExt, SimpleObject};
use rust_decimal::Decimal;
use sqlx::{PgExecutor, PgPool};
use time::OffsetDateTime;

use crate::error::{AppError, AppResult};
use crate::models::event::{Event, EventStatus};
use crate::models::user::User;
use crate::models::DateTime;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Enum, sqlx::Type)]
#[sqlx(type_name = "signup_status", rename_all = "snake_case")]
pub enum SignupStatus {
    /// The member plans to attend
    Registered,
    /// The member was credited for attending
    Attended,
    /// The member didn't show up
    NoShow,
    /// The member withdrew
    Cancelled,
}

impl SignupStatus {
    /// Active sign-ups block a second registration for the same event.
    pub fn is_active(self) -> bool {
        matches!(self, SignupStatus::Registered | SignupStatus::Attended)
    }
}

/// A member's registration for an event
#[derive(SimpleObject, sqlx::FromRow, Clone, Debug)]
#[graphql(complex)]
pub struct EventSignup {
    pub id: i64,
    pub event_id: i64,
    pub user_id: i64,
    pub signup_status: SignupStatus,
    /// Hours credited for this event through an approved hours request
    pub hours_earned: Decimal,

    #[graphql(skip)]
    pub signed_up_at: OffsetDateTime,
}

#[ComplexObject]
impl EventSignup {
    pub async fn signed_up_at(&self) -> DateTime {
        DateTime::from(self.signed_up_at)
    }

    pub async fn event(&self, ctx: &Context<'_>) -> Result<Event> {
        let pool: &PgPool = ctx.data_unchecked();
        Event::with_id(self.event_id, pool).await.extend()
    }

    pub async fn user(&self, ctx: &Context<'_>) -> Result<User> {
        let pool: &PgPool = ctx.data_unchecked();
        User::with_id(self.user_id, pool).await.extend()
    }
}

/// A registered member, as shown on an event's roster
#[derive(SimpleObject, sqlx::FromRow, Clone, Debug)]
#[graphql(complex)]
pub struct Registration {
    pub signup_id: i64,
    pub user_id: i64,
    pub first_name: String,
    pub last_name: String,
    pub email: String,

    #[graphql(skip)]
    pub signed_up_at: OffsetDateTime,
}

#[ComplexObject]
impl Registration {
    pub async fn signed_up_at(&self) -> DateTime {
        DateTime::from(self.signed_up_at)
    }
}

/// How a registration will be recorded
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegistrationAction {
    Insert,
    /// An earlier, inactive sign-up row is reused.
    Reactivate(i64),
}

/// Decides whether a member may register, given the event and what is
/// already on its roster.
pub fn plan_registration(
    status: EventStatus,
    max_participants: Option<i32>,
    registered: i64,
    existing: Option<&EventSignup>,
) -> AppResult<RegistrationAction> {
    if !status.accepts_registrations() {
        return Err(AppError::validation(format!(
            "This event is {} and no longer accepts registrations",
            match status {
                EventStatus::Cancelled => "cancelled",
                _ => "over",
            }
        )));
    }
    if existing.map_or(false, |signup| signup.signup_status.is_active()) {
        return Err(AppError::conflict("You are already registered for this event"));
    }
    if let Some(max) = max_participants {
        if registered >= i64::from(max) {
            return Err(AppError::conflict("This event is full"));
        }
    }

    Ok(match existing {
        Some(signup) => RegistrationAction::Reactivate(signup.id),
        None => RegistrationAction::Insert,
    })
}

const SIGNUP_COLUMNS: &str = "id, event_id, user_id, signup_status, hours_earned, signed_up_at";

impl EventSignup {
    pub async fn for_user_at_event_opt(
        user_id: i64,
        event_id: i64,
        conn: impl PgExecutor<'_>,
    ) -> AppResult<Option<Self>> {
        sqlx::query_as::<_, Self>(&format!(
            "SELECT {} FROM event_signups WHERE user_id = $1 AND event_id = $2",
            SIGNUP_COLUMNS
        ))
        .bind(user_id)
        .bind(event_id)
        .fetch_optional(conn)
        .await
        .map_err(Into::into)
    }

    pub async fn for_user(user_id: i64, pool: &PgPool) -> AppResult<Vec<Self>> {
        sqlx::query_as::<_, Self>(&format!(
            "SELECT {} FROM event_signups WHERE user_id = $1 ORDER BY signed_up_at DESC",
            SIGNUP_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }

    pub async fn registered_count(event_id: i64, conn: impl PgExecutor<'_>) -> AppResult<i64> {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM event_signups WHERE event_id = $1 AND signup_status = $2",
        )
        .bind(event_id)
        .bind(SignupStatus::Registered)
        .fetch_one(conn)
        .await
        .map_err(Into::into)
    }

    /// Registers the user for the event.
    ///
    /// The capacity check is read-then-write: two members registering for the
    /// last spot at the same moment can both get in.
    pub async fn register(user: &User, event_id: i64, pool: &PgPool) -> AppResult<Self> {
        let event = Event::with_id(event_id, pool).await?;
        if user.branch_id != Some(event.branch_id) {
            return Err(AppError::forbidden(
                "you can only register for your own branch's events",
            ));
        }

        let registered = Self::registered_count(event_id, pool).await?;
        let existing = Self::for_user_at_event_opt(user.id, event_id, pool).await?;
        let action = plan_registration(
            event.status,
            event.max_participants,
            registered,
            existing.as_ref(),
        )?;

        let signup = match action {
            RegistrationAction::Insert => sqlx::query_as::<_, Self>(&format!(
                "INSERT INTO event_signups (event_id, user_id, signup_status, hours_earned)
                 VALUES ($1, $2, $3, 0)
                 ON CONFLICT (event_id, user_id) DO NOTHING
                 RETURNING {}",
                SIGNUP_COLUMNS
            ))
            .bind(event_id)
            .bind(user.id)
            .bind(SignupStatus::Registered)
            .fetch_optional(pool)
            .await?,
            RegistrationAction::Reactivate(signup_id) => sqlx::query_as::<_, Self>(&format!(
                "UPDATE event_signups
                 SET signup_status = $1, hours_earned = 0, signed_up_at = now()
                 WHERE id = $2 AND signup_status NOT IN ('registered', 'attended')
                 RETURNING {}",
                SIGNUP_COLUMNS
            ))
            .bind(SignupStatus::Registered)
            .bind(signup_id)
            .fetch_optional(pool)
            .await?,
        };
        let signup = signup
            .ok_or_else(|| AppError::conflict("You are already registered for this event"))?;

        tracing::info!(user = user.id, event = event_id, "registered for event");
        Ok(signup)
    }

    pub async fn cancel(user: &User, event_id: i64, pool: &PgPool) -> AppResult<Self> {
        let signup = sqlx::query_as::<_, Self>(&format!(
            "UPDATE event_signups SET signup_status = $1
             WHERE user_id = $2 AND event_id = $3 AND signup_status = $4
             RETURNING {}",
            SIGNUP_COLUMNS
        ))
        .bind(SignupStatus::Cancelled)
        .bind(user.id)
        .bind(event_id)
        .bind(SignupStatus::Registered)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("You are not registered for this event"))?;

        tracing::info!(user = user.id, event = event_id, "cancelled registration");
        Ok(signup)
    }

    /// The members currently registered for an event, for its branch's admins.
    pub async fn registrations(
        actor: &User,
        event_id: i64,
        pool: &PgPool,
    ) -> AppResult<Vec<Registration>> {
        let event = Event::with_id(event_id, pool).await?;
        actor.ensure_admin_of(Some(event.branch_id))?;

        sqlx::query_as::<_, Registration>(
            "SELECT s.id AS signup_id, u.id AS user_id, u.first_name, u.last_name, u.email,
                 s.signed_up_at
             FROM event_signups s
             JOIN users u ON u.id = s.user_id
             WHERE s.event_id = $1 AND s.signup_status = $2",
        )
        .bind(event_id)
        .bind(SignupStatus::Registered)
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::mock::mock_signup;

    #[test]
    fn full_events_turn_members_away() {
        assert!(matches!(
            plan_registration(EventStatus::Upcoming, Some(2), 2, None),
            Err(AppError::Conflict(message)) if message == "This event is full"
        ));
        assert_eq!(
            plan_registration(EventStatus::Upcoming, Some(2), 1, None).unwrap(),
            RegistrationAction::Insert
        );
        assert_eq!(
            plan_registration(EventStatus::Upcoming, None, 500, None).unwrap(),
            RegistrationAction::Insert
        );
    }

    #[test]
    fn members_register_once() {
        let registered = mock_signup();
        assert!(matches!(
            plan_registration(EventStatus::Upcoming, None, 1, Some(&registered)),
            Err(AppError::Conflict(_))
        ));

        let attended = EventSignup {
            signup_status: SignupStatus::Attended,
            ..mock_signup()
        };
        assert!(plan_registration(EventStatus::Upcoming, None, 0, Some(&attended)).is_err());
    }

    #[test]
    fn cancelled_sign_ups_are_reactivated() {
        let cancelled = EventSignup {
            signup_status: SignupStatus::Cancelled,
            ..mock_signup()
        };
        assert_eq!(
            plan_registration(EventStatus::Upcoming, Some(5), 0, Some(&cancelled)).unwrap(),
            RegistrationAction::Reactivate(cancelled.id)
        );
    }

    #[test]
    fn closed_events_reject_registration() {
        assert!(plan_registration(EventStatus::Cancelled, None, 0, None).is_err());
        assert!(plan_registration(EventStatus::Completed, None, 0, None).is_err());
    }
}
