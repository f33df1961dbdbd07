use async_graphql::{ComplexObject, Context, Enum, InputObject, Result, ResultExt, SimpleObject};
use sqlx::{PgExecutor, PgPool};
use time::{Date, OffsetDateTime, Time};

use crate::error::{AppError, AppResult};
use crate::models::branch::Branch;
use crate::models::user::session::SessionContext;
use crate::models::user::User;
use crate::models::{DateScalar, DateTime, TimeScalar};
use crate::util::{optional_text, require_text};

pub mod signup;

use signup::EventSignup;

/// The kind of event
#[derive(Clone, Copy, Debug, PartialEq, Eq, Enum, sqlx::Type)]
#[sqlx(type_name = "event_type", rename_all = "snake_case")]
pub enum EventType {
    Volunteer,
    Fundraising,
    Awareness,
    /// Community and social events
    Community,
}

impl Default for EventType {
    fn default() -> Self {
        EventType::Volunteer
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Enum, sqlx::Type)]
#[sqlx(type_name = "event_status", rename_all = "snake_case")]
pub enum EventStatus {
    Upcoming,
    Ongoing,
    Completed,
    Cancelled,
}

impl EventStatus {
    pub fn accepts_registrations(self) -> bool {
        matches!(self, EventStatus::Upcoming | EventStatus::Ongoing)
    }
}

/// A volunteer event run by a branch
#[derive(SimpleObject, sqlx::FromRow, Clone, Debug)]
#[graphql(complex)]
pub struct Event {
    /// The ID of the event
    pub id: i64,
    /// The branch running the event
    pub branch_id: i64,
    /// The name of the event
    pub name: String,
    /// What the event is about
    pub description: Option<String>,
    /// Where the event takes place
    pub location: Option<String>,
    /// How many members can register, if limited
    pub max_participants: Option<i32>,
    /// The kind of event
    pub event_type: EventType,
    /// Whether the event is still coming up
    pub status: EventStatus,
    /// The admin who created the event
    pub created_by: Option<i64>,

    #[graphql(skip)]
    pub event_date: Date,
    #[graphql(skip)]
    pub start_time: Time,
    #[graphql(skip)]
    pub end_time: Option<Time>,
    #[graphql(skip)]
    pub created_at: OffsetDateTime,
}

#[ComplexObject]
impl Event {
    /// The day of the event
    pub async fn event_date(&self) -> DateScalar {
        DateScalar(self.event_date)
    }

    /// When the event starts
    pub async fn start_time(&self) -> TimeScalar {
        TimeScalar(self.start_time)
    }

    /// When the event ends, if known
    pub async fn end_time(&self) -> Option<TimeScalar> {
        self.end_time.map(TimeScalar)
    }

    pub async fn created_at(&self) -> DateTime {
        DateTime::from(self.created_at)
    }

    pub async fn branch(&self, ctx: &Context<'_>) -> Result<Branch> {
        let pool: &PgPool = ctx.data_unchecked();
        Branch::with_id(self.branch_id, pool).await.extend()
    }

    /// How many members are currently registered
    pub async fn registered_count(&self, ctx: &Context<'_>) -> Result<i64> {
        let pool: &PgPool = ctx.data_unchecked();
        EventSignup::registered_count(self.id, pool).await.extend()
    }

    /// How many more members can register, if the event is limited
    pub async fn spots_remaining(&self, ctx: &Context<'_>) -> Result<Option<i64>> {
        let pool: &PgPool = ctx.data_unchecked();
        let registered = EventSignup::registered_count(self.id, pool).await.extend()?;

        Ok(spots_remaining(self.max_participants, registered))
    }

    /// The current user's sign-up for this event, if any
    pub async fn user_signup(&self, ctx: &Context<'_>) -> Result<Option<EventSignup>> {
        let pool: &PgPool = ctx.data_unchecked();
        match ctx.data_opt::<SessionContext>() {
            Some(session) => EventSignup::for_user_at_event_opt(session.user.id, self.id, pool)
                .await
                .extend(),
            None => Ok(None),
        }
    }
}

/// Remaining capacity, or `None` for events without a limit.
pub fn spots_remaining(max_participants: Option<i32>, registered: i64) -> Option<i64> {
    max_participants.map(|max| (i64::from(max) - registered).max(0))
}

const EVENT_COLUMNS: &str = "id, branch_id, name, description, location, max_participants,
     event_type, status, created_by, event_date, start_time, end_time, created_at";

impl Event {
    pub async fn with_id(id: i64, conn: impl PgExecutor<'_>) -> AppResult<Self> {
        Self::with_id_opt(id, conn)
            .await?
            .ok_or_else(|| AppError::not_found(format!("No event with id {}", id)))
    }

    pub async fn with_id_opt(id: i64, conn: impl PgExecutor<'_>) -> AppResult<Option<Self>> {
        sqlx::query_as::<_, Self>(&format!("SELECT {} FROM events WHERE id = $1", EVENT_COLUMNS))
            .bind(id)
            .fetch_optional(conn)
            .await
            .map_err(Into::into)
    }

    pub async fn for_branch(branch_id: i64, pool: &PgPool) -> AppResult<Vec<Self>> {
        sqlx::query_as::<_, Self>(&format!(
            "SELECT {} FROM events WHERE branch_id = $1 ORDER BY event_date, start_time",
            EVENT_COLUMNS
        ))
        .bind(branch_id)
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }

    pub async fn all(pool: &PgPool) -> AppResult<Vec<Self>> {
        sqlx::query_as::<_, Self>(&format!(
            "SELECT {} FROM events ORDER BY event_date, start_time",
            EVENT_COLUMNS
        ))
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }

    /// The events a user can see: their own branch's, or any branch's for super-admins.
    pub async fn visible_to(
        user: &User,
        branch_id: Option<i64>,
        pool: &PgPool,
    ) -> AppResult<Vec<Self>> {
        match (user.is_super_admin(), branch_id) {
            (true, Some(branch_id)) => Self::for_branch(branch_id, pool).await,
            (true, None) => Self::all(pool).await,
            (false, _) => match user.branch_id {
                Some(own_branch) if branch_id.map_or(true, |id| id == own_branch) => {
                    Self::for_branch(own_branch, pool).await
                }
                Some(_) => Err(AppError::forbidden("you can only see your own branch's events")),
                None => Ok(Vec::new()),
            },
        }
    }

    pub fn ensure_visible_to(&self, user: &User) -> AppResult<()> {
        if user.is_super_admin() || user.branch_id == Some(self.branch_id) {
            Ok(())
        } else {
            Err(AppError::forbidden("this event belongs to another branch"))
        }
    }

    pub async fn create(
        actor: &User,
        branch_id: Option<i64>,
        new_event: NewEvent,
        pool: &PgPool,
    ) -> AppResult<Self> {
        let branch_id = actor.acting_branch(branch_id)?;
        actor.ensure_admin_of(Some(branch_id))?;
        Branch::with_id(branch_id, pool).await?;
        let new_event = new_event.validate()?;

        let event = sqlx::query_as::<_, Self>(&format!(
            "INSERT INTO events (branch_id, name, description, event_date, start_time, end_time,
                 location, max_participants, event_type, status, created_by)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
             RETURNING {}",
            EVENT_COLUMNS
        ))
        .bind(branch_id)
        .bind(&new_event.name)
        .bind(&new_event.description)
        .bind(new_event.event_date)
        .bind(new_event.start_time)
        .bind(new_event.end_time)
        .bind(&new_event.location)
        .bind(new_event.max_participants)
        .bind(new_event.event_type)
        .bind(EventStatus::Upcoming)
        .bind(actor.id)
        .fetch_one(pool)
        .await?;

        tracing::info!(actor = actor.id, event = event.id, branch = branch_id, "created event");
        Ok(event)
    }

    pub async fn update(
        actor: &User,
        id: i64,
        update: NewEvent,
        pool: &PgPool,
    ) -> AppResult<Self> {
        let event = Self::with_id(id, pool).await?;
        actor.ensure_admin_of(Some(event.branch_id))?;
        let update = update.validate()?;

        sqlx::query_as::<_, Self>(&format!(
            "UPDATE events
             SET name = $1, description = $2, event_date = $3, start_time = $4, end_time = $5,
                 location = $6, max_participants = $7, event_type = $8
             WHERE id = $9
             RETURNING {}",
            EVENT_COLUMNS
        ))
        .bind(&update.name)
        .bind(&update.description)
        .bind(update.event_date)
        .bind(update.start_time)
        .bind(update.end_time)
        .bind(&update.location)
        .bind(update.max_participants)
        .bind(update.event_type)
        .bind(id)
        .fetch_one(pool)
        .await
        .map_err(Into::into)
    }

    pub async fn set_status(
        actor: &User,
        id: i64,
        status: EventStatus,
        pool: &PgPool,
    ) -> AppResult<Self> {
        let event = Self::with_id(id, pool).await?;
        actor.ensure_admin_of(Some(event.branch_id))?;

        let event = sqlx::query_as::<_, Self>(&format!(
            "UPDATE events SET status = $1 WHERE id = $2 RETURNING {}",
            EVENT_COLUMNS
        ))
        .bind(status)
        .bind(id)
        .fetch_one(pool)
        .await?;

        tracing::info!(actor = actor.id, event = id, ?status, "changed event status");
        Ok(event)
    }

    /// Sign-ups go with the event; hour requests keep their hours but lose the link.
    pub async fn delete(actor: &User, id: i64, pool: &PgPool) -> AppResult<()> {
        let event = Self::with_id(id, pool).await?;
        actor.ensure_admin_of(Some(event.branch_id))?;

        sqlx::query("DELETE FROM events WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;

        tracing::info!(actor = actor.id, event = id, "deleted event");
        Ok(())
    }
}

#[derive(InputObject)]
pub struct NewEvent {
    pub name: String,
    pub description: Option<String>,
    pub event_date: DateScalar,
    pub start_time: TimeScalar,
    pub end_time: Option<TimeScalar>,
    pub location: Option<String>,
    pub max_participants: Option<i32>,
    /// Defaults to a volunteer event
    pub event_type: Option<EventType>,
}

/// An event form that passed validation
#[derive(Debug)]
pub struct ValidNewEvent {
    pub name: String,
    pub description: Option<String>,
    pub event_date: Date,
    pub start_time: Time,
    pub end_time: Option<Time>,
    pub location: Option<String>,
    pub max_participants: Option<i32>,
    pub event_type: EventType,
}

impl NewEvent {
    pub fn validate(self) -> AppResult<ValidNewEvent> {
        let name = require_text("Name", &self.name)?;
        let start_time = self.start_time.0;
        let end_time = self.end_time.map(|end| end.0);

        if let Some(end_time) = end_time {
            if end_time <= start_time {
                return Err(AppError::validation("End time must be after the start time"));
            }
        }
        if let Some(max) = self.max_participants {
            if max <= 0 {
                return Err(AppError::validation(
                    "Maximum participants must be greater than zero",
                ));
            }
        }

        Ok(ValidNewEvent {
            name,
            description: optional_text(self.description),
            event_date: self.event_date.0,
            start_time,
            end_time,
            location: optional_text(self.location),
            max_participants: self.max_participants,
            event_type: self.event_type.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use time::macros::{date, time};

    use super::*;
    use crate::models::user::Role;
    use crate::tests::mock::{mock_event, mock_user};

    fn new_event() -> NewEvent {
        NewEvent {
            name: "Beach Cleanup".to_owned(),
            description: None,
            event_date: DateScalar(date!(2024 - 05 - 04)),
            start_time: TimeScalar(time!(9:00)),
            end_time: Some(TimeScalar(time!(12:00))),
            location: Some("  ".to_owned()),
            max_participants: Some(20),
            event_type: None,
        }
    }

    #[test]
    fn new_events_default_to_volunteer() {
        let valid = new_event().validate().unwrap();
        assert_eq!(valid.event_type, EventType::Volunteer);
        assert_eq!(valid.location, None);
    }

    #[test]
    fn end_time_must_follow_start_time() {
        let backwards = NewEvent {
            end_time: Some(TimeScalar(time!(8:30))),
            ..new_event()
        };
        assert!(matches!(backwards.validate(), Err(AppError::Validation(_))));
    }

    #[test]
    fn capacity_must_be_positive() {
        let empty = NewEvent {
            max_participants: Some(0),
            ..new_event()
        };
        assert!(empty.validate().is_err());
    }

    #[test]
    fn spots_remaining_never_goes_negative() {
        assert_eq!(spots_remaining(Some(2), 1), Some(1));
        assert_eq!(spots_remaining(Some(2), 3), Some(0));
        assert_eq!(spots_remaining(None, 40), None);
    }

    #[test]
    fn only_open_events_take_registrations() {
        assert!(EventStatus::Upcoming.accepts_registrations());
        assert!(EventStatus::Ongoing.accepts_registrations());
        assert!(!EventStatus::Completed.accepts_registrations());
        assert!(!EventStatus::Cancelled.accepts_registrations());
    }

    #[test]
    fn events_are_visible_within_their_branch() {
        let event = mock_event();
        assert!(event.ensure_visible_to(&mock_user()).is_ok());

        let outsider = User {
            branch_id: Some(2),
            ..mock_user()
        };
        assert!(event.ensure_visible_to(&outsider).is_err());

        let super_admin = User {
            role: Role::SuperAdmin,
            branch_id: None,
            ..mock_user()
        };
        assert!(event.ensure_visible_to(&super_admin).is_ok());
    }
}
