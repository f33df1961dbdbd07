//! The review state machine for hours requests.
//!
//! A request starts `pending` and is reviewed exactly once. Everything here is
//! decided without the database; `HoursRequest::approve` applies the plan
//! inside one transaction.

use async_graphql::Enum;
use rust_decimal::Decimal;

use crate::error::{AppError, AppResult};
use crate::models::branch::totals::Contribution;
use crate::models::event::signup::SignupStatus;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Enum, sqlx::Type)]
#[sqlx(type_name = "hours_request_status", rename_all = "snake_case")]
pub enum HoursRequestStatus {
    /// Waiting for an admin to review it
    Pending,
    /// The hours were credited
    Approved,
    /// The request was turned down
    Declined,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReviewDecision {
    Approve,
    Decline,
}

impl HoursRequestStatus {
    pub fn is_terminal(self) -> bool {
        self != HoursRequestStatus::Pending
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HoursRequestStatus::Pending => "pending",
            HoursRequestStatus::Approved => "approved",
            HoursRequestStatus::Declined => "declined",
        }
    }

    pub fn review(self, decision: ReviewDecision) -> AppResult<Self> {
        if self.is_terminal() {
            return Err(AppError::InvalidTransition(self.as_str().to_owned()));
        }

        Ok(match decision {
            ReviewDecision::Approve => HoursRequestStatus::Approved,
            ReviewDecision::Decline => HoursRequestStatus::Declined,
        })
    }
}

/// The most hours a single request can claim.
pub fn max_hours() -> Decimal {
    Decimal::new(24, 0)
}

/// Hours are stored to the hundredth.
pub const HOURS_SCALE: u32 = 2;

/// Checks a claimed or awarded hour count: more than zero, at most a day,
/// and no finer than the hundredths the database keeps.
pub fn validate_hours(field: &str, hours: Decimal) -> AppResult<Decimal> {
    if hours.normalize().scale() > HOURS_SCALE {
        Err(AppError::validation(format!(
            "{} can have at most {} decimal places",
            field, HOURS_SCALE
        )))
    } else if hours <= Decimal::ZERO {
        Err(AppError::validation(format!("{} must be greater than zero", field)))
    } else if hours > max_hours() {
        Err(AppError::validation(format!(
            "{} cannot be more than {}",
            field,
            max_hours()
        )))
    } else {
        Ok(hours)
    }
}

/// Admins award what was requested unless they say otherwise.
pub fn awarded_hours(requested: Decimal, awarded: Option<Decimal>) -> AppResult<Decimal> {
    validate_hours("Awarded hours", awarded.unwrap_or(requested))
}

/// The event-related state an approval depends on
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventLink {
    None,
    /// The request names an event the user has a sign-up row for.
    Signup { id: i64, status: SignupStatus },
    /// The request names an event but there is no sign-up row.
    NoSignup { already_credited: bool },
}

/// What approving a request changes besides the request itself
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ApprovalEffects {
    pub hours: Decimal,
    /// Whether the user's events-attended count goes up by one
    pub credit_event: bool,
    /// A sign-up to flip to `attended` with the awarded hours
    pub mark_attended: Option<i64>,
}

impl ApprovalEffects {
    /// An event is credited at most once per user: a sign-up already marked
    /// `attended`, or an earlier approval for the same event without a
    /// sign-up, means it was counted before.
    pub fn plan(hours: Decimal, link: EventLink) -> Self {
        let (credit_event, mark_attended) = match link {
            EventLink::None => (false, None),
            EventLink::Signup {
                status: SignupStatus::Attended,
                ..
            } => (false, None),
            EventLink::Signup { id, .. } => (true, Some(id)),
            EventLink::NoSignup { already_credited } => (!already_credited, None),
        };

        Self {
            hours,
            credit_event,
            mark_attended,
        }
    }

    pub fn events(&self) -> i32 {
        i32::from(self.credit_event)
    }

    /// What the approval adds to the user's branch
    pub fn contribution(&self) -> Contribution {
        Contribution::of_approval(self.hours, self.events())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hours(tenths: i64) -> Decimal {
        Decimal::new(tenths, 1)
    }

    #[test]
    fn reviewed_requests_cannot_be_reviewed_again() {
        let approved = HoursRequestStatus::Pending
            .review(ReviewDecision::Approve)
            .unwrap();
        assert_eq!(approved, HoursRequestStatus::Approved);

        for terminal in [HoursRequestStatus::Approved, HoursRequestStatus::Declined] {
            for decision in [ReviewDecision::Approve, ReviewDecision::Decline] {
                assert!(matches!(
                    terminal.review(decision),
                    Err(AppError::InvalidTransition(_))
                ));
            }
        }
    }

    #[test]
    fn awarded_hours_default_to_the_request() {
        assert_eq!(awarded_hours(hours(35), None).unwrap(), hours(35));
        assert_eq!(awarded_hours(hours(35), Some(hours(30))).unwrap(), hours(30));
        assert!(awarded_hours(hours(35), Some(Decimal::ZERO)).is_err());
        assert!(validate_hours("Hours", hours(241)).is_err());
        assert!(validate_hours("Hours", hours(240)).is_ok());
    }

    #[test]
    fn hours_finer_than_hundredths_are_rejected() {
        assert!(matches!(
            validate_hours("Hours", Decimal::new(1, 3)),
            Err(AppError::Validation(_))
        ));
        assert!(awarded_hours(hours(20), Some(Decimal::new(1255, 3))).is_err());
        assert_eq!(
            validate_hours("Hours", Decimal::new(1250, 3)).unwrap(),
            Decimal::new(125, 2)
        );
        assert!(validate_hours("Hours", Decimal::new(25, 2)).is_ok());
    }

    #[test]
    fn first_approval_for_an_event_marks_attendance() {
        let effects = ApprovalEffects::plan(
            hours(30),
            EventLink::Signup {
                id: 7,
                status: SignupStatus::Registered,
            },
        );

        assert!(effects.credit_event);
        assert_eq!(effects.mark_attended, Some(7));
        assert_eq!(
            effects.contribution(),
            Contribution::of_approval(hours(30), 1)
        );
    }

    #[test]
    fn second_approval_for_an_attended_event_only_adds_hours() {
        let effects = ApprovalEffects::plan(
            hours(10),
            EventLink::Signup {
                id: 7,
                status: SignupStatus::Attended,
            },
        );

        assert!(!effects.credit_event);
        assert_eq!(effects.mark_attended, None);
        assert_eq!(
            effects.contribution(),
            Contribution::of_approval(hours(10), 0)
        );
    }

    #[test]
    fn events_without_a_sign_up_are_credited_once() {
        let first = ApprovalEffects::plan(
            hours(20),
            EventLink::NoSignup {
                already_credited: false,
            },
        );
        let second = ApprovalEffects::plan(
            hours(20),
            EventLink::NoSignup {
                already_credited: true,
            },
        );

        assert!(first.credit_event);
        assert!(!second.credit_event);
        assert_eq!(first.mark_attended, None);
    }

    #[test]
    fn requests_without_an_event_only_add_hours() {
        let effects = ApprovalEffects::plan(hours(15), EventLink::None);
        assert_eq!(effects.events(), 0);
        assert_eq!(effects.mark_attended, None);
    }
}
