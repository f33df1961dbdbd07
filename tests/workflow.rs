use std::collections::HashSet;

use rust_decimal::Decimal;
use volunteer_hub::error::AppError;
use volunteer_hub::models::branch::join_code::{JoinCode, JoinCodeDraws};
use volunteer_hub::models::branch::totals::{BranchTotals, Contribution};
use volunteer_hub::models::event::signup::SignupStatus;
use volunteer_hub::models::hours::review::{
    awarded_hours, ApprovalEffects, EventLink, HoursRequestStatus, ReviewDecision,
};

fn code(digits: &str) -> JoinCode {
    JoinCode::parse(digits).unwrap()
}

#[test]
fn join_codes_are_six_digits() {
    assert_eq!(code(" 482913 ").as_str(), "482913");
    assert!(JoinCode::parse("48291").is_err());
    assert!(JoinCode::parse("48291a").is_err());
    assert!(JoinCode::parse("4829130").is_err());
}

#[test]
fn generated_codes_skip_taken_ones() {
    let taken: HashSet<JoinCode> = [code("111111"), code("222222")].into_iter().collect();
    let mut draws = vec![code("111111"), code("222222"), code("333333")].into_iter();

    let generated = JoinCodeDraws::new(5)
        .next_unused(&taken, || draws.next().unwrap())
        .unwrap();
    assert_eq!(generated, code("333333"));
}

#[test]
fn generation_gives_up_after_its_attempts() {
    let taken: HashSet<JoinCode> = [code("111111")].into_iter().collect();

    let mut draws = JoinCodeDraws::new(3);

    let result = draws.next_unused(&taken, || code("111111"));
    assert!(matches!(result, Err(AppError::Conflict(_))));
    assert_eq!(draws.used(), 3);
    assert!(draws.next_unused(&taken, || code("444444")).is_err());
}

#[test]
fn approving_a_registered_sign_up_credits_hours_and_the_event() {
    let status = HoursRequestStatus::Pending
        .review(ReviewDecision::Approve)
        .unwrap();
    assert_eq!(status, HoursRequestStatus::Approved);

    let hours = awarded_hours(Decimal::new(3, 0), Some(Decimal::new(25, 1))).unwrap();
    let effects = ApprovalEffects::plan(
        hours,
        EventLink::Signup {
            id: 7,
            status: SignupStatus::Registered,
        },
    );
    assert_eq!(effects.mark_attended, Some(7));

    let before = BranchTotals {
        total_hours: Decimal::new(10, 0),
        total_events: 2,
        total_users: 5,
    };
    let after = before.added(effects.contribution());
    assert_eq!(after.total_hours, Decimal::new(125, 1));
    assert_eq!(after.total_events, 3);
    assert_eq!(after.total_users, 5);
}

#[test]
fn reviewed_requests_cannot_be_reviewed_again() {
    for status in [HoursRequestStatus::Approved, HoursRequestStatus::Declined] {
        assert!(matches!(
            status.review(ReviewDecision::Approve),
            Err(AppError::InvalidTransition(_))
        ));
    }
}

#[test]
fn a_member_leaving_takes_their_totals_along() {
    let before = BranchTotals {
        total_hours: Decimal::new(4, 0),
        total_events: 1,
        total_users: 1,
    };
    let leaving = Contribution::of_member(Decimal::new(6, 0), 2);

    let after = before.removed(leaving);
    assert_eq!(after.total_hours, Decimal::ZERO);
    assert_eq!(after.total_events, 0);
    assert_eq!(after.total_users, 0);
}
