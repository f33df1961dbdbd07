use rust_decimal::Decimal;
use time::macros::{date, datetime, time};
use time::OffsetDateTime;

use crate::models::branch::Branch;
use crate::models::event::signup::{EventSignup, SignupStatus};
use crate::models::event::{Event, EventStatus, EventType};
use crate::models::user::{Role, User};

fn mock_timestamp() -> OffsetDateTime {
    datetime!(2024-01-15 12:00 UTC)
}

pub fn mock_user() -> User {
    User {
        id: 1,
        email: String::from("sam@oak.edu"),
        first_name: String::from("Sam"),
        last_name: String::from("Rivera"),
        role: Role::Member,
        branch_id: Some(1),
        total_hours: Decimal::ZERO,
        total_events_attended: 0,
        created_at: mock_timestamp(),
    }
}

pub fn mock_branch() -> Branch {
    Branch {
        id: 1,
        name: String::from("Oak High"),
        school_name: String::from("Oak High School"),
        location: String::from("Portland, OR"),
        description: None,
        total_hours: Decimal::ZERO,
        total_events: 0,
        total_users: 1,
        join_code: String::from("482913"),
        image_path: None,
        created_at: mock_timestamp(),
    }
}

pub fn mock_event() -> Event {
    Event {
        id: 1,
        branch_id: 1,
        name: String::from("Beach Cleanup"),
        description: Some(String::from("Bring gloves")),
        location: Some(String::from("Cannon Beach")),
        max_participants: Some(20),
        event_type: EventType::Volunteer,
        status: EventStatus::Upcoming,
        created_by: None,
        event_date: date!(2024 - 05 - 04),
        start_time: time!(9:00),
        end_time: Some(time!(12:00)),
        created_at: mock_timestamp(),
    }
}

pub fn mock_signup() -> EventSignup {
    EventSignup {
        id: 1,
        event_id: 1,
        user_id: 1,
        signup_status: SignupStatus::Registered,
        hours_earned: Decimal::ZERO,
        signed_up_at: mock_timestamp(),
    }
}
