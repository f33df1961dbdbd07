//! Extra utilities for use elsewhere in the API.

use std::sync::OnceLock;

use regex::Regex;
use time::OffsetDateTime;
use tracing_subscriber::EnvFilter;

use crate::error::{AppError, AppResult};

/// The literal string users must type before an irrecoverable deletion.
pub const DELETE_CONFIRMATION: &str = "DELETE";

pub fn current_time() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}

pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Trims the field and rejects it if nothing is left.
pub fn require_text(field: &str, value: &str) -> AppResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(AppError::validation(format!("{} is required", field)))
    } else {
        Ok(trimmed.to_owned())
    }
}

/// Blank optional text is stored as NULL.
pub fn optional_text(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

pub fn require_email(value: &str) -> AppResult<String> {
    let email = value.trim().to_lowercase();
    if email_regex().is_match(&email) {
        Ok(email)
    } else {
        Err(AppError::validation(format!("{} is not a valid email", value)))
    }
}

pub fn ensure_confirmed(confirmation: &str) -> AppResult<()> {
    if confirmation == DELETE_CONFIRMATION {
        Ok(())
    } else {
        Err(AppError::validation(format!(
            "Type {} to confirm this deletion",
            DELETE_CONFIRMATION
        )))
    }
}

fn email_regex() -> &'static Regex {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    EMAIL.get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email pattern is valid"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn require_text_trims_and_rejects_blank() {
        assert_eq!(require_text("Name", "  Oak High ").unwrap(), "Oak High");
        assert!(matches!(
            require_text("Name", "   "),
            Err(AppError::Validation(message)) if message == "Name is required"
        ));
    }

    #[test]
    fn optional_text_drops_blank_values() {
        assert_eq!(optional_text(Some("  ".to_owned())), None);
        assert_eq!(optional_text(Some(" gym ".to_owned())), Some("gym".to_owned()));
        assert_eq!(optional_text(None), None);
    }

    #[test]
    fn emails_are_normalized() {
        assert_eq!(
            require_email(" Jane.Doe@Example.org ").unwrap(),
            "jane.doe@example.org"
        );
        assert!(require_email("not-an-email").is_err());
    }

    #[test]
    fn deletions_need_the_literal_confirmation() {
        assert!(ensure_confirmed("DELETE").is_ok());
        assert!(ensure_confirmed("delete").is_err());
        assert!(ensure_confirmed("").is_err());
    }
}
