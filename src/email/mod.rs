//! Transactional email, rendered with askama and sent through Mailgun.

use askama::Template;

use crate::config::Config;
use crate::error::{AppError, AppResult};

pub mod reset_password;

pub const SENDER_NAME: &str = "Volunteer Hub";

pub trait Email: Template {
    fn subject(&self) -> String;
    /// The `Name <address>` the email goes to
    fn recipient(&self) -> String;
}

/// Sends the email, or logs and skips it when Mailgun isn't configured.
pub async fn send_email(email: &impl Email, config: &Config) -> AppResult<()> {
    let html = email
        .render()
        .map_err(|err| AppError::Email(format!("failed to render email: {}", err)))?;

    let mailgun = match &config.mailgun {
        Some(mailgun) => mailgun,
        None => {
            tracing::info!(
                to = %email.recipient(),
                subject = %email.subject(),
                "mailgun is not configured, skipping email"
            );
            return Ok(());
        }
    };

    let sender = format!("{} <mail@{}>", SENDER_NAME, mailgun.domain);
    let form = [
        ("from", sender),
        ("to", email.recipient()),
        ("subject", email.subject()),
        ("html", html),
    ];

    reqwest::Client::new()
        .post(format!(
            "https://api.mailgun.net/v3/{}/messages",
            mailgun.domain
        ))
        .basic_auth("api", Some(&mailgun.token))
        .form(&form)
        .send()
        .await
        .and_then(|response| response.error_for_status())
        .map_err(|err| AppError::Email(format!("failed to send email: {}", err)))?;

    tracing::info!(to = %email.recipient(), subject = %email.subject(), "sent email");
    Ok(())
}
