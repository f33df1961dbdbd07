use sqlx::{PgExecutor, PgPool};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::user::{NewUser, User};
use crate::util::current_time;

/// The login behind a user: an email and a password hash.
pub struct Credential;

impl Credential {
    pub async fn exists(email: &str, conn: impl PgExecutor<'_>) -> AppResult<bool> {
        let found: Option<String> =
            sqlx::query_scalar("SELECT email FROM credentials WHERE email = $1")
                .bind(email)
                .fetch_optional(conn)
                .await?;

        Ok(found.is_some())
    }

    pub async fn create(email: &str, pass_hash: &str, conn: impl PgExecutor<'_>) -> AppResult<()> {
        sqlx::query("INSERT INTO credentials (email, pass_hash) VALUES ($1, $2)")
            .bind(email)
            .bind(pass_hash)
            .execute(conn)
            .await?;

        Ok(())
    }

    pub async fn login_is_valid(email: &str, password: &str, pool: &PgPool) -> AppResult<bool> {
        let hash: Option<String> =
            sqlx::query_scalar("SELECT pass_hash FROM credentials WHERE email = $1")
                .bind(email)
                .fetch_optional(pool)
                .await?;

        match hash {
            Some(hash) => Ok(bcrypt::verify(password, &hash)?),
            None => Ok(false),
        }
    }

    /// Removes the login along with its sessions and reset tokens.
    pub async fn delete(email: &str, conn: impl PgExecutor<'_>) -> AppResult<()> {
        sqlx::query("DELETE FROM credentials WHERE email = $1")
            .bind(email)
            .execute(conn)
            .await?;

        Ok(())
    }
}

pub struct Session;

impl Session {
    pub async fn email_for_token(token: &str, pool: &PgPool) -> AppResult<Option<String>> {
        sqlx::query_scalar("SELECT email FROM sessions WHERE token = $1")
            .bind(token)
            .fetch_optional(pool)
            .await
            .map_err(Into::into)
    }

    pub async fn get_or_generate_token(email: &str, pool: &PgPool) -> AppResult<String> {
        let existing: Option<String> =
            sqlx::query_scalar("SELECT token FROM sessions WHERE email = $1 LIMIT 1")
                .bind(email)
                .fetch_optional(pool)
                .await?;
        if let Some(token) = existing {
            return Ok(token);
        }

        let token = Uuid::new_v4().to_string();
        sqlx::query("INSERT INTO sessions (token, email) VALUES ($1, $2)")
            .bind(&token)
            .bind(email)
            .execute(pool)
            .await?;

        Ok(token)
    }

    pub async fn remove(token: &str, pool: &PgPool) -> AppResult<()> {
        sqlx::query("DELETE FROM sessions WHERE token = $1")
            .bind(token)
            .execute(pool)
            .await?;

        Ok(())
    }
}

/// The resolved identity for one request: who is calling, as of this request.
///
/// Nothing about the user is cached past the request, so signing out (removing
/// the session) drops the role and branch everywhere at once.
#[derive(Clone, Debug)]
pub struct SessionContext {
    pub user: User,
    pub token: String,
}

/// What to do with a session after looking up its user.
#[derive(Debug)]
pub enum Resolution {
    Authenticated(User),
    /// The session must not survive: no profile, or the lookup failed.
    SignOut,
}

impl Resolution {
    pub fn from_lookup(lookup: AppResult<Option<User>>) -> Self {
        match lookup {
            Ok(Some(user)) => Resolution::Authenticated(user),
            Ok(None) => Resolution::SignOut,
            Err(err) => {
                tracing::warn!("failed to resolve session user, signing out: {}", err);
                Resolution::SignOut
            }
        }
    }
}

impl SessionContext {
    /// Maps a session token to an application user, failing closed.
    pub async fn resolve(token: &str, pool: &PgPool) -> AppResult<Option<Self>> {
        let email = match Session::email_for_token(token, pool).await? {
            Some(email) => email,
            None => return Ok(None),
        };

        match Resolution::from_lookup(User::with_email_opt(&email, pool).await) {
            Resolution::Authenticated(user) => Ok(Some(SessionContext {
                user,
                token: token.to_owned(),
            })),
            Resolution::SignOut => {
                Session::remove(token, pool).await?;
                Ok(None)
            }
        }
    }
}

pub struct PasswordReset;

impl PasswordReset {
    pub fn expiry() -> Duration {
        Duration::hours(1)
    }

    pub fn is_expired(requested_at: OffsetDateTime, now: OffsetDateTime) -> bool {
        now - requested_at > Self::expiry()
    }

    /// Creates a reset token for the email, if it has a login.
    pub async fn generate(email: &str, pool: &PgPool) -> AppResult<Option<String>> {
        if !Credential::exists(email, pool).await? {
            return Ok(None);
        }

        sqlx::query("DELETE FROM password_resets WHERE email = $1")
            .bind(email)
            .execute(pool)
            .await?;
        let token = Uuid::new_v4().to_string();
        sqlx::query("INSERT INTO password_resets (token, email) VALUES ($1, $2)")
            .bind(&token)
            .bind(email)
            .execute(pool)
            .await?;

        Ok(Some(token))
    }

    pub async fn reset_from_token(token: &str, password: &str, pool: &PgPool) -> AppResult<()> {
        let reset: Option<(String, OffsetDateTime)> =
            sqlx::query_as("SELECT email, created_at FROM password_resets WHERE token = $1")
                .bind(token)
                .fetch_optional(pool)
                .await?;
        let (email, requested_at) = reset.ok_or_else(|| {
            AppError::validation(
                "No password reset request was found for the given token. \
                 Please request another password reset.",
            )
        })?;

        if Self::is_expired(requested_at, current_time()) {
            return Err(AppError::validation(
                "Your reset link expired after 1 hour. Please request another password reset.",
            ));
        }
        if password.chars().count() < NewUser::MIN_PASSWORD_LENGTH {
            return Err(AppError::validation(format!(
                "Password must be at least {} characters",
                NewUser::MIN_PASSWORD_LENGTH
            )));
        }

        let pass_hash = bcrypt::hash(password, bcrypt::DEFAULT_COST)?;
        let mut tx = pool.begin().await?;
        sqlx::query("UPDATE credentials SET pass_hash = $1 WHERE email = $2")
            .bind(pass_hash)
            .bind(&email)
            .execute(&mut tx)
            .await?;
        sqlx::query("DELETE FROM password_resets WHERE email = $1")
            .bind(&email)
            .execute(&mut tx)
            .await?;
        sqlx::query("DELETE FROM sessions WHERE email = $1")
            .bind(&email)
            .execute(&mut tx)
            .await?;
        tx.commit().await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::mock::mock_user;

    #[test]
    fn missing_profiles_and_failed_lookups_sign_out() {
        assert!(matches!(
            Resolution::from_lookup(Ok(Some(mock_user()))),
            Resolution::Authenticated(user) if user.id == mock_user().id
        ));
        assert!(matches!(Resolution::from_lookup(Ok(None)), Resolution::SignOut));
        assert!(matches!(
            Resolution::from_lookup(Err(AppError::Database(sqlx::Error::PoolTimedOut))),
            Resolution::SignOut
        ));
    }

    #[test]
    fn reset_links_last_an_hour() {
        let requested = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();

        assert!(!PasswordReset::is_expired(
            requested,
            requested + Duration::minutes(59)
        ));
        assert!(PasswordReset::is_expired(
            requested,
            requested + Duration::minutes(61)
        ));
    }
}
