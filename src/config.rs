//! Runtime configuration, read from the environment (and `.env`, if present).

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub database_max_connections: u32,
    pub bind_address: SocketAddr,
    /// Prefix for every file URL handed out by the API
    pub public_base_url: String,
    /// Where the web app lives, for links in emails
    pub app_base_url: String,
    pub storage_root: PathBuf,
    pub signing_secret: Vec<u8>,
    pub signed_url_ttl_seconds: i64,
    /// How many join codes to draw before giving up on a new branch
    pub join_code_attempts: usize,
    pub mailgun: Option<MailgunConfig>,
}

#[derive(Clone, Debug)]
pub struct MailgunConfig {
    pub token: String,
    pub domain: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let database_url = std::env::var("DATABASE_URL").context("`DATABASE_URL` not set")?;
        let signing_secret = std::env::var("STORAGE_SIGNING_SECRET")
            .context("`STORAGE_SIGNING_SECRET` not set")?
            .into_bytes();
        let bind_address = std::env::var("BIND_ADDRESS")
            .unwrap_or_else(|_| "0.0.0.0:3000".to_owned())
            .parse()
            .context("`BIND_ADDRESS` is not a valid socket address")?;

        let mailgun = match (
            std::env::var("MAILGUN_TOKEN"),
            std::env::var("MAILGUN_DOMAIN"),
        ) {
            (Ok(token), Ok(domain)) => Some(MailgunConfig { token, domain }),
            _ => None,
        };

        let public_base_url = std::env::var("PUBLIC_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:3000".to_owned())
            .trim_end_matches('/')
            .to_owned();
        let app_base_url = std::env::var("APP_BASE_URL")
            .map(|url| url.trim_end_matches('/').to_owned())
            .unwrap_or_else(|_| public_base_url.clone());

        Ok(Self {
            database_url,
            database_max_connections: parse_or("DATABASE_MAX_CONNECTIONS", 5)?,
            bind_address,
            public_base_url,
            app_base_url,
            storage_root: std::env::var("STORAGE_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./storage")),
            signing_secret,
            signed_url_ttl_seconds: parse_or("SIGNED_URL_TTL_SECONDS", 3600)?,
            join_code_attempts: parse_or("JOIN_CODE_ATTEMPTS", 10)?,
            mailgun,
        })
    }
}

fn parse_or<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(value) => value
            .parse()
            .with_context(|| format!("`{}` has an invalid value: {}", name, value)),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::parse_or;

    #[test]
    fn missing_variables_fall_back_to_defaults() {
        let attempts: usize = parse_or("VOLUNTEER_HUB_TEST_UNSET_VARIABLE", 10).unwrap();
        assert_eq!(attempts, 10);
    }
}
