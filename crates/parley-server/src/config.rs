use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, bail};

use parley_gateway::dispatcher::DispatcherConfig;
use parley_types::events::IntentLimits;

/// Secrets shipped in sample `.env` files. Accepted, but loudly.
pub const PLACEHOLDER_SECRETS: &[&str] = &["change-me-to-a-random-string", "dev-secret-change-me"];

#[derive(Debug, Clone)]
pub struct Config {
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub host: String,
    pub port: u16,
    pub typing_ttl: Duration,
    pub auth_timeout: Duration,
    pub max_message_chars: usize,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let jwt_secret = lookup("PARLEY_JWT_SECRET").unwrap_or_else(|| "dev-secret-change-me".into());
        if jwt_secret.trim().is_empty() {
            bail!("PARLEY_JWT_SECRET is set but empty");
        }

        let typing_ttl_secs: u64 = parse_or(&lookup, "PARLEY_TYPING_TTL_SECS", 6)?;
        let auth_timeout_secs: u64 = parse_or(&lookup, "PARLEY_AUTH_TIMEOUT_SECS", 10)?;
        let max_message_chars: usize = parse_or(&lookup, "PARLEY_MAX_MESSAGE_CHARS", 4000)?;
        if typing_ttl_secs == 0 || auth_timeout_secs == 0 || max_message_chars == 0 {
            bail!("typing TTL, auth timeout and message cap must be positive");
        }

        Ok(Self {
            jwt_secret,
            db_path: lookup("PARLEY_DB_PATH").unwrap_or_else(|| "parley.db".into()).into(),
            host: lookup("PARLEY_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse_or(&lookup, "PARLEY_PORT", 3000)?,
            typing_ttl: Duration::from_secs(typing_ttl_secs),
            auth_timeout: Duration::from_secs(auth_timeout_secs),
            max_message_chars,
        })
    }

    pub fn uses_placeholder_secret(&self) -> bool {
        PLACEHOLDER_SECRETS.contains(&self.jwt_secret.as_str())
    }

    pub fn dispatcher(&self) -> DispatcherConfig {
        DispatcherConfig {
            limits: IntentLimits {
                max_content_chars: self.max_message_chars,
                ..IntentLimits::default()
            },
            auth_timeout: self.auth_timeout,
            typing_ttl: self.typing_ttl,
            ..DispatcherConfig::default()
        }
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().with_context(|| format!("invalid {}: {:?}", key, raw)),
        None => Ok(default),
    }
}
