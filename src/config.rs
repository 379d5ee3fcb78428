use std::env;

use chrono::Duration;

use crate::error::ConfigError;

const LOCAL_JWT_SECRET: &str = "super-secure-test-secret-value-local";
const DEFAULT_TOKEN_TTL: &str = "1h";
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:5050";
/// Upper bound for `JWT_EXPIRES_IN`.
const MAX_TOKEN_TTL_DAYS: i64 = 365;

/// AppConfig
///
/// The application's configuration, loaded once at startup and immutable afterwards. It is
/// pulled into handlers and middleware through `FromRef`.
#[derive(Clone, Debug)]
pub struct AppConfig {
    // Runtime environment marker. Selects log format and which settings are mandatory.
    pub env: Env,
    // Postgres connection string. `None` runs the in-memory store (local only).
    pub db_url: Option<String>,
    // HMAC secret used to sign and verify tokens.
    pub jwt_secret: String,
    // Lifetime of tokens issued by the login and token endpoints.
    pub token_ttl: Duration,
    // Socket address the HTTP server binds to.
    pub bind_addr: String,
}

/// Env
///
/// Runtime context: developer conveniences in `Local`, mandatory secrets in `Production`.
#[derive(Clone, PartialEq, Debug)]
pub enum Env {
    Local,
    Production,
}

impl Default for AppConfig {
    /// Local configuration backed by the in-memory store. Used for test state setup.
    fn default() -> Self {
        Self {
            env: Env::Local,
            db_url: None,
            jwt_secret: LOCAL_JWT_SECRET.to_string(),
            token_ttl: Duration::hours(1),
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
        }
    }
}

impl AppConfig {
    /// load
    ///
    /// Reads the configuration from the process environment. Fails fast when a production
    /// secret is missing instead of starting with an insecure fallback.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// from_lookup
    ///
    /// `load` over an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = match lookup("APP_ENV").as_deref() {
            Some("production") => Env::Production,
            _ => Env::Local,
        };

        let (db_url, jwt_secret) = match env {
            Env::Production => (
                Some(lookup("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?),
                lookup("JWT_SECRET").ok_or(ConfigError::Missing("JWT_SECRET"))?,
            ),
            // Locally the store and secret fall back to the in-memory repository and a
            // well-known development key.
            Env::Local => (
                lookup("DATABASE_URL"),
                lookup("JWT_SECRET").unwrap_or_else(|| LOCAL_JWT_SECRET.to_string()),
            ),
        };

        let ttl_raw = lookup("JWT_EXPIRES_IN").unwrap_or_else(|| DEFAULT_TOKEN_TTL.to_string());
        let token_ttl = parse_ttl(&ttl_raw).ok_or(ConfigError::Invalid {
            name: "JWT_EXPIRES_IN",
            value: ttl_raw.clone(),
        })?;

        Ok(Self {
            env,
            db_url,
            jwt_secret,
            token_ttl,
            bind_addr: lookup("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
        })
    }
}

/// parse_ttl
///
/// Accepts plain seconds (`3600`) or a number with one unit suffix: `s`, `m`, `h`, `d`.
/// Zero, negative and over-a-year durations are rejected.
pub fn parse_ttl(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    let (digits, unit) = match raw.char_indices().last()? {
        (idx, c) if c.is_ascii_alphabetic() => (&raw[..idx], c),
        _ => (raw, 's'),
    };
    let amount: i64 = digits.trim().parse().ok().filter(|n| *n > 0)?;
    let ttl = match unit {
        's' => Duration::try_seconds(amount),
        'm' => Duration::try_minutes(amount),
        'h' => Duration::try_hours(amount),
        'd' => Duration::try_days(amount),
        _ => None,
    }?;
    (ttl <= Duration::days(MAX_TOKEN_TTL_DAYS)).then_some(ttl)
}
