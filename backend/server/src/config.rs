use std::{env, fmt::Display, fs::read_to_string, str::FromStr, time::Duration};

use anyhow::{Result, anyhow};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Redis,
    Memory,
}

impl FromStr for StoreKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "redis" => Ok(StoreKind::Redis),
            "memory" => Ok(StoreKind::Memory),
            other => Err(format!("unknown store {other:?}, expected redis or memory")),
        }
    }
}

#[derive(Clone)]
pub struct Config {
    pub port: u16,
    pub store: StoreKind,
    pub redis_url: String,
    pub jwt_secret: String,
    pub token_ttl: Duration,
    pub reset_ttl: Duration,
    pub groq_key: Option<String>,
    pub groq_url: String,
    pub groq_model: String,
    pub mail_webhook_url: Option<String>,
    pub mail_from: String,
}

impl Config {
    pub fn load() -> Result<Self> {
        let token_hours: u64 = try_load("TOKEN_TTL_HOURS", "720")?;
        let reset_minutes: u64 = try_load("RESET_TTL_MINUTES", "15")?;

        Ok(Self {
            port: try_load("RUST_PORT", "5000")?,
            store: try_load("STORE", "redis")?,
            redis_url: try_load("REDIS_URL", "redis://redis:6379")?,
            jwt_secret: read_secret("JWT_SECRET")
                .ok_or_else(|| anyhow!("JWT_SECRET is required"))?,
            token_ttl: Duration::from_secs(token_hours * 60 * 60),
            reset_ttl: Duration::from_secs(reset_minutes * 60),
            groq_key: read_secret("GROQ_API_KEY"),
            groq_url: try_load("GROQ_URL", "https://api.groq.com/openai/v1/chat/completions")?,
            groq_model: try_load("GROQ_MODEL", "llama-3.3-70b-versatile")?,
            mail_webhook_url: var("MAIL_WEBHOOK_URL").ok(),
            mail_from: try_load("MAIL_FROM", "Smart Khaad Manager <no-reply@khaad.local>")?,
        })
    }

    /// Settings for tests and local runs: in-memory store, no assistant, no mail relay.
    pub fn local(jwt_secret: &str) -> Self {
        Self {
            port: 0,
            store: StoreKind::Memory,
            redis_url: String::new(),
            jwt_secret: jwt_secret.to_string(),
            token_ttl: Duration::from_secs(60 * 60),
            reset_ttl: Duration::from_secs(15 * 60),
            groq_key: None,
            groq_url: String::new(),
            groq_model: String::new(),
            mail_webhook_url: None,
            mail_from: "test@khaad.local".to_string(),
        }
    }
}

fn var(key: &str) -> Result<String, ()> {
    env::var(key)
        .map(|v| v.trim().to_string())
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or(())
}

fn try_load<T: FromStr>(key: &str, default: &str) -> Result<T>
where
    T::Err: Display,
{
    var(key)
        .unwrap_or_else(|_| {
            info!("{key} not set, using default: {default}");
            default.to_string()
        })
        .parse()
        .map_err(|e| anyhow!("Invalid {key} value: {e}"))
}

/// Docker secret first, then the environment.
fn read_secret(secret_name: &str) -> Option<String> {
    let path = format!("/run/secrets/{secret_name}");

    match read_to_string(&path) {
        Ok(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Ok(_) | Err(_) => var(secret_name)
            .map_err(|_| warn!("{secret_name} not found in secrets or environment"))
            .ok(),
    }
}
