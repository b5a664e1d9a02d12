use anyhow::{Context, Result};
use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub telegram_token: String,
    pub database_url: String,
    pub from_chat_id: i64,
    pub admin_ids: Vec<i64>,
    pub monobank_url: String,
    pub rates_ttl: Duration,
    pub notify_interval: Duration,
    pub send_delay: Duration,
    pub flood_cooldown: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            telegram_token: env::var("TELEGRAM_BOT_TOKEN")
                .context("TELEGRAM_BOT_TOKEN environment variable is required")?,
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://realty.db".to_string()),
            from_chat_id: env::var("FROM_CHAT_ID")
                .context("FROM_CHAT_ID environment variable is required")?
                .trim()
                .parse()
                .context("FROM_CHAT_ID must be a chat id")?,
            admin_ids: parse_ids(&env::var("ADMIN_IDS").unwrap_or_default())?,
            monobank_url: env::var("MONOBANK_URL")
                .unwrap_or_else(|_| crate::api_client::MONOBANK_URL.to_string()),
            rates_ttl: Duration::from_secs(number_or("RATES_TTL_SECS", 600)?),
            notify_interval: Duration::from_secs(number_or("NOTIFY_INTERVAL_HOURS", 3)? * 3600),
            send_delay: Duration::from_millis(number_or("SEND_DELAY_MS", 1000)?),
            flood_cooldown: Duration::from_secs(number_or("FLOOD_COOLDOWN_SECS", 60)?),
        })
    }

    /// Для CLI-команд, которым не нужен токен (import, stats)
    pub fn database_url_from_env() -> String {
        env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://realty.db".to_string())
    }
}

fn number_or(name: &str, default: u64) -> Result<u64> {
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("{} must be a positive number", name)),
        _ => Ok(default),
    }
}

fn parse_ids(raw: &str) -> Result<Vec<i64>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<i64>()
                .with_context(|| format!("ADMIN_IDS contains invalid id: {}", s))
        })
        .collect()
}
