use chrono::Duration;

use crate::live::backoff::ReconnectPolicy;
use crate::models::notification::ListOptions;
use crate::notification::DedupPolicy;

const DEFAULT_DATABASE_URL: &str = "postgres://localhost/hiring";

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    /// Notifications read more than this many days ago drop out of the feed.
    /// Set via NOTIFY_FEED_RETENTION_DAYS. Default: 30.
    pub feed_retention_days: i64,
    /// Cap on read notifications per feed. Set via NOTIFY_FEED_LIMIT. Default: 50.
    pub feed_limit: i64,
    pub dedup_policy: DedupPolicy,
    pub reconnect: ReconnectPolicy,
    /// Per-scope live event buffer. Set via NOTIFY_CHANNEL_CAPACITY. Default: 256.
    pub channel_capacity: usize,
}

impl Config {
    pub fn feed_options(&self) -> ListOptions {
        ListOptions {
            unread_only: false,
            since: Duration::days(self.feed_retention_days),
            limit: self.feed_limit,
        }
    }
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();
    from_lookup(|key| std::env::var(key).ok())
}

/// Build the config from any key/value source.
pub fn from_lookup<F>(get: F) -> anyhow::Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    let database_url = get("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.into());

    if database_url == DEFAULT_DATABASE_URL {
        let env_mode = get("NOTIFY_ENV")
            .or_else(|| get("RUST_ENV"))
            .unwrap_or_default();
        if env_mode == "production" {
            anyhow::bail!(
                "DATABASE_URL is not set. Point it at the hiring database before running in production."
            );
        }
    }

    let dedup_policy = match get("NOTIFY_DEDUP_POLICY") {
        Some(raw) => raw
            .parse::<DedupPolicy>()
            .map_err(|e| anyhow::anyhow!("NOTIFY_DEDUP_POLICY: {}", e))?,
        None => DedupPolicy::default(),
    };

    let defaults = ReconnectPolicy::default();
    let reconnect = ReconnectPolicy {
        base_backoff_ms: parse_or(&get, "NOTIFY_RECONNECT_BASE_MS", defaults.base_backoff_ms),
        max_backoff_ms: parse_or(&get, "NOTIFY_RECONNECT_MAX_MS", defaults.max_backoff_ms),
        jitter_ms: parse_or(&get, "NOTIFY_RECONNECT_JITTER_MS", defaults.jitter_ms),
    };

    Ok(Config {
        database_url,
        feed_retention_days: parse_or(&get, "NOTIFY_FEED_RETENTION_DAYS", 30),
        feed_limit: parse_or(&get, "NOTIFY_FEED_LIMIT", 50),
        dedup_policy,
        reconnect,
        channel_capacity: parse_or(&get, "NOTIFY_CHANNEL_CAPACITY", 256),
    })
}

fn parse_or<F, T>(get: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    get(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
