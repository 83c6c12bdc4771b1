use anyhow::{Context, Result};

// ---------------------------------------------------------------------------
// DbSettings
// ---------------------------------------------------------------------------

/// Connection parameters for the Postgres backend.
///
/// Kept as discrete fields (not a URL) because `GET /api/settings` reports the
/// current host/database/user back to the dashboard. The password is never
/// reported or broadcast.
#[derive(Clone, PartialEq, Eq)]
pub struct DbSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
}

impl std::fmt::Debug for DbSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    pub server_host: String,
    pub server_port: u16,
    pub db: DbSettings,
    /// Upper bound on concurrent pool connections; requests beyond it queue.
    pub pool_max_connections: u32,
    /// TTL of the dashboard feed cache slot, in seconds.
    pub feed_cache_ttl_secs: u64,
    /// Rate limit for `/api/*`: `burst` requests, one token replenished every
    /// `replenish_secs` seconds (defaults approximate 100 per 15 minutes).
    pub rate_limit_burst: u32,
    pub rate_limit_replenish_secs: u64,
    pub rate_limit_disabled: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            server_host: optional("SERVER_HOST", "0.0.0.0"),
            server_port: optional("SERVER_PORT", "3000")
                .parse()
                .context("SERVER_PORT must be a valid port number")?,
            db: DbSettings {
                host: optional("DB_HOST", "localhost"),
                port: optional("DB_PORT", "5432")
                    .parse()
                    .context("DB_PORT must be a valid port number")?,
                user: optional("DB_USER", "postgres"),
                password: optional("DB_PASSWORD", ""),
                database: optional("DB_NAME", "home_monitor"),
            },
            pool_max_connections: optional("DB_MAX_CONNECTIONS", "10")
                .parse()
                .context("DB_MAX_CONNECTIONS must be a positive integer")?,
            feed_cache_ttl_secs: optional("FEED_CACHE_TTL_SECS", "60")
                .parse()
                .context("FEED_CACHE_TTL_SECS must be a positive integer")?,
            rate_limit_burst: optional("RATE_LIMIT_BURST", "100")
                .parse()
                .context("RATE_LIMIT_BURST must be a positive integer")?,
            rate_limit_replenish_secs: optional("RATE_LIMIT_REPLENISH_SECS", "9")
                .parse()
                .context("RATE_LIMIT_REPLENISH_SECS must be a positive integer")?,
            rate_limit_disabled: optional("RATE_LIMIT_DISABLED", "false")
                .parse()
                .context("RATE_LIMIT_DISABLED must be true or false")?,
        })
    }
}

fn optional(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}
