//! Server configuration read from command line flags or the environment.

use std::{net::IpAddr, time::Duration};

use clap::Parser;

use crate::db::PoolConfig;

/// The REST API server for spendshare.
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// File path to the application SQLite database, or `:memory:`.
    #[arg(long, env = "DB_DSN")]
    pub db_dsn: String,

    /// The maximum number of open database connections.
    #[arg(long, env = "DB_MAX_OPEN_CONNS", default_value_t = 25)]
    pub db_max_open_conns: u32,

    /// The number of database connections kept open while idle.
    #[arg(long, env = "DB_MAX_IDLE_CONNS", default_value_t = 25)]
    pub db_max_idle_conns: u32,

    /// How long a database connection may be reused, e.g. `30s`, `5m`.
    #[arg(long, env = "DB_CONN_MAX_LIFETIME", default_value = "5m", value_parser = parse_duration)]
    pub db_conn_max_lifetime: Duration,

    /// The secret used to sign bearer tokens.
    #[arg(long, env = "TOKEN_SECRET", hide_env_values = true)]
    pub token_secret: String,

    /// How long bearer tokens and their sessions stay valid.
    #[arg(long, env = "TOKEN_DURATION", default_value = "24h", value_parser = parse_duration)]
    pub token_duration: Duration,

    /// The Redis URL for the session store. Sessions are kept in memory if
    /// this is not set.
    #[arg(long, env = "KV_URL")]
    pub kv_url: Option<String>,

    /// The number of connections in the Redis pool.
    #[arg(long, env = "KV_POOL_SIZE", default_value_t = 10)]
    pub kv_pool_size: u32,

    /// The bcrypt cost for new password hashes.
    #[arg(long, env = "PASSWORD_HASH_COST", default_value_t = 12, value_parser = clap::value_parser!(u32).range(4..=31))]
    pub password_hash_cost: u32,

    /// The address to serve the API from.
    #[arg(long, env = "ADDRESS", default_value = "127.0.0.1")]
    pub address: IpAddr,

    /// The port to serve the API from.
    #[arg(short, long, env = "PORT", default_value_t = 3000)]
    pub port: u16,
}

impl Config {
    /// The settings for the database connection pool.
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            dsn: self.db_dsn.clone(),
            max_open: self.db_max_open_conns,
            max_idle: self.db_max_idle_conns,
            max_lifetime: Some(self.db_conn_max_lifetime),
        }
    }

    /// The token lifetime as a [time::Duration].
    pub fn token_lifetime(&self) -> time::Duration {
        time::Duration::seconds(self.token_duration.as_secs().min(i64::MAX as u64) as i64)
    }
}

/// Parse a duration such as `90`, `30s`, `5m`, `24h` or `7d`.
///
/// A bare number is read as seconds.
pub fn parse_duration(text: &str) -> Result<Duration, String> {
    let text = text.trim();
    let (digits, unit_seconds) = match text.char_indices().last() {
        Some((index, 's')) => (&text[..index], 1),
        Some((index, 'm')) => (&text[..index], 60),
        Some((index, 'h')) => (&text[..index], 60 * 60),
        Some((index, 'd')) => (&text[..index], 24 * 60 * 60),
        Some(_) => (text, 1),
        None => return Err("duration cannot be empty".to_owned()),
    };

    let count: u64 = digits
        .parse()
        .map_err(|_| format!("invalid duration \"{text}\", expected e.g. 30s, 5m or 24h"))?;

    count
        .checked_mul(unit_seconds)
        .map(Duration::from_secs)
        .ok_or_else(|| format!("duration \"{text}\" is too long"))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use clap::Parser;

    use super::{Config, parse_duration};

    #[test]
    fn parses_duration_suffixes() {
        assert_eq!(parse_duration("90"), Ok(Duration::from_secs(90)));
        assert_eq!(parse_duration("30s"), Ok(Duration::from_secs(30)));
        assert_eq!(parse_duration("5m"), Ok(Duration::from_secs(300)));
        assert_eq!(parse_duration("24h"), Ok(Duration::from_secs(86_400)));
        assert_eq!(parse_duration("7d"), Ok(Duration::from_secs(604_800)));
    }

    #[test]
    fn rejects_bad_durations() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("m").is_err());
        assert!(parse_duration("5w").is_err());
        assert!(parse_duration("-5m").is_err());
    }

    #[test]
    fn flags_have_defaults() {
        let config = Config::try_parse_from([
            "server",
            "--db-dsn",
            ":memory:",
            "--token-secret",
            "shh",
        ])
        .unwrap();

        assert_eq!(config.db_max_open_conns, 25);
        assert_eq!(config.db_conn_max_lifetime, Duration::from_secs(300));
        assert_eq!(config.token_lifetime(), time::Duration::hours(24));
        assert_eq!(config.kv_url, None);
        assert_eq!(config.password_hash_cost, 12);

        let pool_config = config.pool_config();
        assert_eq!(pool_config.dsn, ":memory:");
        assert_eq!(pool_config.max_idle, 25);
    }

    #[test]
    fn secret_is_required() {
        assert!(Config::try_parse_from(["server", "--db-dsn", ":memory:"]).is_err());
    }
}
