//! Runtime Configuration
//! Mission: Collect server, storage and security settings from flags and env

use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;

use crate::middleware::RateLimitConfig;

/// Development-only signing secret, used when `JWT_SECRET` is unset.
pub const DEV_JWT_SECRET: &str = "dev-secret-change-me";

#[derive(Debug, Clone, Parser)]
#[command(name = "user-management", about = "User, role and group management API")]
pub struct Config {
    /// Address the HTTP server binds to
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:8080")]
    pub bind_addr: SocketAddr,

    /// SQLite database file
    #[arg(long, env = "DATABASE_PATH", default_value = "user_management.db")]
    pub database_path: String,

    /// HMAC secret for signing tokens
    #[arg(long, env = "JWT_SECRET", hide_env_values = true)]
    pub jwt_secret: Option<String>,

    /// Token lifetime in hours
    #[arg(
        long,
        env = "TOKEN_TTL_HOURS",
        default_value_t = 72,
        value_parser = clap::value_parser!(i64).range(1..)
    )]
    pub token_ttl_hours: i64,

    /// bcrypt cost factor
    #[arg(long, env = "BCRYPT_COST", default_value_t = bcrypt::DEFAULT_COST)]
    pub bcrypt_cost: u32,

    /// Requests admitted per client address per window
    #[arg(
        long,
        env = "RATE_LIMIT_MAX_REQUESTS",
        default_value_t = 60,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub rate_limit_max_requests: u32,

    /// Rate-limit window length in seconds
    #[arg(
        long,
        env = "RATE_LIMIT_WINDOW_SECS",
        default_value_t = 60,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub rate_limit_window_secs: u64,

    /// Interval between sweeps of expired rate-limit windows, in seconds
    #[arg(
        long,
        env = "RATE_LIMIT_SWEEP_SECS",
        default_value_t = 300,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub rate_limit_sweep_secs: u64,

    /// Count requests against the first X-Forwarded-For hop
    #[arg(long, env = "TRUST_FORWARDED_FOR")]
    pub trust_forwarded_for: bool,

    /// Longest wait for the database connection, in seconds
    #[arg(
        long,
        env = "DB_TIMEOUT_SECS",
        default_value_t = 5,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub db_timeout_secs: u64,

    /// Email of the bootstrap admin account
    #[arg(long, env = "ADMIN_EMAIL", default_value = "admin@example.com")]
    pub admin_email: String,

    /// Password of the bootstrap admin account
    #[arg(long, env = "ADMIN_PASSWORD", default_value = "admin123", hide_env_values = true)]
    pub admin_password: String,
}

impl Config {
    /// Configured secret, or the development fallback. The flag tells the
    /// caller whether the fallback was used.
    pub fn jwt_secret(&self) -> (&str, bool) {
        match self.jwt_secret.as_deref() {
            Some(secret) if !secret.is_empty() => (secret, false),
            _ => (DEV_JWT_SECRET, true),
        }
    }

    pub fn token_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.token_ttl_hours)
    }

    pub fn db_timeout(&self) -> Duration {
        Duration::from_secs(self.db_timeout_secs)
    }

    pub fn rate_limit(&self) -> RateLimitConfig {
        RateLimitConfig {
            max_requests: self.rate_limit_max_requests,
            window: Duration::from_secs(self.rate_limit_window_secs),
            trust_forwarded_for: self.trust_forwarded_for,
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.rate_limit_sweep_secs)
    }
}

/// Load `.env` from the working directory (or a parent), then from the crate
/// root. Missing files are not an error.
pub fn load_env() {
    let _ = dotenv::dotenv();

    let crate_env = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
    if crate_env.exists() {
        let _ = dotenv::from_path(&crate_env);
    }
}
