use std::env;
use std::str::FromStr;

use serde::Deserialize;

use chrono::Duration;

use crate::services::reconciler::MergePolicy;

/// Longest accepted retention window (one century).
pub const MAX_RETENTION_DAYS: i64 = 36_500;
/// Longest accepted staleness threshold (one year).
pub const MAX_STALENESS_SECONDS: i64 = 365 * 24 * 60 * 60;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub twitch: TwitchConfig,
    pub jwt: JwtConfig,
    pub rate_limit: RateLimitConfig,
    pub sync: SyncConfig,
    pub images: ImageConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Origin allowed by CORS (the web frontend).
    pub cors_origin: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TwitchConfig {
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Allowed requests per second (per IP) for `/api`
    pub api_per_second: u32,
    /// Burst size for `/api`
    pub api_burst: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Period of the frequent refresh trigger.
    pub refresh_interval_seconds: u64,
    /// Minimum age of `last_schedule_update` before the on-demand path refetches a streamer.
    pub staleness_threshold_seconds: i64,
    /// Retention window for completed segments, in days past their end time.
    pub max_schedule_age_days: i64,
    /// Cron expression (with seconds) of the daily retention trigger.
    pub retention_cron: String,
    /// Cron expression (with seconds) of the weekly activity audit trigger.
    pub audit_cron: String,
    /// IANA timezone the cron expressions are evaluated in.
    pub timezone: String,
    /// Upper bound on concurrent schedule fetches within one batch.
    pub max_concurrent_fetches: usize,
    pub merge_policy: MergePolicy,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageConfig {
    /// Directory holding compressed streamer profile images. Files in it that
    /// no streamer references are deleted by the daily retention run, so it
    /// must not hold anything else.
    pub dir: String,
}

fn parse_or<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(v) => v
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string())),
        Err(_) => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let defaults = Config::default();

        let sync = SyncConfig {
            refresh_interval_seconds: parse_or(
                "SCHEDULE_REFRESH_INTERVAL_SECONDS",
                defaults.sync.refresh_interval_seconds,
            )?,
            staleness_threshold_seconds: parse_or(
                "SCHEDULE_STALENESS_SECONDS",
                defaults.sync.staleness_threshold_seconds,
            )?,
            max_schedule_age_days: parse_or(
                "MAX_SCHEDULE_AGE_DAYS",
                defaults.sync.max_schedule_age_days,
            )?,
            retention_cron: env::var("RETENTION_CRON").unwrap_or(defaults.sync.retention_cron),
            audit_cron: env::var("AUDIT_CRON").unwrap_or(defaults.sync.audit_cron),
            timezone: env::var("SCHEDULE_TIMEZONE").unwrap_or(defaults.sync.timezone),
            max_concurrent_fetches: parse_or(
                "MAX_CONCURRENT_FETCHES",
                defaults.sync.max_concurrent_fetches,
            )?,
            merge_policy: match env::var("SCHEDULE_MERGE_POLICY") {
                Ok(v) => MergePolicy::from_str(&v)
                    .ok_or_else(|| ConfigError::InvalidValue("SCHEDULE_MERGE_POLICY".to_string()))?,
                Err(_) => defaults.sync.merge_policy,
            },
        };
        sync.validate()?;

        Ok(Config {
            server: ServerConfig {
                host: env::var("HOST").unwrap_or(defaults.server.host),
                port: parse_or("PORT", defaults.server.port)?,
                cors_origin: env::var("CORS_ORIGIN").unwrap_or(defaults.server.cors_origin),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").unwrap_or(defaults.database.url),
                max_connections: parse_or(
                    "DATABASE_MAX_CONNECTIONS",
                    defaults.database.max_connections,
                )?,
            },
            twitch: TwitchConfig {
                client_id: env::var("TWITCH_CLIENT_ID")
                    .map_err(|_| ConfigError::MissingEnv("TWITCH_CLIENT_ID".to_string()))?,
                client_secret: env::var("TWITCH_CLIENT_SECRET")
                    .map_err(|_| ConfigError::MissingEnv("TWITCH_CLIENT_SECRET".to_string()))?,
            },
            jwt: JwtConfig {
                secret: env::var("JWT_SECRET")
                    .map_err(|_| ConfigError::MissingEnv("JWT_SECRET".to_string()))?,
            },
            rate_limit: RateLimitConfig {
                api_per_second: parse_or(
                    "RATE_LIMIT_API_PER_SECOND",
                    defaults.rate_limit.api_per_second,
                )?,
                api_burst: parse_or("RATE_LIMIT_API_BURST", defaults.rate_limit.api_burst)?,
            },
            sync,
            images: ImageConfig {
                dir: env::var("IMAGE_DIR").unwrap_or(defaults.images.dir),
            },
        })
    }
}

impl SyncConfig {
    /// Reject values the orchestrator could not run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.refresh_interval_seconds == 0 {
            return Err(ConfigError::InvalidValue(
                "SCHEDULE_REFRESH_INTERVAL_SECONDS".to_string(),
            ));
        }
        if !(0..=MAX_STALENESS_SECONDS).contains(&self.staleness_threshold_seconds) {
            return Err(ConfigError::InvalidValue("SCHEDULE_STALENESS_SECONDS".to_string()));
        }
        if !(0..=MAX_RETENTION_DAYS).contains(&self.max_schedule_age_days) {
            return Err(ConfigError::InvalidValue("MAX_SCHEDULE_AGE_DAYS".to_string()));
        }
        if self.max_concurrent_fetches == 0 {
            return Err(ConfigError::InvalidValue("MAX_CONCURRENT_FETCHES".to_string()));
        }
        if cron::Schedule::from_str(&self.retention_cron).is_err() {
            return Err(ConfigError::InvalidValue("RETENTION_CRON".to_string()));
        }
        if cron::Schedule::from_str(&self.audit_cron).is_err() {
            return Err(ConfigError::InvalidValue("AUDIT_CRON".to_string()));
        }
        if self.timezone.parse::<chrono_tz::Tz>().is_err() {
            return Err(ConfigError::InvalidValue("SCHEDULE_TIMEZONE".to_string()));
        }
        Ok(())
    }

    /// Retention window as a duration; out-of-range values saturate.
    pub fn retention(&self) -> Duration {
        Duration::try_days(self.max_schedule_age_days).unwrap_or(Duration::MAX)
    }

    pub fn staleness_threshold(&self) -> Duration {
        Duration::try_seconds(self.staleness_threshold_seconds).unwrap_or(Duration::MAX)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3001,
                cors_origin: "http://localhost:3000".to_string(),
            },
            database: DatabaseConfig {
                url: "sqlite://data/schedules.db".to_string(),
                max_connections: 5,
            },
            twitch: TwitchConfig {
                client_id: String::new(),
                client_secret: String::new(),
            },
            jwt: JwtConfig {
                secret: String::new(),
            },
            rate_limit: RateLimitConfig {
                // roughly 100 requests per 15 minutes with room for bursts
                api_per_second: 9,
                api_burst: 100,
            },
            sync: SyncConfig {
                refresh_interval_seconds: 180,
                staleness_threshold_seconds: 180,
                max_schedule_age_days: 7,
                retention_cron: "0 0 4 * * *".to_string(),
                audit_cron: "0 0 5 * * Sun".to_string(),
                timezone: "UTC".to_string(),
                max_concurrent_fetches: 8,
                merge_policy: MergePolicy::TrustSource,
            },
            images: ImageConfig {
                dir: "public/images".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_sync_config_is_valid() {
        assert!(Config::default().sync.validate().is_ok());
    }

    #[test]
    fn rejects_bad_cron_and_timezone() {
        let mut sync = Config::default().sync;
        sync.retention_cron = "every day at four".to_string();
        assert!(matches!(
            sync.validate(),
            Err(ConfigError::InvalidValue(k)) if k == "RETENTION_CRON"
        ));

        let mut sync = Config::default().sync;
        sync.timezone = "Mars/Olympus".to_string();
        assert!(matches!(
            sync.validate(),
            Err(ConfigError::InvalidValue(k)) if k == "SCHEDULE_TIMEZONE"
        ));
    }

    #[test]
    fn rejects_zero_fan_out_width() {
        let mut sync = Config::default().sync;
        sync.max_concurrent_fetches = 0;
        assert!(sync.validate().is_err());
    }

    #[test]
    fn rejects_windows_beyond_upper_bounds() {
        let mut sync = Config::default().sync;
        sync.max_schedule_age_days = 1_000_000_000;
        assert!(matches!(
            sync.validate(),
            Err(ConfigError::InvalidValue(k)) if k == "MAX_SCHEDULE_AGE_DAYS"
        ));

        let mut sync = Config::default().sync;
        sync.staleness_threshold_seconds = i64::MAX;
        assert!(matches!(
            sync.validate(),
            Err(ConfigError::InvalidValue(k)) if k == "SCHEDULE_STALENESS_SECONDS"
        ));

        let mut sync = Config::default().sync;
        sync.max_schedule_age_days = MAX_RETENTION_DAYS;
        sync.staleness_threshold_seconds = MAX_STALENESS_SECONDS;
        assert!(sync.validate().is_ok());
    }

    #[test]
    fn oversized_windows_saturate_instead_of_overflowing() {
        let mut sync = Config::default().sync;
        sync.max_schedule_age_days = i64::MAX;
        sync.staleness_threshold_seconds = i64::MAX;
        assert_eq!(sync.retention(), Duration::MAX);
        assert_eq!(sync.staleness_threshold(), Duration::MAX);

        let sync = Config::default().sync;
        assert_eq!(sync.retention(), Duration::days(7));
        assert_eq!(sync.staleness_threshold(), Duration::minutes(3));
    }
}
