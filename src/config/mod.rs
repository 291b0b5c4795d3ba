//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::battle::types::BattleConfig;
use crate::session::ServiceSettings;
use crate::util::rate_limit::COMMAND_RATE_LIMIT;
use crate::util::time::is_valid_tick_rate;

/// Log output format
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    pub log_format: LogFormat,

    /// PostgREST base URL; battles are kept in memory without it
    pub store_url: Option<String>,
    /// Service key for the store (bypasses RLS - server only!)
    pub store_api_key: Option<String>,

    /// JSON world seed; an empty grid without it
    pub world_seed: Option<PathBuf>,

    /// Defaults applied to every new battle
    pub battle: BattleConfig,
    /// Hand fleets back to owners as soon as they reconnect
    pub auto_revert_on_owner_online: bool,
    pub profile_cache_ttl: Duration,
    /// Player commands per fleet per second
    pub command_rate_limit: u32,

    /// Allowed client origins for CORS (comma-separated)
    pub client_origin: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Render provides PORT env var, fall back to SERVER_ADDR or default
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        };

        let log_format = match env::var("LOG_FORMAT").as_deref() {
            Ok("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        };

        let store_url = env::var("STORE_URL").ok().filter(|v| !v.is_empty());
        let store_api_key = env::var("STORE_API_KEY").ok().filter(|v| !v.is_empty());
        if store_url.is_some() && store_api_key.is_none() {
            return Err(ConfigError::Missing("STORE_API_KEY"));
        }

        let mut battle = BattleConfig::default();
        battle.tick_rate = parse_or("DEFAULT_TICK_RATE", battle.tick_rate)?;
        if !is_valid_tick_rate(battle.tick_rate) {
            return Err(ConfigError::Invalid("DEFAULT_TICK_RATE"));
        }
        battle.persist_interval_ticks = parse_or("PERSIST_INTERVAL_TICKS", battle.persist_interval_ticks)?;
        if battle.persist_interval_ticks == 0 {
            return Err(ConfigError::Invalid("PERSIST_INTERVAL_TICKS"));
        }

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            log_format,

            store_url,
            store_api_key,

            world_seed: env::var("WORLD_SEED").ok().filter(|v| !v.is_empty()).map(PathBuf::from),

            battle,
            auto_revert_on_owner_online: parse_or("AUTO_REVERT_ON_OWNER_ONLINE", true)?,
            profile_cache_ttl: Duration::from_secs(parse_or("PROFILE_CACHE_TTL_SECS", 300)?),
            command_rate_limit: parse_or("COMMAND_RATE_LIMIT", COMMAND_RATE_LIMIT)?,

            client_origin: env::var("CLIENT_ORIGIN").unwrap_or_else(|_| "*".to_string()),
        })
    }

    /// Settings handed to the battle service
    pub fn service_settings(&self) -> ServiceSettings {
        ServiceSettings {
            battle: self.battle.clone(),
            auto_revert_on_owner_online: self.auto_revert_on_owner_online,
            profile_cache_ttl: self.profile_cache_ttl,
            command_rate_limit: self.command_rate_limit,
        }
    }
}

/// Parse an optional variable, falling back to `default` when unset
fn parse_or<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(key)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_or_falls_back_when_unset() {
        let value: u64 = parse_or("FLEET_BATTLE_TEST_UNSET_VARIABLE", 42).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn service_settings_mirror_config() {
        let config = Config {
            server_addr: "127.0.0.1:8080".parse().unwrap(),
            log_level: "debug".into(),
            log_format: LogFormat::Pretty,
            store_url: None,
            store_api_key: None,
            world_seed: None,
            battle: BattleConfig::default(),
            auto_revert_on_owner_online: false,
            profile_cache_ttl: Duration::from_secs(5),
            command_rate_limit: 7,
            client_origin: "*".into(),
        };
        let settings = config.service_settings();
        assert!(!settings.auto_revert_on_owner_online);
        assert_eq!(settings.command_rate_limit, 7);
        assert_eq!(settings.battle.tick_rate, 10);
    }
}
