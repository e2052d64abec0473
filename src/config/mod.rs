//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Length of a game started without an explicit duration, in seconds
    pub game_time_secs: f64,
    /// Number of teams new players are spread over
    pub team_count: u32,
    /// Interval between shots while a trigger is held
    pub fire_repeat_rate_secs: f64,

    /// Silence after which a client is flagged as out of contact
    pub out_of_contact_secs: f64,
    /// How often to look for silent clients
    pub ooc_scan_interval: Duration,
    /// How often every connection is pinged
    pub ping_interval: Duration,
    /// Sender id stamped on server-originated lines
    pub server_id: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from(([0, 0, 0, 0], 7079)),
            log_level: "info".to_string(),
            game_time_secs: 1200.0,
            team_count: 2,
            fire_repeat_rate_secs: 1.0,
            out_of_contact_secs: 120.0,
            ooc_scan_interval: Duration::from_secs(3),
            ping_interval: Duration::from_secs(10),
            server_id: 0,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup. Unset keys take their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        // PORT wins over SERVER_ADDR
        let server_addr = match lookup("PORT") {
            Some(port) => format!("0.0.0.0:{}", port)
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,
            None => match lookup("SERVER_ADDR") {
                Some(addr) => addr.parse().map_err(|_| ConfigError::InvalidAddress)?,
                None => defaults.server_addr,
            },
        };

        let server_id = match lookup("SERVER_ID") {
            Some(id) => u64::from_str_radix(id.trim(), 16).map_err(|_| ConfigError::Invalid {
                key: "SERVER_ID",
                value: id,
            })?,
            None => defaults.server_id,
        };

        Ok(Self {
            server_addr,
            log_level: lookup("LOG_LEVEL").unwrap_or(defaults.log_level),

            game_time_secs: parse_or(&lookup, "GAME_TIME_SECS", defaults.game_time_secs)?,
            team_count: parse_or(&lookup, "TEAM_COUNT", defaults.team_count)?,
            fire_repeat_rate_secs: parse_or(
                &lookup,
                "FIRE_REPEAT_RATE_SECS",
                defaults.fire_repeat_rate_secs,
            )?,

            out_of_contact_secs: parse_or(
                &lookup,
                "OUT_OF_CONTACT_SECS",
                defaults.out_of_contact_secs,
            )?,
            ooc_scan_interval: secs_or(&lookup, "OOC_SCAN_INTERVAL_SECS", defaults.ooc_scan_interval)?,
            ping_interval: secs_or(&lookup, "PING_INTERVAL_SECS", defaults.ping_interval)?,
            server_id,
        })
    }
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
        None => Ok(default),
    }
}

/// Intervals must be positive, tokio refuses a zero period
fn secs_or(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    let secs: f64 = parse_or(lookup, key, default.as_secs_f64())?;
    if !secs.is_finite() || secs <= 0.0 {
        return Err(ConfigError::Invalid {
            key,
            value: secs.to_string(),
        });
    }
    Ok(Duration::from_secs_f64(secs))
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid server address format")]
    InvalidAddress,

    #[error("Invalid value for {key}: '{value}'")]
    Invalid { key: &'static str, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let config = load(&[]).unwrap();
        assert_eq!(config.server_addr.port(), 7079);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.game_time_secs, 1200.0);
        assert_eq!(config.team_count, 2);
        assert_eq!(config.out_of_contact_secs, 120.0);
        assert_eq!(config.ooc_scan_interval, Duration::from_secs(3));
        assert_eq!(config.ping_interval, Duration::from_secs(10));
        assert_eq!(config.server_id, 0);
    }

    #[test]
    fn port_overrides_server_addr() {
        let config = load(&[("SERVER_ADDR", "127.0.0.1:9000"), ("PORT", "9100")]).unwrap();
        assert_eq!(config.server_addr, "0.0.0.0:9100".parse().unwrap());

        let config = load(&[("SERVER_ADDR", "127.0.0.1:9000")]).unwrap();
        assert_eq!(config.server_addr, "127.0.0.1:9000".parse().unwrap());
    }

    #[test]
    fn reads_game_settings() {
        let config = load(&[
            ("GAME_TIME_SECS", "600"),
            ("TEAM_COUNT", "4"),
            ("FIRE_REPEAT_RATE_SECS", "0.5"),
            ("PING_INTERVAL_SECS", "2.5"),
            ("SERVER_ID", "ff"),
        ])
        .unwrap();
        assert_eq!(config.game_time_secs, 600.0);
        assert_eq!(config.team_count, 4);
        assert_eq!(config.fire_repeat_rate_secs, 0.5);
        assert_eq!(config.ping_interval, Duration::from_millis(2500));
        assert_eq!(config.server_id, 0xff);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            load(&[("SERVER_ADDR", "nowhere")]),
            Err(ConfigError::InvalidAddress)
        ));
        assert!(matches!(
            load(&[("TEAM_COUNT", "many")]),
            Err(ConfigError::Invalid { key: "TEAM_COUNT", .. })
        ));
        assert!(matches!(
            load(&[("OOC_SCAN_INTERVAL_SECS", "0")]),
            Err(ConfigError::Invalid { .. })
        ));
    }
}
