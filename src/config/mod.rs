//! Configuration module - environment variable parsing

use std::env;
use std::str::FromStr;

use crate::sim::tuning::{Ruleset, DRONE_HEALTH};

/// Host configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Emit JSON log lines instead of the human-readable format
    pub log_json: bool,

    /// Seed for every deterministic RNG in the session
    pub session_seed: u64,
    /// Stop after this many ticks (0 = run until shutdown signal)
    pub session_ticks: u64,
    /// Bot drones spawned per team
    pub bots_per_team: usize,
    /// In-process spectator clients fed from the broadcast channel
    pub spectators: usize,

    /// Per-session gameplay rules
    pub ruleset: Ruleset,

    /// Simulated round-trip time for the remote human player (seconds)
    pub remote_rtt: f32,
    /// Simulated interpolation delay for the remote human player (seconds)
    pub interpolation_delay: f32,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let ruleset = Ruleset {
            time_scale: parse_or("TIME_SCALE", 1.0f32)?,
            drone_shield: parse_or("DRONE_SHIELD", Ruleset::default().drone_shield)?,
        };

        check_ruleset(&ruleset)?;

        let log_format = env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());

        Ok(Self {
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            log_json: log_format.eq_ignore_ascii_case("json"),

            session_seed: parse_or("SESSION_SEED", 0x5eed_u64)?,
            session_ticks: parse_or("SESSION_TICKS", 0u64)?,
            bots_per_team: parse_or("BOTS_PER_TEAM", 2usize)?,
            spectators: parse_or("SPECTATORS", 1usize)?,

            ruleset,

            remote_rtt: parse_or("REMOTE_RTT_MS", 120.0f32)? / 1000.0,
            interpolation_delay: parse_or("INTERPOLATION_DELAY_MS", 50.0f32)? / 1000.0,
        })
    }
}

/// A drone's hp plus shield must fit the i8 health fields
fn check_ruleset(ruleset: &Ruleset) -> Result<(), ConfigError> {
    if ruleset.time_scale <= 0.0 {
        return Err(ConfigError::OutOfRange("TIME_SCALE"));
    }
    if ruleset.drone_shield < 0 || ruleset.drone_shield > i8::MAX - DRONE_HEALTH {
        return Err(ConfigError::OutOfRange("DRONE_SHIELD"));
    }
    Ok(())
}

fn parse_or<T: FromStr>(var: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(var) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { var, value }),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable {var}: {value:?}")]
    Invalid { var: &'static str, value: String },

    #[error("Environment variable out of range: {0}")]
    OutOfRange(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_or_falls_back_when_unset() {
        let value: u64 = parse_or("DRONE_COMBAT_TEST_UNSET_VARIABLE", 7).unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn drone_shield_must_leave_room_for_hp() {
        let mut ruleset = Ruleset::default();
        ruleset.drone_shield = i8::MAX - DRONE_HEALTH;
        assert!(check_ruleset(&ruleset).is_ok());

        ruleset.drone_shield = i8::MAX;
        assert!(matches!(
            check_ruleset(&ruleset),
            Err(ConfigError::OutOfRange("DRONE_SHIELD"))
        ));

        ruleset.drone_shield = -1;
        assert!(check_ruleset(&ruleset).is_err());
    }

    #[test]
    fn time_scale_must_be_positive() {
        let ruleset = Ruleset {
            time_scale: 0.0,
            ..Ruleset::default()
        };
        assert!(matches!(
            check_ruleset(&ruleset),
            Err(ConfigError::OutOfRange("TIME_SCALE"))
        ));
    }
}
