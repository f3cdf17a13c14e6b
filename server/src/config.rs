//! Runtime configuration for the quiz server.
//!
//! The binary builds a [`ServerConfig`] from its command line; library users
//! and tests start from [`ServerConfig::default`] and override what they need.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("pin length must be between 1 and 9 digits, got {0}")]
    PinLength(u32),
    #[error("base points must be greater than zero")]
    ZeroBasePoints,
    #[error("time budget must be greater than zero")]
    ZeroTimeBudget,
    #[error("minimum score fraction must be within (0, 1], got {0}")]
    MinFraction(f64),
    #[error("max clients must be greater than zero")]
    NoClients,
    #[error("tick interval must be greater than zero")]
    ZeroTickInterval,
}

/// Time-decayed scoring parameters for correct answers.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoringConfig {
    /// Points for an instant correct answer
    pub base_points: u32,
    /// Window in which a correct answer earns points
    pub time_budget: Duration,
    /// Floor of the decay curve for correct in-budget answers
    pub min_fraction: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            base_points: 1000,
            time_budget: Duration::from_secs(20),
            min_fraction: 0.1,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub max_nickname_len: usize,
    /// How long a lobby may sit without players before it is torn down
    pub lobby_grace: Duration,
    /// Close rounds automatically once the scoring window has passed
    pub auto_advance: bool,
    /// Period of the session housekeeping timer
    pub tick_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_nickname_len: 20,
            lobby_grace: Duration::from_secs(300),
            auto_advance: false,
            tick_interval: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegistryConfig {
    pub pin_length: u32,
    pub max_attempts: u32,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            pin_length: 6,
            max_attempts: 64,
        }
    }
}

impl RegistryConfig {
    /// Number of distinct PINs of the configured length.
    pub fn pin_space(&self) -> u64 {
        10u64.pow(self.pin_length)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub max_clients: usize,
    pub quiz_file: Option<PathBuf>,
    pub registry: RegistryConfig,
    pub session: SessionConfig,
    pub scoring: ScoringConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            max_clients: 512,
            quiz_file: None,
            registry: RegistryConfig::default(),
            session: SessionConfig::default(),
            scoring: ScoringConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=9).contains(&self.registry.pin_length) {
            return Err(ConfigError::PinLength(self.registry.pin_length));
        }
        if self.scoring.base_points == 0 {
            return Err(ConfigError::ZeroBasePoints);
        }
        if self.scoring.time_budget.is_zero() {
            return Err(ConfigError::ZeroTimeBudget);
        }
        let fraction = self.scoring.min_fraction;
        if !(fraction > 0.0 && fraction <= 1.0) {
            return Err(ConfigError::MinFraction(fraction));
        }
        if self.max_clients == 0 {
            return Err(ConfigError::NoClients);
        }
        if self.session.tick_interval.is_zero() {
            return Err(ConfigError::ZeroTickInterval);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ServerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.registry.pin_space(), 1_000_000);
    }

    #[test]
    fn test_pin_length_bounds() {
        let mut config = ServerConfig::default();
        config.registry.pin_length = 0;
        assert_eq!(config.validate(), Err(ConfigError::PinLength(0)));

        config.registry.pin_length = 10;
        assert_eq!(config.validate(), Err(ConfigError::PinLength(10)));

        config.registry.pin_length = 1;
        assert!(config.validate().is_ok());
        assert_eq!(config.registry.pin_space(), 10);
    }

    #[test]
    fn test_scoring_bounds() {
        let mut config = ServerConfig::default();
        config.scoring.time_budget = Duration::ZERO;
        assert_eq!(config.validate(), Err(ConfigError::ZeroTimeBudget));

        let mut config = ServerConfig::default();
        config.scoring.min_fraction = 0.0;
        assert_eq!(config.validate(), Err(ConfigError::MinFraction(0.0)));

        config.scoring.min_fraction = 1.5;
        assert_eq!(config.validate(), Err(ConfigError::MinFraction(1.5)));
    }

    #[test]
    fn test_zero_base_points_rejected() {
        let mut config = ServerConfig::default();
        config.scoring.base_points = 0;
        assert_eq!(config.validate(), Err(ConfigError::ZeroBasePoints));

        config.scoring.base_points = 1;
        assert!(config.validate().is_ok());
    }
}
