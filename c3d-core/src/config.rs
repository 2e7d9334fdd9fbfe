//! Build/start-time configuration: §6 of the spec.

use thiserror::Error;

/// The two integers §6 exposes as the model's only configuration surface,
/// plus the fast-path/strict toggle from the §9 Open Question.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    pub num_sockets: u8,
    pub value_domain_size: u8,
    /// When `true`, reproduces the source model's `S`-on-GETX-sole-sharer
    /// case as an assertion failure rather than taking the fast upgrade path.
    pub strict_upgrade_assertion: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            num_sockets: 3,
            value_domain_size: 2,
            strict_upgrade_assertion: false,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("socket count must be at least 2 to exercise SWMR races, got {0}")]
    TooFewSockets(u8),
    #[error("value domain must contain at least one value, got {0}")]
    EmptyValueDomain(u8),
}

impl Config {
    pub fn new(num_sockets: u8, value_domain_size: u8, strict_upgrade_assertion: bool) -> Result<Self, ConfigError> {
        let config = Config {
            num_sockets,
            value_domain_size,
            strict_upgrade_assertion,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_sockets < 2 {
            return Err(ConfigError::TooFewSockets(self.num_sockets));
        }
        if self.value_domain_size < 1 {
            return Err(ConfigError::EmptyValueDomain(self.value_domain_size));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn single_socket_is_rejected() {
        assert_eq!(Config::new(1, 2, false), Err(ConfigError::TooFewSockets(1)));
    }

    #[test]
    fn empty_value_domain_is_rejected() {
        assert_eq!(Config::new(3, 0, false), Err(ConfigError::EmptyValueDomain(0)));
    }
}
