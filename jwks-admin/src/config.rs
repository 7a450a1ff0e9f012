//! Configuration for key-set administration

use crate::error::{Error, Result};
use std::env;
use std::time::Duration;

/// Environment variable overriding [`RepositoryConfig::max_attempts`]
pub const ENV_MAX_ATTEMPTS: &str = "JWKS_CAS_MAX_ATTEMPTS";
/// Environment variable overriding [`RepositoryConfig::base_backoff`] (milliseconds)
pub const ENV_BASE_BACKOFF_MS: &str = "JWKS_CAS_BASE_BACKOFF_MS";
/// Environment variable overriding [`RepositoryConfig::call_timeout`] (milliseconds)
pub const ENV_STORE_TIMEOUT_MS: &str = "JWKS_STORE_TIMEOUT_MS";

/// Configuration for the key-set repository's compare-and-swap loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryConfig {
    /// Total attempts of a read-modify-write cycle before a conflict is surfaced
    pub max_attempts: u32,

    /// Delay before the first retry; doubles with every further retry
    pub base_backoff: Duration,

    /// Upper bound of the exponential part of the delay
    pub max_backoff: Duration,

    /// Timeout for a single load or save call against the store
    pub call_timeout: Duration,
}

impl RepositoryConfig {
    /// Creates the default configuration: 3 attempts, 20 ms base backoff,
    /// 500 ms cap, 5 s call timeout
    pub fn new() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(20),
            max_backoff: Duration::from_millis(500),
            call_timeout: Duration::from_secs(5),
        }
    }

    /// Reads overrides from the environment on top of the defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::new();

        if let Some(attempts) = read_env_u64(ENV_MAX_ATTEMPTS)? {
            let attempts = u32::try_from(attempts)
                .map_err(|_| Error::Config(format!("{} is too large", ENV_MAX_ATTEMPTS)))?;
            config = config.with_max_attempts(attempts);
        }
        if let Some(ms) = read_env_u64(ENV_BASE_BACKOFF_MS)? {
            config = config.with_base_backoff(Duration::from_millis(ms));
        }
        if let Some(ms) = read_env_u64(ENV_STORE_TIMEOUT_MS)? {
            config = config.with_call_timeout(Duration::from_millis(ms));
        }

        config.validate()?;
        Ok(config)
    }

    /// Sets the number of attempts
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the base backoff
    pub fn with_base_backoff(mut self, backoff: Duration) -> Self {
        self.base_backoff = backoff;
        self
    }

    /// Sets the backoff cap
    pub fn with_max_backoff(mut self, backoff: Duration) -> Self {
        self.max_backoff = backoff;
        self
    }

    /// Sets the per-call store timeout
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::Config("max_attempts must be at least 1".to_string()));
        }
        if self.call_timeout.is_zero() {
            return Err(Error::Config("call_timeout must not be zero".to_string()));
        }
        Ok(())
    }
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for credential imports
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImporterConfig {
    /// Replace an existing credential with the same alias instead of
    /// failing with `AliasInUse`
    pub allow_alias_overwrite: bool,
}

impl ImporterConfig {
    /// Creates the default configuration (no overwrites)
    pub fn new() -> Self {
        Self::default()
    }

    /// Allows or forbids replacing an existing alias
    pub fn with_alias_overwrite(mut self, allow: bool) -> Self {
        self.allow_alias_overwrite = allow;
        self
    }
}

fn read_env_u64(name: &str) -> Result<Option<u64>> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|e| Error::Config(format!("{}={:?} is not a number: {}", name, raw, e))),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(Error::Config(format!("{}: {}", name, e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RepositoryConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert!(config.validate().is_ok());
        assert!(!ImporterConfig::default().allow_alias_overwrite);
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let config = RepositoryConfig::new().with_max_attempts(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_builder_setters() {
        let config = RepositoryConfig::new()
            .with_max_attempts(5)
            .with_base_backoff(Duration::ZERO)
            .with_max_backoff(Duration::from_millis(10))
            .with_call_timeout(Duration::from_millis(250));
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.base_backoff, Duration::ZERO);
        assert_eq!(config.call_timeout, Duration::from_millis(250));
    }
}
