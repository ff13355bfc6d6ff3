use std::time::Duration;

use serde::{Deserialize, Serialize};

use strongroom_core::serde;
use strongroom_encryption::WrapAlgorithm;

use crate::BarrierError;

/// Upper bound on unseal shares. The sealed root key holds one envelope per
/// threshold sized subset, so this keeps that count small.
pub const MAX_UNSEAL_SHARES: u8 = 10;

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(crate = "strongroom_core::serde", default)]
pub struct BarrierConfig {
    pub unseal: UnsealConfig,
    pub cache: CacheConfig,
    pub default_wrap_algorithm: WrapAlgorithm,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(crate = "strongroom_core::serde", default)]
pub struct UnsealConfig {
    pub threshold: u8,
    pub shares: u8,
}

impl Default for UnsealConfig {
    fn default() -> Self {
        UnsealConfig {
            threshold: 3,
            shares: 5,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(crate = "strongroom_core::serde", default)]
pub struct CacheConfig {
    pub capacity: usize,
    pub shards: usize,
    pub idle_timeout_secs: Option<u64>,
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            capacity: 1024,
            shards: 16,
            idle_timeout_secs: Some(900),
            sweep_interval_secs: 60,
        }
    }
}

impl CacheConfig {
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_secs.map(Duration::from_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

impl BarrierConfig {
    pub fn validate(&self) -> Result<(), BarrierError> {
        let UnsealConfig { threshold, shares } = self.unseal;
        if threshold == 0 {
            return Err(BarrierError::InvalidConfig(
                "unseal threshold must be at least 1".to_string(),
            ));
        }
        if threshold > shares {
            return Err(BarrierError::InvalidConfig(format!(
                "unseal threshold {} exceeds share count {}",
                threshold, shares
            )));
        }
        if shares > MAX_UNSEAL_SHARES {
            return Err(BarrierError::InvalidConfig(format!(
                "at most {} unseal shares are supported",
                MAX_UNSEAL_SHARES
            )));
        }
        if self.cache.capacity == 0 {
            return Err(BarrierError::InvalidConfig(
                "cache capacity must be at least 1".to_string(),
            ));
        }
        if self.cache.shards == 0 {
            return Err(BarrierError::InvalidConfig(
                "cache shards must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strongroom_core::serde_json;

    #[test]
    fn test_defaults_are_valid() {
        let config = BarrierConfig::default();
        assert_eq!(config.unseal.threshold, 3);
        assert_eq!(config.unseal.shares, 5);
        assert_eq!(config.cache.capacity, 1024);
        assert_eq!(config.default_wrap_algorithm, WrapAlgorithm::Aes256GcmSiv);
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: BarrierConfig = serde_json::from_str(
            r#"{"unseal": {"threshold": 2}, "default_wrap_algorithm": "chacha20-poly1305"}"#,
        )
        .expect("Invalid BarrierConfig");
        assert_eq!(config.unseal.threshold, 2);
        assert_eq!(config.unseal.shares, 5);
        assert_eq!(config.cache, CacheConfig::default());
        assert_eq!(
            config.default_wrap_algorithm,
            WrapAlgorithm::ChaCha20Poly1305
        );
    }

    #[test]
    fn test_invalid_configs() {
        let mut config = BarrierConfig::default();
        config.unseal.threshold = 0;
        assert!(matches!(config.validate(), Err(BarrierError::InvalidConfig(_))));

        let mut config = BarrierConfig::default();
        config.unseal.threshold = 6;
        assert!(matches!(config.validate(), Err(BarrierError::InvalidConfig(_))));

        let mut config = BarrierConfig::default();
        config.unseal.shares = 11;
        assert!(matches!(config.validate(), Err(BarrierError::InvalidConfig(_))));

        let mut config = BarrierConfig::default();
        config.cache.shards = 0;
        assert!(matches!(config.validate(), Err(BarrierError::InvalidConfig(_))));
    }
}
