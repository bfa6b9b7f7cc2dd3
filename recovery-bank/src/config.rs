//! Configuration for the recovery bank

use serde::{Deserialize, Serialize};

/// Recovery bank configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Service name
    pub service_name: String,

    /// Cache configuration
    pub cache: CacheConfig,

    /// Batching configuration
    pub batching: BatchingConfig,

    /// Scoring and validation configuration
    pub scoring: ScoringConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "recovery-bank".to_string(),
            cache: CacheConfig::default(),
            batching: BatchingConfig::default(),
            scoring: ScoringConfig::default(),
        }
    }
}

/// Cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Entries per cache before eviction kicks in
    pub max_entries: usize,

    /// Share of the oldest entries purged on overflow (0.0 - 1.0)
    pub eviction_fraction: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 5000,
            eviction_fraction: 0.2,
        }
    }
}

/// Batching configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchingConfig {
    /// Items processed between yield points
    pub chunk_size: usize,

    /// Yield to the runtime between chunks
    pub yield_between_chunks: bool,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 20,
            yield_between_chunks: true,
        }
    }
}

/// Scoring configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Samples kept when computing recovery-time variance
    pub max_variance_samples: usize,

    /// Debt ratio above which a stop may no longer lend
    pub max_lender_debt_ratio: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            max_variance_samples: 1000,
            max_lender_debt_ratio: 0.8,
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(value) = std::env::var("RECOVERY_CACHE_MAX_ENTRIES") {
            config.cache.max_entries = value.parse().map_err(|e| {
                crate::Error::Config(format!("Invalid RECOVERY_CACHE_MAX_ENTRIES: {}", e))
            })?;
        }

        if let Ok(value) = std::env::var("RECOVERY_BATCH_CHUNK_SIZE") {
            config.batching.chunk_size = value.parse().map_err(|e| {
                crate::Error::Config(format!("Invalid RECOVERY_BATCH_CHUNK_SIZE: {}", e))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        if self.cache.max_entries == 0 {
            return Err(crate::Error::Config("cache.max_entries must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.cache.eviction_fraction) {
            return Err(crate::Error::Config(
                "cache.eviction_fraction must be within 0.0 - 1.0".into(),
            ));
        }
        if self.batching.chunk_size == 0 {
            return Err(crate::Error::Config("batching.chunk_size must be positive".into()));
        }
        if self.scoring.max_variance_samples < 2 {
            return Err(crate::Error::Config(
                "scoring.max_variance_samples must be at least 2".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.service_name, "recovery-bank");
        assert_eq!(config.cache.max_entries, 5000);
        assert_eq!(config.batching.chunk_size, 20);
        assert!(config.batching.yield_between_chunks);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml() {
        let config: Config = toml::from_str(
            r#"
            [cache]
            max_entries = 64

            [scoring]
            max_lender_debt_ratio = 0.5
            "#,
        )
        .unwrap();

        assert_eq!(config.cache.max_entries, 64);
        assert_eq!(config.cache.eviction_fraction, 0.2);
        assert_eq!(config.scoring.max_lender_debt_ratio, 0.5);
        assert_eq!(config.batching, BatchingConfig::default());
    }

    #[test]
    fn test_validate_rejects_zero_chunk() {
        let mut config = Config::default();
        config.batching.chunk_size = 0;
        assert!(config.validate().is_err());
    }
}
