//! Data client configuration

use std::time::Duration;

use crate::{ConfigError, KindError, KindResult};

/// Longest accepted cache TTL (one year).
pub const MAX_CACHE_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// When cache invalidations issued inside a transaction reach the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionCachePolicy {
    /// Buffer invalidations and apply them after a successful commit.
    /// Discarded on rollback.
    #[default]
    DeferUntilCommit,
    /// Invalidate at call time, even if the transaction later rolls back.
    Immediate,
}

impl TransactionCachePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionCachePolicy::DeferUntilCommit => "defer",
            TransactionCachePolicy::Immediate => "immediate",
        }
    }
}

impl std::str::FromStr for TransactionCachePolicy {
    type Err = KindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "defer" | "deferred" | "defer_until_commit" => Ok(TransactionCachePolicy::DeferUntilCommit),
            "immediate" => Ok(TransactionCachePolicy::Immediate),
            other => Err(ConfigError::InvalidValue {
                field: "transaction_cache_policy".to_string(),
                value: other.to_string(),
                reason: "expected 'defer' or 'immediate'".to_string(),
            }
            .into()),
        }
    }
}

/// Configuration for the cache-aside data client.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClientConfig {
    /// TTL for entries populated by single-key reads. `None` never expires.
    pub cache_ttl: Option<Duration>,
    /// Location prefix handed to the key codec (for example `s~`).
    pub key_location_prefix: Option<String>,
    pub transaction_cache_policy: TransactionCachePolicy,
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from environment variables, falling back to defaults for unset
    /// or unparsable values.
    ///
    /// - `KINDCACHE_CACHE_TTL_SECS`
    /// - `KINDCACHE_KEY_LOCATION_PREFIX`
    /// - `KINDCACHE_TX_CACHE_POLICY` (`defer` or `immediate`)
    pub fn from_env() -> Self {
        let cache_ttl = std::env::var("KINDCACHE_CACHE_TTL_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);

        let key_location_prefix = std::env::var("KINDCACHE_KEY_LOCATION_PREFIX")
            .ok()
            .filter(|s| !s.is_empty());

        let transaction_cache_policy = std::env::var("KINDCACHE_TX_CACHE_POLICY")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or_default();

        Self {
            cache_ttl,
            key_location_prefix,
            transaction_cache_policy,
        }
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    pub fn with_key_location_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_location_prefix = Some(prefix.into());
        self
    }

    pub fn with_transaction_cache_policy(mut self, policy: TransactionCachePolicy) -> Self {
        self.transaction_cache_policy = policy;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> KindResult<()> {
        if let Some(ttl) = self.cache_ttl {
            if ttl.as_secs() == 0 {
                return Err(ConfigError::InvalidValue {
                    field: "cache_ttl".to_string(),
                    value: format!("{:?}", ttl),
                    reason: "cache_ttl must be at least one second; use None for no expiry"
                        .to_string(),
                }
                .into());
            }
            if ttl > MAX_CACHE_TTL {
                return Err(ConfigError::InvalidValue {
                    field: "cache_ttl".to_string(),
                    value: format!("{:?}", ttl),
                    reason: format!(
                        "cache_ttl must not exceed {} seconds",
                        MAX_CACHE_TTL.as_secs()
                    ),
                }
                .into());
            }
        }

        if let Some(prefix) = &self.key_location_prefix {
            if prefix.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "key_location_prefix".to_string(),
                    value: String::new(),
                    reason: "key_location_prefix must not be empty; use None instead".to_string(),
                }
                .into());
            }
        }

        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.cache_ttl, None);
        assert_eq!(config.key_location_prefix, None);
        assert_eq!(
            config.transaction_cache_policy,
            TransactionCachePolicy::DeferUntilCommit
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = ClientConfig::new()
            .with_cache_ttl(Duration::from_secs(30))
            .with_key_location_prefix("s~")
            .with_transaction_cache_policy(TransactionCachePolicy::Immediate);
        assert_eq!(config.cache_ttl, Some(Duration::from_secs(30)));
        assert_eq!(config.key_location_prefix.as_deref(), Some("s~"));
        assert_eq!(config.transaction_cache_policy, TransactionCachePolicy::Immediate);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_sub_second_ttl() {
        let config = ClientConfig::new().with_cache_ttl(Duration::from_millis(500));
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            KindError::Config(ConfigError::InvalidValue { ref field, .. }) if field == "cache_ttl"
        ));
    }

    #[test]
    fn test_validate_rejects_oversized_ttl() {
        let config = ClientConfig::new().with_cache_ttl(Duration::from_secs(u64::MAX));
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            KindError::Config(ConfigError::InvalidValue { ref field, .. }) if field == "cache_ttl"
        ));

        let config = ClientConfig::new().with_cache_ttl(MAX_CACHE_TTL);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_prefix() {
        let config = ClientConfig::new().with_key_location_prefix("");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!(
            "defer".parse::<TransactionCachePolicy>().unwrap(),
            TransactionCachePolicy::DeferUntilCommit
        );
        assert_eq!(
            " Immediate ".parse::<TransactionCachePolicy>().unwrap(),
            TransactionCachePolicy::Immediate
        );
        assert!("sometimes".parse::<TransactionCachePolicy>().is_err());
        assert_eq!(TransactionCachePolicy::Immediate.as_str(), "immediate");
    }
}
