//! Bridge configuration.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::format::FormattingConfig;

/// Expressions per batch produced by the built-in engine.
pub const DEFAULT_BATCH_SIZE: usize = 16;

/// Upper bound on the size of the domain space the built-in engine will walk.
pub const DEFAULT_MAX_COMBINATIONS: u64 = 1_000_000;

/// Worker threads of the runtime owned by a bridge.
pub const DEFAULT_WORKER_THREADS: usize = 2;

/// Shape of the JSON envelopes returned to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaVersion {
    /// No `success` field; failures are recognised by the `error` key
    Legacy,
    /// Every envelope carries `success`
    #[default]
    Versioned,
}

/// What a pull stream does with a pull that arrives while a step is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PullPolicy {
    /// Remember the pull and serve it after the current step
    #[default]
    Queue,
    /// Drop the pull
    Coalesce,
}

/// Limits applied by the built-in engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GenerationLimits {
    /// Maximum expressions per batch
    pub batch_size: usize,
    /// Maximum number of domain assignments examined
    pub max_combinations: u64,
}

impl Default for GenerationLimits {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_combinations: DEFAULT_MAX_COMBINATIONS,
        }
    }
}

impl GenerationLimits {
    /// Set the batch size (at least 1).
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Set the combination limit.
    pub fn with_max_combinations(mut self, max_combinations: u64) -> Self {
        self.max_combinations = max_combinations;
        self
    }
}

/// Configuration of a [`crate::Bridge`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BridgeConfig {
    pub schema: SchemaVersion,
    pub pull_policy: PullPolicy,
    /// Only used when the bridge builds its own runtime
    pub worker_threads: usize,
    pub limits: GenerationLimits,
    /// Rendering options of the parse entry point
    pub parse_context: FormattingConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            schema: SchemaVersion::default(),
            pull_policy: PullPolicy::default(),
            worker_threads: DEFAULT_WORKER_THREADS,
            limits: GenerationLimits::default(),
            parse_context: FormattingConfig::default(),
        }
    }
}

impl BridgeConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| Error::decode(format!("invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the numeric settings.
    pub fn validate(&self) -> Result<()> {
        if self.worker_threads == 0 {
            return Err(Error::decode("invalid configuration: workerThreads must be at least 1"));
        }
        if self.limits.batch_size == 0 {
            return Err(Error::decode("invalid configuration: batchSize must be at least 1"));
        }
        if self.limits.max_combinations == 0 {
            return Err(Error::decode(
                "invalid configuration: maxCombinations must be at least 1",
            ));
        }
        Ok(())
    }

    pub fn with_schema(mut self, schema: SchemaVersion) -> Self {
        self.schema = schema;
        self
    }

    pub fn with_pull_policy(mut self, policy: PullPolicy) -> Self {
        self.pull_policy = policy;
        self
    }

    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads.max(1);
        self
    }

    pub fn with_limits(mut self, limits: GenerationLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_parse_context(mut self, context: FormattingConfig) -> Self {
        self.parse_context = context;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = BridgeConfig::default();
        assert_eq!(config.schema, SchemaVersion::Versioned);
        assert_eq!(config.pull_policy, PullPolicy::Queue);
        assert_eq!(config.limits.batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(config.parse_context, FormattingConfig::default());
    }

    #[test]
    fn test_from_json_partial() {
        let config = BridgeConfig::from_json(
            r#"{"schema":"legacy","pullPolicy":"coalesce","limits":{"batchSize":3}}"#,
        )
        .unwrap();

        assert_eq!(config.schema, SchemaVersion::Legacy);
        assert_eq!(config.pull_policy, PullPolicy::Coalesce);
        assert_eq!(config.limits.batch_size, 3);
        assert_eq!(config.limits.max_combinations, DEFAULT_MAX_COMBINATIONS);
        assert_eq!(config.worker_threads, DEFAULT_WORKER_THREADS);
    }

    #[test]
    fn test_from_json_rejects_invalid() {
        assert!(BridgeConfig::from_json(r#"{"schema":"v3"}"#).is_err());
        assert!(BridgeConfig::from_json(r#"{"limits":{"batchSize":0}}"#).is_err());
        assert!(BridgeConfig::from_json(r#"{"workerThreads":0}"#).is_err());
        assert!(BridgeConfig::from_json("[]").is_err());
    }

    #[test]
    fn test_builders() {
        let config = BridgeConfig::default()
            .with_schema(SchemaVersion::Legacy)
            .with_worker_threads(0)
            .with_limits(GenerationLimits::default().with_batch_size(0));

        assert_eq!(config.schema, SchemaVersion::Legacy);
        assert_eq!(config.worker_threads, 1);
        assert_eq!(config.limits.batch_size, 1);
        assert!(config.validate().is_ok());
    }
}
