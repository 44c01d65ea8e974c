//! Runtime configuration.

use crate::error::DomainError;

/// Commit interval at which aggregates without a `snapshot_when` rule are
/// snapshotted.
pub const DEFAULT_SNAPSHOT_THRESHOLD: i64 = 50;

/// Default number of envelopes written per backend round trip.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Aggregate repository settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepositoryConfig {
    /// Snapshot every `n`th version when the aggregate has no rule of its own.
    pub default_snapshot_threshold: i64,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            default_snapshot_threshold: DEFAULT_SNAPSHOT_THRESHOLD,
        }
    }
}

impl RepositoryConfig {
    /// Sets the snapshot threshold.
    #[must_use]
    pub fn with_snapshot_threshold(mut self, threshold: i64) -> Self {
        self.default_snapshot_threshold = threshold;
        self
    }

    /// Checks that the settings are usable.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the threshold is not positive.
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.default_snapshot_threshold <= 0 {
            return Err(DomainError::Validation(format!(
                "snapshot threshold must be positive, got {}",
                self.default_snapshot_threshold
            )));
        }
        Ok(())
    }
}

/// Event store backend settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventStoreConfig {
    /// Domain stamped on every appended envelope.
    pub domain: String,
    /// Maximum rows per backend write. One `append_many` call may span
    /// several batches; they still commit together.
    pub batch_size: usize,
}

impl EventStoreConfig {
    /// Settings for a domain with the default batch size.
    #[must_use]
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Sets the batch size; zero is treated as one.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }
}

/// Envelope codec settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodecOptions {
    /// Extra property names accepted for `timestamp` on read, such as a
    /// backend-injected `"_ts"`.
    pub timestamp_aliases: Vec<String>,
}

impl CodecOptions {
    /// Adds an accepted alias for the `timestamp` property.
    #[must_use]
    pub fn with_timestamp_alias(mut self, alias: impl Into<String>) -> Self {
        self.timestamp_aliases.push(alias.into());
        self
    }
}
