use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Batch processing configuration for event streaming.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BatchConfig {
    /// Maximum number of events in a batch handed to the loader.
    #[serde(default = "default_batch_max_size")]
    pub max_size: usize,
    /// Maximum time, in milliseconds, to wait for a batch to fill before
    /// flushing it anyway.
    #[serde(default = "default_batch_max_fill_ms")]
    pub max_fill_ms: u64,
}

impl BatchConfig {
    /// Default maximum batch size for event streaming.
    pub const DEFAULT_MAX_SIZE: usize = 1000;

    /// Default maximum fill time in milliseconds.
    pub const DEFAULT_MAX_FILL_MS: u64 = 1000;

    /// Validates batch configuration settings.
    ///
    /// Ensures max_size is non-zero.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_size == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "batch.max_size",
                constraint: "must be greater than 0",
            });
        }

        Ok(())
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_size: default_batch_max_size(),
            max_fill_ms: default_batch_max_fill_ms(),
        }
    }
}

fn default_batch_max_size() -> usize {
    BatchConfig::DEFAULT_MAX_SIZE
}

fn default_batch_max_fill_ms() -> u64 {
    BatchConfig::DEFAULT_MAX_FILL_MS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_validation() {
        assert!(BatchConfig::default().validate().is_ok());

        let invalid = BatchConfig {
            max_size: 0,
            max_fill_ms: 0,
        };
        assert!(invalid.validate().is_err());
    }
}
