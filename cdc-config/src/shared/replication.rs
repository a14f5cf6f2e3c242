use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Default replication slot name used when none is configured.
pub const DEFAULT_SLOT_NAME: &str = "cdc_slot";

/// Default publication name used when none is configured.
pub const DEFAULT_PUBLICATION_NAME: &str = "cdc_pub";

/// Where the upper bound of a capture pass comes from.
///
/// A capture pass is finite: it reads the stream up to a log position fixed
/// at session start and then stops.
#[derive(Clone, Debug, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum LsnBound {
    /// Read up to the server's current WAL position, resolved when the
    /// session opens.
    CurrentWalLsn,
    /// Read up to an explicit log position, given in the usual `X/Y` textual
    /// form.
    Explicit(String),
}

impl Default for LsnBound {
    fn default() -> Self {
        Self::CurrentWalLsn
    }
}

/// Replication session configuration: which slot and publication to consume,
/// and which tables the publication covers.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ReplicationConfig {
    /// Name of the logical replication slot.
    #[serde(default = "default_slot_name")]
    pub slot_name: String,
    /// Name of the publication the slot decodes against.
    #[serde(default = "default_publication_name")]
    pub publication_name: String,
    /// Schema containing the published tables.
    pub schema_name: String,
    /// Names of the tables the publication is created for, when it does not
    /// exist yet. An existing publication is never altered.
    pub table_names: Vec<String>,
    /// Upper bound of the capture pass.
    #[serde(default)]
    pub upto: LsnBound,
}

impl ReplicationConfig {
    /// Validates replication configuration settings.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.slot_name.is_empty() {
            return Err(ValidationError::InvalidFieldValue {
                field: "replication.slot_name",
                constraint: "must not be empty",
            });
        }

        if self.publication_name.is_empty() {
            return Err(ValidationError::InvalidFieldValue {
                field: "replication.publication_name",
                constraint: "must not be empty",
            });
        }

        if self.table_names.is_empty() {
            return Err(ValidationError::InvalidFieldValue {
                field: "replication.table_names",
                constraint: "must list at least one table",
            });
        }

        Ok(())
    }
}

fn default_slot_name() -> String {
    DEFAULT_SLOT_NAME.to_string()
}

fn default_publication_name() -> String {
    DEFAULT_PUBLICATION_NAME.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_partial_config() {
        let config: ReplicationConfig = serde_json::from_str(
            r#"{"schema_name": "public", "table_names": ["invoice"]}"#,
        )
        .unwrap();

        assert_eq!(config.slot_name, "cdc_slot");
        assert_eq!(config.publication_name, "cdc_pub");
        assert_eq!(config.upto, LsnBound::CurrentWalLsn);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_table_list_rejected() {
        let config = ReplicationConfig {
            slot_name: "cdc_slot".to_string(),
            publication_name: "cdc_pub".to_string(),
            schema_name: "public".to_string(),
            table_names: vec![],
            upto: LsnBound::default(),
        };

        assert!(config.validate().is_err());
    }
}
