//! Write-disposition policy for the capture stream.
//!
//! Downstream storage is an append-only historical ledger: every version of a
//! row, including its deletion, must remain queryable. The policy in this
//! module therefore overrides whatever disposition the schema-inference
//! defaults would pick per table, forcing append-only delivery and replacing
//! hard deletes with a soft-delete marker column.

use crate::catalog::CatalogEntry;

/// Name of the soft-delete marker column added to every destination schema.
pub const SOFT_DELETE_COLUMN: &str = "deleted_ts";

/// How the loader should apply captured rows to the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteDisposition {
    /// Every captured change is inserted as a new row version.
    Append,
    /// Rows are upserted by primary key; deletes remove rows in place.
    Merge,
}

/// Delivery-semantics hints attached to a [`CatalogEntry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispositionHints {
    /// How rows for this table are written at the destination.
    pub write_disposition: WriteDisposition,
    /// Whether a delete event may remove the destination row.
    pub hard_delete: bool,
    /// The soft-delete marker column, when hard deletes are disabled.
    pub soft_delete_column: Option<String>,
}

impl DispositionHints {
    /// The hints schema inference would choose on its own for a table.
    ///
    /// Tables with a replica identity merge by key and propagate deletes;
    /// keyless tables can only ever be appended to.
    pub fn inferred(has_primary_keys: bool) -> Self {
        if has_primary_keys {
            Self {
                write_disposition: WriteDisposition::Merge,
                hard_delete: true,
                soft_delete_column: None,
            }
        } else {
            Self {
                write_disposition: WriteDisposition::Append,
                hard_delete: false,
                soft_delete_column: None,
            }
        }
    }
}

/// Forces append-only delivery on a catalog entry under construction.
///
/// Overrides the inferred disposition with `append`, disables hard deletes
/// and configures the [`SOFT_DELETE_COLUMN`] marker. Applied to every entry
/// this consumer produces, regardless of the table's shape.
pub fn apply_append_only_policy(entry: &mut CatalogEntry) {
    entry.hints.write_disposition = WriteDisposition::Append;
    entry.hints.hard_delete = false;
    entry.hints.soft_delete_column = Some(SOFT_DELETE_COLUMN.to_string());
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdc_postgres::types::{ColumnSchema, TableId, TableName, TableSchema};
    use tokio_postgres::types::Type;

    use crate::conversions::text::SemanticType;

    fn keyed_table() -> TableSchema {
        TableSchema::new(
            TableId::new(123),
            TableName::new("public".to_string(), "invoice".to_string()),
            vec![
                ColumnSchema::new("id".to_string(), Type::INT4, -1, true),
                ColumnSchema::new("name".to_string(), Type::TEXT, -1, false),
            ],
        )
    }

    #[test]
    fn inferred_hints_merge_for_keyed_tables() {
        let hints = DispositionHints::inferred(true);
        assert_eq!(hints.write_disposition, WriteDisposition::Merge);
        assert!(hints.hard_delete);
    }

    #[test]
    fn policy_overrides_merge_with_append() {
        let entry = CatalogEntry::derive(&keyed_table());

        // The table has a primary key, so inference alone would have merged;
        // the policy must have forced append-only delivery.
        assert_eq!(entry.hints.write_disposition, WriteDisposition::Append);
        assert!(!entry.hints.hard_delete);
        assert_eq!(
            entry.hints.soft_delete_column.as_deref(),
            Some(SOFT_DELETE_COLUMN)
        );
    }

    #[test]
    fn policy_adds_soft_delete_column_to_schema() {
        let entry = CatalogEntry::derive(&keyed_table());

        let soft_delete = entry
            .columns
            .iter()
            .find(|column| column.name == SOFT_DELETE_COLUMN)
            .expect("soft delete column must be present");
        assert_eq!(soft_delete.semantic_type, SemanticType::TimestampTz);
        assert!(!soft_delete.primary);
    }
}
