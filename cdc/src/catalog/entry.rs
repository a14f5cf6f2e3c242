use cdc_postgres::types::{TableName, TableSchema};

use crate::conversions::text::{SemanticType, semantic_type};
use crate::policy::{DispositionHints, apply_append_only_policy};

/// A destination-facing column: its name, the semantic type the loader should
/// create it as, and whether it identifies the row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMapping {
    /// Column name, as announced by the relation message.
    pub name: String,
    /// Semantic schema type for the destination.
    pub semantic_type: SemanticType,
    /// Whether the column is part of the table's replica identity.
    pub primary: bool,
}

/// Per-relation cached schema-for-destination.
///
/// A [`CatalogEntry`] is derived once per relation announcement and memoized
/// by the catalog until the next relation message for the same identifier
/// replaces the schema it was derived from. It carries everything the loader
/// needs to materialize the table: target name, semantic column types and the
/// write-disposition hints already shaped by the append-only policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    /// Target table name at the destination.
    pub table_name: TableName,
    /// Column mappings in relation column order, followed by the soft-delete
    /// marker column the policy appends.
    pub columns: Vec<ColumnMapping>,
    /// Delivery-semantics hints, post-policy.
    pub hints: DispositionHints,
}

impl CatalogEntry {
    /// Derives a catalog entry from a relation's announced schema.
    ///
    /// Starts from the hints schema inference would pick for the table, then
    /// applies the append-only policy, which also appends the soft-delete
    /// marker column to the destination schema.
    pub fn derive(table_schema: &TableSchema) -> Self {
        let columns = table_schema
            .column_schemas
            .iter()
            .map(|column_schema| ColumnMapping {
                name: column_schema.name.clone(),
                semantic_type: semantic_type(&column_schema.typ, column_schema.modifier),
                primary: column_schema.primary,
            })
            .collect();

        let mut entry = Self {
            table_name: table_schema.name.clone(),
            columns,
            hints: DispositionHints::inferred(table_schema.has_primary_keys()),
        };

        apply_append_only_policy(&mut entry);
        if let Some(soft_delete_column) = &entry.hints.soft_delete_column {
            entry.columns.push(ColumnMapping {
                name: soft_delete_column.clone(),
                semantic_type: SemanticType::TimestampTz,
                primary: false,
            });
        }

        entry
    }

    /// Returns the index of the soft-delete marker column, if the entry has
    /// one.
    pub fn soft_delete_column_index(&self) -> Option<usize> {
        let soft_delete_column = self.hints.soft_delete_column.as_deref()?;
        self.columns
            .iter()
            .position(|column| column.name == soft_delete_column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdc_postgres::types::{ColumnSchema, TableId};
    use tokio_postgres::types::Type;

    use crate::policy::SOFT_DELETE_COLUMN;

    fn invoice_schema() -> TableSchema {
        TableSchema::new(
            TableId::new(16385),
            TableName::new("public".to_string(), "invoice".to_string()),
            vec![
                ColumnSchema::new("id".to_string(), Type::INT4, -1, true),
                ColumnSchema::new(
                    "total".to_string(),
                    Type::NUMERIC,
                    (10 << 16) + 2 + 4,
                    false,
                ),
            ],
        )
    }

    #[test]
    fn derive_maps_columns_to_semantic_types() {
        let entry = CatalogEntry::derive(&invoice_schema());

        assert_eq!(entry.table_name.to_string(), "public.invoice");
        assert_eq!(entry.columns.len(), 3);
        assert_eq!(entry.columns[0].name, "id");
        assert_eq!(entry.columns[0].semantic_type, SemanticType::Integer);
        assert!(entry.columns[0].primary);
        assert_eq!(
            entry.columns[1].semantic_type,
            SemanticType::Decimal {
                precision: Some(10),
                scale: Some(2),
            }
        );
    }

    #[test]
    fn derive_appends_soft_delete_column_last() {
        let entry = CatalogEntry::derive(&invoice_schema());

        assert_eq!(entry.soft_delete_column_index(), Some(2));
        assert_eq!(entry.columns[2].name, SOFT_DELETE_COLUMN);
    }
}
