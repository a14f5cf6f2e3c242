use cdc_postgres::types::{TableId, TableSchema};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::catalog::CatalogEntry;
use crate::cdc_error;
use crate::error::{CdcResult, ErrorKind};

/// In-memory catalog of the relation schemas currently in effect.
///
/// The catalog is the arena for mid-stream schema replacement: relation
/// identifiers are the indices, and a new relation message for a known
/// identifier replaces the stored schema wholesale instead of mutating it,
/// since column order and types may change between announcements. Derived
/// [`CatalogEntry`] values are memoized per identifier and invalidated by the
/// replacement.
///
/// The catalog is owned exclusively by the single sequential consumer, so
/// plain mutation is all the synchronization it needs.
#[derive(Debug, Default)]
pub struct RelationCatalog {
    relations: HashMap<TableId, Arc<TableSchema>>,
    entries: HashMap<TableId, Arc<CatalogEntry>>,
}

impl RelationCatalog {
    /// Creates a new empty relation catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the schema announced by a relation message, replacing any prior
    /// schema for the same identifier and invalidating the memoized catalog
    /// entry derived from it.
    pub fn on_relation_message(&mut self, table_schema: TableSchema) -> Arc<TableSchema> {
        let table_id = table_schema.id;
        let table_schema = Arc::new(table_schema);

        if self.relations.insert(table_id, table_schema.clone()).is_some() {
            debug!(%table_id, "replaced relation schema after new relation message");
        }
        self.entries.remove(&table_id);

        table_schema
    }

    /// Returns the schema currently in effect for a relation.
    ///
    /// A miss is a hard failure: decoding any row for an unannounced relation
    /// is impossible, and the stream contract guarantees a relation message
    /// arrives before any data message referencing it.
    pub fn get(&self, table_id: &TableId) -> CdcResult<&Arc<TableSchema>> {
        self.relations.get(table_id).ok_or_else(|| {
            cdc_error!(
                ErrorKind::UnknownRelation,
                "Relation not found in the catalog",
                format!(
                    "A data message referenced relation {table_id}, which was never announced \
                     by the stream"
                )
            )
        })
    }

    /// Returns the memoized catalog entry for a relation, deriving it from
    /// the stored schema on first access after an announcement.
    pub fn entry(&mut self, table_id: &TableId) -> CdcResult<Arc<CatalogEntry>> {
        if let Some(entry) = self.entries.get(table_id) {
            return Ok(entry.clone());
        }

        let table_schema = self.get(table_id)?.clone();
        let entry = Arc::new(CatalogEntry::derive(&table_schema));
        self.entries.insert(*table_id, entry.clone());

        Ok(entry)
    }

    /// Returns whether the catalog holds a schema for the relation.
    pub fn contains(&self, table_id: &TableId) -> bool {
        self.relations.contains_key(table_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdc_postgres::types::{ColumnSchema, TableName};
    use tokio_postgres::types::Type;

    use crate::conversions::text::SemanticType;

    fn schema_v1() -> TableSchema {
        TableSchema::new(
            TableId::new(123),
            TableName::new("public".to_string(), "invoice".to_string()),
            vec![
                ColumnSchema::new("id".to_string(), Type::INT4, -1, true),
                ColumnSchema::new("total".to_string(), Type::NUMERIC, -1, false),
            ],
        )
    }

    fn schema_v2() -> TableSchema {
        TableSchema::new(
            TableId::new(123),
            TableName::new("public".to_string(), "invoice".to_string()),
            vec![
                ColumnSchema::new("id".to_string(), Type::INT8, -1, true),
                ColumnSchema::new("total".to_string(), Type::NUMERIC, -1, false),
                ColumnSchema::new("note".to_string(), Type::TEXT, -1, false),
            ],
        )
    }

    #[test]
    fn get_returns_most_recent_schema() {
        let mut catalog = RelationCatalog::new();
        catalog.on_relation_message(schema_v1());
        catalog.on_relation_message(schema_v2());

        let stored = catalog.get(&TableId::new(123)).unwrap();
        assert_eq!(stored.column_schemas.len(), 3);
        assert_eq!(stored.column_schemas[0].typ, Type::INT8);
    }

    #[test]
    fn get_unknown_relation_fails() {
        let catalog = RelationCatalog::new();

        let err = catalog.get(&TableId::new(999)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownRelation);
    }

    #[test]
    fn entry_is_memoized_until_replacement() {
        let mut catalog = RelationCatalog::new();
        catalog.on_relation_message(schema_v1());

        let first = catalog.entry(&TableId::new(123)).unwrap();
        let second = catalog.entry(&TableId::new(123)).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        catalog.on_relation_message(schema_v2());
        let third = catalog.entry(&TableId::new(123)).unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
        // The rebuilt entry reflects the replaced schema.
        assert_eq!(third.columns[0].semantic_type, SemanticType::BigInt);
    }
}
