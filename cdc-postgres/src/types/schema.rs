use pg_escape::quote_identifier;
use std::fmt;
use std::str::FromStr;
use tokio_postgres::types::Type;

/// An object identifier in Postgres.
type Oid = u32;

/// A type alias for Postgres type modifiers.
///
/// Type modifiers in Postgres are used to specify additional type-specific
/// attributes, such as length for varchar or precision for numeric types.
pub type TypeModifier = i32;

/// A fully qualified Postgres table name consisting of a schema and table name.
#[derive(Debug, Clone, Eq, PartialEq, PartialOrd, Ord)]
pub struct TableName {
    /// The schema name containing the table
    pub schema: String,
    /// The name of the table within the schema
    pub name: String,
}

impl TableName {
    pub fn new(schema: String, name: String) -> TableName {
        Self { schema, name }
    }

    /// Returns the table name as a properly quoted Postgres identifier.
    ///
    /// This method ensures the schema and table names are properly escaped
    /// according to Postgres identifier quoting rules.
    pub fn as_quoted_identifier(&self) -> String {
        let quoted_schema = quote_identifier(&self.schema);
        let quoted_name = quote_identifier(&self.name);

        format!("{quoted_schema}.{quoted_name}")
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("{0}.{1}", self.schema, self.name))
    }
}

/// A type-safe wrapper for Postgres table OIDs.
///
/// Table OIDs are unique identifiers assigned to tables in Postgres. The
/// replication protocol uses them as the relation identifier on every data
/// message.
///
/// This newtype provides type safety by preventing accidental use of raw
/// [`Oid`] values where a table identifier is expected.
#[derive(Debug, Clone, Copy, Eq, PartialEq, PartialOrd, Ord, Hash)]
pub struct TableId(pub Oid);

impl TableId {
    /// Creates a new [`TableId`] from an [`Oid`].
    pub fn new(oid: Oid) -> Self {
        Self(oid)
    }

    /// Returns the underlying [`Oid`] value.
    pub fn into_inner(self) -> Oid {
        self.0
    }
}

impl From<Oid> for TableId {
    fn from(oid: Oid) -> Self {
        Self(oid)
    }
}

impl From<TableId> for Oid {
    fn from(table_id: TableId) -> Self {
        table_id.0
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TableId {
    type Err = <Oid as FromStr>::Err;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<Oid>().map(TableId::new)
    }
}

/// Represents the schema of a single column as announced by a relation
/// message.
///
/// The replication protocol carries the column name, its type oid, the type
/// modifier and a flag marking replica-identity membership; nothing else is
/// available mid-stream, so nothing else is stored.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ColumnSchema {
    /// The name of the column.
    pub name: String,
    /// The Postgres data type of the column.
    pub typ: Type,
    /// Type-specific modifier value (e.g., precision/scale for numeric).
    pub modifier: TypeModifier,
    /// Whether the column is part of the table's replica identity (usually
    /// the primary key).
    pub primary: bool,
}

impl ColumnSchema {
    /// Creates a new [`ColumnSchema`] with all fields specified.
    pub fn new(name: String, typ: Type, modifier: TypeModifier, primary: bool) -> ColumnSchema {
        Self {
            name,
            typ,
            modifier,
            primary,
        }
    }
}

/// Represents the complete schema of a Postgres table at one point in the
/// replication stream.
///
/// A relation message replaces the previous [`TableSchema`] for the same
/// [`TableId`] wholesale, since column order and types may change between
/// announcements.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct TableSchema {
    /// The Postgres OID of the table.
    pub id: TableId,
    /// The fully qualified name of the table.
    pub name: TableName,
    /// The schemas of all columns in the table, in announcement order.
    pub column_schemas: Vec<ColumnSchema>,
}

impl TableSchema {
    /// Creates a new [`TableSchema`].
    pub fn new(id: TableId, name: TableName, column_schemas: Vec<ColumnSchema>) -> Self {
        Self {
            id,
            name,
            column_schemas,
        }
    }

    /// Adds a new column schema to this [`TableSchema`].
    pub fn add_column_schema(&mut self, column_schema: ColumnSchema) {
        self.column_schemas.push(column_schema);
    }

    /// Returns whether the table has any primary key columns.
    pub fn has_primary_keys(&self) -> bool {
        self.column_schemas.iter().any(|cs| cs.primary)
    }

    /// Returns an iterator over the primary key columns of the table.
    pub fn primary_key_columns(&self) -> impl Iterator<Item = &ColumnSchema> {
        self.column_schemas.iter().filter(|cs| cs.primary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_table_schema() -> TableSchema {
        TableSchema::new(
            TableId::new(123),
            TableName::new("public".to_string(), "test_table".to_string()),
            vec![
                ColumnSchema::new("id".to_string(), Type::INT4, -1, true),
                ColumnSchema::new("name".to_string(), Type::TEXT, -1, false),
                ColumnSchema::new("age".to_string(), Type::INT4, -1, false),
            ],
        )
    }

    #[test]
    fn test_table_name_quoting() {
        let name = TableName::new("public".to_string(), "invoice".to_string());
        assert_eq!(name.as_quoted_identifier(), "public.invoice");
        assert_eq!(name.to_string(), "public.invoice");

        let quoted = TableName::new("public".to_string(), "Invoice Items".to_string());
        assert_eq!(quoted.as_quoted_identifier(), "public.\"Invoice Items\"");
    }

    #[test]
    fn test_table_id_parse_roundtrip() {
        let table_id: TableId = "16385".parse().unwrap();
        assert_eq!(table_id, TableId::new(16385));
        assert_eq!(table_id.to_string(), "16385");
    }

    #[test]
    fn test_has_primary_keys() {
        let schema = create_test_table_schema();
        assert!(schema.has_primary_keys());

        let keys: Vec<_> = schema
            .primary_key_columns()
            .map(|cs| cs.name.as_str())
            .collect();
        assert_eq!(keys, vec!["id"]);
    }

    #[test]
    fn test_no_primary_keys() {
        let schema = TableSchema::new(
            TableId::new(7),
            TableName::new("public".to_string(), "log".to_string()),
            vec![ColumnSchema::new(
                "message".to_string(),
                Type::TEXT,
                -1,
                false,
            )],
        );
        assert!(!schema.has_primary_keys());
        assert_eq!(schema.primary_key_columns().count(), 0);
    }
}
