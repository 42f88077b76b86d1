//! Schema description model.
//!
//! [`SchemaDescription`] is the structured view of a backend's catalog:
//! ordered tables, ordered columns with inferred semantic types, and
//! declared relationship edges. It is a value type, built fresh per
//! execution by a connector and formatted for the language model by
//! [`analyzer`].

pub mod analyzer;
pub mod relevance;

use serde::{Deserialize, Serialize};

/// Semantic subtype inferred from a column name.
///
/// A heuristic hint for the language model, not a guarantee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SemanticType {
    Email,
    Url,
    Phone,
    Latitude,
    Longitude,
    Monetary,
    Timestamp,
}

impl SemanticType {
    /// Label used in the formatted schema text.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Url => "url",
            Self::Phone => "phone",
            Self::Latitude => "latitude",
            Self::Longitude => "longitude",
            Self::Monetary => "monetary",
            Self::Timestamp => "timestamp",
        }
    }
}

/// A single column of a table or collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnDescription {
    /// Column name as declared in the catalog.
    pub name: String,
    /// Declared (native) type name.
    pub data_type: String,
    /// Whether NULL values are permitted.
    pub nullable: bool,
    /// Heuristic semantic subtype, if one was inferred.
    pub semantic_type: Option<SemanticType>,
    /// Member of the primary key.
    pub is_primary_key: bool,
    /// Constrained by a foreign key.
    pub is_foreign_key: bool,
}

impl ColumnDescription {
    /// Plain column with no key flags; semantic type inferred from the name.
    #[must_use]
    pub fn new(name: impl Into<String>, data_type: impl Into<String>, nullable: bool) -> Self {
        let name = name.into();
        let semantic_type = analyzer::infer_semantic_type(&name);
        Self {
            name,
            data_type: data_type.into(),
            nullable,
            semantic_type,
            is_primary_key: false,
            is_foreign_key: false,
        }
    }
}

/// A declared foreign-key edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipEdge {
    pub from_table: String,
    pub from_column: String,
    pub to_table: String,
    pub to_column: String,
}

/// One table or collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDescription {
    /// Table or collection name.
    pub name: String,
    /// Ordered columns.
    pub columns: Vec<ColumnDescription>,
    /// Outgoing relationship edges (this table's foreign keys).
    pub relationships: Vec<RelationshipEdge>,
}

/// Ordered sequence of table descriptors for one backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaDescription {
    pub tables: Vec<TableDescription>,
}

impl SchemaDescription {
    /// Names of all tables, in catalog order.
    #[must_use]
    pub fn table_names(&self) -> Vec<String> {
        self.tables.iter().map(|t| t.name.clone()).collect()
    }
}
