//! Schema analysis: semantic-type inference and LLM-facing formatting.
//!
//! Inference is a deterministic pattern match over column names. The
//! formatted output groups columns under `Table: <name>` blocks joined
//! by blank lines; the relevance filter matches on those exact
//! substrings, so the format is part of the contract.

use super::{SchemaDescription, SemanticType, TableDescription};

/// Infer a semantic subtype from a column name.
///
/// Returns `None` when no pattern matches; the declared type stands on
/// its own in that case.
#[must_use]
pub fn infer_semantic_type(column_name: &str) -> Option<SemanticType> {
    let name = column_name.to_lowercase();

    if name.contains("email") {
        return Some(SemanticType::Email);
    }
    if name.contains("url") || name.contains("website") || name.contains("link") {
        return Some(SemanticType::Url);
    }
    if name.contains("phone") || name.contains("mobile") || name.contains("tel") {
        return Some(SemanticType::Phone);
    }
    // Longitude first: "lon"/"lng" would otherwise be shadowed by "lat" never matching,
    // but "longitude" contains no "lat" so order only matters for docs clarity.
    if name.contains("lng") || name.contains("longitude") || name.contains("lon") {
        return Some(SemanticType::Longitude);
    }
    if name.contains("lat") {
        return Some(SemanticType::Latitude);
    }
    if name.contains("price")
        || name.contains("amount")
        || name.contains("cost")
        || name.contains("revenue")
        || name.contains("salary")
    {
        return Some(SemanticType::Monetary);
    }
    if name.contains("created")
        || name.contains("updated")
        || name.contains("deleted")
        || name.contains("timestamp")
        || name.ends_with("at")
    {
        return Some(SemanticType::Timestamp);
    }

    None
}

/// Format one table as a `Table:` block.
fn format_table(table: &TableDescription) -> String {
    let mut lines = Vec::with_capacity(table.columns.len() + 2);

    for col in &table.columns {
        let mut line = format!("  - {}: {}", col.name, col.data_type);
        if let Some(semantic) = col.semantic_type {
            line.push_str(&format!(" (semantic: {})", semantic.label()));
        }
        if !col.nullable {
            line.push_str(" (NOT NULL)");
        }
        if col.is_primary_key {
            line.push_str(" [PK]");
        }
        if col.is_foreign_key {
            line.push_str(" [FK]");
        }
        lines.push(line);
    }

    let mut block = format!("Table: {}\nColumns:\n{}", table.name, lines.join("\n"));

    if !table.relationships.is_empty() {
        let rel_lines: Vec<String> = table
            .relationships
            .iter()
            .map(|r| format!("  - {} -> {}.{}", r.from_column, r.to_table, r.to_column))
            .collect();
        block.push_str("\nRelationships:\n");
        block.push_str(&rel_lines.join("\n"));
    }

    block
}

/// Format a full schema for LLM consumption.
///
/// Blocks are separated by one blank line, in catalog order.
#[must_use]
pub fn format_for_llm(schema: &SchemaDescription) -> String {
    schema
        .tables
        .iter()
        .map(format_table)
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Narrow formatted schema text to the blocks matching `keep_tables`.
///
/// Blocks are matched case-insensitively on the `Table: <name>` header,
/// preserving original order and deduplicating by header. Returns `None`
/// when nothing matches, so callers can fall back to the full text.
#[must_use]
pub fn filter_schema_text(schema_text: &str, keep_tables: &[String]) -> Option<String> {
    let wanted: Vec<String> = keep_tables
        .iter()
        .map(|t| format!("table: {}", t.to_lowercase()))
        .collect();

    let mut kept = Vec::new();
    let mut seen_headers = Vec::new();

    for block in schema_text.split("\n\n") {
        let lowered = block.to_lowercase();
        let header = lowered.lines().next().unwrap_or("").to_string();
        if wanted.iter().any(|w| lowered.contains(w.as_str())) && !seen_headers.contains(&header) {
            seen_headers.push(header);
            kept.push(block);
        }
    }

    if kept.is_empty() {
        None
    } else {
        Some(kept.join("\n\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnDescription, RelationshipEdge};

    fn orders_table() -> TableDescription {
        let mut id = ColumnDescription::new("id", "INTEGER", false);
        id.is_primary_key = true;
        let mut user_id = ColumnDescription::new("user_id", "INTEGER", false);
        user_id.is_foreign_key = true;
        TableDescription {
            name: "orders".into(),
            columns: vec![
                id,
                user_id,
                ColumnDescription::new("total_amount", "NUMERIC", true),
                ColumnDescription::new("created_at", "TIMESTAMP", true),
            ],
            relationships: vec![RelationshipEdge {
                from_table: "orders".into(),
                from_column: "user_id".into(),
                to_table: "users".into(),
                to_column: "id".into(),
            }],
        }
    }

    #[test]
    fn infers_semantic_types() {
        assert_eq!(infer_semantic_type("contact_email"), Some(SemanticType::Email));
        assert_eq!(infer_semantic_type("website"), Some(SemanticType::Url));
        assert_eq!(infer_semantic_type("mobile_number"), Some(SemanticType::Phone));
        assert_eq!(infer_semantic_type("latitude"), Some(SemanticType::Latitude));
        assert_eq!(infer_semantic_type("lng"), Some(SemanticType::Longitude));
        assert_eq!(infer_semantic_type("unit_price"), Some(SemanticType::Monetary));
        assert_eq!(infer_semantic_type("salary"), Some(SemanticType::Monetary));
        assert_eq!(infer_semantic_type("updated_at"), Some(SemanticType::Timestamp));
        assert_eq!(infer_semantic_type("name"), None);
    }

    #[test]
    fn formats_table_block_with_flags_and_edges() {
        let schema = SchemaDescription {
            tables: vec![orders_table()],
        };
        let text = format_for_llm(&schema);

        assert!(text.starts_with("Table: orders\nColumns:\n"));
        assert!(text.contains("  - id: INTEGER (NOT NULL) [PK]"));
        assert!(text.contains("  - user_id: INTEGER (NOT NULL) [FK]"));
        assert!(text.contains("  - total_amount: NUMERIC (semantic: monetary)"));
        assert!(text.contains("  - created_at: TIMESTAMP (semantic: timestamp)"));
        assert!(text.contains("Relationships:\n  - user_id -> users.id"));
    }

    #[test]
    fn filter_keeps_matching_blocks_in_order() {
        let text = "Table: users\nColumns:\n  - id: INTEGER\n\n\
                    Table: orders\nColumns:\n  - id: INTEGER\n\n\
                    Table: products\nColumns:\n  - id: INTEGER";
        let filtered =
            filter_schema_text(text, &["products".to_string(), "users".to_string()]).unwrap();
        let users_pos = filtered.find("Table: users").unwrap();
        let products_pos = filtered.find("Table: products").unwrap();
        assert!(users_pos < products_pos);
        assert!(!filtered.contains("Table: orders"));
    }

    #[test]
    fn filter_returns_none_when_nothing_matches() {
        let text = "Table: users\nColumns:\n  - id: INTEGER";
        assert!(filter_schema_text(text, &["missing".to_string()]).is_none());
    }
}
