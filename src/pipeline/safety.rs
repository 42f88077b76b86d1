//! Read-only safety gate.
//!
//! Pure validation over candidate query text; nothing here touches a
//! backend. Violations are logged as security events under the
//! `security` target, distinct from ordinary execution errors.

use crate::datasource::DataSourceKind;
use crate::error::QueryError;

/// Statement keywords that are never allowed, regardless of position.
const DENYLIST: &[&str] = &[
    "DROP", "DELETE", "UPDATE", "INSERT", "TRUNCATE", "ALTER", "GRANT", "REVOKE", "CREATE",
];

/// Top-level keys permitted in a document-store query payload.
const PAYLOAD_ALLOWLIST: &[&str] = &["collection", "filter", "projection", "sort", "limit"];

/// Validate a candidate query for the given backend kind.
///
/// When `enforce_read_only` is false the gate is a no-op; the flag is
/// owned by external configuration.
pub fn validate(
    query: &str,
    kind: DataSourceKind,
    enforce_read_only: bool,
) -> Result<(), QueryError> {
    if !enforce_read_only {
        return Ok(());
    }

    let outcome = if kind.is_sql_dialect() {
        validate_sql_text(query)
    } else {
        validate_document_payload(query)
    };

    if let Err(ref e) = outcome {
        tracing::warn!(
            target: "security",
            dialect = kind.dialect_name(),
            error = %e,
            "Read-only policy rejected a candidate query"
        );
    }

    outcome
}

/// Validate free-text SQL: exactly one statement, read-only, no
/// denylisted keywords anywhere (belt-and-suspenders against parser
/// edge cases).
pub fn validate_sql_text(query: &str) -> Result<(), QueryError> {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        return Err(QueryError::SafetyViolation("query is empty".to_string()));
    }

    if statement_count(trimmed) > 1 {
        return Err(QueryError::SafetyViolation(
            "multiple statements are not allowed".to_string(),
        ));
    }

    let upper = trimmed.to_uppercase();
    if !(upper.starts_with("SELECT") || upper.starts_with("WITH")) {
        return Err(QueryError::SafetyViolation(
            "only SELECT statements are allowed".to_string(),
        ));
    }

    for word in words_of(&upper) {
        if DENYLIST.contains(&word) {
            return Err(QueryError::SafetyViolation(format!(
                "forbidden keyword: {word}"
            )));
        }
    }

    Ok(())
}

/// Validate a structured document-store payload.
///
/// There is no free-form statement to parse; safety comes from the
/// fixed payload shape: a named collection, an optional
/// filter/projection/sort, and a row limit. Any other top-level
/// operator is rejected.
pub fn validate_document_payload(query: &str) -> Result<(), QueryError> {
    let value: serde_json::Value = serde_json::from_str(query)
        .map_err(|e| QueryError::SafetyViolation(format!("payload is not valid JSON: {e}")))?;

    let object = value.as_object().ok_or_else(|| {
        QueryError::SafetyViolation("payload must be a JSON object".to_string())
    })?;

    match object.get("collection") {
        Some(serde_json::Value::String(name)) if !name.is_empty() => {}
        _ => {
            return Err(QueryError::SafetyViolation(
                "payload must name a target collection".to_string(),
            ));
        }
    }

    for key in object.keys() {
        if !PAYLOAD_ALLOWLIST.contains(&key.as_str()) {
            return Err(QueryError::SafetyViolation(format!(
                "operator not allowed: {key}"
            )));
        }
    }

    Ok(())
}

/// Count statements, ignoring semicolons inside string literals and a
/// single trailing terminator.
fn statement_count(sql: &str) -> usize {
    let mut count = 1;
    let mut in_single = false;
    let mut in_double = false;

    for (i, c) in sql.char_indices() {
        match c {
            '\'' if !in_double => in_single = !in_single,
            '"' if !in_single => in_double = !in_double,
            ';' if !in_single && !in_double => {
                if !sql[i + 1..].trim().is_empty() {
                    count += 1;
                }
            }
            _ => {}
        }
    }

    count
}

/// Iterate alphanumeric words of an uppercased statement.
fn words_of(upper: &str) -> impl Iterator<Item = &str> {
    upper.split(|c: char| !c.is_ascii_alphanumeric() && c != '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_select() {
        assert!(validate_sql_text("SELECT * FROM users").is_ok());
        assert!(validate_sql_text("  select id from t;  ").is_ok());
        assert!(validate_sql_text("WITH t AS (SELECT 1) SELECT * FROM t").is_ok());
    }

    #[test]
    fn rejects_write_statements() {
        assert!(validate_sql_text("DELETE FROM users").is_err());
        assert!(validate_sql_text("INSERT INTO t VALUES (1)").is_err());
        assert!(validate_sql_text("DROP TABLE users").is_err());
    }

    #[test]
    fn rejects_embedded_denylist_keywords() {
        let err = validate_sql_text("SELECT 1; DROP TABLE users").unwrap_err();
        assert!(matches!(err, QueryError::SafetyViolation(_)));
        assert!(validate_sql_text("SELECT pg_sleep(1) UNION SELECT 2; TRUNCATE t").is_err());
    }

    #[test]
    fn keyword_match_is_word_bounded() {
        // "created_at" contains no standalone CREATE token
        assert!(validate_sql_text("SELECT created_at, update_count FROM events").is_ok());
    }

    #[test]
    fn semicolons_inside_literals_are_not_separators() {
        assert!(validate_sql_text("SELECT ';' AS sep FROM t").is_ok());
    }

    #[test]
    fn multiple_statements_rejected() {
        assert!(validate_sql_text("SELECT 1; SELECT 2").is_err());
    }

    #[test]
    fn document_payload_requires_collection() {
        assert!(validate_document_payload(r#"{"collection": "users", "filter": {}}"#).is_ok());
        assert!(validate_document_payload(r#"{"filter": {}}"#).is_err());
        assert!(validate_document_payload(r#"{"collection": ""}"#).is_err());
        assert!(validate_document_payload("not json").is_err());
    }

    #[test]
    fn document_payload_rejects_unknown_operators() {
        let err = validate_document_payload(
            r#"{"collection": "users", "update": {"$set": {"a": 1}}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, QueryError::SafetyViolation(_)));
    }

    #[test]
    fn disabled_flag_skips_enforcement() {
        assert!(validate("DROP TABLE users", DataSourceKind::Postgres, false).is_ok());
        assert!(validate("DROP TABLE users", DataSourceKind::Postgres, true).is_err());
    }

    #[test]
    fn dispatches_by_dialect() {
        assert!(validate(r#"{"collection": "c"}"#, DataSourceKind::MongoDb, true).is_ok());
        assert!(validate("SELECT 1", DataSourceKind::Snowflake, true).is_ok());
    }
}
