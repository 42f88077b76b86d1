//! Chart recommendation.
//!
//! A deterministic decision procedure over result shape. This is a
//! default-presentation heuristic, not correctness-critical; ties break
//! by column order in the result set.

use serde::{Deserialize, Serialize};

use crate::datasource::{ExecutionResult, Row};

/// Closed set of chart kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartKind {
    Bar,
    Line,
    Donut,
    Area,
    Table,
}

/// Recommended visualization encoding for a result set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChartRecommendation {
    /// Chart kind.
    pub chart_type: ChartKind,
    /// X-axis column (bar/line/area).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x_column: Option<String>,
    /// Y-axis column (bar/line/area).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y_column: Option<String>,
    /// Category column (donut).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category_column: Option<String>,
    /// Value column (donut).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_column: Option<String>,
}

impl ChartRecommendation {
    fn table() -> Self {
        Self {
            chart_type: ChartKind::Table,
            x_column: None,
            y_column: None,
            category_column: None,
            value_column: None,
        }
    }

    fn xy(chart_type: ChartKind, x: &str, y: &str) -> Self {
        Self {
            chart_type,
            x_column: Some(x.to_string()),
            y_column: Some(y.to_string()),
            category_column: None,
            value_column: None,
        }
    }

    fn donut(category: &str, value: &str) -> Self {
        Self {
            chart_type: ChartKind::Donut,
            x_column: None,
            y_column: None,
            category_column: Some(category.to_string()),
            value_column: Some(value.to_string()),
        }
    }
}

/// Column classes used by the decision procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnClass {
    Numeric,
    Date,
    Text,
}

/// Whether a column name denotes a date/time axis.
fn name_suggests_date(name: &str) -> bool {
    let lower = name.to_lowercase();
    lower.contains("date") || lower.contains("time") || lower.ends_with("_at")
}

/// Whether a string value looks like an ISO date (`YYYY-MM-DD...`).
fn value_looks_like_date(value: &str) -> bool {
    let bytes = value.as_bytes();
    bytes.len() >= 10
        && bytes[..4].iter().all(u8::is_ascii_digit)
        && bytes[4] == b'-'
        && bytes[5..7].iter().all(u8::is_ascii_digit)
        && bytes[7] == b'-'
        && bytes[8..10].iter().all(u8::is_ascii_digit)
}

/// Classify one column from a sample of rows; `None` when every sampled
/// value is null.
fn classify(column: &str, sample: &[&Row]) -> Option<ColumnClass> {
    let first = sample
        .iter()
        .filter_map(|row| row.get(column))
        .find(|v| !v.is_null())?;

    if first.is_number() {
        return Some(ColumnClass::Numeric);
    }
    if let Some(text) = first.as_str() {
        if name_suggests_date(column) || value_looks_like_date(text) {
            return Some(ColumnClass::Date);
        }
    }
    Some(ColumnClass::Text)
}

/// Sum a numeric column across all rows, ignoring non-numeric cells.
fn column_sum(rows: &[Row], column: &str) -> f64 {
    rows.iter()
        .filter_map(|row| row.get(column))
        .filter_map(serde_json::Value::as_f64)
        .sum()
}

/// Recommend a chart encoding for an execution result.
///
/// Pure function of its input; never references a column absent from
/// the rows.
#[must_use]
pub fn recommend(result: &ExecutionResult) -> ChartRecommendation {
    if result.rows.is_empty() {
        return ChartRecommendation::table();
    }

    let columns: Vec<String> = result.rows[0].keys().cloned().collect();
    if columns.len() < 2 {
        return ChartRecommendation::table();
    }

    // Classify from the first 10 rows only
    let sample: Vec<&Row> = result.rows.iter().take(10).collect();

    let mut numeric_cols = Vec::new();
    let mut date_cols = Vec::new();
    let mut text_cols = Vec::new();
    for column in &columns {
        match classify(column, &sample) {
            Some(ColumnClass::Numeric) => numeric_cols.push(column.clone()),
            Some(ColumnClass::Date) => date_cols.push(column.clone()),
            Some(ColumnClass::Text) => text_cols.push(column.clone()),
            None => {}
        }
    }

    if columns.len() == 2 {
        if numeric_cols.len() == 1 && text_cols.len() == 1 {
            let num_col = &numeric_cols[0];
            let text_col = &text_cols[0];

            // Proportions: values summing to ~1 or ~100 read as shares
            let total = column_sum(&result.rows, num_col);
            if (0.99..=1.01).contains(&total) || (99.0..=101.0).contains(&total) {
                return ChartRecommendation::donut(text_col, num_col);
            }

            if name_suggests_date(text_col) {
                return ChartRecommendation::xy(ChartKind::Area, text_col, num_col);
            }

            return ChartRecommendation::xy(ChartKind::Bar, text_col, num_col);
        }

        if date_cols.len() == 1 && numeric_cols.len() == 1 {
            return ChartRecommendation::xy(ChartKind::Area, &date_cols[0], &numeric_cols[0]);
        }
    }

    if !numeric_cols.is_empty() && (!text_cols.is_empty() || !date_cols.is_empty()) {
        let x_col = date_cols.first().or_else(|| text_cols.first());
        if let Some(x_col) = x_col {
            let chart_type = if date_cols.is_empty() {
                ChartKind::Bar
            } else {
                ChartKind::Line
            };
            return ChartRecommendation::xy(chart_type, x_col, &numeric_cols[0]);
        }
    }

    ChartRecommendation::table()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(values: &[&[(&str, serde_json::Value)]]) -> ExecutionResult {
        let rows: Vec<Row> = values
            .iter()
            .map(|pairs| {
                let mut row = Row::new();
                for (k, v) in *pairs {
                    row.insert((*k).to_string(), v.clone());
                }
                row
            })
            .collect();
        ExecutionResult::new(rows, 1.0)
    }

    #[test]
    fn empty_result_is_table() {
        let result = ExecutionResult::new(Vec::new(), 0.0);
        assert_eq!(recommend(&result).chart_type, ChartKind::Table);
    }

    #[test]
    fn single_column_is_table() {
        let result = rows(&[&[("count", serde_json::json!(5))]]);
        assert_eq!(recommend(&result).chart_type, ChartKind::Table);
    }

    #[test]
    fn month_revenue_is_bar() {
        let result = rows(&[
            &[("month", serde_json::json!("Jan")), ("revenue", serde_json::json!(100))],
            &[("month", serde_json::json!("Feb")), ("revenue", serde_json::json!(150))],
        ]);
        let rec = recommend(&result);
        assert_eq!(rec.chart_type, ChartKind::Bar);
        assert_eq!(rec.x_column.as_deref(), Some("month"));
        assert_eq!(rec.y_column.as_deref(), Some("revenue"));
    }

    #[test]
    fn shares_summing_to_one_are_donut() {
        let result = rows(&[
            &[("category", serde_json::json!("A")), ("share", serde_json::json!(0.4))],
            &[("category", serde_json::json!("B")), ("share", serde_json::json!(0.6))],
        ]);
        let rec = recommend(&result);
        assert_eq!(rec.chart_type, ChartKind::Donut);
        assert_eq!(rec.category_column.as_deref(), Some("category"));
        assert_eq!(rec.value_column.as_deref(), Some("share"));
    }

    #[test]
    fn percentages_summing_to_hundred_are_donut() {
        let result = rows(&[
            &[("region", serde_json::json!("EU")), ("pct", serde_json::json!(45))],
            &[("region", serde_json::json!("US")), ("pct", serde_json::json!(55))],
        ]);
        assert_eq!(recommend(&result).chart_type, ChartKind::Donut);
    }

    #[test]
    fn date_named_column_is_area() {
        let result = rows(&[
            &[("order_date", serde_json::json!("2024-01-01")), ("total", serde_json::json!(10))],
            &[("order_date", serde_json::json!("2024-01-02")), ("total", serde_json::json!(20))],
        ]);
        let rec = recommend(&result);
        assert_eq!(rec.chart_type, ChartKind::Area);
        assert_eq!(rec.x_column.as_deref(), Some("order_date"));
    }

    #[test]
    fn iso_values_count_as_dates() {
        let result = rows(&[
            &[("period", serde_json::json!("2024-03-01")), ("total", serde_json::json!(10))],
            &[("period", serde_json::json!("2024-04-01")), ("total", serde_json::json!(20))],
        ]);
        assert_eq!(recommend(&result).chart_type, ChartKind::Area);
    }

    #[test]
    fn wide_result_with_date_is_line() {
        let result = rows(&[&[
            ("day", serde_json::json!("2024-01-01")),
            ("visits", serde_json::json!(10)),
            ("region", serde_json::json!("EU")),
        ]]);
        let rec = recommend(&result);
        assert_eq!(rec.chart_type, ChartKind::Line);
        assert_eq!(rec.y_column.as_deref(), Some("visits"));
    }

    #[test]
    fn wide_result_without_date_is_bar() {
        let result = rows(&[&[
            ("name", serde_json::json!("A")),
            ("count", serde_json::json!(3)),
            ("label", serde_json::json!("x")),
        ]]);
        assert_eq!(recommend(&result).chart_type, ChartKind::Bar);
    }

    #[test]
    fn all_numeric_columns_are_table() {
        let result = rows(&[&[
            ("a", serde_json::json!(1)),
            ("b", serde_json::json!(2)),
            ("c", serde_json::json!(3)),
        ]]);
        assert_eq!(recommend(&result).chart_type, ChartKind::Table);
    }

    #[test]
    fn recommendation_never_references_phantom_columns() {
        let result = rows(&[
            &[("month", serde_json::json!("Jan")), ("revenue", serde_json::json!(100))],
        ]);
        let rec = recommend(&result);
        let columns = ["month", "revenue"];
        for name in [rec.x_column, rec.y_column, rec.category_column, rec.value_column]
            .into_iter()
            .flatten()
        {
            assert!(columns.contains(&name.as_str()));
        }
    }
}
