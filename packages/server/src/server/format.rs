//! Response rendering: json, csv, tsv and txt.
//!
//! The record bags are heterogeneous, so delimited output takes the union
//! of keys across all records, unified fields first. Warnings render as
//! leading `# Warning:` comment lines in delimited formats.

use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use elc_composite::{CompositeOutcome, Record};
use serde_json::{json, Value};

/// Column order for the unified fields; everything else follows sorted.
const PRIORITY_COLUMNS: &[&str] = &[
    "occ_id",
    "database",
    "record_type",
    "taxon_id",
    "taxon_name",
    "site_id",
    "col_id",
    "dataset_id",
    "site_name",
    "AgeOlder",
    "AgeYounger",
    "age_older",
    "age_younger",
    "lng",
    "lat",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Json,
    Csv,
    Tsv,
    Txt,
}

impl Format {
    pub fn parse(s: &str) -> Option<Format> {
        match s {
            "json" => Some(Format::Json),
            "csv" => Some(Format::Csv),
            "tsv" => Some(Format::Tsv),
            "txt" => Some(Format::Txt),
            _ => None,
        }
    }

    fn content_type(self) -> &'static str {
        match self {
            Format::Json => "application/json",
            Format::Csv => "text/csv",
            Format::Tsv => "text/tab-separated-values",
            Format::Txt => "text/plain",
        }
    }

    fn delimiter(self) -> char {
        match self {
            Format::Tsv => '\t',
            _ => ',',
        }
    }
}

/// Render one composite outcome as an HTTP response.
pub fn respond(format: Format, outcome: &CompositeOutcome) -> Response {
    let body = match format {
        Format::Json => render_json(outcome),
        _ => render_delimited(format, outcome),
    };
    ([(CONTENT_TYPE, format.content_type())], body).into_response()
}

fn render_json(outcome: &CompositeOutcome) -> String {
    let records: Vec<Value> = outcome
        .records
        .iter()
        .cloned()
        .map(Record::into_value)
        .collect();
    let mut envelope = json!({
        "records": records,
        "record_count": outcome.records.len(),
        "removed": outcome.removed,
        "elapsed_time": outcome.elapsed.as_secs_f64(),
    });
    if !outcome.warnings.is_empty() {
        envelope["warnings"] = json!(outcome.warnings);
    }
    envelope.to_string()
}

fn render_delimited(format: Format, outcome: &CompositeOutcome) -> String {
    let delimiter = format.delimiter();
    let columns = column_order(&outcome.records);
    let mut out = String::new();
    for warning in &outcome.warnings {
        out.push_str("# Warning: ");
        out.push_str(warning);
        out.push('\n');
    }
    out.push_str(
        &columns
            .iter()
            .map(|c| escape_cell(c, delimiter))
            .collect::<Vec<_>>()
            .join(&delimiter.to_string()),
    );
    out.push('\n');
    for record in &outcome.records {
        let row: Vec<String> = columns
            .iter()
            .map(|col| escape_cell(&cell_text(record.get(col)), delimiter))
            .collect();
        out.push_str(&row.join(&delimiter.to_string()));
        out.push('\n');
    }
    out
}

/// Union of keys across all records: unified fields first, the rest sorted.
fn column_order(records: &[Record]) -> Vec<String> {
    let mut columns: Vec<String> = Vec::new();
    for name in PRIORITY_COLUMNS {
        if records.iter().any(|r| r.contains(name)) {
            columns.push(name.to_string());
        }
    }
    let mut rest: Vec<String> = Vec::new();
    for record in records {
        for key in record.keys() {
            if !columns.contains(key) && !rest.contains(key) {
                rest.push(key.clone());
            }
        }
    }
    rest.sort();
    columns.extend(rest);
    columns
}

fn cell_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn escape_cell(text: &str, delimiter: char) -> String {
    if text.contains(delimiter) || text.contains('"') || text.contains('\n') {
        format!("\"{}\"", text.replace('"', "\"\""))
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn outcome() -> CompositeOutcome {
        let mut a = Record::new();
        a.set("occ_id", "pbdb:occ:1001");
        a.set("database", "PaleoBioDB");
        a.set("record_type", "occurrence");
        a.set("taxon_name", "Canis, maybe");
        let mut b = Record::new();
        b.set("occ_id", "neotoma:occ:5501");
        b.set("database", "Neotoma");
        b.set("record_type", "occurrence");
        b.set("site_name", "Lamb Spring");
        CompositeOutcome {
            records: vec![a, b],
            warnings: vec!["Neotoma#2: something odd".to_string()],
            removed: 1,
            elapsed: Duration::from_millis(80),
            timed_out: false,
            urls: vec![],
            all_urls: vec![],
        }
    }

    #[test]
    fn json_envelope_carries_counts_and_warnings() {
        let body = render_json(&outcome());
        let parsed: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed["record_count"], 2);
        assert_eq!(parsed["removed"], 1);
        assert_eq!(parsed["records"][0]["occ_id"], "pbdb:occ:1001");
        assert_eq!(parsed["warnings"][0], "Neotoma#2: something odd");
    }

    #[test]
    fn csv_puts_unified_columns_first_and_quotes_commas() {
        let body = render_delimited(Format::Csv, &outcome());
        let mut lines = body.lines();
        assert_eq!(lines.next(), Some("# Warning: Neotoma#2: something odd"));
        let header = lines.next().unwrap();
        assert!(header.starts_with("occ_id,database,record_type,taxon_name,site_name"));
        let first = lines.next().unwrap();
        assert!(first.contains("\"Canis, maybe\""));
    }

    #[test]
    fn tsv_uses_tabs() {
        let body = render_delimited(Format::Tsv, &outcome());
        let header = body.lines().nth(1).unwrap();
        assert!(header.contains("occ_id\tdatabase"));
    }

    #[test]
    fn missing_cells_render_empty() {
        let body = render_delimited(Format::Csv, &outcome());
        // Second record has no taxon_name.
        let last = body.lines().last().unwrap();
        assert!(last.contains(",,"));
    }
}
