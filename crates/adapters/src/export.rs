use std::fs;
use std::path::Path;

use thiserror::Error;

use quarry_core::results::{export_csv, export_json, Row};

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("failed to write export file at {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Writes the rows as CSV. Zero rows writes nothing and reports 0.
pub fn write_rows_to_csv(path: &Path, rows: &[Row]) -> Result<usize, ExportError> {
    let Some(content) = export_csv(rows) else {
        return Ok(0);
    };
    fs::write(path, content).map_err(|source| ExportError::Write {
        path: path.display().to_string(),
        source,
    })?;
    Ok(rows.len())
}

/// Writes the rows as a pretty-printed JSON array. Zero rows writes nothing
/// and reports 0.
pub fn write_rows_to_json(path: &Path, rows: &[Row]) -> Result<usize, ExportError> {
    let Some(content) = export_json(rows) else {
        return Ok(0);
    };
    fs::write(path, content).map_err(|source| ExportError::Write {
        path: path.display().to_string(),
        source,
    })?;
    Ok(rows.len())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use serde_json::{json, Value};
    use tempfile::TempDir;

    use quarry_core::results::Row;

    use super::{write_rows_to_csv, write_rows_to_json};

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs
            .iter()
            .map(|(key, value)| ((*key).to_string(), value.clone()))
            .collect()
    }

    #[test]
    fn writes_quoted_csv_rows() {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let path = temp_dir.path().join("result.csv");
        let rows = vec![
            row(&[("id", json!(1)), ("note", json!("alpha"))]),
            row(&[("id", json!(2)), ("note", json!("say \"hi\""))]),
        ];

        let written = write_rows_to_csv(&path, &rows).expect("csv export failed");
        assert_eq!(written, 2);
        let output = fs::read_to_string(path).expect("failed to read csv output");
        assert!(output.starts_with("\"id\",\"note\"\n"));
        assert!(output.contains("\"2\",\"say \"\"hi\"\"\""));
    }

    #[test]
    fn writes_json_rows_that_parse_back() {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let path = temp_dir.path().join("result.json");
        let rows = vec![row(&[("id", json!(10)), ("value", json!("ok"))])];

        let written = write_rows_to_json(&path, &rows).expect("json export failed");
        assert_eq!(written, 1);
        let output = fs::read_to_string(path).expect("failed to read json output");
        let parsed: Vec<Row> = serde_json::from_str(&output).expect("invalid json");
        assert_eq!(parsed, rows);
    }

    #[test]
    fn zero_rows_write_nothing() {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let csv_path = temp_dir.path().join("empty.csv");
        let json_path = temp_dir.path().join("empty.json");

        assert_eq!(write_rows_to_csv(&csv_path, &[]).expect("csv"), 0);
        assert_eq!(write_rows_to_json(&json_path, &[]).expect("json"), 0);
        assert!(!csv_path.exists());
        assert!(!json_path.exists());
    }
}
