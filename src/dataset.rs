//! Loads bulk-test datasets from `.json` or `.csv` files.

use std::fs;
use std::path::Path;

use serde_json::Value;
use tracing::info;

use crate::error::{HarnessError, Result};
use crate::types::TestCase;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DatasetFormat {
    /// A JSON array of field mappings.
    Json,
    /// Header row plus comma-separated rows. No quoting or escaping.
    Csv,
}

impl DatasetFormat {
    pub fn from_path(path: &Path) -> Result<Self> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);

        match extension.as_deref() {
            Some("json") => Ok(Self::Json),
            Some("csv") => Ok(Self::Csv),
            _ => Err(HarnessError::Usage(format!(
                "unsupported dataset file {}: expected .json or .csv",
                path.display()
            ))),
        }
    }
}

pub fn load_file(path: &Path) -> Result<Vec<TestCase>> {
    let format = DatasetFormat::from_path(path)?;
    let contents = fs::read_to_string(path)?;
    let cases = load(&contents, format)?;
    info!(path = %path.display(), ?format, records = cases.len(), "dataset loaded");
    Ok(cases)
}

/// Parses the whole input or fails; no partial dataset is returned.
pub fn load(contents: &str, format: DatasetFormat) -> Result<Vec<TestCase>> {
    match format {
        DatasetFormat::Json => load_json(contents),
        DatasetFormat::Csv => load_csv(contents),
    }
}

fn load_json(contents: &str) -> Result<Vec<TestCase>> {
    serde_json::from_str(contents).map_err(|e| HarnessError::Parse(format!("invalid JSON dataset: {e}")))
}

// Values are matched to headers by position. A short row omits its trailing
// fields; extra values are ignored.
fn load_csv(contents: &str) -> Result<Vec<TestCase>> {
    let mut lines = contents.lines();
    let header = lines
        .next()
        .filter(|line| !line.trim().is_empty())
        .ok_or_else(|| HarnessError::Parse("CSV dataset has no header row".into()))?;

    let fields: Vec<&str> = header.split(',').map(str::trim).collect();
    if let Some(position) = fields.iter().position(|field| field.is_empty()) {
        return Err(HarnessError::Parse(format!("CSV header column {} is empty", position + 1)));
    }

    Ok(lines
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            fields
                .iter()
                .zip(line.split(','))
                .map(|(field, value)| (field.to_string(), Value::String(value.trim().to_string())))
                .collect::<TestCase>()
        })
        .collect())
}
