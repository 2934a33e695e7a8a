//! Thin CSV loader for raw flow captures.

use std::fs;
use std::io::Read;
use std::path::Path;

use csv::StringRecord;
use thiserror::Error;
use tracing::info;

use crate::table::{Column, ColumnData, RecordBatch, TableError};

pub const LABEL_COLUMN: &str = "label";
pub const REQUESTS_RATE_COLUMN: &str = "requests_rate";

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("record {line} has {found} fields, header has {expected}")]
    RaggedRecord {
        line: u64,
        found: usize,
        expected: usize,
    },
    #[error(transparent)]
    Table(#[from] TableError),
}

/// Reads a headered flow CSV and tags every row with `label` and a unit `requests_rate`.
pub fn load_records(path: &Path, label: &str) -> Result<RecordBatch, IngestError> {
    let file = fs::File::open(path)?;
    let batch = read_records(file, label)?;
    info!(
        component = "ingest",
        event = "ingest.load.finish",
        path = %path.display(),
        label,
        records = batch.len(),
        columns = batch.columns().len()
    );
    Ok(batch)
}

pub fn read_records<R: Read>(reader: R, label: &str) -> Result<RecordBatch, IngestError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = reader.headers()?.clone();
    let mut cells: Vec<Vec<Option<String>>> = vec![Vec::new(); headers.len()];

    for record in reader.records() {
        let record = record?;
        push_record(&record, &headers, &mut cells)?;
    }

    let rows = cells.first().map(Vec::len).unwrap_or(0);
    let mut batch = RecordBatch::new();
    for (name, values) in headers.iter().zip(cells) {
        batch.set_column(Column {
            name: name.to_string(),
            data: infer_column(values),
        })?;
    }
    batch.set_column(Column::text(LABEL_COLUMN, std::iter::repeat(label).take(rows)))?;
    batch.set_column(Column::numeric(
        REQUESTS_RATE_COLUMN,
        std::iter::repeat(1.0).take(rows),
    ))?;

    Ok(batch)
}

fn push_record(
    record: &StringRecord,
    headers: &StringRecord,
    cells: &mut [Vec<Option<String>>],
) -> Result<(), IngestError> {
    if record.len() != headers.len() {
        return Err(IngestError::RaggedRecord {
            line: record.position().map(|p| p.line()).unwrap_or_default(),
            found: record.len(),
            expected: headers.len(),
        });
    }
    for (column, raw) in cells.iter_mut().zip(record.iter()) {
        column.push((!raw.is_empty()).then(|| raw.to_string()));
    }
    Ok(())
}

// Numeric when every present cell parses as f64. `NaN` and infinities read as missing.
fn infer_column(values: Vec<Option<String>>) -> ColumnData {
    let numeric: Option<Vec<Option<f64>>> = values
        .iter()
        .map(|cell| match cell {
            Some(raw) => raw
                .parse::<f64>()
                .ok()
                .map(|value| value.is_finite().then_some(value)),
            None => Some(None),
        })
        .collect();

    match numeric {
        Some(parsed) if values.iter().any(Option::is_some) => ColumnData::Numeric(parsed),
        _ => ColumnData::Text(values),
    }
}
