//! Timestamp parsing, time ordering, subnet filtering and protocol indicator encoding.

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use thiserror::Error;
use tracing::{debug, warn};

use crate::aggregate::{AggregationPolicy, Reduction};
use crate::table::{Column, ColumnData, RecordBatch};

pub const DST_IP_COLUMN: &str = "dst_ip";
pub const PROTOCOL_COLUMN: &str = "protocol";
pub const DEFAULT_SUBNET_PREFIX: &str = "192.168";

const NAIVE_FORMATS: [&str; 14] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%Y/%m/%d %H:%M:%S%.f",
    "%Y/%m/%d %H:%M",
    "%m/%d/%Y %I:%M:%S%.f %p",
    "%m/%d/%Y %I:%M %p",
    "%m/%d/%Y %H:%M:%S%.f",
    "%m/%d/%Y %H:%M",
    "%d/%m/%Y %I:%M:%S%.f %p",
    "%d/%m/%Y %I:%M %p",
    "%d/%m/%Y %H:%M:%S%.f",
    "%d/%m/%Y %H:%M",
];

const OFFSET_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%d %H:%M:%S%.f%z"];

const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IndexError {
    #[error("timestamp column '{0}' is missing from the record batch")]
    MissingTimestampColumn(String),
}

/// Records in ascending time order, paired with their parsed UTC epoch millis.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexedBatch {
    index: Vec<i64>,
    records: RecordBatch,
}

impl IndexedBatch {
    pub fn index(&self) -> &[i64] {
        &self.index
    }

    pub fn records(&self) -> &RecordBatch {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub(crate) fn records_mut(&mut self) -> &mut RecordBatch {
        &mut self.records
    }

    fn retain_rows(&self, rows: &[usize]) -> Self {
        Self {
            index: rows.iter().map(|&row| self.index[row]).collect(),
            records: self.records.take_rows(rows),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexReport {
    pub input_records: usize,
    pub unparsable_timestamps: usize,
}

/// Tolerant timestamp parser. Naive values are read as UTC; month-first wins over
/// day-first when both readings are valid. Returns `None` for anything unparsable.
pub fn parse_timestamp(raw: &str) -> Option<i64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Some(millis) = parse_compact_date(trimmed) {
        return Some(millis);
    }
    if let Ok(epoch) = trimmed.parse::<i64>() {
        return in_calendar_range(normalize_to_millis(epoch));
    }
    if let Ok(epoch) = trimmed.parse::<f64>() {
        return epoch_to_millis(epoch);
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.timestamp_millis());
    }

    for format in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(trimmed, format) {
            return Some(dt.timestamp_millis());
        }
    }

    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(naive.and_utc().timestamp_millis());
        }
    }

    DATE_FORMATS.iter().find_map(|format| {
        NaiveDate::parse_from_str(trimmed, format)
            .ok()
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .map(|naive| naive.and_utc().timestamp_millis())
    })
}

// Eight digits read as `YYYYMMDD` rather than epoch seconds in 1970.
fn parse_compact_date(raw: &str) -> Option<i64> {
    if raw.len() != 8 || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    NaiveDate::parse_from_str(raw, "%Y%m%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc().timestamp_millis())
}

// Millis chrono cannot represent are unparsable, which also keeps bucket arithmetic in range.
fn in_calendar_range(millis: i64) -> Option<i64> {
    DateTime::from_timestamp_millis(millis).map(|_| millis)
}

// Epoch magnitudes are normalized to millis: seconds, millis, micros or nanos.
fn normalize_to_millis(ts: i64) -> i64 {
    let abs = ts.unsigned_abs();
    if abs >= 100_000_000_000_000_000 {
        ts.div_euclid(1_000_000)
    } else if abs >= 100_000_000_000_000 {
        ts.div_euclid(1_000)
    } else if abs >= 100_000_000_000 {
        ts
    } else {
        ts.saturating_mul(1_000)
    }
}

// Numeric timestamp cells follow the text rules: eight-digit integers are compact dates.
fn numeric_timestamp(value: f64) -> Option<i64> {
    if value.fract() == 0.0 && (10_000_000.0..100_000_000.0).contains(&value) {
        if let Some(millis) = parse_compact_date(&format!("{}", value as i64)) {
            return Some(millis);
        }
    }
    epoch_to_millis(value)
}

fn epoch_to_millis(epoch: f64) -> Option<i64> {
    if !epoch.is_finite() {
        return None;
    }
    let abs = epoch.abs();
    let millis = if abs >= 1e17 {
        epoch / 1e6
    } else if abs >= 1e14 {
        epoch / 1e3
    } else if abs >= 1e11 {
        epoch
    } else {
        epoch * 1e3
    };
    let millis = millis.round();
    if millis < i64::MIN as f64 || millis >= i64::MAX as f64 {
        return None;
    }
    in_calendar_range(millis as i64)
}

/// Parses `timestamp_column`, drops rows that fail to parse, and stable-sorts the rest by time.
pub fn index_records(
    batch: &RecordBatch,
    timestamp_column: &str,
) -> Result<(IndexedBatch, IndexReport), IndexError> {
    let column = batch
        .column(timestamp_column)
        .ok_or_else(|| IndexError::MissingTimestampColumn(timestamp_column.to_string()))?;

    let parsed: Vec<Option<i64>> = (0..batch.len())
        .map(|row| match column {
            ColumnData::Text(_) => column.text_at(row).and_then(parse_timestamp),
            ColumnData::Numeric(_) => column.numeric_at(row).and_then(numeric_timestamp),
        })
        .collect();

    let mut rows: Vec<usize> = (0..batch.len()).filter(|&row| parsed[row].is_some()).collect();
    rows.sort_by_key(|&row| parsed[row]);

    let report = IndexReport {
        input_records: batch.len(),
        unparsable_timestamps: batch.len() - rows.len(),
    };
    if report.unparsable_timestamps > 0 {
        warn!(
            component = "time_index",
            event = "index.timestamps_dropped",
            timestamp_column,
            dropped = report.unparsable_timestamps,
            input_records = report.input_records
        );
    }

    let indexed = IndexedBatch {
        index: rows.iter().filter_map(|&row| parsed[row]).collect(),
        records: batch.take_rows(&rows),
    };
    Ok((indexed, report))
}

/// Keeps rows whose `dst_ip` text starts with `prefix`. Rows without an address never match.
/// A batch lacking the `dst_ip` column is returned unchanged.
pub fn filter_destination_subnet(batch: &IndexedBatch, prefix: &str) -> IndexedBatch {
    let Some(column) = batch.records.column(DST_IP_COLUMN) else {
        debug!(
            component = "time_index",
            event = "index.subnet_filter.skipped",
            reason = "missing_dst_ip"
        );
        return batch.clone();
    };

    let rows: Vec<usize> = (0..batch.len())
        .filter(|&row| {
            column
                .text_at(row)
                .is_some_and(|addr| addr.starts_with(prefix))
        })
        .collect();

    debug!(
        component = "time_index",
        event = "index.subnet_filter.applied",
        prefix,
        kept = rows.len(),
        removed = batch.len() - rows.len()
    );
    batch.retain_rows(&rows)
}

/// Replaces the `protocol` column with `protocol_<value>` indicators, dropping the smallest
/// category as the reference. New indicators are registered in `policy` with `count`.
pub fn encode_protocol(batch: &mut IndexedBatch, policy: &mut AggregationPolicy) -> Vec<String> {
    let Some(column) = batch.records.remove_column(PROTOCOL_COLUMN) else {
        return Vec::new();
    };

    let keys: Vec<Option<String>> = (0..batch.len())
        .map(|row| category_key(&column, row))
        .collect();
    let categories = sorted_categories(&column, &keys);

    let mut created = Vec::new();
    for category in categories.iter().skip(1) {
        let name = format!("{PROTOCOL_COLUMN}_{category}");
        let values = keys
            .iter()
            .map(|key| if key.as_deref() == Some(category.as_str()) { 1.0 } else { 0.0 });
        batch.records.put_column(Column::numeric(&name, values));
        if !policy.contains(&name) {
            policy.insert(&name, Reduction::Count);
        }
        created.push(name);
    }

    debug!(
        component = "time_index",
        event = "index.protocol_encoded",
        categories = categories.len(),
        reference = categories.first().map(String::as_str).unwrap_or(""),
        indicators = ?created
    );
    created
}

fn category_key(column: &ColumnData, row: usize) -> Option<String> {
    match column {
        ColumnData::Text(_) => column.text_at(row).map(str::to_string),
        ColumnData::Numeric(_) => column
            .numeric_at(row)
            .filter(|value| value.is_finite())
            .map(format_numeric_category),
    }
}

fn format_numeric_category(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

// Numeric categories sort by value, text categories lexicographically. Non-finite
// values are missing and get no indicator.
fn sorted_categories(column: &ColumnData, keys: &[Option<String>]) -> Vec<String> {
    match column {
        ColumnData::Text(_) => keys
            .iter()
            .flatten()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect(),
        ColumnData::Numeric(values) => {
            let mut numbers: Vec<f64> = values
                .iter()
                .flatten()
                .copied()
                .filter(|value| value.is_finite())
                .collect();
            numbers.sort_by(f64::total_cmp);
            numbers.dedup();
            numbers.into_iter().map(format_numeric_category).collect()
        }
    }
}
