//! Fixed-width time bucketing and per-column reductions.

use std::collections::HashSet;
use std::ops::Range;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::ingest::LABEL_COLUMN;
use crate::table::{ColumnData, FlowColumn, FlowTable};
use crate::time_index::IndexedBatch;

pub const BENIGN_LABEL: &str = "benign";
pub const BENIGN_CLASS: f64 = 1.0;
pub const NON_BENIGN_CLASS: f64 = -1.0;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AggregateError {
    #[error("bucket frequency must be positive, got {0}ms")]
    InvalidFrequency(i64),
    #[error("unknown reduction: {0}")]
    UnknownReduction(String),
}

/// How one column collapses into a bucket value. Every variant is total over an empty
/// bucket and yields [`Reduction::empty_default`] there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reduction {
    Sum,
    Mean,
    /// Records whose value is present and non-zero (non-empty for text).
    Count,
    #[serde(rename = "nunique")]
    NUnique,
    Min,
    Max,
    First,
    Last,
    Median,
    /// Sample standard deviation; a single value yields 0.
    Std,
    /// `1` when every record in the bucket is labeled benign, `-1` otherwise.
    BenignConsensus,
    Safe {
        inner: Box<Reduction>,
        default: f64,
    },
}

impl Reduction {
    pub fn safe(inner: Reduction, default: f64) -> Self {
        Self::Safe {
            inner: Box::new(inner),
            default,
        }
    }

    pub fn empty_default(&self) -> f64 {
        match self {
            Self::Safe { default, .. } => *default,
            Self::BenignConsensus => BENIGN_CLASS,
            _ => 0.0,
        }
    }

    fn reduce(&self, column: &ColumnData, rows: Range<usize>) -> f64 {
        if rows.is_empty() {
            return self.empty_default();
        }

        match self {
            Self::Safe { inner, .. } => inner.reduce(column, rows),
            Self::Count => rows.filter(|&row| is_truthy(column, row)).count() as f64,
            Self::NUnique => distinct_count(column, rows) as f64,
            Self::BenignConsensus => {
                if rows.clone().all(|row| column.text_at(row) == Some(BENIGN_LABEL)) {
                    BENIGN_CLASS
                } else {
                    NON_BENIGN_CLASS
                }
            }
            numeric => {
                let values: Vec<f64> = rows
                    .filter_map(|row| column.numeric_at(row))
                    .filter(|value| value.is_finite())
                    .collect();
                numeric.reduce_values(&values)
            }
        }
    }

    fn reduce_values(&self, values: &[f64]) -> f64 {
        let (Some(&first), Some(&last)) = (values.first(), values.last()) else {
            return 0.0;
        };
        match self {
            Self::Sum => values.iter().sum(),
            Self::Mean => mean(values),
            Self::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
            Self::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Self::First => first,
            Self::Last => last,
            Self::Median => median(values),
            Self::Std => sample_std(values),
            _ => 0.0,
        }
    }
}

impl FromStr for Reduction {
    type Err = AggregateError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_ascii_lowercase().as_str() {
            "sum" => Ok(Self::Sum),
            "mean" => Ok(Self::Mean),
            "count" => Ok(Self::Count),
            "nunique" => Ok(Self::NUnique),
            "min" => Ok(Self::Min),
            "max" => Ok(Self::Max),
            "first" => Ok(Self::First),
            "last" => Ok(Self::Last),
            "median" => Ok(Self::Median),
            "std" => Ok(Self::Std),
            "benign_consensus" => Ok(Self::BenignConsensus),
            other => Err(AggregateError::UnknownReduction(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyEntry {
    pub column: String,
    pub reduction: Reduction,
}

/// Ordered column-to-reduction map. Entry order is the aggregated column order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AggregationPolicy {
    entries: Vec<PolicyEntry>,
}

impl AggregationPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, Reduction)>) -> Self {
        let mut policy = Self::new();
        for (column, reduction) in pairs {
            policy.insert(column, reduction);
        }
        policy
    }

    /// Sets the reduction for `column`, keeping its position when already present.
    pub fn insert(&mut self, column: &str, reduction: Reduction) {
        match self.entries.iter_mut().find(|entry| entry.column == column) {
            Some(entry) => entry.reduction = reduction,
            None => self.entries.push(PolicyEntry {
                column: column.to_string(),
                reduction,
            }),
        }
    }

    pub fn remove(&mut self, column: &str) -> Option<Reduction> {
        let position = self.entries.iter().position(|entry| entry.column == column)?;
        Some(self.entries.remove(position).reduction)
    }

    pub fn get(&self, column: &str) -> Option<&Reduction> {
        self.entries
            .iter()
            .find(|entry| entry.column == column)
            .map(|entry| &entry.reduction)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.get(column).is_some()
    }

    pub fn entries(&self) -> &[PolicyEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregateReport {
    pub buckets: usize,
    pub empty_buckets: usize,
}

/// Resamples `batch` into contiguous `frequency_ms` buckets aligned to the Unix epoch and
/// reduces every policy column per bucket. With `include_labels` a `label` column is
/// derived by [`Reduction::BenignConsensus`]; `policy` itself is left untouched.
pub fn aggregate(
    batch: &IndexedBatch,
    frequency_ms: i64,
    policy: &AggregationPolicy,
    include_labels: bool,
) -> Result<(FlowTable, AggregateReport), AggregateError> {
    if frequency_ms <= 0 {
        return Err(AggregateError::InvalidFrequency(frequency_ms));
    }

    let mut policy = policy.clone();
    if include_labels {
        policy.insert(LABEL_COLUMN, Reduction::BenignConsensus);
    }

    let (starts, ranges) = bucket_ranges(batch.index(), frequency_ms);
    let records = batch.records();
    let absent = ColumnData::Numeric(vec![None; records.len()]);

    let mut columns = Vec::with_capacity(policy.len());
    for entry in policy.entries() {
        let source = match records.column(&entry.column) {
            Some(source) => source,
            None => {
                debug!(
                    component = "aggregate",
                    event = "aggregate.column_missing",
                    column = %entry.column,
                    reduction = ?entry.reduction
                );
                &absent
            }
        };
        columns.push(FlowColumn {
            name: entry.column.clone(),
            values: ranges
                .iter()
                .map(|rows| entry.reduction.reduce(source, rows.clone()))
                .collect(),
        });
    }

    let report = AggregateReport {
        buckets: ranges.len(),
        empty_buckets: ranges.iter().filter(|rows| rows.is_empty()).count(),
    };
    info!(
        component = "aggregate",
        event = "aggregate.finish",
        frequency_ms,
        records = batch.len(),
        buckets = report.buckets,
        empty_buckets = report.empty_buckets,
        columns = columns.len(),
        include_labels
    );

    Ok((FlowTable::from_parts(starts, columns), report))
}

/// Bucket starts from the first to the last occupied bucket, with the row range of each.
fn bucket_ranges(index: &[i64], frequency_ms: i64) -> (Vec<i64>, Vec<Range<usize>>) {
    let (Some(&first_ts), Some(&last_ts)) = (index.first(), index.last()) else {
        return (Vec::new(), Vec::new());
    };
    let first = first_ts.div_euclid(frequency_ms) * frequency_ms;
    let last = last_ts.div_euclid(frequency_ms) * frequency_ms;
    let bucket_count = ((last - first) / frequency_ms) as usize + 1;

    let mut starts = Vec::with_capacity(bucket_count);
    let mut ranges = Vec::with_capacity(bucket_count);
    let mut cursor = 0;
    for bucket in 0..bucket_count {
        let start = first + bucket as i64 * frequency_ms;
        let end = start.saturating_add(frequency_ms);
        let begin = cursor;
        while cursor < index.len() && index[cursor] < end {
            cursor += 1;
        }
        starts.push(start);
        ranges.push(begin..cursor);
    }
    (starts, ranges)
}

fn is_truthy(column: &ColumnData, row: usize) -> bool {
    match column {
        ColumnData::Text(_) => column.text_at(row).is_some_and(|text| !text.is_empty()),
        ColumnData::Numeric(_) => column
            .numeric_at(row)
            .is_some_and(|value| value != 0.0 && !value.is_nan()),
    }
}

fn distinct_count(column: &ColumnData, rows: Range<usize>) -> usize {
    match column {
        ColumnData::Text(_) => rows
            .filter_map(|row| column.text_at(row))
            .collect::<HashSet<_>>()
            .len(),
        ColumnData::Numeric(_) => rows
            .filter_map(|row| column.numeric_at(row))
            .filter(|value| !value.is_nan())
            // +0.0 normalizes -0.0 so both zeros count once.
            .map(|value| (value + 0.0).to_bits())
            .collect::<HashSet<_>>()
            .len(),
    }
}

pub(crate) fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

pub(crate) fn sample_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = mean(values);
    let variance = values
        .iter()
        .map(|v| {
            let d = *v - mean;
            d * d
        })
        .sum::<f64>()
        / (values.len() - 1) as f64;
    variance.sqrt()
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}
