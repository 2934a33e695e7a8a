//! End-to-end preparation of one labeled flow capture.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::aggregate::{aggregate, AggregateError, AggregationPolicy};
use crate::features::engineer_features;
use crate::raw_features::derive_raw_features;
use crate::rolling::engineer_rolling_features;
use crate::span::{parse_span, SpanError};
use crate::table::{FlowTable, RecordBatch};
use crate::time_index::{
    encode_protocol, filter_destination_subnet, index_records, IndexError, DEFAULT_SUBNET_PREFIX,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrepareConfig {
    pub timestamp_column: String,
    /// Bucket width, e.g. `1s`.
    pub frequency: String,
    pub include_labels: bool,
    /// Rolling window width, e.g. `5s`.
    pub window: String,
    pub filter_subnet: bool,
    pub subnet_prefix: String,
}

impl Default for PrepareConfig {
    fn default() -> Self {
        Self {
            timestamp_column: "timestamp".to_string(),
            frequency: "1s".to_string(),
            include_labels: false,
            window: "5s".to_string(),
            filter_subnet: false,
            subnet_prefix: DEFAULT_SUBNET_PREFIX.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrepareReport {
    pub input_records: usize,
    pub unparsable_timestamps: usize,
    pub filtered_out: usize,
    pub indicator_columns: Vec<String>,
    pub buckets: usize,
    pub empty_buckets: usize,
    pub schema_fingerprint: String,
}

#[derive(Debug, Error)]
pub enum PrepareError {
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error("invalid {field}: {source}")]
    InvalidSpan {
        field: &'static str,
        #[source]
        source: SpanError,
    },
    #[error(transparent)]
    Aggregate(#[from] AggregateError),
}

/// Indexes, filters, encodes, aggregates and feature-engineers `batch`.
///
/// Works on private copies of `batch` and `policy`. The only data-dependent failure is a
/// missing timestamp column; missing optional columns degrade per feature.
pub fn prepare_dataset(
    batch: &RecordBatch,
    policy: &AggregationPolicy,
    cfg: &PrepareConfig,
) -> Result<(FlowTable, PrepareReport), PrepareError> {
    let frequency = parse_span(&cfg.frequency).map_err(|source| PrepareError::InvalidSpan {
        field: "frequency",
        source,
    })?;
    let window = parse_span(&cfg.window).map_err(|source| PrepareError::InvalidSpan {
        field: "window",
        source,
    })?;
    let mut policy = policy.clone();

    info!(
        component = "pipeline",
        event = "prepare.start",
        records = batch.len(),
        frequency = %frequency.label,
        window = %window.label,
        include_labels = cfg.include_labels,
        filter_subnet = cfg.filter_subnet
    );

    let (mut indexed, index_report) = index_records(batch, &cfg.timestamp_column)?;

    let before_filter = indexed.len();
    if cfg.filter_subnet {
        indexed = filter_destination_subnet(&indexed, &cfg.subnet_prefix);
    }
    let filtered_out = before_filter - indexed.len();

    let indicator_columns = encode_protocol(&mut indexed, &mut policy);
    derive_raw_features(indexed.records_mut());

    let (mut table, aggregate_report) =
        aggregate(&indexed, frequency.millis, &policy, cfg.include_labels)?;

    engineer_features(&mut table);
    engineer_rolling_features(&mut table, &window);

    let report = PrepareReport {
        input_records: index_report.input_records,
        unparsable_timestamps: index_report.unparsable_timestamps,
        filtered_out,
        indicator_columns,
        buckets: aggregate_report.buckets,
        empty_buckets: aggregate_report.empty_buckets,
        schema_fingerprint: table.schema_fingerprint(),
    };

    info!(
        component = "pipeline",
        event = "prepare.finish",
        input_records = report.input_records,
        unparsable_timestamps = report.unparsable_timestamps,
        filtered_out = report.filtered_out,
        buckets = report.buckets,
        empty_buckets = report.empty_buckets,
        columns = table.columns().len(),
        schema_fingerprint = %report.schema_fingerprint
    );

    Ok((table, report))
}
