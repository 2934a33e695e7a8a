//! Flow-record aggregation and feature engineering.
//!
//! Implemented scope:
//! - CSV capture loading with label and unit request-rate tagging
//! - timestamp indexing, destination subnet filtering and protocol indicators
//! - fixed-width bucketing with per-column reductions and conservative bucket labels
//! - bucket-level ratio features and trailing wall-clock rolling statistics
//! - schema alignment and time-ordered merging of two prepared captures

mod aggregate;
mod features;
mod ingest;
mod observability;
mod pipeline;
mod raw_features;
mod reconcile;
mod rolling;
mod span;
mod table;
mod time_index;

pub use aggregate::{
    aggregate, AggregateError, AggregateReport, AggregationPolicy, PolicyEntry, Reduction,
    BENIGN_CLASS, BENIGN_LABEL, NON_BENIGN_CLASS,
};
pub use features::{
    apply_rule, engineer_features, engineered_features, Fallback, FeatureRule, Formula,
    CROSS_FEATURES, DROPPED_PORT_COLUMNS, DST_PORT, FRACTION_FEATURES, PORT_RATIO_FEATURES,
    SRC_PORT,
};
pub use ingest::{load_records, read_records, IngestError, LABEL_COLUMN, REQUESTS_RATE_COLUMN};
pub use observability::{
    init_logging, logging_config_from_env, logging_config_from_lookup, LogFormat, LoggingConfig,
    LoggingInitError, LOG_FORMAT_ENV, LOG_LEVEL_ENV, LOG_TARGET_ENV,
};
pub use pipeline::{prepare_dataset, PrepareConfig, PrepareError, PrepareReport};
pub use raw_features::{
    derive_raw_features, with_raw_features, BWD_AVG_SEGMENT_SIZE, BWD_PACKETS_COUNT,
    BWD_TOTAL_PAYLOAD_BYTES,
};
pub use reconcile::{align_columns, combine_datasets};
pub use rolling::{
    engineer_rolling_features, rolling_values, with_rolling_features, RollingRule, RollingStat,
    ROLLING_RULES,
};
pub use span::{parse_span, Span, SpanError};
pub use table::{numeric_form, Column, ColumnData, FlowColumn, FlowTable, RecordBatch, TableError};
pub use time_index::{
    encode_protocol, filter_destination_subnet, index_records, parse_timestamp, IndexError,
    IndexReport, IndexedBatch, DEFAULT_SUBNET_PREFIX, DST_IP_COLUMN, PROTOCOL_COLUMN,
};
