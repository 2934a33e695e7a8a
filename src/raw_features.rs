//! Per-record features that have to exist before bucketing.

use tracing::warn;

use crate::table::{Column, ColumnData, RecordBatch};

pub const BWD_TOTAL_PAYLOAD_BYTES: &str = "bwd_total_payload_bytes";
pub const BWD_PACKETS_COUNT: &str = "bwd_packets_count";
pub const BWD_AVG_SEGMENT_SIZE: &str = "calculated_bwd_avg_segment_size";

/// Adds `calculated_bwd_avg_segment_size = bwd_total_payload_bytes / (bwd_packets_count + 1)`.
/// Leaves the batch untouched when either input is missing.
pub fn derive_raw_features(batch: &mut RecordBatch) {
    let (Some(payload), Some(packets)) = (
        batch.column(BWD_TOTAL_PAYLOAD_BYTES),
        batch.column(BWD_PACKETS_COUNT),
    ) else {
        warn!(
            component = "raw_features",
            event = "raw_features.skipped",
            feature = BWD_AVG_SEGMENT_SIZE,
            reason = "missing_inputs"
        );
        return;
    };

    let values: Vec<Option<f64>> = (0..batch.len())
        .map(|row| Some(payload.numeric_at(row)? / (packets.numeric_at(row)? + 1.0)))
        .collect();

    batch.put_column(Column {
        name: BWD_AVG_SEGMENT_SIZE.to_string(),
        data: ColumnData::Numeric(values),
    });
}

pub fn with_raw_features(batch: &RecordBatch) -> RecordBatch {
    let mut out = batch.clone();
    derive_raw_features(&mut out);
    out
}
