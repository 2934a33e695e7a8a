use std::io::Write;

use flowprep::{
    load_records, prepare_dataset, AggregationPolicy, Column, FlowTable, IndexError,
    PrepareConfig, PrepareError, RecordBatch, Reduction, BWD_AVG_SEGMENT_SIZE,
};
use tempfile::NamedTempFile;

const START_MS: i64 = 1_704_067_200_000; // 2024-01-01T00:00:00Z

fn ts(offsets: &[&str]) -> Column {
    Column::text(
        "timestamp",
        offsets.iter().map(|offset| format!("2024-01-01 00:00:{offset}")),
    )
}

fn unit_rates(rows: usize) -> Column {
    Column::numeric("requests_rate", std::iter::repeat(1.0).take(rows))
}

fn batch(columns: Vec<Column>) -> RecordBatch {
    RecordBatch::from_columns(columns).expect("test columns share a length")
}

fn prepare(
    batch: &RecordBatch,
    policy: &AggregationPolicy,
    cfg: &PrepareConfig,
) -> (FlowTable, flowprep::PrepareReport) {
    prepare_dataset(batch, policy, cfg).expect("prepare should succeed")
}

#[test]
fn sub_second_records_collapse_into_one_bucket_with_pre_aggregation_segment_size() {
    let batch = batch(vec![
        ts(&["00.2", "00.8"]),
        Column::numeric("bwd_total_payload_bytes", [300.0, 90.0]),
        Column::numeric("bwd_packets_count", [2.0, 2.0]),
        Column::numeric("packets_count", [5.0, 3.0]),
        unit_rates(2),
    ]);
    let policy = AggregationPolicy::from_pairs([
        ("bwd_total_payload_bytes", Reduction::Sum),
        ("bwd_packets_count", Reduction::Sum),
        ("packets_count", Reduction::Sum),
        (BWD_AVG_SEGMENT_SIZE, Reduction::Mean),
        ("requests_rate", Reduction::Sum),
    ]);

    let (table, report) = prepare(&batch, &policy, &PrepareConfig::default());

    assert_eq!(table.index(), &[START_MS]);
    assert_eq!(report.buckets, 1);
    assert_eq!(report.empty_buckets, 0);
    assert_eq!(table.column("bwd_total_payload_bytes").unwrap(), &[390.0]);
    assert_eq!(table.column("bwd_packets_count").unwrap(), &[4.0]);
    assert_eq!(table.column("packets_count").unwrap(), &[8.0]);
    assert_eq!(table.column("requests_rate").unwrap(), &[2.0]);
    // Mean of 300/3 and 90/3, not 390/(4+1).
    assert_eq!(table.column(BWD_AVG_SEGMENT_SIZE).unwrap(), &[65.0]);
    assert_eq!(table.column("rolling_packets_mean_5s").unwrap(), &[8.0]);
}

#[test]
fn subnet_filter_controls_outside_destinations() {
    let batch = batch(vec![
        ts(&["00", "00.5"]),
        Column::text("dst_ip", ["192.168.1.10", "10.0.0.7"]),
        unit_rates(2),
    ]);
    let policy = AggregationPolicy::from_pairs([("requests_rate", Reduction::Sum)]);

    let filtered_cfg = PrepareConfig {
        filter_subnet: true,
        ..PrepareConfig::default()
    };
    let (filtered, filtered_report) = prepare(&batch, &policy, &filtered_cfg);
    assert_eq!(filtered.column("requests_rate").unwrap(), &[1.0]);
    assert_eq!(filtered_report.filtered_out, 1);

    let (unfiltered, unfiltered_report) = prepare(&batch, &policy, &PrepareConfig::default());
    assert_eq!(unfiltered.column("requests_rate").unwrap(), &[2.0]);
    assert_eq!(unfiltered_report.filtered_out, 0);
}

#[test]
fn protocol_indicator_counts_non_reference_rows_per_bucket() {
    let batch = batch(vec![
        ts(&["00.1", "00.4", "00.9", "01.2", "01.5"]),
        Column::text("protocol", ["TCP", "UDP", "TCP", "UDP", "UDP"]),
        unit_rates(5),
    ]);
    let policy = AggregationPolicy::from_pairs([("requests_rate", Reduction::Sum)]);

    let (table, report) = prepare(&batch, &policy, &PrepareConfig::default());

    assert_eq!(report.indicator_columns, vec!["protocol_UDP".to_string()]);
    assert_eq!(table.column("protocol_UDP").unwrap(), &[1.0, 2.0]);
    assert!(!table.has_column("protocol_TCP"));
    assert!(!table.has_column("protocol"));
    assert!(!policy.contains("protocol_UDP"));
}

#[test]
fn empty_buckets_are_kept_with_reduction_defaults() {
    let batch = batch(vec![
        ts(&["00.1", "03.9"]),
        Column::numeric("packets_count", [4.0, 6.0]),
        Column::numeric("bytes_rate", [2.0, 3.0]),
        unit_rates(2),
    ]);
    let policy = AggregationPolicy::from_pairs([
        ("packets_count", Reduction::Max),
        ("requests_rate", Reduction::Sum),
        ("bytes_rate", Reduction::safe(Reduction::Max, -1.0)),
    ]);

    let (table, report) = prepare(&batch, &policy, &PrepareConfig::default());

    assert_eq!(
        table.index(),
        &[START_MS, START_MS + 1_000, START_MS + 2_000, START_MS + 3_000]
    );
    assert_eq!(report.empty_buckets, 2);
    assert_eq!(table.column("packets_count").unwrap(), &[4.0, 0.0, 0.0, 6.0]);
    assert_eq!(table.column("requests_rate").unwrap(), &[1.0, 0.0, 0.0, 1.0]);
    assert_eq!(table.column("bytes_rate").unwrap(), &[2.0, -1.0, -1.0, 3.0]);

    let wide_cfg = PrepareConfig {
        frequency: "2s".to_string(),
        ..PrepareConfig::default()
    };
    let (wide, _) = prepare(&batch, &policy, &wide_cfg);
    assert_eq!(wide.index(), &[START_MS, START_MS + 2_000]);
    assert_eq!(wide.column("requests_rate").unwrap(), &[1.0, 1.0]);
}

#[test]
fn bucket_labels_are_conservative() {
    let batch = batch(vec![
        ts(&["00.1", "00.5", "01.2", "01.7", "03.0"]),
        Column::text(
            "label",
            ["benign", "portscan", "benign", "benign", "portscan"],
        ),
        unit_rates(5),
    ]);
    let policy = AggregationPolicy::from_pairs([("requests_rate", Reduction::Sum)]);
    let cfg = PrepareConfig {
        include_labels: true,
        ..PrepareConfig::default()
    };

    let (table, _) = prepare(&batch, &policy, &cfg);

    assert_eq!(table.column("label").unwrap(), &[-1.0, 1.0, 1.0, -1.0]);
    assert!(!policy.contains("label"));

    let (unlabeled, _) = prepare(&batch, &policy, &PrepareConfig::default());
    assert!(!unlabeled.has_column("label"));
}

#[test]
fn missing_optional_inputs_yield_zero_fractions_and_no_port_ratios() {
    let batch = batch(vec![ts(&["00", "01"]), unit_rates(2)]);
    let policy = AggregationPolicy::from_pairs([("requests_rate", Reduction::Sum)]);

    let (table, _) = prepare(&batch, &policy, &PrepareConfig::default());

    for name in [
        "fwd_packet_fraction",
        "frac_syn",
        "frac_rst",
        "header_to_payload_ratio",
        "rolling_syn_5s",
        "rolling_packets_mean_5s",
        "rolling_bytes_rate_std_5s",
    ] {
        assert_eq!(table.column(name).unwrap(), &[0.0, 0.0], "column {name}");
    }
    assert!(!table.has_column("unique_src_port_ratio"));
    assert!(!table.has_column("requests_rate_src_port"));
}

#[test]
fn missing_timestamp_column_is_a_hard_failure() {
    let batch = batch(vec![unit_rates(3)]);

    let err = prepare_dataset(&batch, &AggregationPolicy::new(), &PrepareConfig::default())
        .expect_err("timestamp column is required");

    assert!(matches!(
        err,
        PrepareError::Index(IndexError::MissingTimestampColumn(ref column)) if column == "timestamp"
    ));
}

#[test]
fn reruns_are_bit_identical() {
    let batch = batch(vec![
        ts(&["00.3", "00.1", "02.2", "05.9", "06.1"]),
        Column::numeric("packets_count", [3.0, 7.0, 1.0, 9.0, 2.0]),
        Column::numeric("bytes_rate", [1.5, 2.25, 0.1, 7.0, 3.3]),
        Column::numeric("syn_flag_counts", [1.0, 0.0, 2.0, 1.0, 1.0]),
        Column::numeric("protocol", [6.0, 17.0, 6.0, 1.0, 17.0]),
        unit_rates(5),
    ]);
    let policy = AggregationPolicy::from_pairs([
        ("packets_count", Reduction::Sum),
        ("bytes_rate", Reduction::Mean),
        ("syn_flag_counts", Reduction::Sum),
        ("requests_rate", Reduction::Sum),
    ]);

    let (first, first_report) = prepare(&batch, &policy, &PrepareConfig::default());
    let (second, second_report) = prepare(&batch, &policy, &PrepareConfig::default());

    assert_eq!(first_report, second_report);
    assert_eq!(first.column_names(), second.column_names());
    assert_eq!(first.index(), second.index());
    for (left, right) in first.columns().iter().zip(second.columns()) {
        let left_bits: Vec<u64> = left.values.iter().map(|v| v.to_bits()).collect();
        let right_bits: Vec<u64> = right.values.iter().map(|v| v.to_bits()).collect();
        assert_eq!(left_bits, right_bits, "column {}", left.name);
    }
    // Numeric protocol codes: 1 is the reference.
    assert_eq!(
        first_report.indicator_columns,
        vec!["protocol_6".to_string(), "protocol_17".to_string()]
    );
}

#[test]
fn json_policy_and_config_drive_port_ratios() {
    let policy: AggregationPolicy = serde_json::from_str(
        r#"[
            {"column": "requests_rate", "reduction": "sum"},
            {"column": "src_port", "reduction": "nunique"},
            {"column": "dst_port", "reduction": "nunique"}
        ]"#,
    )
    .expect("policy json should parse");
    let cfg: PrepareConfig =
        serde_json::from_str(r#"{"frequency": "2s", "window": "10s"}"#).expect("config json");

    let batch = batch(vec![
        ts(&["00.1", "00.6", "01.4"]),
        Column::numeric("src_port", [1000.0, 1001.0, 1000.0]),
        Column::numeric("dst_port", [80.0, 80.0, 80.0]),
        unit_rates(3),
    ]);

    let (table, _) = prepare(&batch, &policy, &cfg);

    assert_eq!(table.index(), &[START_MS]);
    assert_eq!(table.column("unique_src_port_ratio").unwrap(), &[0.5]);
    assert_eq!(table.column("unique_dst_port_ratio").unwrap(), &[0.25]);
    assert!(!table.has_column("src_port"));
    assert!(!table.has_column("dst_port"));
    assert!(table.has_column("rolling_syn_10s"));
}

#[test]
fn csv_capture_prepares_end_to_end() {
    let mut file = NamedTempFile::new().expect("temp file should be created");
    write!(
        file,
        "timestamp,dst_ip,protocol,packets_count,fwd_packets_count,syn_flag_counts\n\
         2024-01-01 00:00:00.2,192.168.0.4,TCP,4,3,1\n\
         2024-01-01 00:00:00.6,192.168.0.4,UDP,5,2,0\n\
         2024-01-01 00:00:01.1,192.168.0.9,TCP,9,4,2\n"
    )
    .expect("csv should be written");

    let records = load_records(file.path(), "benign").expect("csv should load");
    let policy = AggregationPolicy::from_pairs([
        ("packets_count", Reduction::Sum),
        ("fwd_packets_count", Reduction::Sum),
        ("syn_flag_counts", Reduction::Sum),
        ("requests_rate", Reduction::Sum),
    ]);
    let cfg = PrepareConfig {
        include_labels: true,
        filter_subnet: true,
        ..PrepareConfig::default()
    };

    let (table, report) = prepare(&records, &policy, &cfg);

    assert_eq!(report.input_records, 3);
    assert_eq!(report.filtered_out, 0);
    assert_eq!(
        table.column_names(),
        vec![
            "packets_count",
            "fwd_packets_count",
            "syn_flag_counts",
            "requests_rate",
            "protocol_UDP",
            "label",
            "fwd_packet_fraction",
            "frac_syn",
            "frac_rst",
            "header_to_payload_ratio",
            "rolling_syn_5s",
            "rolling_packets_mean_5s",
            "rolling_bytes_rate_std_5s",
        ]
    );
    assert_eq!(table.column("requests_rate").unwrap(), &[2.0, 1.0]);
    assert_eq!(table.column("protocol_UDP").unwrap(), &[1.0, 0.0]);
    assert_eq!(table.column("label").unwrap(), &[1.0, 1.0]);
    assert_eq!(table.column("fwd_packet_fraction").unwrap(), &[0.5, 0.4]);
    assert_eq!(table.column("frac_syn").unwrap(), &[0.1, 0.2]);
    assert_eq!(table.column("rolling_syn_5s").unwrap(), &[1.0, 3.0]);
    assert_eq!(table.column("rolling_packets_mean_5s").unwrap(), &[9.0, 9.0]);
    assert_eq!(report.schema_fingerprint, table.schema_fingerprint());
}

#[test]
fn out_of_range_epochs_are_dropped_not_bucketed() {
    let batch = batch(vec![
        Column::text("timestamp", ["1e30", "2024-01-01 00:00:01.5"]),
        unit_rates(2),
    ]);
    let policy = AggregationPolicy::from_pairs([("requests_rate", Reduction::Sum)]);

    let (table, report) = prepare(&batch, &policy, &PrepareConfig::default());

    assert_eq!(report.unparsable_timestamps, 1);
    assert_eq!(table.index(), &[START_MS + 1_000]);
    assert_eq!(table.column("requests_rate").unwrap(), &[1.0]);

    let only_bad = self::batch(vec![Column::text("timestamp", ["1e30"]), unit_rates(1)]);
    let (empty, report) = prepare(&only_bad, &policy, &PrepareConfig::default());
    assert!(empty.is_empty());
    assert_eq!(report.buckets, 0);
}

#[test]
fn nan_protocol_cells_in_a_capture_are_missing_categories() {
    let mut file = NamedTempFile::new().expect("temp file should be created");
    write!(
        file,
        "timestamp,protocol\n\
         2024-01-01 00:00:00.1,6\n\
         2024-01-01 00:00:00.2,NaN\n\
         2024-01-01 00:00:00.3,NaN\n\
         2024-01-01 00:00:00.4,17\n"
    )
    .expect("csv should be written");

    let records = load_records(file.path(), "benign").expect("csv should load");
    let policy = AggregationPolicy::from_pairs([("requests_rate", Reduction::Sum)]);

    let (table, report) = prepare(&records, &policy, &PrepareConfig::default());

    assert_eq!(report.indicator_columns, vec!["protocol_17".to_string()]);
    assert_eq!(table.column("protocol_17").unwrap(), &[1.0]);
    assert!(!table.has_column("protocol_NaN"));
    assert_eq!(table.column("requests_rate").unwrap(), &[4.0]);
}
