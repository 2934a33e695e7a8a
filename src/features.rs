//! Bucket-level features computed from aggregated columns.
//!
//! Each feature is a [`FeatureRule`]: a name, a formula over existing columns and a
//! fallback for when an input is missing. Rules run in a fixed order because later
//! stages read columns produced by earlier ones.

use tracing::debug;

use crate::ingest::REQUESTS_RATE_COLUMN;
use crate::table::FlowTable;

pub const SRC_PORT: &str = "src_port";
pub const DST_PORT: &str = "dst_port";

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Formula {
    /// `left * right`
    Product {
        left: &'static str,
        right: &'static str,
    },
    /// `numerator / (denominator + 1)`
    SmoothedRatio {
        numerator: &'static str,
        denominator: &'static str,
    },
}

impl Formula {
    pub fn inputs(&self) -> [&'static str; 2] {
        match *self {
            Self::Product { left, right } => [left, right],
            Self::SmoothedRatio {
                numerator,
                denominator,
            } => [numerator, denominator],
        }
    }

    fn apply(&self, a: f64, b: f64) -> f64 {
        match self {
            Self::Product { .. } => a * b,
            Self::SmoothedRatio { .. } => a / (b + 1.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Fallback {
    Omit,
    Constant(f64),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureRule {
    pub name: &'static str,
    pub formula: Formula,
    pub fallback: Fallback,
}

pub const CROSS_FEATURES: [FeatureRule; 2] = [
    FeatureRule {
        name: "requests_rate_src_port",
        formula: Formula::Product {
            left: REQUESTS_RATE_COLUMN,
            right: "src_ip",
        },
        fallback: Fallback::Omit,
    },
    FeatureRule {
        name: "requests_rate_dst_port",
        formula: Formula::Product {
            left: REQUESTS_RATE_COLUMN,
            right: "dst_ip",
        },
        fallback: Fallback::Omit,
    },
];

pub const PORT_RATIO_FEATURES: [FeatureRule; 2] = [
    FeatureRule {
        name: "unique_dst_port_ratio",
        formula: Formula::SmoothedRatio {
            numerator: DST_PORT,
            denominator: REQUESTS_RATE_COLUMN,
        },
        fallback: Fallback::Omit,
    },
    FeatureRule {
        name: "unique_src_port_ratio",
        formula: Formula::SmoothedRatio {
            numerator: SRC_PORT,
            denominator: REQUESTS_RATE_COLUMN,
        },
        fallback: Fallback::Omit,
    },
];

pub const FRACTION_FEATURES: [FeatureRule; 4] = [
    FeatureRule {
        name: "fwd_packet_fraction",
        formula: Formula::SmoothedRatio {
            numerator: "fwd_packets_count",
            denominator: "packets_count",
        },
        fallback: Fallback::Constant(0.0),
    },
    FeatureRule {
        name: "frac_syn",
        formula: Formula::SmoothedRatio {
            numerator: "syn_flag_counts",
            denominator: "packets_count",
        },
        fallback: Fallback::Constant(0.0),
    },
    FeatureRule {
        name: "frac_rst",
        formula: Formula::SmoothedRatio {
            numerator: "rst_flag_counts",
            denominator: "packets_count",
        },
        fallback: Fallback::Constant(0.0),
    },
    FeatureRule {
        name: "header_to_payload_ratio",
        formula: Formula::SmoothedRatio {
            numerator: "total_header_bytes",
            denominator: "total_payload_bytes",
        },
        fallback: Fallback::Constant(0.0),
    },
];

/// Raw port columns removed once the port ratios exist.
pub const DROPPED_PORT_COLUMNS: [&str; 2] = [SRC_PORT, DST_PORT];

/// Evaluates one rule against `table`. Returns whether a column was written.
pub fn apply_rule(table: &mut FlowTable, rule: &FeatureRule) -> bool {
    let [a, b] = rule.formula.inputs();
    let values = match (table.column(a), table.column(b)) {
        (Some(left), Some(right)) => Some(
            left.iter()
                .zip(right)
                .map(|(x, y)| rule.formula.apply(*x, *y))
                .collect::<Vec<f64>>(),
        ),
        _ => None,
    };

    match (values, rule.fallback) {
        (Some(values), _) => {
            table.put_column(rule.name, values);
            true
        }
        (None, Fallback::Constant(constant)) => {
            debug!(
                component = "features",
                event = "features.fallback",
                feature = rule.name,
                constant
            );
            table.put_column(rule.name, vec![constant; table.len()]);
            true
        }
        (None, Fallback::Omit) => {
            debug!(
                component = "features",
                event = "features.omitted",
                feature = rule.name
            );
            false
        }
    }
}

/// Cross features, port ratios, port column removal, then fraction features.
pub fn engineer_features(table: &mut FlowTable) {
    for rule in CROSS_FEATURES.iter().chain(&PORT_RATIO_FEATURES) {
        apply_rule(table, rule);
    }

    for column in DROPPED_PORT_COLUMNS {
        table.remove_column(column);
    }

    for rule in &FRACTION_FEATURES {
        apply_rule(table, rule);
    }
}

pub fn engineered_features(table: &FlowTable) -> FlowTable {
    let mut out = table.clone();
    engineer_features(&mut out);
    out
}
