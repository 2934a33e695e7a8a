//! Trailing wall-clock window statistics over an aggregated table.

use std::collections::VecDeque;

use tracing::debug;

use crate::aggregate::{mean, sample_std};
use crate::span::Span;
use crate::table::FlowTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollingStat {
    Sum,
    Mean,
    /// Sample standard deviation; a single observation yields 0.
    Std,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RollingRule {
    pub base_name: &'static str,
    pub source: &'static str,
    pub stat: RollingStat,
}

impl RollingRule {
    pub fn column_name(&self, window: &Span) -> String {
        format!("{}_{}", self.base_name, window.label)
    }
}

pub const ROLLING_RULES: [RollingRule; 3] = [
    RollingRule {
        base_name: "rolling_syn",
        source: "syn_flag_counts",
        stat: RollingStat::Sum,
    },
    RollingRule {
        base_name: "rolling_packets_mean",
        source: "packets_count",
        stat: RollingStat::Mean,
    },
    RollingRule {
        base_name: "rolling_bytes_rate_std",
        source: "bytes_rate",
        stat: RollingStat::Std,
    },
];

/// Points with timestamps in `(t - width, t]` for the latest `t` pushed.
#[derive(Debug, Clone)]
struct TrailingWindow {
    points: VecDeque<(i64, f64)>,
    width_ms: i64,
}

impl TrailingWindow {
    fn new(width_ms: i64) -> Self {
        Self {
            points: VecDeque::new(),
            width_ms,
        }
    }

    fn advance(&mut self, ts_ms: i64, value: f64) {
        if value.is_finite() {
            self.points.push_back((ts_ms, value));
        }
        let cutoff = ts_ms.saturating_sub(self.width_ms);
        while self.points.front().is_some_and(|(ts, _)| *ts <= cutoff) {
            self.points.pop_front();
        }
    }

    fn stat(&self, stat: RollingStat) -> f64 {
        let values: Vec<f64> = self.points.iter().map(|(_, v)| *v).collect();
        if values.is_empty() {
            return 0.0;
        }
        match stat {
            RollingStat::Sum => values.iter().sum(),
            RollingStat::Mean => mean(&values),
            RollingStat::Std => sample_std(&values),
        }
    }
}

/// One statistic per row over the trailing window ending at that row's index.
pub fn rolling_values(
    index: &[i64],
    values: &[f64],
    width_ms: i64,
    stat: RollingStat,
) -> Vec<f64> {
    let mut window = TrailingWindow::new(width_ms);
    index
        .iter()
        .zip(values)
        .map(|(ts, value)| {
            window.advance(*ts, *value);
            window.stat(stat)
        })
        .collect()
}

/// Re-sorts `table` by index, then adds every [`ROLLING_RULES`] column. A missing source
/// column yields a constant-0 column so the schema stays stable.
pub fn engineer_rolling_features(table: &mut FlowTable, window: &Span) {
    table.sort_by_index();

    for rule in &ROLLING_RULES {
        let name = rule.column_name(window);
        let values = match table.column(rule.source) {
            Some(source) => rolling_values(table.index(), source, window.millis, rule.stat),
            None => {
                debug!(
                    component = "rolling",
                    event = "rolling.fallback",
                    feature = %name,
                    source = rule.source
                );
                vec![0.0; table.len()]
            }
        };
        table.put_column(&name, values);
    }
}

pub fn with_rolling_features(table: &FlowTable, window: &Span) -> FlowTable {
    let mut out = table.clone();
    engineer_rolling_features(&mut out, window);
    out
}
