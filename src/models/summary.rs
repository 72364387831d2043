use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Derived metrics over a [`ResultSet`](super::ResultSet). Always recomputable from
/// the raw records; the records stay authoritative.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SummaryMetrics {
    pub total_trials: u64,
    pub counts_by_task: BTreeMap<String, u64>,
    /// Number of `choice` records.
    pub total_choices: u64,
    pub circle_choices: u64,
    pub square_choices: u64,
    /// circle / (circle + square), 0 when no choices were made.
    pub impulsivity_score: f64,
    /// Points from the last `add` record, 0 when there is none.
    pub total_points: i64,
    /// Mean over records with a response time; `None` when no record has one.
    pub mean_rt: Option<f64>,
    pub yes_count: u64,
    pub no_count: u64,
    /// Percent of centre-gaze trials answered "yes", one decimal.
    pub accuracy: f64,
}
