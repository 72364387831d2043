use std::collections::BTreeMap;

use crate::models::trial::{TASK_ADD, TASK_CHOICE, TASK_GAZE};
use crate::models::{ResultSet, SummaryMetrics, TrialRecord};

const CIRCLE_RESPONSE: i64 = 0;
const SQUARE_RESPONSE: i64 = 1;
const YES_KEY: &str = "f";
const NO_KEY: &str = "j";
const CENTER_GAZE: &str = "Center";

/// `a / (a + b)`, defined as 0 when both are 0.
pub fn compute_ratio(a: u64, b: u64) -> f64 {
    let denominator = a + b;
    if denominator == 0 {
        return 0.0;
    }
    a as f64 / denominator as f64
}

/// Mean of the non-null response times.
pub fn mean_rt<'a>(records: impl IntoIterator<Item = &'a TrialRecord>) -> Option<f64> {
    let (sum, count) = records
        .into_iter()
        .filter_map(|r| r.rt)
        .fold((0.0, 0u64), |(sum, count), rt| (sum + rt, count + 1));

    if count > 0 {
        Some(sum / count as f64)
    } else {
        None
    }
}

/// Points carried by the last `add` record. Later records supersede earlier ones.
pub fn last_total_points(records: &[TrialRecord]) -> i64 {
    records
        .iter()
        .rev()
        .find(|r| r.is_task(TASK_ADD))
        .and_then(|r| r.points)
        .unwrap_or(0)
}

fn is_yes(record: &TrialRecord) -> bool {
    record
        .response
        .as_ref()
        .map(|r| r.is_index(0) || r.is_key(YES_KEY))
        .unwrap_or(false)
}

fn is_no(record: &TrialRecord) -> bool {
    record
        .response
        .as_ref()
        .map(|r| r.is_index(1) || r.is_key(NO_KEY))
        .unwrap_or(false)
}

/// Percent of centre-gaze trials answered "yes", rounded to one decimal.
pub fn center_accuracy(records: &[TrialRecord]) -> f64 {
    let center: Vec<&TrialRecord> = records
        .iter()
        .filter(|r| r.is_task(TASK_GAZE) && r.gaze.as_deref() == Some(CENTER_GAZE))
        .collect();

    if center.is_empty() {
        return 0.0;
    }

    let correct = center.iter().filter(|r| is_yes(r)).count();
    let pct = correct as f64 / center.len() as f64 * 100.0;
    (pct * 10.0).round() / 10.0
}

pub fn summarize(result_set: &ResultSet) -> SummaryMetrics {
    let records = result_set.records();

    let mut counts_by_task = BTreeMap::new();
    for record in records {
        *counts_by_task.entry(record.task.clone()).or_insert(0u64) += 1;
    }

    let choices = || records.iter().filter(|r| r.is_task(TASK_CHOICE));
    let responded = |index: i64| {
        choices()
            .filter(|r| r.response.as_ref().map(|resp| resp.is_index(index)).unwrap_or(false))
            .count() as u64
    };
    let circle_choices = responded(CIRCLE_RESPONSE);
    let square_choices = responded(SQUARE_RESPONSE);

    let gaze = || records.iter().filter(|r| r.is_task(TASK_GAZE));

    SummaryMetrics {
        total_trials: records.len() as u64,
        counts_by_task,
        total_choices: choices().count() as u64,
        circle_choices,
        square_choices,
        impulsivity_score: compute_ratio(circle_choices, square_choices),
        total_points: last_total_points(records),
        mean_rt: mean_rt(records),
        yes_count: gaze().filter(|r| is_yes(r)).count() as u64,
        no_count: gaze().filter(|r| is_no(r)).count() as u64,
        accuracy: center_accuracy(records),
    }
}
