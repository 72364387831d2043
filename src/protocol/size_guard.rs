//! Keeps persisted completion payloads under the host's storage ceiling.

use serde::Serialize;

use super::message::TASK_COMPLETE_TYPE;
use crate::models::{CompletionPayload, PayloadMetadata, ResultSet, SummaryMetrics};

const ENABLE_LOGS: bool = true;

use crate::log_warn;

/// Stored in place of `resultSet` when the payload is over the ceiling.
pub const TRUNCATION_MARKER: &str = "[TRUNCATED]";

/// Many survey backends cap a single stored field at roughly this size.
pub const DEFAULT_SIZE_CEILING: usize = 15_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardOutcome {
    Intact,
    Truncated { original_len: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardedPayload {
    pub text: String,
    pub outcome: GuardOutcome,
}

impl GuardedPayload {
    pub fn is_truncated(&self) -> bool {
        matches!(self.outcome, GuardOutcome::Truncated { .. })
    }
}

// Same field order as `WireMessage::TaskComplete`, followed by `metadata`.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StoredPayload<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    result_set: StoredResults<'a>,
    summary: &'a SummaryMetrics,
    size: u64,
    metadata: &'a PayloadMetadata,
}

#[derive(Serialize)]
#[serde(untagged)]
enum StoredResults<'a> {
    Full(&'a ResultSet),
    Truncated(&'static str),
}

/// Serializes `payload` with `metadata` for storage, swapping the result set for
/// [`TRUNCATION_MARKER`] when the full form is longer than `ceiling` bytes.
/// Summary, size and metadata are always kept.
pub fn guard_payload(
    payload: &CompletionPayload,
    metadata: &PayloadMetadata,
    ceiling: usize,
) -> serde_json::Result<GuardedPayload> {
    let full = serde_json::to_string(&StoredPayload {
        kind: TASK_COMPLETE_TYPE,
        result_set: StoredResults::Full(&payload.result_set),
        summary: &payload.summary,
        size: payload.size,
        metadata,
    })?;

    if full.len() <= ceiling {
        return Ok(GuardedPayload {
            text: full,
            outcome: GuardOutcome::Intact,
        });
    }

    let truncated = serde_json::to_string(&StoredPayload {
        kind: TASK_COMPLETE_TYPE,
        result_set: StoredResults::Truncated(TRUNCATION_MARKER),
        summary: &payload.summary,
        size: payload.size,
        metadata,
    })?;

    log_warn!(
        "completion payload is {} bytes (ceiling {}); stored {} bytes with result set truncated",
        full.len(),
        ceiling,
        truncated.len()
    );
    if truncated.len() > ceiling {
        log_warn!("truncated payload still exceeds the ceiling; storing it anyway");
    }

    Ok(GuardedPayload {
        text: truncated,
        outcome: GuardOutcome::Truncated {
            original_len: full.len(),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{TaskConfig, TrialRecord};
    use crate::protocol::{codec, WireMessage};
    use chrono::{TimeZone, Utc};
    use serde_json::Value;

    fn metadata() -> PayloadMetadata {
        let config = TaskConfig {
            session_id: "s".into(),
            study_id: Some("gaze-pilot".into()),
            subject_id: Some("p42".into()),
            trials_per_block: None,
        };
        PayloadMetadata::new(&config, Utc.with_ymd_and_hms(2026, 3, 1, 14, 30, 0).unwrap())
    }

    fn payload_with(trials: usize) -> CompletionPayload {
        let records: Vec<TrialRecord> = (0..trials)
            .map(|i| {
                TrialRecord::new("gaze_perception")
                    .with_gaze("M1", "L15")
                    .with_rt(400.0 + i as f64)
            })
            .collect();
        let result_set = ResultSet::new(records);
        let summary = crate::aggregator::summarize(&result_set);
        CompletionPayload::new(result_set, summary).unwrap()
    }

    #[test]
    fn small_payload_is_stored_as_sent_plus_metadata() {
        let payload = payload_with(3);
        let guarded = guard_payload(&payload, &metadata(), DEFAULT_SIZE_CEILING).unwrap();

        assert_eq!(guarded.outcome, GuardOutcome::Intact);
        let wire = codec::encode_text(&WireMessage::TaskComplete(payload)).unwrap();
        let wire_body = wire.strip_suffix('}').unwrap();
        assert!(guarded.text.starts_with(wire_body));

        let stored: Value = serde_json::from_str(&guarded.text).unwrap();
        assert_eq!(stored["metadata"]["study"], "gaze-pilot");
        assert_eq!(stored["metadata"]["subject"], "p42");
    }

    #[test]
    fn large_payload_keeps_summary_and_marks_results() {
        let payload = payload_with(500);
        let guarded = guard_payload(&payload, &metadata(), DEFAULT_SIZE_CEILING).unwrap();
        assert!(guarded.is_truncated());

        let stored: Value = serde_json::from_str(&guarded.text).unwrap();
        assert_eq!(stored["resultSet"], Value::String(TRUNCATION_MARKER.into()));
        assert_eq!(stored["type"], "TASK_COMPLETE");
        assert_eq!(stored["size"], payload.size);
        assert_eq!(stored["summary"], serde_json::to_value(&payload.summary).unwrap());
        assert_eq!(stored["metadata"], serde_json::to_value(metadata()).unwrap());
        assert_eq!(stored["metadata"]["timestamp"], "2026-03-01T14:30:00Z");
    }

    #[test]
    fn truncation_is_deterministic() {
        let payload = payload_with(500);
        let first = guard_payload(&payload, &metadata(), 1_000).unwrap();
        let second = guard_payload(&payload, &metadata(), 1_000).unwrap();
        assert_eq!(first, second);
    }
}
