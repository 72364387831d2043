use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ResultSet, SummaryMetrics, TaskConfig};

/// The single message carrying final results from the task to the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionPayload {
    pub result_set: ResultSet,
    /// Older task builds omit this; the host recomputes it from the records anyway.
    #[serde(default)]
    pub summary: SummaryMetrics,
    /// Serialized length in bytes of `result_set`. Advisory, 0 when not sent.
    #[serde(default)]
    pub size: u64,
}

impl CompletionPayload {
    pub fn new(result_set: ResultSet, summary: SummaryMetrics) -> serde_json::Result<Self> {
        let size = serde_json::to_string(&result_set)?.len() as u64;
        Ok(Self {
            result_set,
            summary,
            size,
        })
    }
}

/// Who and when, stored next to the results so an exported value is self-describing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadMetadata {
    pub study: String,
    pub subject: String,
    pub timestamp: DateTime<Utc>,
}

impl PayloadMetadata {
    pub fn new(config: &TaskConfig, timestamp: DateTime<Utc>) -> Self {
        Self {
            study: config.study_or_default().to_string(),
            subject: config.subject_or_default().to_string(),
            timestamp,
        }
    }
}
