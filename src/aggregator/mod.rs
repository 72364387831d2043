pub mod scoring;

pub use scoring::{compute_ratio, summarize};

use thiserror::Error;

use crate::models::{CompletionPayload, ResultSet, SummaryMetrics, TrialRecord};

#[derive(Debug, Error)]
pub enum AggregatorError {
    #[error("completion payload already emitted for this run")]
    AlreadyEmitted,
    #[error("failed to measure result set: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Collects trial records during a run and builds the completion payload once.
#[derive(Debug, Default)]
pub struct ResultAggregator {
    results: ResultSet,
    emitted: bool,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends in presentation order. Records arriving after emission are dropped.
    pub fn record(&mut self, record: TrialRecord) -> bool {
        if self.emitted {
            log::warn!(
                "dropping '{}' record received after completion was emitted",
                record.task
            );
            return false;
        }
        self.results.push(record);
        true
    }

    pub fn records(&self) -> &[TrialRecord] {
        self.results.records()
    }

    pub fn result_set(&self) -> &ResultSet {
        &self.results
    }

    pub fn summary(&self) -> SummaryMetrics {
        summarize(&self.results)
    }

    pub fn is_emitted(&self) -> bool {
        self.emitted
    }

    /// Builds the one completion payload for this run.
    pub fn finish(&mut self) -> Result<CompletionPayload, AggregatorError> {
        if self.emitted {
            return Err(AggregatorError::AlreadyEmitted);
        }
        let payload = CompletionPayload::new(self.results.clone(), self.summary())?;
        self.emitted = true;
        Ok(payload)
    }
}
