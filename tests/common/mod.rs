#![allow(dead_code)]

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

use anyhow::Result;
use taskbridge_lib::{
    aggregator::ResultAggregator,
    host::{Notice, SurveyPage, TrialSequence},
    models::{
        trial::{TASK_ADD, TASK_CHOICE},
        TaskConfig, TrialRecord, TrialResponse,
    },
    settings::BridgeSettings,
};

pub const TASK_ORIGIN: &str = "https://task.example";

pub fn fast_settings() -> BridgeSettings {
    BridgeSettings {
        task_url: format!("{TASK_ORIGIN}/gaze/"),
        expected_origin: TASK_ORIGIN.into(),
        load_timeout_ms: 1_500,
        completion_timeout_ms: 5_000,
        override_grace_ms: 5_000,
        auto_advance_delay_ms: 50,
        archive_raw_data: false,
        ..BridgeSettings::default()
    }
}

#[derive(Default)]
pub struct RecordingPage {
    advances: AtomicUsize,
    notices: Mutex<Vec<Notice>>,
}

impl RecordingPage {
    pub fn advances(&self) -> usize {
        self.advances.load(Ordering::SeqCst)
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().unwrap().clone()
    }
}

impl SurveyPage for RecordingPage {
    fn block_navigation(&self) {}

    fn render(&self, notice: Notice) {
        self.notices.lock().unwrap().push(notice);
    }

    fn offer_override(&self) {}

    fn advance(&self) {
        self.advances.fetch_add(1, Ordering::SeqCst);
    }
}

/// Two choice trials and two running-total trials.
pub struct ScriptedSequence {
    pub runs: Arc<AtomicUsize>,
}

impl TrialSequence for ScriptedSequence {
    fn run(&mut self, _config: &TaskConfig, aggregator: &mut ResultAggregator) -> Result<()> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        aggregator.record(
            TrialRecord::new(TASK_CHOICE)
                .with_response(TrialResponse::Index(0))
                .with_rt(380.0),
        );
        aggregator.record(TrialRecord::new(TASK_ADD).with_points(5));
        aggregator.record(
            TrialRecord::new(TASK_CHOICE)
                .with_response(TrialResponse::Index(0))
                .with_rt(420.0),
        );
        aggregator.record(TrialRecord::new(TASK_ADD).with_points(9));
        Ok(())
    }
}
