//! Task side of the handshake: waits for the host's configuration, runs the
//! trials, and reports the results exactly once.

use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};

use crate::{
    aggregator::ResultAggregator,
    host::{ParentWindow, TrialSequence},
    models::{CompletionPayload, TaskConfig},
    protocol::{codec, Decoded, DeliveryMode, Envelope, MessageFilter, WireMessage},
};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

pub struct TaskRunner {
    parent: Arc<dyn ParentWindow>,
    sequence: Box<dyn TrialSequence>,
    delivery: DeliveryMode,
    filter: MessageFilter,
    config: Option<TaskConfig>,
    aggregator: ResultAggregator,
    local_results: Option<CompletionPayload>,
}

impl TaskRunner {
    /// `host` names the embedding context configuration is accepted from;
    /// messages from anywhere else are ignored.
    pub fn new(
        parent: Arc<dyn ParentWindow>,
        sequence: Box<dyn TrialSequence>,
        delivery: DeliveryMode,
        host: MessageFilter,
    ) -> Self {
        Self {
            parent,
            sequence,
            delivery,
            filter: host,
            config: None,
            aggregator: ResultAggregator::new(),
            local_results: None,
        }
    }

    pub fn config(&self) -> Option<&TaskConfig> {
        self.config.as_ref()
    }

    pub fn aggregator(&self) -> &ResultAggregator {
        &self.aggregator
    }

    /// Results of a run that had no embedding context to report to.
    pub fn local_results(&self) -> Option<&CompletionPayload> {
        self.local_results.as_ref()
    }

    pub fn is_finished(&self) -> bool {
        self.aggregator.is_emitted()
    }

    /// Handles a message from the embedding context. Returns `true` when it
    /// carried the configuration that started the run.
    pub fn on_message(&mut self, envelope: &Envelope) -> Result<bool> {
        let Some(decoded) = self.filter.accept(envelope) else {
            return Ok(false);
        };

        match decoded {
            Decoded::Message(WireMessage::Config { config }) => {
                if self.config.is_some() {
                    log_debug!("already configured; ignoring CONFIG for {}", config.session_id);
                    return Ok(false);
                }
                self.start(config)?;
                Ok(true)
            }
            Decoded::Message(other) => {
                log_debug!("ignoring {} message", other.kind().as_str());
                Ok(false)
            }
            Decoded::Malformed { kind, reason } => {
                log_warn!("ignoring malformed {} message: {reason}", kind.as_str());
                Ok(false)
            }
            Decoded::Unrecognized { reason } => {
                log_debug!("ignoring message: {reason}");
                Ok(false)
            }
        }
    }

    /// Starts without a host, using locally supplied parameters.
    pub fn run_standalone(&mut self, config: TaskConfig) -> Result<()> {
        if self.parent.is_embedded() {
            bail!("embedded tasks wait for the host's configuration");
        }
        if self.config.is_some() {
            bail!("task already configured");
        }
        log_info!("no embedding context; running standalone");
        self.start(config)
    }

    fn start(&mut self, config: TaskConfig) -> Result<()> {
        log_info!(
            "running task for study {} subject {}",
            config.study_or_default(),
            config.subject_or_default()
        );
        self.config = Some(config.clone());
        self.sequence
            .run(&config, &mut self.aggregator)
            .context("trial sequence failed")?;
        self.emit()
    }

    fn emit(&mut self) -> Result<()> {
        let payload = self.aggregator.finish()?;

        if !self.parent.is_embedded() {
            log_info!("{} trials kept locally", payload.result_set.len());
            self.local_results = Some(payload);
            return Ok(());
        }

        let trials = payload.result_set.len();
        let forms = codec::outbound(&WireMessage::TaskComplete(payload.clone()), self.delivery)
            .context("failed to encode completion")?;

        let mut delivered = 0;
        let mut last_error = None;
        for form in forms {
            match self.parent.post_to_parent(form) {
                Ok(()) => delivered += 1,
                Err(err) => {
                    log_warn!("failed to post completion: {err:#}");
                    last_error = Some(err);
                }
            }
        }

        match last_error {
            Some(err) if delivered == 0 => {
                // Nothing reached the host; keep the results inspectable here.
                self.local_results = Some(payload);
                Err(anyhow!("completion not delivered: {err:#}"))
            }
            _ => {
                log_info!("completion with {trials} trials sent ({delivered} forms)");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::trial::{TASK_CHOICE, TASK_GAZE};
    use crate::models::{TrialRecord, TrialResponse};
    use crate::protocol::{decode, ContextId, WireForm};
    use std::sync::Mutex;

    struct RecordingParent {
        embedded: bool,
        posted: Mutex<Vec<WireForm>>,
    }

    impl RecordingParent {
        fn new(embedded: bool) -> Arc<Self> {
            Arc::new(Self {
                embedded,
                posted: Mutex::new(Vec::new()),
            })
        }

        fn posted(&self) -> Vec<WireForm> {
            self.posted.lock().unwrap().clone()
        }
    }

    impl ParentWindow for RecordingParent {
        fn is_embedded(&self) -> bool {
            self.embedded
        }

        fn post_to_parent(&self, data: WireForm) -> Result<()> {
            self.posted.lock().unwrap().push(data);
            Ok(())
        }
    }

    struct UnreachableParent;

    impl ParentWindow for UnreachableParent {
        fn is_embedded(&self) -> bool {
            true
        }

        fn post_to_parent(&self, _data: WireForm) -> Result<()> {
            bail!("parent window closed")
        }
    }

    struct TwoChoices;

    impl TrialSequence for TwoChoices {
        fn run(&mut self, _config: &TaskConfig, aggregator: &mut ResultAggregator) -> Result<()> {
            aggregator.record(
                TrialRecord::new(TASK_CHOICE)
                    .with_response(TrialResponse::Index(0))
                    .with_rt(400.0),
            );
            aggregator.record(
                TrialRecord::new(TASK_CHOICE)
                    .with_response(TrialResponse::Index(1))
                    .with_rt(600.0),
            );
            Ok(())
        }
    }

    struct Failing;

    impl TrialSequence for Failing {
        fn run(&mut self, _config: &TaskConfig, aggregator: &mut ResultAggregator) -> Result<()> {
            aggregator.record(TrialRecord::new(TASK_GAZE));
            bail!("display lost")
        }
    }

    const HOST_ORIGIN: &str = "https://survey.example";

    fn host() -> MessageFilter {
        MessageFilter::new(Some(HOST_ORIGIN.into()), Some(ContextId::new("parent")))
    }

    fn runner(parent: Arc<dyn ParentWindow>, sequence: Box<dyn TrialSequence>) -> TaskRunner {
        TaskRunner::new(parent, sequence, DeliveryMode::Both, host())
    }

    fn config_envelope(session_id: &str) -> Envelope {
        config_envelope_from(session_id, HOST_ORIGIN, "parent")
    }

    fn config_envelope_from(session_id: &str, origin: &str, source: &str) -> Envelope {
        let config = TaskConfig {
            session_id: session_id.to_string(),
            study_id: Some("s1".into()),
            subject_id: Some("p1".into()),
            trials_per_block: Some(2),
        };
        let value = codec::encode(&WireMessage::Config { config }).unwrap();
        Envelope::new(origin, ContextId::new(source), WireForm::Structured(value))
    }

    #[test]
    fn first_config_runs_and_emits_both_forms() {
        let parent = RecordingParent::new(true);
        let mut runner = runner(parent.clone(), Box::new(TwoChoices));

        assert!(runner.on_message(&config_envelope("a")).unwrap());
        assert!(!runner.on_message(&config_envelope("b")).unwrap());

        assert_eq!(runner.config().unwrap().session_id, "a");
        assert!(runner.is_finished());

        let posted = parent.posted();
        assert_eq!(posted.len(), 2);
        assert!(matches!(posted[0], WireForm::Structured(_)));
        assert!(matches!(posted[1], WireForm::Text(_)));
        for form in &posted {
            match decode(form) {
                Decoded::Message(WireMessage::TaskComplete(payload)) => {
                    assert_eq!(payload.result_set.len(), 2);
                    assert_eq!(payload.summary.total_choices, 2);
                    assert_eq!(payload.summary.impulsivity_score, 0.5);
                }
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn structured_only_delivery_posts_once() {
        let parent = RecordingParent::new(true);
        let mut runner = TaskRunner::new(
            parent.clone(),
            Box::new(TwoChoices),
            DeliveryMode::Structured,
            host(),
        );
        runner.on_message(&config_envelope("a")).unwrap();
        assert_eq!(parent.posted().len(), 1);
    }

    #[test]
    fn config_from_other_origin_is_ignored() {
        let parent = RecordingParent::new(true);
        let mut runner = runner(parent.clone(), Box::new(TwoChoices));

        let foreign = config_envelope_from("a", "https://attacker.example", "parent");
        assert!(!runner.on_message(&foreign).unwrap());
        assert!(runner.config().is_none());
        assert!(parent.posted().is_empty());

        // The real host can still configure afterwards.
        assert!(runner.on_message(&config_envelope("b")).unwrap());
        assert_eq!(runner.config().unwrap().session_id, "b");
    }

    #[test]
    fn config_from_other_source_is_ignored() {
        let parent = RecordingParent::new(true);
        let mut runner = runner(parent.clone(), Box::new(TwoChoices));

        let sibling = config_envelope_from("a", HOST_ORIGIN, "sibling-frame");
        assert!(!runner.on_message(&sibling).unwrap());
        assert!(runner.config().is_none());
        assert!(parent.posted().is_empty());
    }

    #[test]
    fn undelivered_completion_is_kept_locally() {
        let parent = Arc::new(UnreachableParent);
        let mut runner = runner(parent, Box::new(TwoChoices));

        let err = runner.on_message(&config_envelope("a")).unwrap_err();
        assert!(err.to_string().contains("not delivered"));
        assert!(runner.is_finished());
        let local = runner.local_results().unwrap();
        assert_eq!(local.result_set.len(), 2);
        assert_eq!(local.summary.total_choices, 2);
    }

    #[test]
    fn standalone_keeps_results_locally() {
        let parent = RecordingParent::new(false);
        let mut runner = runner(parent.clone(), Box::new(TwoChoices));

        runner.run_standalone(TaskConfig::default()).unwrap();

        assert!(parent.posted().is_empty());
        let local = runner.local_results().unwrap();
        assert_eq!(local.result_set.len(), 2);
        assert!(runner.run_standalone(TaskConfig::default()).is_err());
    }

    #[test]
    fn standalone_refused_when_embedded() {
        let parent = RecordingParent::new(true);
        let mut runner = runner(parent, Box::new(TwoChoices));
        assert!(runner.run_standalone(TaskConfig::default()).is_err());
    }

    #[test]
    fn failed_sequence_emits_nothing() {
        let parent = RecordingParent::new(true);
        let mut runner = runner(parent.clone(), Box::new(Failing));

        assert!(runner.on_message(&config_envelope("a")).is_err());
        assert!(parent.posted().is_empty());
        assert!(!runner.is_finished());
    }
}
