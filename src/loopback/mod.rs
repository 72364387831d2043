//! In-process embedding: the task runs on a tokio task and talks to the host
//! controller over channels instead of a browser's message bus.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};
use serde_json::json;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use uuid::Uuid;

use crate::{
    aggregator::ResultAggregator,
    handshake::HostController,
    host::{EmbeddedFrame, Notice, ParentWindow, SurveyPage, TrialSequence},
    models::{trial::TASK_GAZE, TaskConfig, TrialRecord, TrialResponse},
    protocol::{ContextId, DeliveryMode, Envelope, MessageFilter, WireForm},
    task::TaskRunner,
};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

pub const HOST_ORIGIN: &str = "loopback://host";
const HOST_CONTEXT: &str = "host";

/// What the child frame reports back to the host page.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameEvent {
    Ready,
    LoadError(String),
    Message(Envelope),
}

pub type SequenceFactory = Arc<dyn Fn() -> Box<dyn TrialSequence> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct LoopbackOptions {
    /// Origin stamped on every message the child posts.
    pub child_origin: String,
    /// `None` never signals ready.
    pub ready_after: Option<Duration>,
    /// Report a load error instead of ready.
    pub load_error: Option<String>,
    pub delivery: DeliveryMode,
}

impl LoopbackOptions {
    pub fn new(child_origin: impl Into<String>) -> Self {
        Self {
            child_origin: child_origin.into(),
            ready_after: Some(Duration::from_millis(100)),
            load_error: None,
            delivery: DeliveryMode::default(),
        }
    }
}

pub struct LoopbackFrame {
    options: LoopbackOptions,
    factory: SequenceFactory,
    events: UnboundedSender<FrameEvent>,
    children: Mutex<HashMap<ContextId, UnboundedSender<WireForm>>>,
}

impl LoopbackFrame {
    pub fn new(
        options: LoopbackOptions,
        factory: SequenceFactory,
    ) -> (Self, UnboundedReceiver<FrameEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let frame = Self {
            options,
            factory,
            events,
            children: Mutex::new(HashMap::new()),
        };
        (frame, rx)
    }
}

impl EmbeddedFrame for LoopbackFrame {
    fn create(&self, url: &str) -> Result<ContextId> {
        let runtime = tokio::runtime::Handle::try_current()
            .context("loopback frames need a tokio runtime")?;

        let context = ContextId::new(format!("loopback-{}", Uuid::new_v4()));
        let (inbox_tx, inbox) = mpsc::unbounded_channel();
        self.children
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(context.clone(), inbox_tx);

        let parent = Arc::new(ChannelParent {
            origin: self.options.child_origin.clone(),
            context: context.clone(),
            events: self.events.clone(),
        });
        let host = MessageFilter::new(Some(HOST_ORIGIN.into()), Some(ContextId::new(HOST_CONTEXT)));
        let runner = TaskRunner::new(parent, (self.factory)(), self.options.delivery, host);

        log_debug!("loading {url} into {context}");
        runtime.spawn(run_child(
            context.clone(),
            runner,
            inbox,
            self.options.clone(),
            self.events.clone(),
        ));
        Ok(context)
    }

    fn post_message(&self, context: &ContextId, data: WireForm, target_origin: &str) -> Result<()> {
        if target_origin != "*"
            && target_origin.trim_end_matches('/')
                != self.options.child_origin.trim_end_matches('/')
        {
            // Browsers drop these without telling the sender.
            log_debug!("dropping message for {context}: target origin {target_origin} does not match");
            return Ok(());
        }

        let children = self
            .children
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let inbox = children
            .get(context)
            .ok_or_else(|| anyhow!("unknown frame {context}"))?;
        inbox
            .send(data)
            .map_err(|_| anyhow!("frame {context} is no longer listening"))
    }
}

async fn run_child(
    context: ContextId,
    mut runner: TaskRunner,
    mut inbox: UnboundedReceiver<WireForm>,
    options: LoopbackOptions,
    events: UnboundedSender<FrameEvent>,
) {
    let Some(delay) = options.ready_after else {
        log_debug!("{context} never becomes ready");
        return;
    };
    tokio::time::sleep(delay).await;

    if let Some(reason) = options.load_error {
        let _ = events.send(FrameEvent::LoadError(reason));
        return;
    }
    if events.send(FrameEvent::Ready).is_err() {
        return;
    }

    while let Some(data) = inbox.recv().await {
        let envelope = Envelope::new(HOST_ORIGIN, ContextId::new(HOST_CONTEXT), data);
        if let Err(err) = runner.on_message(&envelope) {
            log_warn!("task in {context} stopped: {err:#}");
            return;
        }
        if runner.is_finished() {
            log_debug!("task in {context} finished");
            return;
        }
    }
}

struct ChannelParent {
    origin: String,
    context: ContextId,
    events: UnboundedSender<FrameEvent>,
}

impl ParentWindow for ChannelParent {
    fn is_embedded(&self) -> bool {
        true
    }

    fn post_to_parent(&self, data: WireForm) -> Result<()> {
        let envelope = Envelope::new(self.origin.clone(), self.context.clone(), data);
        self.events
            .send(FrameEvent::Message(envelope))
            .map_err(|_| anyhow!("host page is gone"))
    }
}

/// Feeds frame events into the controller until the frame is dropped.
pub async fn drive(controller: HostController, mut events: UnboundedReceiver<FrameEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            FrameEvent::Ready => controller.on_context_ready().await,
            FrameEvent::LoadError(reason) => controller.on_context_error(&reason).await,
            FrameEvent::Message(envelope) => controller.on_message(envelope).await,
        }
    }
}

/// Survey page stand-in that only logs what a participant would see.
pub struct ConsolePage;

impl SurveyPage for ConsolePage {
    fn block_navigation(&self) {
        log_debug!("page: next button hidden");
    }

    fn render(&self, notice: Notice) {
        match notice {
            Notice::Loading => log_info!("page: loading task..."),
            Notice::Completed => log_info!("page: task completed, continuing shortly"),
            Notice::LoadFailed(reason) => log_warn!("page: task failed to load ({reason})"),
            Notice::TimedOut(reason) => log_warn!("page: task timed out ({reason})"),
            Notice::Error(reason) => log_warn!("page: task error ({reason})"),
        }
    }

    fn offer_override(&self) {
        log_info!("page: showing continue button");
    }

    fn advance(&self) {
        log_info!("page: next page");
    }
}

pub const GAZE_MODELS: [&str; 6] = ["Dean", "Peter", "Raymond", "Glo", "Mary", "Oli"];
pub const GAZE_ANGLES: [&str; 13] = [
    "Center", "L5", "R5", "L10", "R10", "L15", "R15", "L20", "R20", "L25", "R25", "L30", "R30",
];
pub const DEFAULT_TRIALS_PER_BLOCK: u32 = 2;

/// Gaze-perception blocks answered by a simulated participant: one block per
/// model in shuffled order, random gaze angle per trial, "f" for yes and "j" for no.
pub struct SimulatedGazeTask {
    rng: StdRng,
}

impl SimulatedGazeTask {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for SimulatedGazeTask {
    fn default() -> Self {
        Self::new()
    }
}

impl TrialSequence for SimulatedGazeTask {
    fn run(&mut self, config: &TaskConfig, aggregator: &mut ResultAggregator) -> Result<()> {
        let per_block = config
            .trials_per_block
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_TRIALS_PER_BLOCK);

        let mut models = GAZE_MODELS.to_vec();
        models.shuffle(&mut self.rng);

        for (index, model) in models.iter().enumerate() {
            for _ in 0..per_block {
                let gaze = GAZE_ANGLES.choose(&mut self.rng).copied().unwrap_or("Center");
                let p_yes = if gaze == "Center" { 0.85 } else { 0.2 };
                let key = if self.rng.gen_bool(p_yes) { "f" } else { "j" };
                let rt: f64 = self.rng.gen_range(350.0..1200.0);

                let mut record = TrialRecord::new(TASK_GAZE)
                    .with_response(TrialResponse::Key(key.to_string()))
                    .with_rt(rt.round())
                    .with_gaze(*model, gaze);
                record
                    .extra
                    .insert("block_number".to_string(), json!(index + 1));
                aggregator.record(record);
            }
        }

        log_info!(
            "simulated {} gaze trials over {} blocks",
            aggregator.records().len(),
            models.len()
        );
        Ok(())
    }
}
