//! Collaborators the core relies on but does not implement: the surrounding page,
//! the embedded browsing context, and the trial-presentation library.

use anyhow::Result;

use crate::aggregator::ResultAggregator;
use crate::models::TaskConfig;
use crate::protocol::{ContextId, WireForm};

/// Owner of the embedded child context, seen from the host page.
///
/// Native ready/error signals are not returned from `create`; the embedding
/// delivers them later through the host controller's `on_context_ready` and
/// `on_context_error`.
pub trait EmbeddedFrame: Send + Sync {
    fn create(&self, url: &str) -> Result<ContextId>;

    fn post_message(&self, context: &ContextId, data: WireForm, target_origin: &str) -> Result<()>;
}

/// What the host page shows instead of, or around, the task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Loading,
    Completed,
    LoadFailed(String),
    TimedOut(String),
    Error(String),
}

/// The surrounding survey page.
pub trait SurveyPage: Send + Sync {
    /// Keep the participant on this page while the task runs.
    fn block_navigation(&self);

    fn render(&self, notice: Notice);

    /// Show a control that lets the participant (or a proctor) move on.
    fn offer_override(&self);

    /// Move past this unit of work. The controller calls this at most once per session.
    fn advance(&self);
}

/// The embedding context, seen from inside the task.
pub trait ParentWindow: Send + Sync {
    /// True when running inside a nested browsing context.
    fn is_embedded(&self) -> bool;

    fn post_to_parent(&self, data: WireForm) -> Result<()>;
}

/// The trial-presentation library: runs the trials and records each outcome in order.
pub trait TrialSequence: Send {
    fn run(&mut self, config: &TaskConfig, aggregator: &mut ResultAggregator) -> Result<()>;
}
