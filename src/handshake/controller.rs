use std::{sync::Arc, time::Duration};

use anyhow::{anyhow, bail, Result};
use chrono::Utc;
use tokio::sync::{watch, Mutex, MutexGuard};

use crate::{
    aggregator::summarize,
    archive::DataArchive,
    db::Database,
    errors::BridgeError,
    host::{EmbeddedFrame, Notice, SurveyPage},
    models::{
        CompletionPayload, PayloadMetadata, Session, SessionInfo, SessionState, SummaryMetrics,
        TaskConfig,
    },
    protocol::{
        codec, guard_payload, ContextId, Decoded, Envelope, GuardedPayload, MessageFilter,
        MessageKind, WireForm, WireMessage,
    },
    settings::BridgeSettings,
    supervisor::{Deadline, Supervisor},
};

use super::state::{Handshake, HandshakeError, Transition};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

pub const KEY_DATA: &str = "Data";
pub const KEY_COMPLETED: &str = "Completed";
pub const KEY_ERROR: &str = "Error";
pub const KEY_COMPLETION_TIME: &str = "CompletionTime";
pub const KEY_START_TIME: &str = "StartTime";
pub const KEY_END_TIME: &str = "EndTime";

fn completed_label(state: SessionState) -> &'static str {
    match state {
        SessionState::Done => "Yes",
        SessionState::TimedOut => "Timeout",
        _ => "Error",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub state: SessionState,
    pub advanced: bool,
}

#[derive(Debug, Clone)]
pub struct HostSnapshot {
    pub session: Session,
    pub context: Option<ContextId>,
    pub discarded_messages: u64,
    pub override_available: bool,
    pub advance_claimed: bool,
}

struct HostInner {
    session: Session,
    handshake: Handshake,
    context: Option<ContextId>,
    filter: MessageFilter,
    supervisor: Supervisor,
    discarded_messages: u64,
    override_available: bool,
}

impl HostInner {
    fn transition(&mut self, next: SessionState) -> Result<Transition, HandshakeError> {
        let transition = self.handshake.transition(next)?;
        self.session.state = next;
        Ok(transition)
    }
}

/// Host side of one embedding: owns the session, the child frame and the
/// deadlines, and calls the page's advance action at most once.
///
/// Every event handler serializes on the session lock, so a timer that fires
/// while a completion is being processed simply finds the session already
/// claimed and does nothing.
#[derive(Clone)]
pub struct HostController {
    inner: Arc<Mutex<HostInner>>,
    progress: Arc<watch::Sender<Progress>>,
    frame: Arc<dyn EmbeddedFrame>,
    page: Arc<dyn SurveyPage>,
    db: Database,
    archive: Option<Arc<DataArchive>>,
    settings: Arc<BridgeSettings>,
}

impl HostController {
    pub fn new(
        settings: BridgeSettings,
        config: TaskConfig,
        frame: Arc<dyn EmbeddedFrame>,
        page: Arc<dyn SurveyPage>,
        db: Database,
    ) -> Self {
        let session = Session::new(config.session_id.clone(), config);
        let filter = MessageFilter::new(Some(settings.expected_origin.clone()), None);
        let (progress, _) = watch::channel(Progress {
            state: SessionState::Idle,
            advanced: false,
        });

        Self {
            inner: Arc::new(Mutex::new(HostInner {
                session,
                handshake: Handshake::new(),
                context: None,
                filter,
                supervisor: Supervisor::new(),
                discarded_messages: 0,
                override_available: false,
            })),
            progress: Arc::new(progress),
            frame,
            page,
            db,
            archive: None,
            settings: Arc::new(settings),
        }
    }

    pub fn with_archive(mut self, archive: DataArchive) -> Self {
        self.archive = Some(Arc::new(archive));
        self
    }

    pub fn settings(&self) -> &BridgeSettings {
        &self.settings
    }

    pub async fn snapshot(&self) -> HostSnapshot {
        let inner = self.inner.lock().await;
        HostSnapshot {
            session: inner.session.clone(),
            context: inner.context.clone(),
            discarded_messages: inner.discarded_messages,
            override_available: inner.override_available,
            advance_claimed: inner.handshake.advance_claimed(),
        }
    }

    /// Resolves once the page's advance action has been called.
    pub async fn wait_until_advanced(&self) -> SessionState {
        let mut rx = self.progress.subscribe();
        loop {
            let current = *rx.borrow_and_update();
            if current.advanced {
                return current.state;
            }
            if rx.changed().await.is_err() {
                return rx.borrow().state;
            }
        }
    }

    /// IDLE -> LOADING: creates the child frame and arms the deadlines.
    pub async fn start(&self) -> Result<SessionInfo> {
        let mut inner = self.inner.lock().await;
        inner
            .transition(SessionState::Loading)
            .map_err(|err| anyhow!("cannot start session: {err}"))?;
        inner.session.started_at = Some(Utc::now());
        self.publish(SessionState::Loading);

        if let Err(err) = self.db.insert_session(&inner.session).await {
            log_error!("failed to record session {}: {err:#}", inner.session.id);
        }

        self.page.block_navigation();
        self.page.render(Notice::Loading);

        match self.frame.create(&self.settings.task_url) {
            Ok(context) => {
                log_info!(
                    "session {} loading {} in frame {}",
                    inner.session.id,
                    self.settings.task_url,
                    context
                );
                inner.filter = MessageFilter::new(
                    Some(self.settings.expected_origin.clone()),
                    Some(context.clone()),
                );
                inner.context = Some(context);
            }
            Err(err) => {
                let error = BridgeError::LoadFailure(format!("could not create frame: {err:#}"));
                let claimed = self.terminate(&mut inner, SessionState::Failed, error).await;
                let info = SessionInfo::from(inner.session.clone());
                drop(inner);
                if claimed {
                    self.advance_after(Duration::ZERO);
                }
                return Ok(info);
            }
        }

        self.arm_deadlines(&mut inner);
        Ok(SessionInfo::from(inner.session.clone()))
    }

    fn arm_deadlines(&self, inner: &mut HostInner) {
        let controller = self.clone();
        inner
            .supervisor
            .arm(Deadline::Load, self.settings.load_timeout(), move || async move {
                controller.on_load_timeout().await
            });

        let controller = self.clone();
        inner.supervisor.arm(
            Deadline::Completion,
            self.settings.completion_timeout(),
            move || async move { controller.on_completion_timeout().await },
        );

        let controller = self.clone();
        inner.supervisor.arm(
            Deadline::OverrideGrace,
            self.settings.override_grace(),
            move || async move { controller.on_override_grace().await },
        );
    }

    /// Native "loaded" signal of the child frame: LOADING -> CONFIGURED -> RUNNING.
    pub async fn on_context_ready(&self) {
        let mut inner = self.inner.lock().await;
        if let Err(err) = inner.transition(SessionState::Configured) {
            log_debug!("ignoring ready signal: {err}");
            return;
        }
        inner.supervisor.cancel(Deadline::Load);
        inner.session.ready_at = Some(Utc::now());
        self.publish(SessionState::Configured);

        if let Err(error) = self.send_config(&inner) {
            log_warn!("session {}: {error}; task will use defaults", inner.session.id);
        }

        if let Err(err) = inner.transition(SessionState::Running) {
            log_error!("session {}: {err}", inner.session.id);
        } else {
            self.publish(SessionState::Running);
        }
        self.save_session(&inner.session).await;
    }

    fn send_config(&self, inner: &HostInner) -> Result<(), BridgeError> {
        let context = inner
            .context
            .as_ref()
            .ok_or_else(|| BridgeError::ConfigDeliveryFailure("no frame".into()))?;
        let message = WireMessage::Config {
            config: inner.session.config.clone(),
        };
        let value = codec::encode(&message)
            .map_err(|err| BridgeError::ConfigDeliveryFailure(err.to_string()))?;

        self.frame
            .post_message(context, WireForm::Structured(value), &self.settings.expected_origin)
            .map_err(|err| BridgeError::ConfigDeliveryFailure(format!("{err:#}")))?;

        log_info!("session {}: configuration sent to {}", inner.session.id, context);
        Ok(())
    }

    /// Native error signal of the child frame.
    pub async fn on_context_error(&self, reason: &str) {
        let mut inner = self.inner.lock().await;
        let claimed = self
            .terminate(
                &mut inner,
                SessionState::Failed,
                BridgeError::LoadFailure(reason.to_string()),
            )
            .await;
        drop(inner);
        if claimed {
            self.advance_after(Duration::ZERO);
        }
    }

    /// Any message delivered to the host window.
    pub async fn on_message(&self, envelope: Envelope) {
        let mut inner = self.inner.lock().await;

        let decoded = match inner.filter.accept(&envelope) {
            Some(decoded) => decoded,
            None => {
                inner.discarded_messages += 1;
                return;
            }
        };

        if inner.handshake.advance_claimed() {
            log_debug!(
                "session {} already {}; ignoring message",
                inner.session.id,
                inner.session.state
            );
            return;
        }

        match decoded {
            Decoded::Message(WireMessage::TaskComplete(payload)) => {
                self.handle_completion(inner, payload).await;
            }
            Decoded::Message(other) => {
                log_debug!("ignoring {} message sent to host", other.kind().as_str());
                inner.discarded_messages += 1;
            }
            Decoded::Malformed {
                kind: MessageKind::TaskComplete,
                reason,
            } => {
                let claimed = self
                    .terminate(
                        &mut inner,
                        SessionState::Failed,
                        BridgeError::MalformedCompletion(reason),
                    )
                    .await;
                drop(inner);
                if claimed {
                    self.advance_after(Duration::ZERO);
                }
            }
            Decoded::Malformed { kind, reason } => {
                log_debug!("ignoring malformed {} message: {reason}", kind.as_str());
                inner.discarded_messages += 1;
            }
            Decoded::Unrecognized { reason } => {
                log_debug!("ignoring unrecognized message: {reason}");
                inner.discarded_messages += 1;
            }
        }
    }

    async fn handle_completion(
        &self,
        mut inner: MutexGuard<'_, HostInner>,
        payload: CompletionPayload,
    ) {
        if let Err(err) = inner.transition(SessionState::Completing) {
            log_warn!("session {}: completion ignored: {err}", inner.session.id);
            inner.discarded_messages += 1;
            return;
        }
        self.publish(SessionState::Completing);
        inner.supervisor.cancel_all();
        inner.session.completed_at = Some(Utc::now());

        log_info!(
            "session {}: completion received with {} trials ({} bytes of trial data)",
            inner.session.id,
            payload.result_set.len(),
            payload.size
        );

        let delay = match self.persist_completion(&inner.session, &payload).await {
            Ok(guarded) => {
                log_info!(
                    "session {}: stored {} bytes{}",
                    inner.session.id,
                    guarded.text.len(),
                    if guarded.is_truncated() { " (truncated)" } else { "" }
                );
                if let Err(err) = inner.transition(SessionState::Done) {
                    log_error!("session {}: {err}", inner.session.id);
                }
                self.publish(SessionState::Done);
                self.page.render(Notice::Completed);
                self.save_session(&inner.session).await;
                self.settings.auto_advance_delay()
            }
            Err(err) => {
                // Advance was claimed on entering COMPLETING, so FAILED does not claim it again.
                let error = BridgeError::CompletionProcessing(format!("{err:#}"));
                self.terminate(&mut inner, SessionState::Failed, error).await;
                Duration::ZERO
            }
        };

        drop(inner);
        self.advance_after(delay);
    }

    async fn persist_completion(
        &self,
        session: &Session,
        payload: &CompletionPayload,
    ) -> Result<GuardedPayload> {
        let recomputed = summarize(&payload.result_set);
        let filled;
        let payload = if payload.summary == SummaryMetrics::default() && recomputed != payload.summary
        {
            log_info!("session {}: task sent no summary; storing the recomputed one", session.id);
            filled = CompletionPayload::new(payload.result_set.clone(), recomputed)?;
            &filled
        } else {
            if recomputed != payload.summary {
                log_warn!(
                    "session {}: summary sent by the task differs from its trial records",
                    session.id
                );
            }
            payload
        };

        let metadata = PayloadMetadata::new(
            &session.config,
            session.completed_at.unwrap_or_else(Utc::now),
        );
        let guarded = guard_payload(payload, &metadata, self.settings.size_ceiling_bytes)?;

        let mut entries = vec![
            (KEY_DATA, guarded.text.clone()),
            (KEY_COMPLETED, completed_label(SessionState::Done).to_string()),
            (KEY_COMPLETION_TIME, format!("{:.1}", session.completion_secs())),
        ];
        if let Some(ready_at) = session.ready_at {
            entries.push((KEY_START_TIME, ready_at.to_rfc3339()));
        }
        if let Some(completed_at) = session.completed_at {
            entries.push((KEY_END_TIME, completed_at.to_rfc3339()));
        }

        for (key, value) in entries {
            self.db
                .set_embedded_data(&session.id, &self.settings.data_key(key), &value)
                .await?;
        }

        if let Some(archive) = &self.archive {
            let at = session.completed_at.unwrap_or_else(Utc::now);
            if let Err(err) = archive.save(session.config.subject_or_default(), &payload.result_set, at)
            {
                log_warn!("session {}: raw data not archived: {err:#}", session.id);
            }
        }

        Ok(guarded)
    }

    async fn on_load_timeout(&self) {
        let mut inner = self.inner.lock().await;
        if inner.session.state != SessionState::Loading {
            return;
        }
        let error = BridgeError::LoadFailure(format!(
            "no ready signal within {} ms",
            self.settings.load_timeout_ms
        ));
        let claimed = self.terminate(&mut inner, SessionState::TimedOut, error).await;
        drop(inner);
        if claimed {
            self.advance_after(Duration::ZERO);
        }
    }

    async fn on_completion_timeout(&self) {
        let mut inner = self.inner.lock().await;
        let error = BridgeError::CompletionTimeout(self.settings.completion_timeout_ms);
        let claimed = self.terminate(&mut inner, SessionState::TimedOut, error).await;
        drop(inner);
        if claimed {
            self.advance_after(Duration::ZERO);
        }
    }

    async fn on_override_grace(&self) {
        let mut inner = self.inner.lock().await;
        if inner.handshake.advance_claimed() || inner.session.state.is_terminal() {
            return;
        }
        inner.override_available = true;
        log_info!("session {}: offering manual override", inner.session.id);
        self.page.offer_override();
    }

    /// Forces the session to end and the page to advance. Only available after the
    /// grace period; returns `false` when the session had already ended.
    pub async fn manual_override(&self) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        if inner.handshake.advance_claimed() {
            return Ok(false);
        }
        if !inner.override_available {
            bail!("manual override is not available yet");
        }
        let claimed = self
            .terminate(&mut inner, SessionState::Failed, BridgeError::ManualOverride)
            .await;
        drop(inner);
        if claimed {
            self.advance_after(Duration::ZERO);
        }
        Ok(claimed)
    }

    /// Moves to a terminal failure state. Returns whether this call claimed the advance.
    async fn terminate(&self, inner: &mut HostInner, next: SessionState, error: BridgeError) -> bool {
        let transition = match inner.transition(next) {
            Ok(transition) => transition,
            Err(err) => {
                log_debug!("session {}: {err}; ignoring {error}", inner.session.id);
                return false;
            }
        };
        inner.supervisor.cancel_all();
        inner.session.error = Some(error.to_string());
        if inner.session.completed_at.is_none() {
            inner.session.completed_at = Some(Utc::now());
        }
        self.publish(next);
        log_warn!("session {} ended {}: {error}", inner.session.id, next);

        let notice = match (&error, next) {
            (_, SessionState::TimedOut) => Notice::TimedOut(error.to_string()),
            (BridgeError::LoadFailure(reason), _) => Notice::LoadFailed(reason.clone()),
            _ => Notice::Error(error.to_string()),
        };
        self.page.render(notice);

        let session_id = inner.session.id.clone();
        for (key, value) in [
            (KEY_COMPLETED, completed_label(next).to_string()),
            (KEY_ERROR, error.to_string()),
        ] {
            if let Err(err) = self
                .db
                .set_embedded_data(&session_id, &self.settings.data_key(key), &value)
                .await
            {
                log_error!("session {session_id}: failed to persist {key}: {err:#}");
            }
        }
        self.save_session(&inner.session).await;

        transition.claims_advance
    }

    async fn save_session(&self, session: &Session) {
        if let Err(err) = self.db.update_session(session).await {
            log_error!("failed to update session {}: {err:#}", session.id);
        }
    }

    fn publish(&self, state: SessionState) {
        self.progress.send_modify(|progress| progress.state = state);
    }

    fn advance_after(&self, delay: Duration) {
        let page = self.page.clone();
        let progress = self.progress.clone();
        let advance = move || {
            log_info!("advancing past the task");
            page.advance();
            progress.send_modify(|p| p.advanced = true);
        };

        if delay.is_zero() {
            advance();
        } else {
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                advance();
            });
        }
    }
}
