use std::sync::Arc;

use atlas_backend::{
    BackendError, BackendEventStream, BackendStreamHandle, GenerationBackend, GenerationRequest,
    ImprovementRequest, SectionName, StreamEnvelope, StreamEvent, StreamSessionId, StreamTarget,
};
use snafu::ensure;
use tokio::task::JoinHandle;

use crate::chat::accumulator::{AccumulatorSignal, SectionAccumulator};
use crate::chat::events::{StreamOutcome, SubmitOutcome};
use crate::chat::section::{MarkerStripper, SectionKey, finalized_view, streaming_view};
use crate::chat::turn::{ConversationTurn, TurnId, TurnState, TurnStatus, TurnTransition};
use crate::context::SessionContext;
use crate::error::{ControllerError, ControllerResult, StreamBusySnafu, ValidationSnafu};
use crate::sink::{ErrorReporter, PresentationSink};

struct ActiveStream {
    stream: BackendEventStream,
    worker_task: JoinHandle<()>,
}

/// Owns the turn history and the lifecycle of the one stream that may be open.
pub struct SessionController {
    backend: Arc<dyn GenerationBackend>,
    turns: Vec<ConversationTurn>,
    state: TurnState,
    accumulator: Option<SectionAccumulator>,
    improvement: MarkerStripper,
    active_stream: Option<ActiveStream>,
    next_stream_session_id: u64,
}

impl SessionController {
    pub fn new(backend: Arc<dyn GenerationBackend>) -> Self {
        Self {
            backend,
            turns: Vec::new(),
            state: TurnState::Idle,
            accumulator: None,
            improvement: MarkerStripper::new(),
            active_stream: None,
            next_stream_session_id: 1,
        }
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn state(&self) -> &TurnState {
        &self.state
    }

    pub fn is_streaming(&self) -> bool {
        !self.state.is_idle()
    }

    /// Starts either an improvement exchange or a new generation turn.
    ///
    /// Improvement runs when requested and the pending text has not been improved yet; it
    /// never creates a turn. Submissions while any stream is open are rejected.
    pub fn submit_turn(
        &mut self,
        ctx: &mut SessionContext,
        text: &str,
        improve_requested: bool,
        sink: &mut dyn PresentationSink,
    ) -> ControllerResult<SubmitOutcome> {
        let text = text.trim();
        ensure!(
            !text.is_empty(),
            ValidationSnafu {
                stage: "submit-turn",
                details: "enter a prompt before submitting",
            }
        );

        if let Some(active) = self.state.active_target() {
            tracing::debug!(active = ?active, "rejecting submit while a stream is active");
            return StreamBusySnafu {
                stage: "submit-turn",
                active,
            }
            .fail();
        }

        let session_id = self.alloc_stream_session_id();

        if improve_requested && !ctx.improvement_applied() {
            let target = StreamTarget::improvement(session_id);
            let handle = self
                .backend
                .open_improvement(ImprovementRequest::new(target, text))
                .map_err(|error| {
                    tracing::error!(target = ?target, error = %error, "failed to open improvement stream");
                    ControllerError::from_backend("open-improvement", error)
                })?;

            let outcome = SubmitOutcome::Improving { target };
            self.improvement = MarkerStripper::new();
            self.start_stream(outcome, handle);
            tracing::info!(target = ?target, "improving prompt");
            return Ok(outcome);
        }

        let turn = ctx.allocate_turn();
        let improved_prompt_applied = ctx.take_improvement_applied();
        self.turns
            .push(ConversationTurn::new(turn, text, improved_prompt_applied));
        sink.render_section(
            &SectionKey::new(SectionName::user_input(), turn),
            text,
            false,
        );

        let target = StreamTarget::generation(session_id);
        let handle = match self
            .backend
            .open_generation(GenerationRequest::new(target, text))
        {
            Ok(handle) => handle,
            Err(error) => {
                tracing::error!(turn = ?turn, error = %error, "failed to open generation stream");
                self.set_turn_status(turn, TurnStatus::Error(error.to_string()));
                return Err(ControllerError::from_backend("open-generation", error));
            }
        };

        let outcome = SubmitOutcome::Generating { turn, target };
        self.accumulator = Some(SectionAccumulator::new(turn));
        self.start_stream(outcome, handle);
        tracing::info!(turn = ?turn, target = ?target, improved_prompt_applied, "started turn");
        Ok(outcome)
    }

    /// Drains the active stream until it reaches a terminal state.
    ///
    /// Returns `None` when no stream is open.
    pub async fn run_active_stream(
        &mut self,
        ctx: &mut SessionContext,
        sink: &mut dyn PresentationSink,
        errors: &mut dyn ErrorReporter,
    ) -> Option<StreamOutcome> {
        loop {
            let active = self.active_stream.as_mut()?;
            let target = active.stream.target();
            match active.stream.recv().await {
                Some(envelope) => {
                    if let Some(outcome) = self.handle_stream_event(ctx, envelope, sink, errors) {
                        return Some(outcome);
                    }
                }
                None => return self.handle_stream_closed(ctx, target, errors),
            }
        }
    }

    /// Applies one event. Events for anything but the active stream are dropped.
    pub fn handle_stream_event(
        &mut self,
        ctx: &mut SessionContext,
        envelope: StreamEnvelope,
        sink: &mut dyn PresentationSink,
        errors: &mut dyn ErrorReporter,
    ) -> Option<StreamOutcome> {
        if !self.state.accepts_stream_event(envelope.target) {
            tracing::debug!(target = ?envelope.target, "dropping stale stream event");
            return None;
        }

        match self.state.clone() {
            TurnState::Idle => None,
            TurnState::Improving(target) => {
                self.apply_improvement_event(ctx, target, envelope.event, sink, errors)
            }
            TurnState::Generating { target, turn } => {
                self.apply_generation_event(ctx, target, turn, envelope.event, sink, errors)
            }
        }
    }

    /// Called when the event channel closed. Only a stream that never sent a terminal
    /// event is still active at that point.
    pub fn handle_stream_closed(
        &mut self,
        ctx: &mut SessionContext,
        target: StreamTarget,
        errors: &mut dyn ErrorReporter,
    ) -> Option<StreamOutcome> {
        if !self.state.accepts_stream_event(target) {
            return None;
        }

        let error = ControllerError::Transport {
            stage: "read-stream",
            source: BackendError::StreamClosed {
                stage: "read-stream",
                target,
            },
        };
        tracing::warn!(target = ?target, error = %error, "stream closed early");
        let message = error.to_string();
        errors.report_error(&message);
        Some(self.fail_active_stream(ctx, target, message))
    }

    /// Stops the open stream. Rendered content stays as it is and the turn stays in
    /// history marked as cancelled.
    pub fn cancel_active_stream(&mut self, ctx: &mut SessionContext) -> Option<StreamOutcome> {
        let mut active = self.active_stream.take()?;
        let target = active.stream.target();
        active.stream.cancel();
        active.worker_task.abort();

        if let TurnState::Generating { turn, .. } = self.state {
            self.set_turn_status(turn, TurnStatus::Cancelled);
        }
        ctx.reset_improvement();
        self.finish_stream(target);
        tracing::info!(target = ?target, "cancelled active stream");
        Some(StreamOutcome::Cancelled { target })
    }

    fn apply_improvement_event(
        &mut self,
        ctx: &mut SessionContext,
        target: StreamTarget,
        event: StreamEvent,
        sink: &mut dyn PresentationSink,
        errors: &mut dyn ErrorReporter,
    ) -> Option<StreamOutcome> {
        let section = SectionName::improved_prompt();
        match event {
            StreamEvent::Message {
                section: incoming,
                content,
            } if incoming == section => {
                self.improvement.push_str(&content);
                // Trimmed like the final prompt, so each update only extends the last one.
                let view = streaming_view(&section, self.improvement.as_str()).trim();
                sink.set_prompt_input(view, true);
                None
            }
            StreamEvent::Message {
                section: incoming, ..
            } => {
                tracing::debug!(section = %incoming, "ignoring unexpected section in improvement stream");
                None
            }
            StreamEvent::SectionChange { .. } => None,
            StreamEvent::Complete => {
                let prompt = finalized_view(&section, self.improvement.as_str())
                    .trim()
                    .to_string();
                sink.set_prompt_input(&prompt, false);
                ctx.mark_improvement_applied();
                self.finish_stream(target);
                tracing::info!(target = ?target, "prompt improved");
                Some(StreamOutcome::Improved { prompt })
            }
            StreamEvent::Error { message } => {
                errors.report_error(&message);
                Some(self.fail_active_stream(ctx, target, message))
            }
        }
    }

    fn apply_generation_event(
        &mut self,
        ctx: &mut SessionContext,
        target: StreamTarget,
        turn: TurnId,
        event: StreamEvent,
        sink: &mut dyn PresentationSink,
        errors: &mut dyn ErrorReporter,
    ) -> Option<StreamOutcome> {
        let accumulator = self.accumulator.as_mut()?;
        match accumulator.apply(event, sink, errors) {
            AccumulatorSignal::Continue => None,
            AccumulatorSignal::TurnComplete(turn) => {
                self.set_turn_status(turn, TurnStatus::Done);
                sink.turn_finished(turn);
                self.finish_stream(target);
                tracing::info!(turn = ?turn, "turn completed");
                Some(StreamOutcome::TurnCompleted { turn })
            }
            AccumulatorSignal::Failed { message } => {
                tracing::warn!(turn = ?turn, message = %message, "generation stream failed");
                Some(self.fail_active_stream(ctx, target, message))
            }
        }
    }

    fn fail_active_stream(
        &mut self,
        ctx: &mut SessionContext,
        target: StreamTarget,
        message: String,
    ) -> StreamOutcome {
        let turn = match self.state {
            TurnState::Generating { turn, .. } => Some(turn),
            _ => None,
        };
        if let Some(turn) = turn {
            self.set_turn_status(turn, TurnStatus::Error(message.clone()));
        }
        ctx.reset_improvement();
        self.finish_stream(target);
        StreamOutcome::Failed { turn, message }
    }

    fn start_stream(&mut self, outcome: SubmitOutcome, handle: BackendStreamHandle) {
        match self.state.apply(outcome.start_transition()) {
            Ok(next) => self.state = next,
            Err(rejection) => {
                tracing::warn!(rejection = ?rejection, "stream start rejected");
                return;
            }
        }

        let worker_task = tokio::spawn(handle.worker);
        self.active_stream = Some(ActiveStream {
            stream: handle.stream,
            worker_task,
        });
    }

    fn finish_stream(&mut self, target: StreamTarget) {
        match self.state.apply(TurnTransition::Finish(target)) {
            Ok(next) => self.state = next,
            Err(rejection) => {
                tracing::debug!(rejection = ?rejection, "finish transition rejected");
                return;
            }
        }

        // Dropping the stream signals the worker in case it is still reading.
        self.active_stream = None;
        self.accumulator = None;
    }

    fn set_turn_status(&mut self, turn: TurnId, status: TurnStatus) {
        if let Some(entry) = self.turns.iter_mut().rev().find(|entry| entry.id == turn) {
            entry.status = status;
        }
    }

    fn alloc_stream_session_id(&mut self) -> StreamSessionId {
        let id = StreamSessionId::new(self.next_stream_session_id);
        self.next_stream_session_id = self.next_stream_session_id.saturating_add(1);
        id
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use atlas_backend::{
        BackendResult, BackendWorker, DESCRIPTION_SECTION, IMPROVED_PROMPT_SECTION,
        MACRO_SCRIPT_SECTION, StreamKind, make_event_stream,
    };

    use super::*;
    use crate::chat::{RecordingErrors, RecordingSink};

    #[derive(Default)]
    struct ScriptedBackend {
        generation: Vec<StreamEvent>,
        improvement: Vec<StreamEvent>,
        hold_open: bool,
        requests: Mutex<Vec<(StreamKind, String)>>,
    }

    impl ScriptedBackend {
        fn open(&self, target: StreamTarget, input: &str) -> BackendStreamHandle {
            self.requests
                .lock()
                .expect("requests lock")
                .push((target.kind, input.to_string()));

            let script = match target.kind {
                StreamKind::Generation => &self.generation,
                StreamKind::Improvement => &self.improvement,
            };
            let (event_tx, stream, cancel_rx) = make_event_stream(target);
            for event in script {
                event_tx
                    .send(StreamEnvelope::new(target, event.clone()))
                    .expect("stream alive");
            }

            let hold_open = self.hold_open;
            let worker: BackendWorker = Box::pin(async move {
                if hold_open {
                    let _ = cancel_rx.await;
                }
                drop(event_tx);
            });
            BackendStreamHandle { stream, worker }
        }

        fn requests(&self) -> Vec<(StreamKind, String)> {
            self.requests.lock().expect("requests lock").clone()
        }
    }

    impl GenerationBackend for ScriptedBackend {
        fn open_generation(
            &self,
            request: GenerationRequest,
        ) -> BackendResult<BackendStreamHandle> {
            Ok(self.open(request.target, &request.input))
        }

        fn open_improvement(
            &self,
            request: ImprovementRequest,
        ) -> BackendResult<BackendStreamHandle> {
            Ok(self.open(request.target, &request.input))
        }
    }

    fn full_turn_script() -> Vec<StreamEvent> {
        vec![
            StreamEvent::section_change(DESCRIPTION_SECTION),
            StreamEvent::message(DESCRIPTION_SECTION, "**[DESCRIPTION]** Counts nuclei"),
            StreamEvent::section_change(MACRO_SCRIPT_SECTION),
            StreamEvent::message(MACRO_SCRIPT_SECTION, "```javascript\n// Count\n"),
            StreamEvent::message(MACRO_SCRIPT_SECTION, "run(\"Analyze Particles...\");\n```"),
            StreamEvent::Complete,
        ]
    }

    struct Harness {
        backend: Arc<ScriptedBackend>,
        controller: SessionController,
        ctx: SessionContext,
        sink: RecordingSink,
        errors: RecordingErrors,
    }

    impl Harness {
        fn new(backend: ScriptedBackend) -> Self {
            let backend = Arc::new(backend);
            Self {
                controller: SessionController::new(backend.clone()),
                backend,
                ctx: SessionContext::new(),
                sink: RecordingSink::default(),
                errors: RecordingErrors::default(),
            }
        }

        fn submit(&mut self, text: &str, improve: bool) -> ControllerResult<SubmitOutcome> {
            self.controller
                .submit_turn(&mut self.ctx, text, improve, &mut self.sink)
        }

        async fn run(&mut self) -> Option<StreamOutcome> {
            self.controller
                .run_active_stream(&mut self.ctx, &mut self.sink, &mut self.errors)
                .await
        }
    }

    #[tokio::test]
    async fn turns_are_numbered_and_sections_finalized() {
        let mut harness = Harness::new(ScriptedBackend {
            generation: full_turn_script(),
            ..ScriptedBackend::default()
        });

        let first = harness.submit("count nuclei", false).expect("submit");
        assert_eq!(first.turn(), Some(TurnId::new(1)));
        assert_eq!(
            harness.run().await,
            Some(StreamOutcome::TurnCompleted {
                turn: TurnId::new(1)
            })
        );

        let second = harness.submit("  again  ", false).expect("submit");
        assert_eq!(second.turn(), Some(TurnId::new(2)));
        assert_ne!(first.target(), second.target());
        harness.run().await;

        assert_eq!(
            &harness.sink.finalized()[..3],
            &[
                ("user_input#1".to_string(), "count nuclei".to_string()),
                ("description#1".to_string(), "**** Counts nuclei".to_string()),
                (
                    "macro_script#1".to_string(),
                    "// Count\nrun(\"Analyze Particles...\");\n".to_string()
                ),
            ]
        );
        assert_eq!(harness.sink.finalized()[3].0, "user_input#2");
        assert_eq!(harness.sink.finished, vec![TurnId::new(1), TurnId::new(2)]);

        let turns = harness.controller.turns();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[1].raw_text, "again");
        assert!(turns.iter().all(|turn| turn.status == TurnStatus::Done));
        assert!(!harness.controller.is_streaming());
        assert_eq!(
            harness.backend.requests()[0],
            (StreamKind::Generation, "count nuclei".to_string())
        );
    }

    #[tokio::test]
    async fn concurrent_submit_is_rejected_until_cancelled() {
        let mut harness = Harness::new(ScriptedBackend {
            generation: vec![StreamEvent::message(DESCRIPTION_SECTION, "working")],
            hold_open: true,
            ..ScriptedBackend::default()
        });

        let first = harness.submit("first", false).expect("submit");
        let busy = harness.submit("second", false);
        assert!(matches!(
            busy,
            Err(ControllerError::StreamBusy { active, .. }) if active == first.target()
        ));
        assert_eq!(harness.controller.turns().len(), 1);

        let cancelled = harness.controller.cancel_active_stream(&mut harness.ctx);
        assert_eq!(
            cancelled,
            Some(StreamOutcome::Cancelled {
                target: first.target()
            })
        );
        assert_eq!(harness.controller.turns()[0].status, TurnStatus::Cancelled);
        assert!(harness.controller.cancel_active_stream(&mut harness.ctx).is_none());

        let retry = harness.submit("second", false).expect("idle again");
        assert_eq!(retry.turn(), Some(TurnId::new(2)));
    }

    #[tokio::test]
    async fn improvement_fills_prompt_without_creating_a_turn() {
        let mut harness = Harness::new(ScriptedBackend {
            improvement: vec![
                StreamEvent::message(IMPROVED_PROMPT_SECTION, "Segment "),
                StreamEvent::message(IMPROVED_PROMPT_SECTION, "nuclei in the DAPI channel"),
                StreamEvent::Complete,
            ],
            generation: vec![StreamEvent::Complete],
            ..ScriptedBackend::default()
        });

        let outcome = harness.submit("seg nuclei", true).expect("submit");
        assert!(matches!(outcome, SubmitOutcome::Improving { .. }));
        assert_eq!(
            harness.run().await,
            Some(StreamOutcome::Improved {
                prompt: "Segment nuclei in the DAPI channel".to_string()
            })
        );
        assert!(harness.controller.turns().is_empty());
        assert!(harness.ctx.improvement_applied());
        assert_eq!(
            harness.sink.prompt_inputs,
            vec![
                ("Segment".to_string(), true),
                ("Segment nuclei in the DAPI channel".to_string(), true),
                ("Segment nuclei in the DAPI channel".to_string(), false),
            ]
        );

        // Resubmitting the improved text goes straight to generation.
        let outcome = harness
            .submit("Segment nuclei in the DAPI channel", true)
            .expect("submit");
        assert_eq!(outcome.turn(), Some(TurnId::new(1)));
        assert!(harness.controller.turns()[0].improved_prompt_applied);
        assert!(!harness.ctx.improvement_applied());
        harness.run().await;

        let kinds: Vec<StreamKind> = harness
            .backend
            .requests()
            .into_iter()
            .map(|(kind, _)| kind)
            .collect();
        assert_eq!(kinds, vec![StreamKind::Improvement, StreamKind::Generation]);
    }

    #[tokio::test]
    async fn improved_prompt_updates_only_ever_extend() {
        let mut harness = Harness::new(ScriptedBackend {
            improvement: vec![
                StreamEvent::message(IMPROVED_PROMPT_SECTION, " Segment "),
                StreamEvent::message(IMPROVED_PROMPT_SECTION, "nuclei\n"),
                StreamEvent::Complete,
            ],
            ..ScriptedBackend::default()
        });

        harness.submit("seg", true).expect("submit");
        harness.run().await;

        let inputs = &harness.sink.prompt_inputs;
        assert_eq!(
            inputs,
            &vec![
                ("Segment".to_string(), true),
                ("Segment nuclei".to_string(), true),
                ("Segment nuclei".to_string(), false),
            ]
        );
        for pair in inputs.windows(2) {
            assert!(pair[1].0.starts_with(pair[0].0.as_str()), "{pair:?}");
        }
    }

    #[tokio::test]
    async fn stream_error_keeps_partial_content_and_resets() {
        let mut harness = Harness::new(ScriptedBackend {
            generation: vec![
                StreamEvent::section_change(DESCRIPTION_SECTION),
                StreamEvent::message(DESCRIPTION_SECTION, "partial"),
                StreamEvent::error("model overloaded"),
            ],
            ..ScriptedBackend::default()
        });

        harness.submit("count", false).expect("submit");
        let outcome = harness.run().await;

        assert_eq!(
            outcome,
            Some(StreamOutcome::Failed {
                turn: Some(TurnId::new(1)),
                message: "model overloaded".to_string()
            })
        );
        assert_eq!(harness.errors.messages, vec!["model overloaded".to_string()]);
        assert_eq!(
            harness.sink.finalized(),
            vec![("user_input#1".to_string(), "count".to_string())]
        );
        assert_eq!(
            harness.controller.turns()[0].status,
            TurnStatus::Error("model overloaded".to_string())
        );
        assert!(!harness.controller.is_streaming());
        assert!(!harness.ctx.improvement_applied());
    }

    #[tokio::test]
    async fn improvement_error_leaves_flag_clear() {
        let mut harness = Harness::new(ScriptedBackend {
            improvement: vec![StreamEvent::error("improver unavailable")],
            ..ScriptedBackend::default()
        });

        harness.submit("seg", true).expect("submit");
        let outcome = harness.run().await;

        assert!(matches!(
            outcome,
            Some(StreamOutcome::Failed { turn: None, .. })
        ));
        assert!(!harness.ctx.improvement_applied());
        assert!(harness.controller.turns().is_empty());
        assert!(harness.controller.state().is_idle());
    }

    #[tokio::test]
    async fn stream_closing_early_is_reported_once() {
        let mut harness = Harness::new(ScriptedBackend {
            generation: vec![StreamEvent::message(DESCRIPTION_SECTION, "half")],
            ..ScriptedBackend::default()
        });

        harness.submit("count", false).expect("submit");
        let outcome = harness.run().await;

        assert!(outcome.as_ref().is_some_and(StreamOutcome::is_failure));
        assert_eq!(harness.errors.messages.len(), 1);
        assert!(
            harness.errors.messages[0].contains("ended before a terminal event"),
            "{}",
            harness.errors.messages[0]
        );
        assert_eq!(harness.run().await, None);
    }

    #[tokio::test]
    async fn stale_events_are_ignored() {
        let mut harness = Harness::new(ScriptedBackend {
            hold_open: true,
            ..ScriptedBackend::default()
        });
        harness.submit("count", false).expect("submit");
        let renders_before = harness.sink.renders.len();

        let stale = StreamEnvelope::new(
            StreamTarget::generation(StreamSessionId::new(99)),
            StreamEvent::message(DESCRIPTION_SECTION, "leak"),
        );
        let outcome = harness.controller.handle_stream_event(
            &mut harness.ctx,
            stale,
            &mut harness.sink,
            &mut harness.errors,
        );

        assert_eq!(outcome, None);
        assert_eq!(harness.sink.renders.len(), renders_before);
        harness.controller.cancel_active_stream(&mut harness.ctx);
    }

    #[test]
    fn blank_prompt_is_a_validation_error() {
        let mut controller = SessionController::new(Arc::new(ScriptedBackend::default()));
        let mut ctx = SessionContext::new();
        let mut sink = RecordingSink::default();

        let result = controller.submit_turn(&mut ctx, "   ", false, &mut sink);

        assert!(matches!(result, Err(ControllerError::Validation { .. })));
        assert!(sink.renders.is_empty());
        assert_eq!(ctx.last_turn(), None);
    }
}
