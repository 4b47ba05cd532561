use atlas_backend::StreamTarget;

/// Stable identifier for one turn, assigned at submission time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TurnId(pub u64);

impl TurnId {
    /// Creates a typed turn identifier.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

/// Lifecycle status for one turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnStatus {
    Streaming,
    Done,
    Error(String),
    Cancelled,
}

/// One user-initiated generation cycle. Turn history is append-only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationTurn {
    pub id: TurnId,
    pub raw_text: String,
    pub improved_prompt_applied: bool,
    pub status: TurnStatus,
}

impl ConversationTurn {
    pub fn new(id: TurnId, raw_text: impl Into<String>, improved_prompt_applied: bool) -> Self {
        Self {
            id,
            raw_text: raw_text.into(),
            improved_prompt_applied,
            status: TurnStatus::Streaming,
        }
    }
}

/// Controller state: `Idle → Improving → Idle` or `Idle → Generating → Idle`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TurnState {
    #[default]
    Idle,
    Improving(StreamTarget),
    Generating { target: StreamTarget, turn: TurnId },
}

/// State transition input for the turn lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnTransition {
    StartImprovement(StreamTarget),
    StartGeneration { target: StreamTarget, turn: TurnId },
    /// Completion, failure and cancellation all return to idle; they differ only in what
    /// the controller records on the turn.
    Finish(StreamTarget),
}

/// Rejection reason for illegal transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnTransitionRejection {
    AlreadyStreaming {
        active: StreamTarget,
        attempted: StreamTarget,
    },
    NoActiveStream,
    SessionMismatch {
        active: StreamTarget,
        attempted: StreamTarget,
    },
}

pub type TurnTransitionResult = Result<TurnState, TurnTransitionRejection>;

impl TurnState {
    /// Returns the active stream target if one is open.
    pub fn active_target(&self) -> Option<StreamTarget> {
        match self {
            Self::Idle => None,
            Self::Improving(target) | Self::Generating { target, .. } => Some(*target),
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Returns true when an incoming event belongs to the active stream.
    pub fn accepts_stream_event(&self, target: StreamTarget) -> bool {
        self.active_target() == Some(target)
    }

    /// Applies one transition deterministically.
    ///
    /// Only `Idle` may start a stream; `Finish` must name the active stream exactly.
    pub fn apply(&self, transition: TurnTransition) -> TurnTransitionResult {
        match transition {
            TurnTransition::StartImprovement(target) => {
                self.apply_start(target, Self::Improving(target))
            }
            TurnTransition::StartGeneration { target, turn } => {
                self.apply_start(target, Self::Generating { target, turn })
            }
            TurnTransition::Finish(target) => self.apply_finish(target),
        }
    }

    fn apply_start(&self, target: StreamTarget, next: TurnState) -> TurnTransitionResult {
        match self.active_target() {
            Some(active) => Err(TurnTransitionRejection::AlreadyStreaming {
                active,
                attempted: target,
            }),
            None => Ok(next),
        }
    }

    fn apply_finish(&self, target: StreamTarget) -> TurnTransitionResult {
        match self.active_target() {
            Some(active) if active == target => Ok(Self::Idle),
            Some(active) => Err(TurnTransitionRejection::SessionMismatch {
                active,
                attempted: target,
            }),
            None => Err(TurnTransitionRejection::NoActiveStream),
        }
    }
}
