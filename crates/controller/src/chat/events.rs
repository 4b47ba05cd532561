use atlas_backend::StreamTarget;

use crate::chat::turn::{TurnId, TurnTransition};

/// What a successful submission started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The prompt is being rewritten; no turn exists yet.
    Improving { target: StreamTarget },
    Generating { turn: TurnId, target: StreamTarget },
}

impl SubmitOutcome {
    pub fn target(&self) -> StreamTarget {
        match self {
            Self::Improving { target } | Self::Generating { target, .. } => *target,
        }
    }

    pub fn turn(&self) -> Option<TurnId> {
        match self {
            Self::Improving { .. } => None,
            Self::Generating { turn, .. } => Some(*turn),
        }
    }

    /// Returns the state transition that opens this stream.
    pub fn start_transition(&self) -> TurnTransition {
        match *self {
            Self::Improving { target } => TurnTransition::StartImprovement(target),
            Self::Generating { turn, target } => TurnTransition::StartGeneration { target, turn },
        }
    }
}

/// How an active stream ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    /// The improvement stream finished; `prompt` is now in the editable input.
    Improved { prompt: String },
    TurnCompleted { turn: TurnId },
    Failed {
        turn: Option<TurnId>,
        message: String,
    },
    Cancelled { target: StreamTarget },
}

impl StreamOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atlas_backend::StreamSessionId;

    #[test]
    fn submit_outcome_maps_to_start_transition() {
        let target = StreamTarget::generation(StreamSessionId::new(5));
        let outcome = SubmitOutcome::Generating {
            turn: TurnId::new(2),
            target,
        };

        assert_eq!(outcome.target(), target);
        assert_eq!(outcome.turn(), Some(TurnId::new(2)));
        assert_eq!(
            outcome.start_transition(),
            TurnTransition::StartGeneration {
                target,
                turn: TurnId::new(2),
            }
        );

        let improving = SubmitOutcome::Improving {
            target: StreamTarget::improvement(StreamSessionId::new(6)),
        };
        assert_eq!(improving.turn(), None);
    }
}
