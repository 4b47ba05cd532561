mod accumulator;
mod events;
mod section;
mod session;
mod turn;

pub use accumulator::{AccumulatorSignal, SectionAccumulator};
pub use events::{StreamOutcome, SubmitOutcome};
pub use section::{
    COMMENT_MARKER, GENERATED_SCRIPT_HEADER, MarkerStripper, STRUCTURAL_MARKERS, SectionKey,
    clean_section, finalize_section,
};
pub use session::SessionController;
pub use turn::{
    ConversationTurn, TurnId, TurnState, TurnStatus, TurnTransition, TurnTransitionRejection,
    TurnTransitionResult,
};

#[cfg(test)]
pub(crate) use accumulator::tests::{RecordingErrors, RecordingSink};
