use std::collections::HashMap;

use atlas_backend::{SectionName, StreamEvent};

use crate::chat::section::{MarkerStripper, SectionKey, finalized_view, streaming_view};
use crate::chat::turn::TurnId;
use crate::sink::{ErrorReporter, PresentationSink};

/// Result of applying one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccumulatorSignal {
    Continue,
    TurnComplete(TurnId),
    Failed { message: String },
}

#[derive(Debug, Default)]
struct SectionBuffer {
    raw: String,
    stripper: MarkerStripper,
}

impl SectionBuffer {
    fn append(&mut self, content: &str) {
        self.raw.push_str(content);
        self.stripper.push_str(content);
    }
}

/// Per-turn section buffers fed by one generation stream.
///
/// Events must be applied in arrival order; once a terminal event has been applied the
/// accumulator ignores anything else.
#[derive(Debug)]
pub struct SectionAccumulator {
    turn: TurnId,
    buffers: HashMap<SectionKey, SectionBuffer>,
    open: Option<SectionKey>,
    closed: bool,
}

impl SectionAccumulator {
    pub fn new(turn: TurnId) -> Self {
        Self {
            turn,
            buffers: HashMap::new(),
            open: None,
            closed: false,
        }
    }

    pub fn turn(&self) -> TurnId {
        self.turn
    }

    pub fn open_key(&self) -> Option<&SectionKey> {
        self.open.as_ref()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Everything received for `key`, before cleaning.
    pub fn raw_buffer(&self, key: &SectionKey) -> Option<&str> {
        self.buffers.get(key).map(|buffer| buffer.raw.as_str())
    }

    pub fn apply(
        &mut self,
        event: StreamEvent,
        sink: &mut dyn PresentationSink,
        errors: &mut dyn ErrorReporter,
    ) -> AccumulatorSignal {
        if self.closed {
            tracing::debug!(turn = ?self.turn, event = ?event, "ignoring event after terminal");
            return AccumulatorSignal::Continue;
        }

        match event {
            StreamEvent::SectionChange { section } => {
                self.finalize_open(sink);
                let key = self.key_for(section);
                // A section announced twice continues its buffer so rendered text never shrinks.
                self.buffers.entry(key.clone()).or_default();
                self.open = Some(key);
                AccumulatorSignal::Continue
            }
            StreamEvent::Message { section, content } => {
                let key = self.key_for(section);
                // A message for another section switches to it as a section change would.
                if self.open.as_ref().is_some_and(|open| *open != key) {
                    self.finalize_open(sink);
                }
                let buffer = self.buffers.entry(key.clone()).or_default();
                buffer.append(&content);
                let view = streaming_view(&key.section, buffer.stripper.as_str());
                sink.render_section(&key, view, true);
                self.open = Some(key);
                AccumulatorSignal::Continue
            }
            StreamEvent::Complete => {
                self.finalize_open(sink);
                self.closed = true;
                AccumulatorSignal::TurnComplete(self.turn)
            }
            StreamEvent::Error { message } => {
                errors.report_error(&message);
                self.closed = true;
                AccumulatorSignal::Failed { message }
            }
        }
    }

    fn key_for(&self, section: SectionName) -> SectionKey {
        SectionKey::new(section, self.turn)
    }

    fn finalize_open(&mut self, sink: &mut dyn PresentationSink) {
        let Some(key) = self.open.take() else {
            return;
        };
        let content = self
            .buffers
            .get(&key)
            .map(|buffer| finalized_view(&key.section, buffer.stripper.as_str()))
            .unwrap_or_default();
        tracing::debug!(key = %key, length = content.len(), "finalized section");
        sink.render_section(&key, &content, false);
    }
}
