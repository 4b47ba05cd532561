use std::fmt;

/// Section that carries the user's own text for a turn.
pub const USER_INPUT_SECTION: &str = "user_input";
pub const DESCRIPTION_SECTION: &str = "description";
/// Section whose content is the executable macro script.
pub const MACRO_SCRIPT_SECTION: &str = "macro_script";
pub const EXPLANATION_SECTION: &str = "explanation";
/// The only section an improvement stream produces.
pub const IMPROVED_PROMPT_SECTION: &str = "improved_prompt";

/// Named content category inside one turn's streamed output.
///
/// Names are dynamic: the backend decides which sections exist, so this is a
/// thin wrapper rather than a closed enum.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SectionName(String);

impl SectionName {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn user_input() -> Self {
        Self::new(USER_INPUT_SECTION)
    }

    pub fn improved_prompt() -> Self {
        Self::new(IMPROVED_PROMPT_SECTION)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for the section whose cleaned view starts at the first comment marker.
    pub fn is_macro_script(&self) -> bool {
        self.0 == MACRO_SCRIPT_SECTION
    }
}

impl fmt::Display for SectionName {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

impl From<&str> for SectionName {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Identifier for one opened stream.
///
/// Changes on every open so chunks from a cancelled or superseded stream can be rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamSessionId(pub u64);

impl StreamSessionId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

/// Which endpoint a stream was opened against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Generation,
    Improvement,
}

/// Stream routing key used for stale-event rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamTarget {
    pub session_id: StreamSessionId,
    pub kind: StreamKind,
}

impl StreamTarget {
    pub const fn new(session_id: StreamSessionId, kind: StreamKind) -> Self {
        Self { session_id, kind }
    }

    pub const fn generation(session_id: StreamSessionId) -> Self {
        Self::new(session_id, StreamKind::Generation)
    }

    pub const fn improvement(session_id: StreamSessionId) -> Self {
        Self::new(session_id, StreamKind::Improvement)
    }
}

/// One framed event from a generation or improvement stream, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    SectionChange {
        section: SectionName,
    },
    Message {
        section: SectionName,
        content: String,
    },
    Complete,
    Error {
        message: String,
    },
}

impl StreamEvent {
    pub fn section_change(section: impl Into<String>) -> Self {
        Self::SectionChange {
            section: SectionName::new(section),
        }
    }

    pub fn message(section: impl Into<String>, content: impl Into<String>) -> Self {
        Self::Message {
            section: SectionName::new(section),
            content: content.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// `Complete` and `Error` end a stream; nothing after them is read.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Error { .. })
    }
}

/// A stream event tagged with the stream that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEnvelope {
    pub target: StreamTarget,
    pub event: StreamEvent,
}

impl StreamEnvelope {
    pub fn new(target: StreamTarget, event: StreamEvent) -> Self {
        Self { target, event }
    }
}
