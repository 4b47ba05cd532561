use crate::chat::{SectionKey, TurnId};

/// Renders section content; the controller never touches presentation details itself.
pub trait PresentationSink {
    /// Replaces the content shown for `key`. `is_streaming` is false exactly once per
    /// finalization.
    fn render_section(&mut self, key: &SectionKey, content: &str, is_streaming: bool);

    /// Places text into the editable prompt input.
    fn set_prompt_input(&mut self, text: &str, is_streaming: bool);

    /// Called once a generation turn completes normally.
    fn turn_finished(&mut self, _turn: TurnId) {}
}

/// Receives user-visible error messages.
pub trait ErrorReporter {
    fn report_error(&mut self, message: &str);
}

/// Sink that only logs, for headless runs where nothing is displayed.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl PresentationSink for TracingSink {
    fn render_section(&mut self, key: &SectionKey, content: &str, is_streaming: bool) {
        tracing::trace!(key = %key, is_streaming, length = content.len(), "render section");
    }

    fn set_prompt_input(&mut self, text: &str, is_streaming: bool) {
        tracing::trace!(is_streaming, length = text.len(), "set prompt input");
    }
}

impl ErrorReporter for TracingSink {
    fn report_error(&mut self, message: &str) {
        tracing::warn!(message, "user-visible error");
    }
}
