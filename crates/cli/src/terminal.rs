//! Terminal renderings of the controller's presentation capabilities.

use std::io::Write;

use atlas_controller::attachments::{
    AttachedFile, Attachment, AttachmentContext, AttachmentSurface,
};
use atlas_controller::chat::{SectionKey, TurnId};
use atlas_controller::{ErrorReporter, PresentationSink};

const IMPROVED_PROMPT_HEADER: &str = "[improved prompt]";

/// What is currently printed on the open line.
#[derive(Debug, Clone, PartialEq, Eq)]
enum OpenLine {
    Section(SectionKey),
    Prompt,
}

/// Prints sections as they stream: a `[section #turn]` header, then each new piece of
/// cleaned text inline.
pub struct TerminalSink<W: Write> {
    out: W,
    open: Option<(OpenLine, String)>,
    finalized: Vec<(SectionKey, String)>,
    prompt: Option<String>,
}

impl<W: Write> TerminalSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            open: None,
            finalized: Vec::new(),
            prompt: None,
        }
    }

    /// Finalized content of `section` in `turn`, if it was rendered.
    pub fn finalized(&self, turn: TurnId, section: &str) -> Option<&str> {
        self.finalized
            .iter()
            .rev()
            .find(|(key, _)| key.turn == turn && key.section.as_str() == section)
            .map(|(_, content)| content.as_str())
    }

    /// The last improved prompt placed into the input.
    #[cfg(test)]
    pub fn prompt(&self) -> Option<&str> {
        self.prompt.as_deref()
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_delta(&mut self, line: OpenLine, header: String, content: &str, is_streaming: bool) {
        let printed = match self.open.take() {
            Some((open, printed)) if open == line => printed,
            Some(_) => {
                self.emit("\n");
                self.emit(&format!("{header}\n"));
                String::new()
            }
            None => {
                self.emit(&format!("{header}\n"));
                String::new()
            }
        };

        match content.strip_prefix(printed.as_str()) {
            Some(delta) => self.emit(delta),
            None => {
                // Only a new stream for the same target can shrink the text; start over.
                self.emit(&format!("\n{header}\n{content}"));
            }
        }

        if is_streaming {
            self.open = Some((line, content.to_string()));
        } else {
            self.emit("\n");
        }
    }

    fn emit(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        if let Err(error) = self
            .out
            .write_all(text.as_bytes())
            .and_then(|()| self.out.flush())
        {
            tracing::warn!(error = %error, "failed to write to terminal");
        }
    }
}

impl<W: Write> PresentationSink for TerminalSink<W> {
    fn render_section(&mut self, key: &SectionKey, content: &str, is_streaming: bool) {
        let header = format!("[{} #{}]", key.section, key.turn.0);
        self.write_delta(
            OpenLine::Section(key.clone()),
            header,
            content,
            is_streaming,
        );
        if !is_streaming {
            self.finalized.push((key.clone(), content.to_string()));
        }
    }

    fn set_prompt_input(&mut self, text: &str, is_streaming: bool) {
        self.write_delta(
            OpenLine::Prompt,
            IMPROVED_PROMPT_HEADER.to_string(),
            text,
            is_streaming,
        );
        if !is_streaming {
            self.prompt = Some(text.to_string());
        }
    }

    fn turn_finished(&mut self, turn: TurnId) {
        tracing::debug!(turn = ?turn, "turn rendered");
    }
}

/// Reports errors on stderr and counts them.
#[derive(Debug, Default)]
pub struct StderrReporter {
    reported: usize,
}

impl StderrReporter {
    pub fn reported(&self) -> usize {
        self.reported
    }
}

impl ErrorReporter for StderrReporter {
    fn report_error(&mut self, message: &str) {
        self.reported += 1;
        eprintln!("error: {message}");
    }
}

/// Stands in for a file-selection control: prints what the selection now holds.
#[derive(Debug, Default)]
pub struct TerminalSurface;

impl AttachmentSurface for TerminalSurface {
    fn sync_selection(&mut self, context: AttachmentContext, files: &[AttachedFile]) {
        let names: Vec<&str> = files.iter().map(|file| file.name.as_str()).collect();
        eprintln!("[{context}] selection: {}", names.join(", "));
    }

    fn show_preview(&mut self, attachment: &Attachment) {
        let state = match attachment.preview.encoded() {
            Some(data) => format!("preview ready, {} bytes encoded", data.len()),
            None => "no preview yet".to_string(),
        };
        eprintln!(
            "[{}] {} ({state})",
            attachment.context,
            attachment.file.name
        );
    }

    fn remove_preview(&mut self, context: AttachmentContext, file: &AttachedFile) {
        eprintln!("[{context}] removed {}", file.name);
    }
}
