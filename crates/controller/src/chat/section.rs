//! Section keys and the cleaning applied to raw section text before it is rendered.
//!
//! Cleaning has to be safe to run on every partial buffer of a stream: for a buffer that
//! only ever grows, each cleaned view extends the previous one. Marker removal is done
//! with a stack (a marker is dropped the moment it is completed), and any tail that could
//! still turn into a marker is held back until the next chunk decides it.

use std::fmt;

use atlas_backend::SectionName;

use super::turn::TurnId;

/// Tokens the generator uses to frame its output.
pub const STRUCTURAL_MARKERS: [&str; 3] = ["[DESCRIPTION]", "[EXPLANATION]", "```"];
/// Start of actual code in the macro script section.
pub const COMMENT_MARKER: &str = "//";
/// Prepended to a finalized script that never contained a comment.
pub const GENERATED_SCRIPT_HEADER: &str = "// Generated ImageJ Macro\n";

/// One render target and one accumulation buffer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SectionKey {
    pub section: SectionName,
    pub turn: TurnId,
}

impl SectionKey {
    pub fn new(section: SectionName, turn: TurnId) -> Self {
        Self { section, turn }
    }
}

impl fmt::Display for SectionKey {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}#{}", self.section, self.turn.0)
    }
}

/// Incremental marker removal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarkerStripper {
    stripped: String,
}

impl MarkerStripper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_str(&mut self, chunk: &str) {
        for ch in chunk.chars() {
            self.stripped.push(ch);
            // Pushing one char can complete at most one marker, and only as a suffix.
            if let Some(marker) = STRUCTURAL_MARKERS
                .iter()
                .find(|marker| self.stripped.ends_with(*marker))
            {
                let keep = self.stripped.len() - marker.len();
                self.stripped.truncate(keep);
            }
        }
    }

    pub fn as_str(&self) -> &str {
        &self.stripped
    }
}

/// The view shown while a section is still streaming.
pub fn clean_section(section: &SectionName, raw: &str) -> String {
    let mut stripper = MarkerStripper::new();
    stripper.push_str(raw);
    streaming_view(section, stripper.as_str()).to_string()
}

/// The view flushed when a section is finalized.
///
/// Unlike the streaming view it releases held-back tails, since no more text will arrive.
pub fn finalize_section(section: &SectionName, raw: &str) -> String {
    let mut stripper = MarkerStripper::new();
    stripper.push_str(raw);
    finalized_view(section, stripper.as_str())
}

pub(crate) fn streaming_view<'a>(section: &SectionName, stripped: &'a str) -> &'a str {
    let visible = trim_partial_markers(stripped);
    if !section.is_macro_script() {
        return visible;
    }

    match visible.find(COMMENT_MARKER) {
        Some(start) => &visible[start..],
        None => "",
    }
}

pub(crate) fn finalized_view(section: &SectionName, stripped: &str) -> String {
    if !section.is_macro_script() {
        return stripped.to_string();
    }

    match stripped.find(COMMENT_MARKER) {
        Some(start) => stripped[start..].to_string(),
        None if stripped.trim().is_empty() => String::new(),
        None => format!("{GENERATED_SCRIPT_HEADER}{}", stripped.trim_start()),
    }
}

fn trim_partial_markers(text: &str) -> &str {
    let mut visible = text;
    while let Some(cut) = longest_partial_suffix(visible) {
        visible = &visible[..visible.len() - cut];
    }
    visible
}

/// Length of the longest suffix that is a proper, non-empty prefix of some marker.
fn longest_partial_suffix(text: &str) -> Option<usize> {
    STRUCTURAL_MARKERS
        .iter()
        .filter_map(|marker| {
            (1..marker.len())
                .rev()
                .find(|len| text.ends_with(&marker[..*len]))
        })
        .max()
}

#[cfg(test)]
mod tests {
    use super::*;
    use atlas_backend::{DESCRIPTION_SECTION, MACRO_SCRIPT_SECTION};

    fn description() -> SectionName {
        SectionName::new(DESCRIPTION_SECTION)
    }

    fn script() -> SectionName {
        SectionName::new(MACRO_SCRIPT_SECTION)
    }

    fn char_prefixes(raw: &str) -> Vec<&str> {
        raw.char_indices()
            .map(|(idx, _)| &raw[..idx])
            .chain(std::iter::once(raw))
            .collect()
    }

    /// Every streaming view must extend the previous one, and the final view must extend
    /// the last streaming view.
    fn assert_monotonic(section: &SectionName, raw: &str) {
        let mut previous = String::new();
        for prefix in char_prefixes(raw) {
            let view = clean_section(section, prefix);
            assert!(
                view.starts_with(&previous),
                "view {view:?} for prefix {prefix:?} dropped {previous:?}"
            );
            previous = view;
        }
        let finalized = finalize_section(section, raw);
        assert!(finalized.starts_with(&previous), "final {finalized:?} dropped {previous:?}");
    }

    const SAMPLES: [&str; 6] = [
        "**[DESCRIPTION]** Counts nuclei per channel.\n",
        "```javascript\n// Initialize\nsetBatchMode(true);\n```\n",
        "[EX``[EXPLANATION]`done",
        "[DESC```RIPTION] joined markers",
        "url: http://example.org then // comment",
        "µm scale [DESCRIPTION",
    ];

    #[test]
    fn markers_are_removed_from_descriptions() {
        assert_eq!(
            clean_section(&description(), "**[DESCRIPTION]** Counts nuclei."),
            "**** Counts nuclei."
        );
        assert_eq!(
            clean_section(&description(), "Result[EXPLANATION] follows"),
            "Result follows"
        );
    }

    #[test]
    fn script_view_starts_at_first_comment() {
        let raw = "```javascript\n// Initialize\nsetBatchMode(true);\n```";
        assert_eq!(
            clean_section(&script(), raw),
            "// Initialize\nsetBatchMode(true);\n"
        );
        assert_eq!(clean_section(&script(), "```javascript\nsetBatch"), "");
    }

    #[test]
    fn partial_marker_tail_is_held_back_while_streaming() {
        assert_eq!(clean_section(&description(), "Done [EXPL"), "Done ");
        assert_eq!(clean_section(&description(), "Done [EXPLX"), "Done [EXPLX");
        assert_eq!(finalize_section(&description(), "Done [EXPL"), "Done [EXPL");
    }

    #[test]
    fn joined_markers_are_removed_too() {
        assert_eq!(
            clean_section(&description(), "[DESC```RIPTION] joined"),
            " joined"
        );
    }

    #[test]
    fn cleaning_is_idempotent() {
        for section in [description(), script()] {
            for raw in SAMPLES {
                for prefix in char_prefixes(raw) {
                    let once = clean_section(&section, prefix);
                    assert_eq!(clean_section(&section, &once), once, "raw {prefix:?}");

                    let finalized = finalize_section(&section, prefix);
                    assert_eq!(finalize_section(&section, &finalized), finalized);
                }
            }
        }
    }

    #[test]
    fn cleaning_never_retracts_rendered_text() {
        for section in [description(), script()] {
            for raw in SAMPLES {
                assert_monotonic(&section, raw);
            }
        }
    }

    #[test]
    fn script_without_comment_gets_generated_header_on_finalize() {
        assert_eq!(
            finalize_section(&script(), "```\nrun(\"Invert\");\n```"),
            "// Generated ImageJ Macro\nrun(\"Invert\");\n"
        );
        assert_eq!(finalize_section(&script(), "```\n```"), "");
    }

    #[test]
    fn incremental_stripping_matches_one_shot() {
        let raw = "[DESCRIPTION] a ``` b [EXPLANATION] c";
        let mut stripper = MarkerStripper::new();
        for chunk in ["[DESCRI", "PTION] a `", "`` b [EXPLAN", "ATION] c"] {
            stripper.push_str(chunk);
        }
        let mut one_shot = MarkerStripper::new();
        one_shot.push_str(raw);
        assert_eq!(stripper, one_shot);
        assert_eq!(stripper.as_str(), " a  b  c");
    }

    #[test]
    fn keys_display_section_and_turn() {
        let key = SectionKey::new(description(), TurnId::new(2));
        assert_eq!(key.to_string(), "description#2");
    }
}
