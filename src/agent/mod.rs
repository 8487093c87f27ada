// src/agent/mod.rs
// Gemini-backed writing stages: document analyses, brief synthesis and the script writer
pub mod analysis;
pub mod writer;

pub use analysis::{AcademicAgent, SocialAgent, SynthesisAgent};
pub use writer::ScriptAgent;

/// Characters of document text sent to the model per analysis
pub const MAX_PROMPT_TEXT_CHARS: usize = 100_000;

/// First `max_chars` characters of `text`, never splitting a code point
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_chars_respects_code_points() {
        assert_eq!(truncate_chars("ação", 2), "aç");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("", 0), "");
    }
}
