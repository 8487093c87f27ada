// script.rs - Parsing of drafted scripts: visual cues and speakable narration
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// `**Visual:** cue` or `**Visual**: cue`; the cue may also start on the next line
    static ref BOLD_VISUAL: Regex =
        Regex::new(r"(?im)\*\*\s*visual\s*(?::\s*\*\*|\*\*\s*:)[ \t]*\r?\n?[ \t]*(.+)$").unwrap();
    /// Inline `[Visual: cue]`
    static ref BRACKET_VISUAL: Regex = Regex::new(r"(?i)\[\s*visual\s*:\s*([^\]]+)\]").unwrap();
    /// A line starting with `Visual:`, list markers allowed
    static ref BARE_VISUAL: Regex =
        Regex::new(r"(?im)^[ \t>*_\-•\d.)]*visual[ \t]*:[ \t]*(.+)$").unwrap();

    static ref CUE_LINE: Regex =
        Regex::new(r"(?i)^[\s>*_\-•]*(?:visual|tempo|time|cena|scene)\s*(?:\*\*)?\s*:").unwrap();
    static ref BRACKET_TAG: Regex = Regex::new(r"(?i)\[\s*visual\s*:[^\]]*\]").unwrap();
    static ref LABEL_PREFIX: Regex = Regex::new(
        r"(?i)^[\s>*_\-•]*(?:texto|text|narra[çc][ãa]o|narration)\s*(?:\*\*)?\s*:\s*(?:\*\*)?\s*"
    )
    .unwrap();
}

fn clean_cue(raw: &str) -> Option<String> {
    let cue = raw.replace('*', "");
    let cue = cue.trim();
    if cue.is_empty() {
        None
    } else {
        Some(cue.to_string())
    }
}

fn collect(pattern: &Regex, script: &str) -> Vec<String> {
    pattern
        .captures_iter(script)
        .filter_map(|caps| caps.get(1))
        .filter_map(|m| clean_cue(m.as_str()))
        .collect()
}

/// Ordered visual cues of a script. The encodings are tried in order
/// (bold label, bracketed tag, bare line prefix); the first one that yields
/// any cue wins.
pub fn extract_visual_cues(script: &str) -> Vec<String> {
    for pattern in [&*BOLD_VISUAL, &*BRACKET_VISUAL, &*BARE_VISUAL] {
        let cues = collect(pattern, script);
        if !cues.is_empty() {
            return cues;
        }
    }
    Vec::new()
}

/// Text to be spoken: cue and timing lines removed, label prefixes stripped,
/// empty lines dropped.
pub fn narration_text(script: &str) -> String {
    script
        .lines()
        .filter(|line| !CUE_LINE.is_match(line))
        .map(|line| {
            let line = BRACKET_TAG.replace_all(line, "");
            let line = LABEL_PREFIX.replace(&line, "");
            line.replace("**", "").trim().to_string()
        })
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
