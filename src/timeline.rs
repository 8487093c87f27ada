// timeline.rs - Synchronizes visuals and caption overlays against the narration track
use crate::types::CaptionWord;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_CAPTION_CHUNK_SIZE: usize = 4;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ComposeError {
    #[error("no visuals to place on the timeline")]
    NoVisuals,
    #[error("invalid narration duration: {0}")]
    InvalidDuration(f64),
}

/// One visual on screen for `[start, end)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualSpan {
    pub path: String,
    pub start: f64,
    pub end: f64,
}

impl VisualSpan {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// A group of consecutive caption words shown together
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptionOverlay {
    pub text: String,
    pub start: f64,
    pub end: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timeline {
    pub duration: f64,
    pub visuals: Vec<VisualSpan>,
    pub captions: Vec<CaptionOverlay>,
}

impl Timeline {
    pub fn has_captions(&self) -> bool {
        !self.captions.is_empty()
    }

    /// Same visual track with every caption removed
    pub fn without_captions(&self) -> Timeline {
        Timeline {
            duration: self.duration,
            visuals: self.visuals.clone(),
            captions: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TimelineComposer {
    chunk_size: usize,
}

impl Default for TimelineComposer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPTION_CHUNK_SIZE)
    }
}

impl TimelineComposer {
    /// Chunk sizes below 1 are treated as 1
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Equal back-to-back spans covering `[0, duration]`; the last one ends exactly at `duration`
    pub fn layout_visuals(&self, duration: f64, visuals: &[String]) -> Result<Vec<VisualSpan>, ComposeError> {
        if !duration.is_finite() || duration <= 0.0 {
            return Err(ComposeError::InvalidDuration(duration));
        }
        if visuals.is_empty() {
            return Err(ComposeError::NoVisuals);
        }

        let count = visuals.len();
        let slot = duration / count as f64;
        let spans = visuals
            .iter()
            .enumerate()
            .map(|(i, path)| {
                let start = slot * i as f64;
                let end = if i + 1 == count { duration } else { slot * (i + 1) as f64 };
                VisualSpan {
                    path: path.clone(),
                    start,
                    end,
                }
            })
            .collect();
        Ok(spans)
    }

    pub fn group_captions(&self, words: &[CaptionWord]) -> Vec<CaptionOverlay> {
        words
            .chunks(self.chunk_size)
            .filter_map(|group| {
                let first = group.first()?;
                let last = group.last()?;
                let text = group
                    .iter()
                    .map(|w| w.text.trim())
                    .filter(|t| !t.is_empty())
                    .collect::<Vec<_>>()
                    .join(" ");
                Some(CaptionOverlay {
                    text,
                    start: first.start,
                    end: last.end,
                })
            })
            .collect()
    }

    pub fn compose(
        &self,
        duration: f64,
        visuals: &[String],
        words: Option<&[CaptionWord]>,
    ) -> Result<Timeline, ComposeError> {
        let visuals = self.layout_visuals(duration, visuals)?;
        let captions = words.map(|w| self.group_captions(w)).unwrap_or_default();

        tracing::info!(
            "🎞️ Composed timeline: {:.2}s, {} visuals ({:.2}s each), {} caption groups",
            duration,
            visuals.len(),
            visuals.first().map(|v| v.duration()).unwrap_or_default(),
            captions.len()
        );

        Ok(Timeline {
            duration,
            visuals,
            captions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("frame_{}.png", i)).collect()
    }

    fn words(n: usize) -> Vec<CaptionWord> {
        (0..n)
            .map(|i| CaptionWord::new(format!("w{}", i), i as f64 * 0.5, i as f64 * 0.5 + 0.4))
            .collect()
    }

    #[test]
    fn test_visuals_split_duration_evenly() {
        let composer = TimelineComposer::default();
        let spans = composer.layout_visuals(180.0, &frames(6)).unwrap();

        assert_eq!(spans.len(), 6);
        for (i, span) in spans.iter().enumerate() {
            assert!((span.duration() - 30.0).abs() < 1e-9);
            assert!((span.start - 30.0 * i as f64).abs() < 1e-9);
        }
        assert_eq!(spans.last().unwrap().end, 180.0);
    }

    #[test]
    fn test_spans_are_contiguous_and_end_exactly_at_duration() {
        let composer = TimelineComposer::default();
        let duration = 61.37;
        let spans = composer.layout_visuals(duration, &frames(7)).unwrap();

        assert_eq!(spans[0].start, 0.0);
        for pair in spans.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
        assert_eq!(spans.last().unwrap().end, duration);
        let total: f64 = spans.iter().map(|s| s.duration()).sum();
        assert!((total - duration).abs() < 1e-9);
    }

    #[test]
    fn test_single_visual_covers_everything() {
        let spans = TimelineComposer::default().layout_visuals(42.5, &frames(1)).unwrap();
        assert_eq!(
            spans,
            vec![VisualSpan {
                path: "frame_0.png".to_string(),
                start: 0.0,
                end: 42.5
            }]
        );
    }

    #[test]
    fn test_rejects_empty_visuals_and_bad_duration() {
        let composer = TimelineComposer::default();
        assert_eq!(composer.layout_visuals(10.0, &[]), Err(ComposeError::NoVisuals));
        assert_eq!(composer.layout_visuals(0.0, &frames(2)), Err(ComposeError::InvalidDuration(0.0)));
        assert!(composer.layout_visuals(f64::NAN, &frames(2)).is_err());
        assert!(composer.compose(-1.0, &frames(2), None).is_err());
    }

    #[test]
    fn test_caption_groups_of_four() {
        let composer = TimelineComposer::default();
        let groups = composer.group_captions(&words(28));

        assert_eq!(groups.len(), 7);
        assert_eq!(groups[0].text, "w0 w1 w2 w3");
        assert_eq!(groups[0].start, 0.0);
        assert!((groups[0].end - 1.9).abs() < 1e-9);
        assert_eq!(groups[6].text, "w24 w25 w26 w27");
    }

    #[test]
    fn test_caption_group_count_is_ceiling() {
        for (len, chunk, expected) in [(10, 4, 3), (1, 4, 1), (9, 3, 3), (0, 4, 0), (5, 1, 5)] {
            let composer = TimelineComposer::new(chunk);
            assert_eq!(composer.group_captions(&words(len)).len(), expected, "{len} words / {chunk}");
        }
        let last = TimelineComposer::new(4).group_captions(&words(10)).pop().unwrap();
        assert_eq!(last.text, "w8 w9");
    }

    #[test]
    fn test_zero_chunk_size_is_treated_as_one() {
        let composer = TimelineComposer::new(0);
        assert_eq!(composer.chunk_size(), 1);
        assert_eq!(composer.group_captions(&words(3)).len(), 3);
    }

    #[test]
    fn test_captions_do_not_affect_visual_timing() {
        let composer = TimelineComposer::default();
        let without = composer.compose(90.0, &frames(3), None).unwrap();
        let with = composer.compose(90.0, &frames(3), Some(&words(40))).unwrap();

        assert_eq!(without.visuals, with.visuals);
        assert!(!without.has_captions());
        assert_eq!(with.captions.len(), 10);
        assert_eq!(with.without_captions(), without);
    }
}
