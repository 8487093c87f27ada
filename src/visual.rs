// src/visual.rs
//! Filtergraph construction for the vertical slideshow and its burned-in captions

use std::path::Path;

use crate::timeline::{CaptionOverlay, Timeline};
use crate::utils::escape_filter_value;

pub const FRAME_WIDTH: u32 = 1080;
pub const FRAME_HEIGHT: u32 = 1920;
pub const FRAME_RATE: u32 = 24;

const CAPTION_FONT_SIZE: u32 = 64;

/// Caption drawtext filters that could be built, plus why the rest were dropped
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CaptionPlan {
    pub filters: Vec<String>,
    /// Index of the first group that failed and the reason; it and every later group are omitted
    pub dropped_from: Option<(usize, String)>,
}

impl CaptionPlan {
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

fn drawtext_filter(
    index: usize,
    overlay: &CaptionOverlay,
    work_dir: &Path,
    font_file: Option<&str>,
) -> Result<String, String> {
    let text = overlay.text.trim();
    if text.is_empty() {
        return Err("empty caption text".to_string());
    }
    if !overlay.start.is_finite() || !overlay.end.is_finite() || overlay.end <= overlay.start {
        return Err(format!("invalid interval {}..{}", overlay.start, overlay.end));
    }
    if let Some(font) = font_file {
        if !Path::new(font).is_file() {
            return Err(format!("font file {} not found", font));
        }
    }

    // Text goes through a file so no caption content needs filtergraph escaping
    let text_path = work_dir.join(format!("caption_{:03}.txt", index));
    std::fs::write(&text_path, text).map_err(|e| format!("could not write {}: {}", text_path.display(), e))?;

    let mut filter = format!(
        "drawtext=textfile='{}':expansion=none",
        escape_filter_value(&text_path.to_string_lossy())
    );
    if let Some(font) = font_file {
        filter.push_str(&format!(":fontfile='{}'", escape_filter_value(font)));
    }
    filter.push_str(&format!(
        ":fontsize={}:fontcolor=white:borderw=4:bordercolor=black:x=(w-text_w)/2:y=h*0.72:enable='between(t,{:.3},{:.3})'",
        CAPTION_FONT_SIZE, overlay.start, overlay.end
    ));
    Ok(filter)
}

/// Build one drawtext filter per caption group, in order. The first group
/// that cannot be built stops the process; the groups before it are kept.
pub fn build_caption_filters(captions: &[CaptionOverlay], work_dir: &Path, font_file: Option<&str>) -> CaptionPlan {
    let mut plan = CaptionPlan::default();
    if captions.is_empty() {
        return plan;
    }
    if let Err(e) = std::fs::create_dir_all(work_dir) {
        plan.dropped_from = Some((0, format!("could not create {}: {}", work_dir.display(), e)));
        return plan;
    }

    for (index, overlay) in captions.iter().enumerate() {
        match drawtext_filter(index, overlay, work_dir, font_file) {
            Ok(filter) => plan.filters.push(filter),
            Err(reason) => {
                tracing::warn!(
                    "⚠️ Caption group {} failed ({}); dropping it and {} later groups",
                    index,
                    reason,
                    captions.len() - index - 1
                );
                plan.dropped_from = Some((index, reason));
                break;
            }
        }
    }
    plan
}

/// Scale/crop every still to the vertical frame, concatenate them in order and
/// chain the caption filters on top. Output label is `[vout]`.
pub fn build_slideshow_filter(timeline: &Timeline, caption_filters: &[String]) -> String {
    let mut graph = String::new();
    for i in 0..timeline.visuals.len() {
        graph.push_str(&format!(
            "[{i}:v]scale={w}:{h}:force_original_aspect_ratio=increase,crop={w}:{h},setsar=1,fps={fps},format=yuv420p[v{i}];",
            i = i,
            w = FRAME_WIDTH,
            h = FRAME_HEIGHT,
            fps = FRAME_RATE
        ));
    }
    for i in 0..timeline.visuals.len() {
        graph.push_str(&format!("[v{}]", i));
    }
    graph.push_str(&format!("concat=n={}:v=1:a=0", timeline.visuals.len()));

    if caption_filters.is_empty() {
        graph.push_str("[vout]");
    } else {
        graph.push_str("[slides];[slides]");
        graph.push_str(&caption_filters.join(","));
        graph.push_str("[vout]");
    }
    graph
}
