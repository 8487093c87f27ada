// src/export.rs
//! Final render: stills + narration + captions into one vertical mp4

use std::path::{Path, PathBuf};
use std::process::Command;

use async_trait::async_trait;

use crate::timeline::Timeline;
use crate::utils::{execute_ffmpeg_command, format_duration};
use crate::visual::{build_caption_filters, build_slideshow_filter, FRAME_RATE};
use crate::workflow::executor::StageError;
use crate::workflow::stages::MediaRenderer;

/// Full ffmpeg argument list for one render
pub fn build_render_args(timeline: &Timeline, audio_file: &str, output_file: &str, caption_filters: &[String]) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();
    for span in &timeline.visuals {
        args.extend([
            "-loop".to_string(),
            "1".to_string(),
            "-t".to_string(),
            format!("{:.3}", span.duration()),
            "-i".to_string(),
            span.path.clone(),
        ]);
    }
    args.extend(["-i".to_string(), audio_file.to_string()]);

    args.extend([
        "-filter_complex".to_string(),
        build_slideshow_filter(timeline, caption_filters),
        "-map".to_string(),
        "[vout]".to_string(),
        "-map".to_string(),
        format!("{}:a", timeline.visuals.len()),
        "-c:v".to_string(),
        "libx264".to_string(),
        "-preset".to_string(),
        "medium".to_string(),
        "-crf".to_string(),
        "23".to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        "-r".to_string(),
        FRAME_RATE.to_string(),
        "-c:a".to_string(),
        "aac".to_string(),
        "-b:a".to_string(),
        "192k".to_string(),
        "-t".to_string(),
        format!("{:.3}", timeline.duration),
        "-movflags".to_string(),
        "+faststart".to_string(),
        "-y".to_string(),
        output_file.to_string(),
    ]);
    args
}

pub fn render_timeline(
    timeline: &Timeline,
    audio_file: &str,
    output_file: &str,
    caption_filters: &[String],
) -> Result<String, String> {
    let mut command = Command::new("ffmpeg");
    command.args(build_render_args(timeline, audio_file, output_file, caption_filters));
    execute_ffmpeg_command(command)?;
    Ok(output_file.to_string())
}

/// Render with captions; if the encoder rejects them, render once more without
pub fn render_with_caption_fallback(
    timeline: &Timeline,
    audio_file: &str,
    output_file: &str,
    font_file: Option<&str>,
) -> Result<String, String> {
    let work_dir = Path::new(output_file)
        .parent()
        .map(|p| p.join("captions"))
        .unwrap_or_else(|| PathBuf::from("captions"));
    let plan = build_caption_filters(&timeline.captions, &work_dir, font_file);

    tracing::info!(
        "🎬 Rendering {} ({} visuals, {} caption groups)",
        format_duration(timeline.duration),
        timeline.visuals.len(),
        plan.filters.len()
    );

    if plan.is_empty() {
        return render_timeline(timeline, audio_file, output_file, &[]);
    }

    match render_timeline(timeline, audio_file, output_file, &plan.filters) {
        Ok(path) => Ok(path),
        Err(e) => {
            tracing::warn!("⚠️ Render with captions failed, retrying without captions: {}", e);
            render_timeline(timeline, audio_file, output_file, &[])
        }
    }
}

/// `MediaRenderer` backed by local ffmpeg / ffprobe binaries
#[derive(Debug, Clone, Default)]
pub struct FfmpegRenderer {
    font_file: Option<String>,
}

impl FfmpegRenderer {
    pub fn new(font_file: Option<String>) -> Self {
        Self { font_file }
    }
}

async fn blocking<T, F>(work: F) -> Result<T, StageError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, String> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| StageError::Failed(format!("ffmpeg task panicked: {}", e)))?
        .map_err(StageError::Failed)
}

#[async_trait]
impl MediaRenderer for FfmpegRenderer {
    async fn probe_duration(&self, audio_path: &str) -> Result<f64, StageError> {
        let path = audio_path.to_string();
        blocking(move || crate::core::get_audio_duration(&path)).await
    }

    async fn render(&self, timeline: &Timeline, audio_path: &str, output_path: &str) -> Result<String, StageError> {
        let timeline = timeline.clone();
        let audio = audio_path.to_string();
        let output = output_path.to_string();
        let font = self.font_file.clone();
        blocking(move || render_with_caption_fallback(&timeline, &audio, &output, font.as_deref())).await
    }

    async fn normalize_audio(&self, input_path: &str, output_path: &str) -> Result<String, StageError> {
        let input = input_path.to_string();
        let output = output_path.to_string();
        blocking(move || crate::audio::transcode_audio(&input, &output, "mp3")).await
    }
}
