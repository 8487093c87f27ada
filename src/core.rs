// src/core.rs

use crate::utils::execute_ffprobe_command;
use serde_json::Value;

/// What ffprobe reports about a media file
#[derive(Debug, Clone, PartialEq)]
pub struct MediaInfo {
    pub file_path: String,
    pub duration_seconds: f64,
    pub has_audio: bool,
    pub has_video: bool,
    pub format: String,
}

pub fn analyze_media(file_path: &str) -> Result<MediaInfo, String> {
    let args = &[
        "-v",
        "quiet",
        "-print_format",
        "json",
        "-show_format",
        "-show_streams",
        file_path,
    ];
    let ffprobe_output = execute_ffprobe_command(args)?;
    parse_probe_output(file_path, &ffprobe_output)
}

fn parse_probe_output(file_path: &str, raw: &str) -> Result<MediaInfo, String> {
    let json: Value =
        serde_json::from_str(raw).map_err(|e| format!("Failed to parse ffprobe output: {}", e))?;

    let format = &json["format"];
    let duration_seconds = format["duration"]
        .as_str()
        .and_then(|d| d.parse::<f64>().ok())
        .ok_or_else(|| format!("ffprobe reported no duration for {}", file_path))?;

    let mut info = MediaInfo {
        file_path: file_path.to_string(),
        duration_seconds,
        has_audio: false,
        has_video: false,
        format: format["format_name"].as_str().unwrap_or("unknown").to_string(),
    };

    if let Some(streams) = json["streams"].as_array() {
        for stream in streams {
            match stream["codec_type"].as_str() {
                Some("audio") => info.has_audio = true,
                Some("video") => info.has_video = true,
                _ => {}
            }
        }
    }

    Ok(info)
}

/// Duration of an audio track in seconds; must be positive
pub fn get_audio_duration(file_path: &str) -> Result<f64, String> {
    let info = analyze_media(file_path)?;
    if !info.has_audio {
        return Err(format!("{} has no audio stream", file_path));
    }
    if !info.duration_seconds.is_finite() || info.duration_seconds <= 0.0 {
        return Err(format!(
            "{} has an invalid duration ({})",
            file_path, info.duration_seconds
        ));
    }
    Ok(info.duration_seconds)
}
