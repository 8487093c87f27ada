// src/audio.rs

use crate::utils::execute_ffmpeg_command;
use std::process::Command;

fn codec_for(format: &str) -> Result<&'static str, String> {
    match format {
        "mp3" => Ok("libmp3lame"),
        "aac" => Ok("aac"),
        "wav" => Ok("pcm_s16le"),
        "ogg" => Ok("libvorbis"),
        _ => Err(format!("Unsupported format: {}", format)),
    }
}

/// Transcode any audio (or the audio of a video) into `format`
pub fn transcode_audio(input_file: &str, output_file: &str, format: &str) -> Result<String, String> {
    let codec = codec_for(format)?;

    let mut command = Command::new("ffmpeg");
    command
        .arg("-i")
        .arg(input_file)
        .arg("-vn")
        .arg("-acodec")
        .arg(codec)
        .arg("-ar")
        .arg("44100")
        .arg("-ac")
        .arg("2")
        .arg("-y")
        .arg(output_file);

    execute_ffmpeg_command(command)?;
    Ok(output_file.to_string())
}
