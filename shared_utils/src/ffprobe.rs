//! FFprobe wrapper module
//!
//! JSON stream/format probing plus the plain-text frame rate query.

use crate::errors::{Result, UpscaleError};
use crate::logging::execute_external_command;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

pub const FFPROBE: &str = "ffprobe";

const FALLBACK_FRAME_RATE: f64 = 24.0;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct FfprobeStream {
    #[serde(default)]
    pub codec_type: Option<String>,
    #[serde(default)]
    pub codec_name: Option<String>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub r_frame_rate: Option<String>,
    #[serde(default)]
    pub nb_frames: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct FfprobeFormat {
    #[serde(default)]
    pub duration: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct FfprobeOutput {
    #[serde(default)]
    pub streams: Vec<FfprobeStream>,
    #[serde(default)]
    pub format: FfprobeFormat,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoInfo {
    pub video_codec: String,
    pub width: u32,
    pub height: u32,
    pub frame_rate: f64,
    pub frame_count: u64,
    pub duration: f64,
    pub has_audio: bool,
    pub audio_codec: Option<String>,
}

impl VideoInfo {
    pub fn from_ffprobe(parsed: &FfprobeOutput) -> Result<Self> {
        let video = parsed
            .streams
            .iter()
            .find(|s| s.codec_type.as_deref() == Some("video"))
            .ok_or_else(|| UpscaleError::Ffprobe("No video stream found".to_string()))?;
        let audio = parsed
            .streams
            .iter()
            .find(|s| s.codec_type.as_deref() == Some("audio"));

        let duration = parsed
            .format
            .duration
            .as_deref()
            .and_then(|s| s.parse::<f64>().ok())
            .unwrap_or(0.0);
        let frame_rate = parse_frame_rate(video.r_frame_rate.as_deref().unwrap_or("0/1"));
        let frame_count = video
            .nb_frames
            .as_deref()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or((duration * frame_rate).round() as u64);

        Ok(Self {
            video_codec: video
                .codec_name
                .clone()
                .unwrap_or_else(|| "unknown".to_string()),
            width: video.width.unwrap_or(0),
            height: video.height.unwrap_or(0),
            frame_rate,
            frame_count,
            duration,
            has_audio: audio.is_some(),
            audio_codec: audio.and_then(|s| s.codec_name.clone()),
        })
    }
}

pub fn parse_probe_json(json: &str) -> Result<VideoInfo> {
    let parsed: FfprobeOutput = serde_json::from_str(json)?;
    VideoInfo::from_ffprobe(&parsed)
}

fn spawn_error(tool: &str, err: &anyhow::Error) -> UpscaleError {
    let not_found = err
        .chain()
        .filter_map(|cause| cause.downcast_ref::<std::io::Error>())
        .any(|io| io.kind() == std::io::ErrorKind::NotFound);
    if not_found {
        UpscaleError::ToolNotFound(format!("{} ({})", tool, err))
    } else {
        UpscaleError::Ffprobe(format!("{:#}", err))
    }
}

fn run_ffprobe(tool: &str, args: &[&std::ffi::OsStr]) -> Result<String> {
    let result = execute_external_command(tool, args).map_err(|e| spawn_error(tool, &e))?;
    if !result.success() {
        let stderr = result.stderr.trim();
        return Err(UpscaleError::Ffprobe(if stderr.is_empty() {
            format!("exit code {:?}", result.exit_code)
        } else {
            stderr.to_string()
        }));
    }
    Ok(result.stdout)
}

pub fn probe_video(path: &Path) -> Result<VideoInfo> {
    probe_video_with(FFPROBE, path)
}

pub fn probe_video_with(tool: &str, path: &Path) -> Result<VideoInfo> {
    if !path.is_file() {
        return Err(UpscaleError::Ffprobe(format!(
            "Not a file: {}",
            path.display()
        )));
    }

    let args = [
        "-v",
        "error",
        "-print_format",
        "json",
        "-show_format",
        "-show_streams",
        "--",
    ];
    let mut os_args: Vec<&std::ffi::OsStr> = args.iter().map(std::ffi::OsStr::new).collect();
    os_args.push(path.as_os_str());

    let stdout = run_ffprobe(tool, &os_args)?;
    parse_probe_json(&stdout)
}

pub fn get_frame_rate(path: &Path) -> Result<f64> {
    get_frame_rate_with(FFPROBE, path)
}

/// Frame rate of the first video stream via `r_frame_rate`.
pub fn get_frame_rate_with(tool: &str, path: &Path) -> Result<f64> {
    let args = [
        "-v",
        "0",
        "-select_streams",
        "v:0",
        "-show_entries",
        "stream=r_frame_rate",
        "-of",
        "default=noprint_wrappers=1:nokey=1",
        "--",
    ];
    let mut os_args: Vec<&std::ffi::OsStr> = args.iter().map(std::ffi::OsStr::new).collect();
    os_args.push(path.as_os_str());

    let stdout = run_ffprobe(tool, &os_args)?;
    Ok(parse_frame_rate(stdout.trim()))
}

/// Parses `num/den` or a plain number, falling back to 24 fps.
pub fn parse_frame_rate(s: &str) -> f64 {
    if let Some((num, den)) = s.split_once('/') {
        let num = num.trim().parse::<f64>().unwrap_or(0.0);
        let den = den.trim().parse::<f64>().unwrap_or(0.0);
        let rate = num / den;
        if den > 0.0 && num > 0.0 && rate.is_finite() {
            return rate;
        }
    } else if let Ok(v) = s.trim().parse::<f64>() {
        if v > 0.0 && v.is_finite() {
            return v;
        }
    }

    if !s.is_empty() && s != "0" && s != "0/1" {
        warn!(value = s, fallback = FALLBACK_FRAME_RATE, "Failed to parse frame rate");
    }
    FALLBACK_FRAME_RATE
}
