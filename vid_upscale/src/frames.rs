//! ffmpeg frame extraction and reassembly.

use crate::config::EncoderConfig;
use shared_utils::{
    build_assemble_filter_chain, format_ffmpeg_error, FfmpegProgress, FfmpegProgressParser,
    ProcessOutcome, Result, ToolProcess, UpscaleError,
};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::AtomicBool;
use tracing::{info, warn};

pub const FRAME_PATTERN: &str = "frame_%05d.png";
pub const FIRST_FRAME: &str = "frame_00001.png";

fn is_frame_file(name: &str) -> bool {
    name.starts_with("frame_") && name.ends_with(".png")
}

pub fn count_frames(dir: &Path) -> Result<u64> {
    let mut count = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() && is_frame_file(&entry.file_name().to_string_lossy()) {
            count += 1;
        }
    }
    Ok(count)
}

const PROGRESS_ARGS: [&str; 4] = ["-progress", "pipe:1", "-nostats", "-y"];

pub fn build_extract_args(input: &Path, frames_dir: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = PROGRESS_ARGS.iter().map(OsString::from).collect();
    args.push("-i".into());
    args.push(input.into());
    args.push(frames_dir.join(FRAME_PATTERN).into());
    args
}

#[derive(Debug, Clone)]
pub struct AssembleRequest<'a> {
    pub frames_dir: &'a Path,
    pub fps: f64,
    /// Source video to take the audio track from.
    pub audio_source: Option<&'a Path>,
    /// Upscaled frame size, used to crop odd dimensions.
    pub frame_size: (u32, u32),
    pub encoder: &'a EncoderConfig,
    pub output: &'a Path,
}

pub fn build_assemble_args(request: &AssembleRequest<'_>) -> Vec<OsString> {
    let mut args: Vec<OsString> = PROGRESS_ARGS.iter().map(OsString::from).collect();
    args.push("-framerate".into());
    args.push(format_fps(request.fps).into());
    args.push("-i".into());
    args.push(request.frames_dir.join(FRAME_PATTERN).into());

    if let Some(source) = request.audio_source {
        args.push("-i".into());
        args.push(source.into());
        for arg in ["-map", "0:v:0", "-map", "1:a:0?", "-c:a"] {
            args.push(arg.into());
        }
        args.push(request.encoder.audio_codec.clone().into());
        args.push("-shortest".into());
    }

    let (width, height) = request.frame_size;
    args.push("-vf".into());
    args.push(build_assemble_filter_chain(width, height, &request.encoder.pix_fmt).into());
    args.push("-c:v".into());
    args.push(request.encoder.video_codec.clone().into());
    if let Some(crf) = request.encoder.crf {
        args.push("-crf".into());
        args.push(crf.to_string().into());
    }
    if let Some(preset) = &request.encoder.preset {
        args.push("-preset".into());
        args.push(preset.clone().into());
    }
    args.push("-pix_fmt".into());
    args.push(request.encoder.pix_fmt.clone().into());
    args.push(request.output.into());
    args
}

/// Integer rates print without decimals, NTSC rates keep enough precision.
pub fn format_fps(fps: f64) -> String {
    if (fps - fps.round()).abs() < 1e-9 {
        format!("{}", fps.round() as u64)
    } else {
        let s = format!("{:.6}", fps);
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    }
}

fn run_ffmpeg<F>(
    ffmpeg: &str,
    args: &[OsString],
    what: &str,
    cancel: &AtomicBool,
    mut on_progress: F,
) -> Result<()>
where
    F: FnMut(FfmpegProgress),
{
    let mut cmd = Command::new(ffmpeg);
    cmd.args(args);

    let mut parser = FfmpegProgressParser::new();
    let outcome = ToolProcess::spawn(ffmpeg, &mut cmd)?.run(cancel, |line| {
        if let Some(progress) = parser.parse_line(line) {
            on_progress(progress);
        }
    })?;

    match outcome {
        ProcessOutcome::Cancelled => Err(UpscaleError::Cancelled),
        ProcessOutcome::Exited { status, stderr } if !status.success() => {
            if let Some(hint) = shared_utils::get_error_suggestion(&stderr) {
                warn!(hint, "ffmpeg failed");
            }
            Err(UpscaleError::Ffmpeg {
                message: format!("{}: {}", what, format_ffmpeg_error(&stderr)),
                stderr,
            })
        }
        ProcessOutcome::Exited { .. } => Ok(()),
    }
}

/// Dumps every frame of `input` into `frames_dir`; returns the frame count.
pub fn extract_frames<F>(
    ffmpeg: &str,
    input: &Path,
    frames_dir: &Path,
    cancel: &AtomicBool,
    on_progress: F,
) -> Result<u64>
where
    F: FnMut(FfmpegProgress),
{
    fs::create_dir_all(frames_dir)?;
    let args = build_extract_args(input, frames_dir);
    run_ffmpeg(ffmpeg, &args, "frame extraction failed", cancel, on_progress)?;

    let count = count_frames(frames_dir)?;
    if count == 0 {
        return Err(UpscaleError::NoFramesProduced(frames_dir.to_path_buf()));
    }
    info!(frames = count, dir = %frames_dir.display(), "Frames extracted");
    Ok(count)
}

pub fn assemble_video<F>(
    ffmpeg: &str,
    request: &AssembleRequest<'_>,
    cancel: &AtomicBool,
    on_progress: F,
) -> Result<PathBuf>
where
    F: FnMut(FfmpegProgress),
{
    if !request.frames_dir.join(FIRST_FRAME).is_file() {
        return Err(UpscaleError::NoFramesProduced(request.frames_dir.to_path_buf()));
    }
    if let Some(parent) = request.output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let args = build_assemble_args(request);
    run_ffmpeg(ffmpeg, &args, "video assembly failed", cancel, on_progress)?;

    info!(output = %request.output.display(), "Video assembled");
    Ok(request.output.to_path_buf())
}
