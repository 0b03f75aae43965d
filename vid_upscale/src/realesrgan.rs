//! Real-ESRGAN inference passes.
//!
//! Each pass runs `inference_realesrgan.py` over a whole directory at the
//! model's native ratio. The script writes `<stem>_out.png`; the suffix is
//! stripped afterwards so the next pass and ffmpeg see `frame_%05d.png`.
//!
//! The script prints `Error ...` and moves on when a frame fails (CUDA out of
//! memory, for one) and still exits 0, so a pass only succeeds when it wrote
//! every input frame.

use crate::config::InferenceConfig;
use crate::environment::RealEsrganEnv;
use crate::models::ModelSpec;
use regex::Regex;
use shared_utils::{get_error_suggestion, ProcessOutcome, Result, ToolProcess, UpscaleError};
use std::ffi::OsString;
use std::fs;
use std::path::Path;
use std::process::Command;
use std::sync::atomic::AtomicBool;
use std::sync::OnceLock;
use tracing::{debug, info, warn};

pub const OUTPUT_SUFFIX: &str = "out";

/// One `Testing <idx> <name>` line from the inference script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameTick {
    pub index: u64,
    pub name: String,
}

fn testing_line_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^Testing\s+(\d+)\s+(\S+)").expect("valid testing regex"))
}

pub fn parse_progress_line(line: &str) -> Option<FrameTick> {
    let caps = testing_line_regex().captures(line.trim_start())?;
    Some(FrameTick {
        index: caps[1].parse().ok()?,
        name: caps[2].to_string(),
    })
}

fn is_error_line(line: &str) -> bool {
    line.trim_start().starts_with("Error")
}

/// Script error lines plus stderr, with a hint appended when one is known.
pub fn describe_failure(error_lines: &[String], stderr: &str) -> String {
    let mut text = error_lines.join("\n");
    let stderr = stderr.trim();
    if !stderr.is_empty() {
        if !text.is_empty() {
            text.push('\n');
        }
        text.push_str(stderr);
    }
    if let Some(hint) = get_error_suggestion(&text) {
        warn!(hint, "Real-ESRGAN pass failed");
        text.push_str("\nHint: ");
        text.push_str(hint);
    }
    text
}

pub fn build_inference_args(
    env: &RealEsrganEnv,
    model: &ModelSpec,
    input_dir: &Path,
    output_dir: &Path,
    inference: &InferenceConfig,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        env.script.clone().into(),
        "-i".into(),
        input_dir.into(),
        "-o".into(),
        output_dir.into(),
        "-n".into(),
        model.name.into(),
        "-s".into(),
        model.base_scale().to_string().into(),
        "--suffix".into(),
        OUTPUT_SUFFIX.into(),
        "--ext".into(),
        "png".into(),
    ];

    if let Some(tile) = inference.tile.filter(|&t| t > 0) {
        args.push("-t".into());
        args.push(tile.to_string().into());
    }
    if inference.fp32 {
        args.push("--fp32".into());
    }
    if let Some(gpu) = inference.gpu_id {
        args.push("-g".into());
        args.push(gpu.to_string().into());
    }
    args
}

/// Renames `<stem>_<suffix>.png` to `<stem>.png` in `dir`; returns the count.
pub fn normalize_pass_output(dir: &Path, suffix: &str) -> Result<usize> {
    let tail = format!("_{}.png", suffix);
    let mut renamed = 0;

    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if let Some(stem) = name.strip_suffix(&tail) {
            let target = dir.join(format!("{}.png", stem));
            fs::rename(&path, &target)?;
            renamed += 1;
        }
    }

    debug!(dir = %dir.display(), renamed, "Normalized pass output names");
    Ok(renamed)
}

pub struct PassRequest<'a> {
    pub env: &'a RealEsrganEnv,
    pub model: &'a ModelSpec,
    pub input_dir: &'a Path,
    pub output_dir: &'a Path,
    pub inference: &'a InferenceConfig,
    pub pass: u32,
    /// Frames in `input_dir`; anything less in `output_dir` fails the pass.
    pub expected_frames: u64,
}

/// Runs one pass, reporting each frame the script starts on.
pub fn run_pass<F>(request: &PassRequest<'_>, cancel: &AtomicBool, mut on_frame: F) -> Result<usize>
where
    F: FnMut(FrameTick),
{
    fs::create_dir_all(request.output_dir)?;

    let args = build_inference_args(
        request.env,
        request.model,
        request.input_dir,
        request.output_dir,
        request.inference,
    );
    info!(
        pass = request.pass,
        model = request.model.name,
        input = %request.input_dir.display(),
        output = %request.output_dir.display(),
        "Starting upscale pass"
    );

    let mut cmd = Command::new(&request.env.python);
    cmd.args(&args).env("PYTHONUNBUFFERED", "1");

    let tool = request.env.python.to_string_lossy();
    let mut error_lines = Vec::new();
    let outcome = ToolProcess::spawn(&tool, &mut cmd)?.run(cancel, |line| {
        if let Some(tick) = parse_progress_line(line) {
            on_frame(tick);
        } else if is_error_line(line) {
            warn!(pass = request.pass, line, "Real-ESRGAN reported an error");
            error_lines.push(line.trim().to_string());
        }
    })?;

    match outcome {
        ProcessOutcome::Cancelled => Err(UpscaleError::Cancelled),
        ProcessOutcome::Exited { status, stderr } if !status.success() => {
            Err(UpscaleError::Inference {
                pass: request.pass,
                stderr: describe_failure(&error_lines, &stderr),
            })
        }
        ProcessOutcome::Exited { stderr, .. } => {
            let written = normalize_pass_output(request.output_dir, OUTPUT_SUFFIX)?;
            if written as u64 != request.expected_frames {
                return Err(UpscaleError::IncompletePass {
                    pass: request.pass,
                    written: written as u64,
                    expected: request.expected_frames,
                    errors: describe_failure(&error_lines, &stderr),
                });
            }
            Ok(written)
        }
    }
}
