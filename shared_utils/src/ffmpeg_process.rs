//! External process plumbing for ffmpeg and the upscaler.
//!
//! Piping both stdout and stderr but only reading stdout deadlocks once the
//! child fills the stderr pipe buffer, so stderr is always drained on its own
//! thread. stdout is read line by line on a second thread and handed to the
//! caller, which lets the caller poll a cancel flag while the child is quiet.
//!
//! ```ignore
//! use shared_utils::ffmpeg_process::{ToolProcess, ProcessOutcome};
//! use std::process::Command;
//!
//! let mut cmd = Command::new("ffmpeg");
//! cmd.args(["-y", "-i", "input.mp4", "frames/frame_%05d.png"]);
//! let outcome = ToolProcess::spawn("ffmpeg", &mut cmd)?.run(&cancel, |line| println!("{line}"))?;
//! ```

use crate::errors::{Result, UpscaleError};
use crate::logging::log_external_tool;
use regex::Regex;
use std::io::{BufRead, BufReader};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::OnceLock;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug)]
pub enum ProcessOutcome {
    Exited { status: ExitStatus, stderr: String },
    Cancelled,
}

/// A spawned child with stderr drained in the background.
pub struct ToolProcess {
    tool: String,
    command: String,
    child: Child,
    stderr_thread: Option<JoinHandle<String>>,
    started: Instant,
}

impl ToolProcess {
    pub fn spawn(tool: &str, cmd: &mut Command) -> Result<Self> {
        let command = format!("{:?}", cmd);
        debug!(tool, command = %command, "Spawning external tool");

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                UpscaleError::ToolNotFound(tool.to_string())
            } else {
                UpscaleError::Io(e)
            }
        })?;

        let stderr = child.stderr.take().ok_or_else(|| {
            UpscaleError::Io(std::io::Error::other("Failed to capture stderr"))
        })?;

        let stderr_thread = thread::spawn(move || {
            let mut buf = String::new();
            for line in BufReader::new(stderr).lines().map_while(|l| l.ok()) {
                buf.push_str(&line);
                buf.push('\n');
            }
            buf
        });

        Ok(Self {
            tool: tool.to_string(),
            command,
            child,
            stderr_thread: Some(stderr_thread),
            started: Instant::now(),
        })
    }

    /// Feeds every stdout line to `on_line` until the child exits.
    ///
    /// The child is killed as soon as `cancel` is observed set.
    pub fn run<F>(mut self, cancel: &AtomicBool, mut on_line: F) -> Result<ProcessOutcome>
    where
        F: FnMut(&str),
    {
        let (tx, rx) = mpsc::channel::<String>();
        let stdout_thread = self.child.stdout.take().map(|stdout| {
            thread::spawn(move || {
                for line in BufReader::new(stdout).lines().map_while(|l| l.ok()) {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
            })
        });

        if stdout_thread.is_some() {
            loop {
                if cancel.load(Ordering::Relaxed) {
                    return self.abort();
                }
                match rx.recv_timeout(POLL_INTERVAL) {
                    Ok(line) => on_line(&line),
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        }

        if let Some(handle) = stdout_thread {
            let _ = handle.join();
        }

        let (status, stderr) = self.wait_with_output()?;
        // Ctrl-C in a terminal reaches the child too, which then exits on its own
        if !status.success() && cancel.load(Ordering::Relaxed) {
            return Ok(ProcessOutcome::Cancelled);
        }
        Ok(ProcessOutcome::Exited { status, stderr })
    }

    fn abort(mut self) -> Result<ProcessOutcome> {
        warn!(tool = %self.tool, "Cancelling external tool");
        if let Err(e) = self.child.kill() {
            debug!(error = %e, "Kill failed, child already exited");
        }
        let status = self.child.wait()?;
        // grandchildren may still hold stderr open, so the drain thread is left detached
        self.stderr_thread.take();
        log_external_tool(
            &self.tool,
            &self.command,
            "cancelled",
            status.code(),
            self.started.elapsed(),
        );
        Ok(ProcessOutcome::Cancelled)
    }

    pub fn wait_with_output(mut self) -> Result<(ExitStatus, String)> {
        let status = self.child.wait()?;
        let stderr = self
            .stderr_thread
            .take()
            .map(|t| t.join().unwrap_or_default())
            .unwrap_or_default();

        log_external_tool(
            &self.tool,
            &self.command,
            &stderr,
            status.code(),
            self.started.elapsed(),
        );

        Ok((status, stderr))
    }
}

/// Progress snapshot from `ffmpeg -progress` key=value output.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FfmpegProgress {
    pub frame: u64,
    pub out_time_secs: f64,
    pub finished: bool,
}

/// Parser for `-progress pipe:1` blocks; one update per `progress=` line.
#[derive(Debug, Clone, Default)]
pub struct FfmpegProgressParser {
    current: FfmpegProgress,
}

fn progress_line_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(\w+)=\s*(\S+)\s*$").expect("valid progress regex"))
}

impl FfmpegProgressParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot at the end of each progress block.
    pub fn parse_line(&mut self, line: &str) -> Option<FfmpegProgress> {
        let caps = progress_line_regex().captures(line)?;
        let value = &caps[2];
        match &caps[1] {
            "frame" => {
                if let Ok(frame) = value.parse::<u64>() {
                    self.current.frame = frame;
                }
            }
            // out_time_ms is in microseconds despite the name
            "out_time_ms" | "out_time_us" => {
                if let Ok(us) = value.parse::<i64>() {
                    self.current.out_time_secs = us.max(0) as f64 / 1_000_000.0;
                }
            }
            "out_time" => {
                if let Some(secs) = Self::parse_time(value) {
                    self.current.out_time_secs = secs;
                }
            }
            "progress" => {
                self.current.finished = value == "end";
                return Some(self.current);
            }
            _ => {}
        }
        None
    }

    /// Parses `HH:MM:SS.ms`.
    fn parse_time(time_str: &str) -> Option<f64> {
        let mut parts = time_str.split(':');
        let hours: f64 = parts.next()?.parse().ok()?;
        let minutes: f64 = parts.next()?.parse().ok()?;
        let seconds: f64 = parts.next()?.parse().ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some(hours * 3600.0 + minutes * 60.0 + seconds)
    }

    pub fn current(&self) -> FfmpegProgress {
        self.current
    }
}

/// Picks the most meaningful line out of ffmpeg's stderr.
pub fn format_ffmpeg_error(stderr: &str) -> String {
    if let Some(error_line) = stderr
        .lines()
        .rev()
        .find(|line| line.contains("Error") || line.contains("error"))
    {
        return error_line.trim().to_string();
    }

    stderr
        .lines()
        .rev()
        .find(|line| {
            let trimmed = line.trim();
            !trimmed.is_empty()
                && !trimmed.starts_with("frame=")
                && !trimmed.starts_with("fps=")
                && !trimmed.starts_with("size=")
        })
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| "Unknown FFmpeg error".to_string())
}

pub fn get_error_suggestion(stderr: &str) -> Option<&'static str> {
    let patterns = [
        ("No such file or directory", "Check that the input path exists"),
        ("Invalid data found", "The input file may be corrupted"),
        ("Unknown encoder", "Install an ffmpeg build with the requested encoder"),
        ("Permission denied", "Check read/write permissions on the work directory"),
        ("height not divisible by 2", "Upscaled frames need even dimensions for yuv420p"),
        ("CUDA out of memory", "Use a smaller --tile size"),
    ];

    patterns
        .iter()
        .find(|(pattern, _)| stderr.contains(pattern))
        .map(|(_, suggestion)| *suggestion)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_parser_block() {
        let mut parser = FfmpegProgressParser::new();
        let block = [
            "frame=120",
            "fps=30.00",
            "out_time_ms=5000000",
            "out_time=00:00:05.000000",
            "speed=1.2x",
        ];
        for line in block {
            assert_eq!(parser.parse_line(line), None);
        }
        let snapshot = parser.parse_line("progress=continue").unwrap();
        assert_eq!(snapshot.frame, 120);
        assert!((snapshot.out_time_secs - 5.0).abs() < 1e-9);
        assert!(!snapshot.finished);

        parser.parse_line("frame=240");
        let last = parser.parse_line("progress=end").unwrap();
        assert_eq!(last.frame, 240);
        assert!(last.finished);
    }

    #[test]
    fn test_progress_parser_ignores_noise() {
        let mut parser = FfmpegProgressParser::new();
        assert_eq!(parser.parse_line("Input #0, mov,mp4 from 'x.mp4':"), None);
        assert_eq!(parser.parse_line("frame=abc"), None);
        assert_eq!(parser.current().frame, 0);
        parser.parse_line("out_time_ms=-9223372036854775807");
        assert_eq!(parser.current().out_time_secs, 0.0);
    }

    #[test]
    fn test_parse_time() {
        assert_eq!(FfmpegProgressParser::parse_time("01:02:03.5"), Some(3723.5));
        assert_eq!(FfmpegProgressParser::parse_time("02:03"), None);
        assert_eq!(FfmpegProgressParser::parse_time("1:2:3:4"), None);
    }

    #[test]
    fn test_format_ffmpeg_error_with_error_line() {
        let stderr = "frame=  100 fps=25.0\n[libx264 @ 0x7f] Error: invalid parameter\n";
        let error = format_ffmpeg_error(stderr);
        assert!(error.contains("invalid parameter"));
    }

    #[test]
    fn test_format_ffmpeg_error_no_error_line() {
        let stderr = "frame=  100 fps=25.0\nConversion failed!\n";
        assert_eq!(format_ffmpeg_error(stderr), "Conversion failed!");
        assert_eq!(format_ffmpeg_error(""), "Unknown FFmpeg error");
    }

    #[test]
    fn test_error_suggestion() {
        assert!(get_error_suggestion("x.mp4: No such file or directory").is_some());
        assert!(get_error_suggestion("all good").is_none());
    }

    #[test]
    fn test_spawn_missing_tool() {
        let mut cmd = Command::new("nonexistent_tool_for_vid_upscale");
        let err = ToolProcess::spawn("nonexistent_tool_for_vid_upscale", &mut cmd)
            .err()
            .unwrap();
        assert!(matches!(err, UpscaleError::ToolNotFound(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_run_collects_lines_and_stderr() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo one; echo two; echo oops >&2; exit 3"]);
        let cancel = AtomicBool::new(false);
        let mut lines = Vec::new();
        let outcome = ToolProcess::spawn("sh", &mut cmd)
            .unwrap()
            .run(&cancel, |l| lines.push(l.to_string()))
            .unwrap();

        assert_eq!(lines, vec!["one", "two"]);
        match outcome {
            ProcessOutcome::Exited { status, stderr } => {
                assert_eq!(status.code(), Some(3));
                assert!(stderr.contains("oops"));
            }
            ProcessOutcome::Cancelled => panic!("not cancelled"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_run_cancelled_kills_child() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "exec sleep 30"]);
        let cancel = AtomicBool::new(true);
        let start = Instant::now();
        let outcome = ToolProcess::spawn("sh", &mut cmd)
            .unwrap()
            .run(&cancel, |_| {})
            .unwrap();
        assert!(matches!(outcome, ProcessOutcome::Cancelled));
        assert!(start.elapsed() < Duration::from_secs(10));
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prop_frame_value_roundtrips(frame in 0u64..10_000_000) {
            let mut parser = FfmpegProgressParser::new();
            parser.parse_line(&format!("frame={}", frame));
            let snapshot = parser.parse_line("progress=continue").unwrap();
            prop_assert_eq!(snapshot.frame, frame);
        }

        #[test]
        fn prop_format_error_non_empty(content in "[a-zA-Z0-9 ]{1,100}") {
            prop_assert!(!format_ffmpeg_error(&content).is_empty());
        }
    }
}
