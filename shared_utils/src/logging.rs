//! Logging Module
//!
//! tracing-based logging shared by the vid-upscale binaries:
//! - daily rolling log file in the system temp dir (or a custom dir)
//! - coloured stderr output, warnings and up unless raised
//! - old log files pruned on startup
//! - structured records for every external tool invocation
//!
//! # Examples
//!
//! ```no_run
//! use shared_utils::logging::{LogConfig, init_logging};
//! use tracing::info;
//!
//! init_logging("vid_upscale", LogConfig::default()).expect("Failed to initialize logging");
//! info!("Program started");
//! ```

use anyhow::{Context, Result};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::Level;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    filter::LevelFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer,
};

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Directory for log files, system temp dir by default.
    pub log_dir: PathBuf,
    /// Number of log files kept after pruning.
    pub max_files: usize,
    pub level: Level,
    /// Minimum level echoed to stderr; the file gets everything `level` allows.
    pub stderr_level: Level,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_dir: std::env::temp_dir(),
            max_files: 5,
            level: Level::INFO,
            stderr_level: Level::WARN,
        }
    }
}

impl LogConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_log_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.log_dir = dir.as_ref().to_path_buf();
        self
    }

    pub fn with_max_files(mut self, count: usize) -> Self {
        self.max_files = count;
        self
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn with_stderr_level(mut self, level: Level) -> Self {
        self.stderr_level = level;
        self
    }
}

/// Filter directive used when `RUST_LOG` is not set.
pub fn default_filter_directive(program_name: &str, level: Level) -> String {
    format!("{}={},shared_utils={}", program_name, level, level)
}

/// Installs the global subscriber. Can only succeed once per process.
///
/// Log file name: `{program_name}.log` (with the appender's date suffix).
pub fn init_logging(program_name: &str, config: LogConfig) -> Result<()> {
    std::fs::create_dir_all(&config.log_dir)
        .with_context(|| format!("Failed to create log directory: {:?}", config.log_dir))?;

    let log_file_name = format!("{}.log", program_name);
    let file_appender = RollingFileAppender::new(Rotation::DAILY, &config.log_dir, &log_file_name);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter_directive(program_name, config.level)));

    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true);

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .with_target(false)
        .with_line_number(false)
        .with_filter(LevelFilter::from_level(config.stderr_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
        .context("Logging already initialized")?;

    tracing::debug!(
        program = program_name,
        log_dir = ?config.log_dir,
        log_file = log_file_name,
        max_files = config.max_files,
        level = ?config.level,
        "Logging system initialized"
    );

    cleanup_old_logs(&config.log_dir, program_name, config.max_files)?;

    Ok(())
}

/// Keeps the `max_files` most recently modified `{program_name}*.log*` files.
fn cleanup_old_logs(log_dir: &Path, program_name: &str, max_files: usize) -> Result<()> {
    use std::fs;

    let entries = fs::read_dir(log_dir)
        .with_context(|| format!("Failed to read log directory: {:?}", log_dir))?;

    let mut log_files: Vec<(PathBuf, std::time::SystemTime)> = Vec::new();

    for entry in entries {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }

        let Some(file_name) = path.file_name() else {
            continue;
        };
        let file_name = file_name.to_string_lossy();
        if file_name.starts_with(program_name) && file_name.contains(".log") {
            if let Ok(modified) = fs::metadata(&path).and_then(|m| m.modified()) {
                log_files.push((path, modified));
            }
        }
    }

    if log_files.len() > max_files {
        log_files.sort_by(|a, b| b.1.cmp(&a.1));

        for (path, _) in log_files.iter().skip(max_files) {
            if let Err(e) = fs::remove_file(path) {
                tracing::warn!(path = ?path, error = %e, "Failed to remove old log file");
            } else {
                tracing::debug!(path = ?path, "Removed old log file");
            }
        }
    }

    Ok(())
}

pub fn format_command<S: AsRef<OsStr>>(tool_name: &str, args: &[S]) -> String {
    let mut command = tool_name.to_string();
    for arg in args {
        command.push(' ');
        command.push_str(&arg.as_ref().to_string_lossy());
    }
    command
}

/// Records one external tool invocation.
pub fn log_external_tool(
    tool_name: &str,
    command: &str,
    output: &str,
    exit_code: Option<i32>,
    duration: Duration,
) {
    match exit_code {
        Some(0) => {
            tracing::info!(
                tool = tool_name,
                command = %command,
                duration_secs = duration.as_secs_f64(),
                exit_code = 0,
                "External tool completed successfully"
            );
            tracing::debug!(tool = tool_name, output = %output, "External tool output");
        }
        Some(code) => {
            tracing::error!(
                tool = tool_name,
                command = %command,
                duration_secs = duration.as_secs_f64(),
                exit_code = code,
                output = %output,
                "External tool failed"
            );
        }
        None => {
            tracing::error!(
                tool = tool_name,
                command = %command,
                duration_secs = duration.as_secs_f64(),
                output = %output,
                "External tool terminated without exit code"
            );
        }
    }
}

#[derive(Debug)]
pub struct ExternalCommandResult {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl ExternalCommandResult {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs a tool to completion, capturing and logging its output.
///
/// ```no_run
/// use shared_utils::logging::execute_external_command;
/// # fn main() -> anyhow::Result<()> {
/// let result = execute_external_command("ffmpeg", &["-version"])?;
/// if result.success() {
///     println!("{}", result.stdout);
/// }
/// # Ok(())
/// # }
/// ```
pub fn execute_external_command<S: AsRef<OsStr>>(
    tool_name: &str,
    args: &[S],
) -> Result<ExternalCommandResult> {
    use std::process::Command;

    let command_str = format_command(tool_name, args);
    tracing::debug!(tool = tool_name, command = %command_str, "Executing external command");

    let start_time = Instant::now();
    let output = Command::new(tool_name)
        .args(args)
        .output()
        .with_context(|| format!("Failed to execute command: {}", command_str))?;
    let duration = start_time.elapsed();

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let exit_code = output.status.code();

    let combined_output = if !stdout.is_empty() && !stderr.is_empty() {
        format!("STDOUT:\n{}\n\nSTDERR:\n{}", stdout, stderr)
    } else if !stdout.is_empty() {
        stdout.clone()
    } else {
        stderr.clone()
    };

    log_external_tool(tool_name, &command_str, &combined_output, exit_code, duration);

    Ok(ExternalCommandResult {
        exit_code,
        stdout,
        stderr,
        duration,
    })
}

/// Like [`execute_external_command`] but a non-zero exit is an error.
pub fn execute_external_command_checked<S: AsRef<OsStr>>(
    tool_name: &str,
    args: &[S],
) -> Result<ExternalCommandResult> {
    let result = execute_external_command(tool_name, args)?;

    if !result.success() {
        anyhow::bail!(
            "Command failed with exit code {:?}: {}\nSTDERR: {}",
            result.exit_code,
            format_command(tool_name, args),
            result.stderr
        );
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_log_config_default() {
        let config = LogConfig::default();
        assert_eq!(config.max_files, 5);
        assert_eq!(config.level, Level::INFO);
        assert_eq!(config.stderr_level, Level::WARN);
        assert_eq!(config.log_dir, std::env::temp_dir());
    }

    #[test]
    fn test_log_config_builder() {
        let temp_dir = TempDir::new().unwrap();
        let config = LogConfig::new()
            .with_log_dir(temp_dir.path())
            .with_max_files(3)
            .with_level(Level::DEBUG)
            .with_stderr_level(Level::INFO);

        assert_eq!(config.log_dir, temp_dir.path());
        assert_eq!(config.stderr_level, Level::INFO);
        assert_eq!(config.max_files, 3);
        assert_eq!(config.level, Level::DEBUG);
    }

    #[test]
    fn test_default_filter_covers_shared_utils() {
        let directive = default_filter_directive("vid_upscale", Level::DEBUG);
        assert_eq!(directive, "vid_upscale=DEBUG,shared_utils=DEBUG");
    }

    #[test]
    fn test_cleanup_old_logs() {
        let temp_dir = TempDir::new().unwrap();
        let program_name = "test_program";

        for i in 0..10 {
            let file_path = temp_dir.path().join(format!("{}.log.{}", program_name, i));
            fs::write(&file_path, format!("log content {}", i)).unwrap();
            std::thread::sleep(Duration::from_millis(10));
        }
        fs::write(temp_dir.path().join("other.log"), "keep").unwrap();

        cleanup_old_logs(temp_dir.path(), program_name, 3).unwrap();

        let remaining: Vec<_> = fs::read_dir(temp_dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(program_name))
            .collect();
        assert_eq!(remaining.len(), 3);
        assert!(temp_dir.path().join("other.log").exists());
    }

    #[test]
    fn test_format_command() {
        assert_eq!(
            format_command("ffmpeg", &["-y", "-i", "in.mp4"]),
            "ffmpeg -y -i in.mp4"
        );
        let empty: [&str; 0] = [];
        assert_eq!(format_command("ffprobe", &empty), "ffprobe");
    }

    #[cfg(unix)]
    #[test]
    fn test_execute_external_command_success() {
        let result = execute_external_command("echo", &["hello", "world"]).unwrap();
        assert!(result.success());
        assert!(result.stdout.contains("hello"));
    }

    #[test]
    fn test_execute_external_command_missing_tool() {
        let result = execute_external_command("nonexistent_command_xyz", &["arg1"]);
        assert!(result.is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_execute_external_command_checked() {
        assert!(execute_external_command_checked("false", &[] as &[&str]).is_err());
        let ok = execute_external_command_checked("true", &[] as &[&str]).unwrap();
        assert_eq!(ok.exit_code, Some(0));
    }
}
