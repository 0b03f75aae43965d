//! Shared Utilities for the vid-upscale tools
//!
//! - Logging to a rolling file plus stderr, with external tool records
//! - Unified error type
//! - FFprobe JSON wrapper
//! - Subprocess wrapper with stderr draining, line callbacks and cancellation
//! - ffmpeg `-progress` parser
//! - Progress bars and spinners
//! - Work directory safety checks

pub mod errors;
pub mod ffmpeg_process;
pub mod ffprobe;
pub mod logging;
pub mod progress;
pub mod safety;
pub mod tools;
pub mod video;

pub use errors::{Result, UpscaleError};
pub use ffmpeg_process::{
    format_ffmpeg_error, get_error_suggestion, FfmpegProgress, FfmpegProgressParser,
    ProcessOutcome, ToolProcess,
};
pub use ffprobe::{
    get_frame_rate, get_frame_rate_with, parse_frame_rate, parse_probe_json, probe_video,
    probe_video_with, VideoInfo, FFPROBE,
};
pub use progress::{
    create_progress_bar, create_spinner, format_bytes, format_duration, is_quiet_mode,
    set_quiet_mode,
};
pub use safety::check_dangerous_directory;
pub use tools::ensure_tool;
pub use video::{build_assemble_filter_chain, ensure_even_dimensions, upscaled_dimensions};
