use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum UpscaleError {
    #[error("External tool not found: {0}")]
    ToolNotFound(String),

    #[error("FFprobe failed: {0}")]
    Ffprobe(String),

    #[error("FFmpeg failed: {message}\n{stderr}")]
    Ffmpeg { message: String, stderr: String },

    #[error("Upscale pass {pass} failed:\n{stderr}")]
    Inference { pass: u32, stderr: String },

    #[error("Upscale pass {pass} wrote {written} of {expected} frames:\n{errors}")]
    IncompletePass {
        pass: u32,
        written: u64,
        expected: u64,
        errors: String,
    },

    #[error("{what} not found: {}", path.display())]
    EnvironmentMissing { what: String, path: PathBuf },

    #[error("Model weights not found: {}", .0.display())]
    ModelNotFound(PathBuf),

    #[error("Cannot reach x{target} with base x{base}")]
    UnsupportedScale { target: u32, base: u32 },

    #[error("Invalid model or scale selection: {0}")]
    InvalidSelection(String),

    #[error("No frames found in {}", .0.display())]
    NoFramesProduced(PathBuf),

    #[error("Refusing to clear work directory: {0}")]
    UnsafeWorkDir(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("Worker thread panicked")]
    WorkerPanicked,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl UpscaleError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, UpscaleError::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, UpscaleError>;
