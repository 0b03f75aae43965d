//! Job configuration.
//!
//! Precedence: command-line flags, then `VID_UPSCALE_*` environment
//! variables, then the defaults below.

use std::path::PathBuf;

pub const ENV_REALESRGAN_DIR: &str = "VID_UPSCALE_REALESRGAN_DIR";
pub const ENV_WORK_DIR: &str = "VID_UPSCALE_WORK_DIR";
pub const ENV_FFMPEG: &str = "VID_UPSCALE_FFMPEG";
pub const ENV_FFPROBE: &str = "VID_UPSCALE_FFPROBE";

#[derive(Debug, Clone, PartialEq)]
pub struct EncoderConfig {
    pub video_codec: String,
    pub pix_fmt: String,
    pub crf: Option<u8>,
    pub preset: Option<String>,
    pub audio_codec: String,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            video_codec: "libx264".to_string(),
            pix_fmt: "yuv420p".to_string(),
            crf: None,
            preset: None,
            audio_codec: "aac".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InferenceConfig {
    /// Tile size for the upscaler, 0 or `None` disables tiling.
    pub tile: Option<u32>,
    pub fp32: bool,
    pub gpu_id: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpscaleConfig {
    pub realesrgan_dir: PathBuf,
    pub work_dir: PathBuf,
    pub ffmpeg: String,
    pub ffprobe: String,
    /// Overrides the detected frame rate.
    pub fps: Option<f64>,
    pub keep_audio: bool,
    pub keep_frames: bool,
    pub encoder: EncoderConfig,
    pub inference: InferenceConfig,
}

impl Default for UpscaleConfig {
    fn default() -> Self {
        Self {
            realesrgan_dir: PathBuf::from("Real-ESRGAN"),
            work_dir: PathBuf::from("."),
            ffmpeg: "ffmpeg".to_string(),
            ffprobe: shared_utils::FFPROBE.to_string(),
            fps: None,
            keep_audio: true,
            keep_frames: false,
            encoder: EncoderConfig::default(),
            inference: InferenceConfig::default(),
        }
    }
}

impl UpscaleConfig {
    /// Defaults with any `VID_UPSCALE_*` overrides applied.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(dir) = non_empty(ENV_REALESRGAN_DIR) {
            config.realesrgan_dir = PathBuf::from(dir);
        }
        if let Some(dir) = non_empty(ENV_WORK_DIR) {
            config.work_dir = PathBuf::from(dir);
        }
        if let Some(tool) = non_empty(ENV_FFMPEG) {
            config.ffmpeg = tool;
        }
        if let Some(tool) = non_empty(ENV_FFPROBE) {
            config.ffprobe = tool;
        }
        config
    }
}

/// Command-line flags; `None`/`false` leaves the underlying value alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigOverrides {
    pub realesrgan_dir: Option<PathBuf>,
    pub work_dir: Option<PathBuf>,
    pub fps: Option<f64>,
    pub no_audio: bool,
    pub keep_frames: bool,
    pub audio_codec: Option<String>,
    pub video_codec: Option<String>,
    pub crf: Option<u8>,
    pub preset: Option<String>,
    pub tile: Option<u32>,
    pub fp32: bool,
    pub gpu_id: Option<u32>,
}

impl UpscaleConfig {
    pub fn with_overrides(mut self, flags: &ConfigOverrides) -> Self {
        if let Some(dir) = &flags.realesrgan_dir {
            self.realesrgan_dir = dir.clone();
        }
        if let Some(dir) = &flags.work_dir {
            self.work_dir = dir.clone();
        }
        if flags.fps.is_some() {
            self.fps = flags.fps;
        }
        if flags.no_audio {
            self.keep_audio = false;
        }
        if flags.keep_frames {
            self.keep_frames = true;
        }
        if let Some(codec) = &flags.audio_codec {
            self.encoder.audio_codec = codec.clone();
        }
        if let Some(codec) = &flags.video_codec {
            self.encoder.video_codec = codec.clone();
        }
        if flags.crf.is_some() {
            self.encoder.crf = flags.crf;
        }
        if flags.preset.is_some() {
            self.encoder.preset = flags.preset.clone();
        }
        if flags.tile.is_some() {
            self.inference.tile = flags.tile;
        }
        if flags.fp32 {
            self.inference.fp32 = true;
        }
        if flags.gpu_id.is_some() {
            self.inference.gpu_id = flags.gpu_id;
        }
        self
    }
}
