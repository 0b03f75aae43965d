//! vid-upscale - Video super-resolution with Real-ESRGAN
//!
//! Splits a video into PNG frames with ffmpeg, upscales them with one or more
//! Real-ESRGAN passes and reassembles the result, keeping the audio track.
//!
//! ## Background job
//! ```rust,ignore
//! use vid_upscale::{find_model, spawn_worker, UpscaleJob, WorkerMessage};
//!
//! let model = find_model("realesr-animevideov3")?;
//! let worker = spawn_worker(UpscaleJob::new("clip.mp4", model, 16))?;
//! for message in worker.events.iter() {
//!     match message {
//!         WorkerMessage::Progress(event) => println!("{event}"),
//!         WorkerMessage::Done(result) => println!("{:?}", result.map(|r| r.output)),
//!     }
//! }
//! ```

pub mod config;
pub mod environment;
pub mod frames;
pub mod menu;
pub mod models;
pub mod pipeline;
pub mod realesrgan;
pub mod scale;
pub mod worker;
pub mod workspace;

pub use config::{ConfigOverrides, EncoderConfig, InferenceConfig, UpscaleConfig};
pub use environment::{CudaStatus, RealEsrganEnv};
pub use models::{
    find_model, MenuOption, ModelCategory, ModelMenu, ModelSpec, DEFAULT_MODEL, MODELS,
};
pub use pipeline::{run_job, ProgressEvent, ProgressSink, UpscaleJob, UpscaleReport};
pub use scale::{plan_passes, ScalePlan};
pub use worker::{spawn_worker, CancelToken, WorkerHandle, WorkerMessage};
pub use workspace::WorkDirs;

pub use shared_utils::errors::{Result, UpscaleError};
