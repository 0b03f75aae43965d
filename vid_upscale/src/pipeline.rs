//! End-to-end upscale job.
//!
//! prepare dirs → verify environment → CUDA probe → ffprobe → extract frames
//! → one Real-ESRGAN pass per power of the model's native ratio → assemble
//! → cleanup. The cancel flag is checked before every step.

use crate::config::UpscaleConfig;
use crate::environment::{CudaStatus, RealEsrganEnv};
use crate::frames::{assemble_video, extract_frames, AssembleRequest};
use crate::models::ModelSpec;
use crate::realesrgan::{run_pass, PassRequest};
use crate::scale::ScalePlan;
use crate::workspace::WorkDirs;
use shared_utils::{
    get_frame_rate_with, probe_video_with, upscaled_dimensions, Result, UpscaleError,
};
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct UpscaleJob {
    pub input: PathBuf,
    /// `None` writes to `res/<stem>_x<target>.mp4` under the work dir.
    pub output: Option<PathBuf>,
    pub model: &'static ModelSpec,
    pub target_scale: u32,
    pub config: UpscaleConfig,
}

impl UpscaleJob {
    pub fn new(input: impl Into<PathBuf>, model: &'static ModelSpec, target_scale: u32) -> Self {
        Self {
            input: input.into(),
            output: None,
            model,
            target_scale,
            config: UpscaleConfig::default(),
        }
    }

    pub fn with_config(mut self, config: UpscaleConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_output(mut self, output: Option<PathBuf>) -> Self {
        self.output = output;
        self
    }

    pub fn output_path(&self) -> PathBuf {
        self.output.clone().unwrap_or_else(|| {
            WorkDirs::new(&self.config.work_dir).default_output(&self.input, self.target_scale)
        })
    }
}

#[derive(Debug, Clone)]
pub struct UpscaleReport {
    pub output: PathBuf,
    pub frames: u64,
    pub passes: u32,
    pub fps: f64,
    pub audio_kept: bool,
    pub cuda: CudaStatus,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Step(String),
    Warning(String),
    /// `pass` is `None` while ffmpeg extracts or assembles.
    Frames {
        done: u64,
        total: u64,
        pass: Option<u32>,
    },
    Log(String),
    Finished(PathBuf),
}

impl fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgressEvent::Step(msg) => write!(f, "[✔] {}", msg),
            ProgressEvent::Warning(msg) => write!(f, "⚠️  {}", msg),
            ProgressEvent::Frames { done, total, pass } => {
                if let Some(pass) = pass {
                    write!(f, "Pass {}: ", pass)?;
                }
                if *total > 0 {
                    write!(f, "{}/{} frames", done, total)
                } else {
                    write!(f, "{} frames", done)
                }
            }
            ProgressEvent::Log(msg) => f.write_str(msg),
            ProgressEvent::Finished(output) => {
                write!(f, "[✔] Done! Video saved as: {}", output.display())
            }
        }
    }
}

/// Receives pipeline progress. Implemented by the worker channel, the CLI
/// renderer and plain closures.
pub trait ProgressSink {
    fn emit(&self, event: ProgressEvent);
}

impl<F> ProgressSink for F
where
    F: Fn(ProgressEvent),
{
    fn emit(&self, event: ProgressEvent) {
        self(event)
    }
}

fn step(sink: &dyn ProgressSink, cancel: &AtomicBool, message: impl Into<String>) -> Result<()> {
    if cancel.load(Ordering::SeqCst) {
        info!("Job cancelled");
        return Err(UpscaleError::Cancelled);
    }
    let message = message.into();
    info!("{}", message);
    sink.emit(ProgressEvent::Step(message));
    Ok(())
}

/// Ctrl-C also kills helper tools, which then report their own failure.
fn cancelled_or<T>(result: Result<T>, cancel: &AtomicBool) -> Result<T> {
    match result {
        Err(e) if cancel.load(Ordering::SeqCst) => {
            info!(error = %e, "Job cancelled");
            Err(UpscaleError::Cancelled)
        }
        other => other,
    }
}

fn warning(sink: &dyn ProgressSink, message: impl Into<String>) {
    let message = message.into();
    warn!("{}", message);
    sink.emit(ProgressEvent::Warning(message));
}

pub fn run_job(
    job: &UpscaleJob,
    sink: &dyn ProgressSink,
    cancel: &AtomicBool,
) -> Result<UpscaleReport> {
    let started = Instant::now();
    let config = &job.config;
    let model = job.model;

    let plan = ScalePlan::new(model.base_scale(), job.target_scale)?;
    let dirs = WorkDirs::new(&config.work_dir);
    let output = job.output_path();

    step(sink, cancel, "Preparing work directories...")?;
    dirs.prepare()?;

    step(sink, cancel, "Checking Real-ESRGAN environment...")?;
    let env = RealEsrganEnv::locate(&config.realesrgan_dir);
    env.verify(model)?;

    step(sink, cancel, "Checking CUDA availability...")?;
    let cuda = env.probe_cuda();
    sink.emit(ProgressEvent::Log(format!("CUDA: {}", cuda)));
    if !cuda.is_available() {
        warning(sink, "CUDA is not available. Real-ESRGAN will run on the CPU (slow).");
    }

    step(sink, cancel, "Probing input video...")?;
    let info = cancelled_or(probe_video_with(&config.ffprobe, &job.input), cancel)?;
    let fps = match config.fps.filter(|f| f.is_finite() && *f > 0.0) {
        Some(fps) => fps,
        None => cancelled_or(get_frame_rate_with(&config.ffprobe, &job.input), cancel)?,
    };
    let audio_kept = config.keep_audio && info.has_audio;
    sink.emit(ProgressEvent::Log(format!(
        "{}x{} {} @ {} fps, audio: {}",
        info.width,
        info.height,
        info.video_codec,
        fps,
        info.audio_codec.as_deref().unwrap_or("none")
    )));
    if config.keep_audio && !info.has_audio {
        sink.emit(ProgressEvent::Log(
            "Input has no audio stream, output will be silent".to_string(),
        ));
    }

    step(sink, cancel, "Extracting frames from video...")?;
    let expected = info.frame_count;
    let frames = extract_frames(&config.ffmpeg, &job.input, &dirs.frames, cancel, |p| {
        sink.emit(ProgressEvent::Frames {
            done: p.frame,
            total: expected,
            pass: None,
        })
    })?;

    let mut final_dir = dirs.frames.clone();
    let pass_dirs = plan.pass_dirs(&dirs.frames, &dirs.upscaled);
    for (index, (input_dir, output_dir)) in pass_dirs.into_iter().enumerate() {
        let pass = index as u32 + 1;
        step(
            sink,
            cancel,
            format!(
                "Upscaling with {} (pass {}/{}, x{})...",
                model.name, pass, plan.passes, plan.base
            ),
        )?;

        let request = PassRequest {
            env: &env,
            model,
            input_dir: &input_dir,
            output_dir: &output_dir,
            inference: &config.inference,
            pass,
            expected_frames: frames,
        };
        let mut done = 0;
        run_pass(&request, cancel, |_| {
            done += 1;
            sink.emit(ProgressEvent::Frames {
                done,
                total: frames,
                pass: Some(pass),
            });
        })?;
        final_dir = output_dir;
    }

    step(sink, cancel, "Assembling upscaled frames into video...")?;
    let request = AssembleRequest {
        frames_dir: &final_dir,
        fps,
        audio_source: audio_kept.then_some(job.input.as_path()),
        frame_size: upscaled_dimensions(info.width, info.height, plan.target),
        encoder: &config.encoder,
        output: &output,
    };
    assemble_video(&config.ffmpeg, &request, cancel, |p| {
        sink.emit(ProgressEvent::Frames {
            done: p.frame,
            total: frames,
            pass: None,
        })
    })?;

    if !config.keep_frames {
        step(sink, cancel, "Cleaning up intermediate frames...")?;
        dirs.cleanup()?;
    }

    let report = UpscaleReport {
        output: output.clone(),
        frames,
        passes: plan.passes,
        fps,
        audio_kept,
        cuda,
        elapsed: started.elapsed(),
    };
    info!(
        output = %report.output.display(),
        frames = report.frames,
        passes = report.passes,
        elapsed_secs = report.elapsed.as_secs_f64(),
        "Upscale finished"
    );
    sink.emit(ProgressEvent::Finished(output));
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::find_model;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[test]
    fn test_event_display() {
        assert_eq!(
            ProgressEvent::Step("Extracting frames from video...".into()).to_string(),
            "[✔] Extracting frames from video..."
        );
        assert_eq!(
            ProgressEvent::Frames {
                done: 3,
                total: 10,
                pass: Some(2)
            }
            .to_string(),
            "Pass 2: 3/10 frames"
        );
        assert_eq!(
            ProgressEvent::Frames {
                done: 7,
                total: 0,
                pass: None
            }
            .to_string(),
            "7 frames"
        );
        assert!(ProgressEvent::Finished(PathBuf::from("res/a_x4.mp4"))
            .to_string()
            .ends_with("res/a_x4.mp4"));
    }

    #[test]
    fn test_output_path_defaults_under_res() {
        let model = find_model("RealESRGAN_x2plus").unwrap();
        let mut config = UpscaleConfig::default();
        config.work_dir = PathBuf::from("/tmp/work");
        let job = UpscaleJob::new("movies/clip.mkv", model, 8).with_config(config);
        assert_eq!(job.output_path(), PathBuf::from("/tmp/work/res/clip_x8.mp4"));

        let job = job.with_output(Some(PathBuf::from("out.mp4")));
        assert_eq!(job.output_path(), PathBuf::from("out.mp4"));
    }

    #[test]
    fn test_unreachable_scale_fails_before_any_step() {
        let temp = TempDir::new().unwrap();
        let model = find_model("realesr-animevideov3").unwrap();
        let mut config = UpscaleConfig::default();
        config.work_dir = temp.path().join("work");
        let job = UpscaleJob::new("in.mp4", model, 8).with_config(config);

        let events = Mutex::new(Vec::new());
        let sink = |e: ProgressEvent| events.lock().unwrap().push(e);
        let err = run_job(&job, &sink, &AtomicBool::new(false)).unwrap_err();

        assert!(matches!(err, UpscaleError::UnsupportedScale { target: 8, base: 4 }));
        assert!(events.lock().unwrap().is_empty());
        assert!(!temp.path().join("work").exists());
    }

    #[test]
    fn test_cancelled_before_start() {
        let temp = TempDir::new().unwrap();
        let model = find_model("realesr-animevideov3").unwrap();
        let mut config = UpscaleConfig::default();
        config.work_dir = temp.path().to_path_buf();
        let job = UpscaleJob::new("in.mp4", model, 4).with_config(config);

        let events = Mutex::new(Vec::new());
        let sink = |e: ProgressEvent| events.lock().unwrap().push(e);
        let err = run_job(&job, &sink, &AtomicBool::new(true)).unwrap_err();

        assert!(err.is_cancelled());
        assert!(events.lock().unwrap().is_empty());
    }

    #[test]
    fn test_missing_environment_stops_after_prepare() {
        let temp = TempDir::new().unwrap();
        let model = find_model("RealESRGAN_x4plus").unwrap();
        let mut config = UpscaleConfig::default();
        config.work_dir = temp.path().join("work");
        config.realesrgan_dir = temp.path().join("no-esrgan");
        let job = UpscaleJob::new("in.mp4", model, 4).with_config(config);

        let events = Mutex::new(Vec::new());
        let sink = |e: ProgressEvent| events.lock().unwrap().push(e);
        let err = run_job(&job, &sink, &AtomicBool::new(false)).unwrap_err();

        assert!(matches!(err, UpscaleError::EnvironmentMissing { .. }));
        assert_eq!(events.lock().unwrap().len(), 2);
        assert!(temp.path().join("work/frames").is_dir());
    }

    #[cfg(unix)]
    mod end_to_end {
        use super::*;
        use std::fs;
        use std::os::unix::fs::PermissionsExt;
        use std::path::Path;

        const FAKE_FFPROBE: &str = r#"#!/bin/sh
case "$*" in *stream=r_frame_rate*) echo "24000/1001"; exit 0 ;; esac
cat <<'EOF'
{"streams":[
 {"codec_type":"video","codec_name":"h264","width":321,"height":240,"r_frame_rate":"24000/1001","nb_frames":"2"},
 {"codec_type":"audio","codec_name":"aac"}
],"format":{"duration":"0.08"}}
EOF
"#;

        // Creates two frames for extraction, or the output file for assembly.
        const FAKE_FFMPEG: &str = r#"#!/bin/sh
for last; do :; done
case "$last" in
  *frame_%05d.png)
    dir=$(dirname "$last")
    touch "$dir/frame_00001.png" "$dir/frame_00002.png"
    ;;
  *)
    echo "$@" > "$last"
    ;;
esac
echo "frame=2"
echo "progress=end"
"#;

        // Answers the CUDA check, otherwise copies -i ($3) into -o ($5).
        const FAKE_PYTHON: &str = r#"#!/bin/sh
if [ "$1" = "-c" ]; then echo False; exit 0; fi
i=0
for f in "$3"/*.png; do
  n=$(basename "$f" .png)
  echo "Testing $i $n"
  touch "$5/${n}_out.png"
  i=$((i+1))
done
"#;

        fn write_script(path: &Path, body: &str) {
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, body).unwrap();
            fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
        }

        fn fake_setup(temp: &TempDir, model: &ModelSpec) -> UpscaleConfig {
            let bin = temp.path().join("bin");
            write_script(&bin.join("ffprobe"), FAKE_FFPROBE);
            write_script(&bin.join("ffmpeg"), FAKE_FFMPEG);

            let env = RealEsrganEnv::locate(temp.path().join("Real-ESRGAN"));
            write_script(&env.python, FAKE_PYTHON);
            fs::write(&env.script, "").unwrap();
            fs::create_dir_all(&env.weights_dir).unwrap();
            fs::write(env.weights_path(model), "").unwrap();

            let mut config = UpscaleConfig::default();
            config.realesrgan_dir = env.root;
            config.work_dir = temp.path().join("work");
            config.ffmpeg = bin.join("ffmpeg").to_string_lossy().into_owned();
            config.ffprobe = bin.join("ffprobe").to_string_lossy().into_owned();
            config
        }

        #[test]
        fn test_two_pass_job() {
            let temp = TempDir::new().unwrap();
            let model = find_model("realesr-animevideov3").unwrap();
            let config = fake_setup(&temp, model);
            let input = temp.path().join("clip.mp4");
            fs::write(&input, "").unwrap();
            let job = UpscaleJob::new(&input, model, 16).with_config(config);

            let events = Mutex::new(Vec::new());
            let sink = |e: ProgressEvent| events.lock().unwrap().push(e);
            let report = run_job(&job, &sink, &AtomicBool::new(false)).unwrap();

            assert_eq!(report.passes, 2);
            assert_eq!(report.frames, 2);
            assert!(report.audio_kept);
            assert_eq!(report.cuda, CudaStatus::Unavailable);
            assert!((report.fps - 23.976).abs() < 0.001);
            assert_eq!(report.output, temp.path().join("work/res/clip_x16.mp4"));

            let ffmpeg_args = fs::read_to_string(&report.output).unwrap();
            assert!(ffmpeg_args.contains("upscaled/pass_2/frame_%05d.png"));
            assert!(ffmpeg_args.contains("-map 1:a:0?"));
            assert!(ffmpeg_args.contains("-vf format=yuv420p"));

            assert_eq!(fs::read_dir(temp.path().join("work/frames")).unwrap().count(), 0);
            assert_eq!(fs::read_dir(temp.path().join("work/upscaled")).unwrap().count(), 0);

            let events = events.lock().unwrap();
            let pass_two_frames = events
                .iter()
                .filter(|e| matches!(e, ProgressEvent::Frames { pass: Some(2), .. }))
                .count();
            assert_eq!(pass_two_frames, 2);
            assert!(events.iter().any(|e| matches!(e, ProgressEvent::Warning(_))));
            assert!(matches!(events.last(), Some(ProgressEvent::Finished(_))));
        }

        #[test]
        fn test_skipped_frames_fail_the_job() {
            let temp = TempDir::new().unwrap();
            let model = find_model("RealESRGAN_x2plus").unwrap();
            let config = fake_setup(&temp, model);
            // upscales the first frame only, like the script after a CUDA OOM
            write_script(
                &RealEsrganEnv::locate(&config.realesrgan_dir).python,
                r#"#!/bin/sh
if [ "$1" = "-c" ]; then echo True; exit 0; fi
echo "Testing 0 frame_00001"
touch "$5/frame_00001_out.png"
echo "Testing 1 frame_00002"
echo "Error CUDA out of memory. Tried to allocate 2.00 GiB"
"#,
            );
            let input = temp.path().join("clip.mp4");
            fs::write(&input, "").unwrap();
            let job = UpscaleJob::new(&input, model, 2).with_config(config);

            let events = Mutex::new(Vec::new());
            let sink = |e: ProgressEvent| events.lock().unwrap().push(e);
            let err = run_job(&job, &sink, &AtomicBool::new(false)).unwrap_err();

            match err {
                UpscaleError::IncompletePass {
                    pass,
                    written,
                    expected,
                    errors,
                } => {
                    assert_eq!((pass, written, expected), (1, 1, 2));
                    assert!(errors.contains("Error CUDA out of memory"));
                    assert!(errors.contains("smaller --tile"));
                }
                other => panic!("unexpected {:?}", other),
            }
            assert!(!job.output_path().exists());
            let events = events.lock().unwrap();
            assert!(!events.iter().any(|e| matches!(e, ProgressEvent::Finished(_))));
            assert!(!events
                .iter()
                .any(|e| matches!(e, ProgressEvent::Step(m) if m.starts_with("Assembling"))));
        }

        #[test]
        fn test_ctrl_c_while_reading_metadata_reports_cancelled() {
            let temp = TempDir::new().unwrap();
            let model = find_model("RealESRGAN_x2plus").unwrap();
            let config = fake_setup(&temp, model);
            // metadata tool killed by the same SIGINT
            write_script(
                &temp.path().join("bin/ffprobe"),
                "#!/bin/sh\necho 'Interrupted' >&2\nexit 255\n",
            );
            let input = temp.path().join("clip.mp4");
            fs::write(&input, "").unwrap();
            let job = UpscaleJob::new(&input, model, 2).with_config(config);

            let err = run_job(&job, &|_: ProgressEvent| {}, &AtomicBool::new(false)).unwrap_err();
            assert!(matches!(err, UpscaleError::Ffprobe(_)));

            let cancel = AtomicBool::new(false);
            let sink = |e: ProgressEvent| {
                if matches!(&e, ProgressEvent::Step(m) if m.contains("input video")) {
                    cancel.store(true, Ordering::SeqCst);
                }
            };
            let err = run_job(&job, &sink, &cancel).unwrap_err();
            assert!(err.is_cancelled());
        }

        #[test]
        fn test_keep_frames_and_no_audio() {
            let temp = TempDir::new().unwrap();
            let model = find_model("RealESRGAN_x2plus").unwrap();
            let mut config = fake_setup(&temp, model);
            config.keep_frames = true;
            config.keep_audio = false;
            config.fps = Some(12.5);
            let input = temp.path().join("clip.mp4");
            fs::write(&input, "").unwrap();
            let output = temp.path().join("out/final.mp4");
            let job = UpscaleJob::new(&input, model, 2)
                .with_config(config)
                .with_output(Some(output.clone()));

            let report = run_job(&job, &|_: ProgressEvent| {}, &AtomicBool::new(false)).unwrap();

            assert_eq!(report.passes, 1);
            assert!(!report.audio_kept);
            assert_eq!(report.fps, 12.5);
            let ffmpeg_args = fs::read_to_string(&output).unwrap();
            assert!(!ffmpeg_args.contains("-map"));
            assert!(temp.path().join("work/upscaled/pass_1/frame_00002.png").exists());
        }
    }
}
