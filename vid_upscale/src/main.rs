use clap::{Args, Parser, Subcommand};
use console::{style, Term};
use indicatif::ProgressBar;
use std::path::PathBuf;
use tracing::{info, Level};

use shared_utils::logging::{execute_external_command_checked, init_logging, LogConfig};
use shared_utils::{
    create_progress_bar, create_spinner, ensure_tool, format_bytes, format_duration,
    probe_video_with, set_quiet_mode,
};
use vid_upscale::environment::{RealEsrganEnv, INFERENCE_SCRIPT};
use vid_upscale::menu::{describe, print_menu, prompt_input, prompt_selection};
use vid_upscale::{
    find_model, spawn_worker, ConfigOverrides, ModelCategory, ModelMenu, ProgressEvent,
    UpscaleConfig,
    UpscaleError, UpscaleJob, UpscaleReport, WorkerMessage, DEFAULT_MODEL, MODELS,
};

const EXIT_FAILURE: i32 = 1;
const EXIT_CANCELLED: i32 = 130;

#[derive(Parser)]
#[command(name = "vid-upscale")]
#[command(version, about = "Video upscaler driving ffmpeg and Real-ESRGAN", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Options shared by `run` and `menu`.
#[derive(Args, Debug, Clone)]
struct JobArgs {
    /// Output file, defaults to <work-dir>/res/<name>_x<scale>.mp4
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Override the detected frame rate
    #[arg(long)]
    fps: Option<f64>,
    #[arg(long)]
    no_audio: bool,
    #[arg(long)]
    audio_codec: Option<String>,
    /// Video encoder passed to ffmpeg
    #[arg(long)]
    codec: Option<String>,
    #[arg(long)]
    crf: Option<u8>,
    #[arg(long)]
    preset: Option<String>,
    /// Real-ESRGAN tile size, 0 disables tiling
    #[arg(short, long)]
    tile: Option<u32>,
    #[arg(long)]
    fp32: bool,
    #[arg(long)]
    gpu_id: Option<u32>,
    #[arg(long)]
    realesrgan_dir: Option<PathBuf>,
    #[arg(long)]
    work_dir: Option<PathBuf>,
    /// Keep extracted and upscaled frames after success
    #[arg(long)]
    keep_frames: bool,
    #[arg(short, long)]
    quiet: bool,
    #[arg(short, long)]
    verbose: bool,
}

impl JobArgs {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            realesrgan_dir: self.realesrgan_dir.clone(),
            work_dir: self.work_dir.clone(),
            fps: self.fps,
            no_audio: self.no_audio,
            keep_frames: self.keep_frames,
            audio_codec: self.audio_codec.clone(),
            video_codec: self.codec.clone(),
            crf: self.crf,
            preset: self.preset.clone(),
            tile: self.tile,
            fp32: self.fp32,
            gpu_id: self.gpu_id,
        }
    }

    fn to_config(&self) -> UpscaleConfig {
        UpscaleConfig::from_env().with_overrides(&self.overrides())
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Upscale a video with the given model and scale
    Run {
        #[arg(short, long, value_name = "VIDEO")]
        input: PathBuf,
        #[arg(short, long, default_value = DEFAULT_MODEL)]
        model: String,
        /// Target scale, a power of the model's native ratio
        #[arg(short, long)]
        scale: u32,
        #[command(flatten)]
        job: JobArgs,
    },

    /// Pick model and scale from a numbered menu
    Menu {
        #[arg(short, long, value_name = "VIDEO")]
        input: Option<PathBuf>,
        #[command(flatten)]
        job: JobArgs,
    },

    /// List the model catalog
    Models,

    /// Check ffmpeg, ffprobe, the Real-ESRGAN checkout and CUDA
    Check {
        #[arg(short, long, default_value = DEFAULT_MODEL)]
        model: String,
        #[arg(long)]
        realesrgan_dir: Option<PathBuf>,
    },

    /// Print what ffprobe reports about a video
    Probe {
        #[arg(value_name = "VIDEO")]
        video: PathBuf,
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    let (quiet, verbose) = match &cli.command {
        Commands::Run { job, .. } | Commands::Menu { job, .. } => (job.quiet, job.verbose),
        _ => (false, false),
    };
    set_quiet_mode(quiet);

    let log_config = if verbose {
        LogConfig::default()
            .with_level(Level::DEBUG)
            .with_stderr_level(Level::DEBUG)
    } else {
        LogConfig::default().with_stderr_level(Level::ERROR)
    };
    if let Err(e) = init_logging("vid_upscale", log_config) {
        eprintln!("⚠️  Could not initialize logging: {}", e);
    }

    if let Err(e) = dispatch(cli.command) {
        let code = exit_code(&e);
        if code == EXIT_CANCELLED {
            eprintln!("\n{}", style("Cancelled.").yellow());
        } else {
            eprintln!("\n❌ {:#}", e);
        }
        std::process::exit(code);
    }
}

fn exit_code(err: &anyhow::Error) -> i32 {
    let cancelled = err
        .downcast_ref::<UpscaleError>()
        .is_some_and(UpscaleError::is_cancelled);
    if cancelled {
        EXIT_CANCELLED
    } else {
        EXIT_FAILURE
    }
}

fn dispatch(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Run {
            input,
            model,
            scale,
            job,
        } => {
            let model = find_model(&model)?;
            let upscale = UpscaleJob::new(input, model, scale)
                .with_config(job.to_config())
                .with_output(job.output.clone());
            let report = run_in_background(upscale, job.quiet)?;
            print_report(&report);
        }

        Commands::Menu { input, job } => {
            let term = Term::stdout();
            let menu = ModelMenu::build();
            print_menu(&term, &menu)?;
            let option = prompt_selection(&term, &menu)?;
            let input = match input {
                Some(path) => path,
                None => prompt_input(&term)?,
            };
            term.write_line(&format!("\nSelected: {}", describe(&option)))?;

            let upscale = UpscaleJob::new(input, option.model, option.target)
                .with_config(job.to_config())
                .with_output(job.output.clone());
            let report = run_in_background(upscale, job.quiet)?;
            print_report(&report);
        }

        Commands::Models => print_models(),

        Commands::Check {
            model,
            realesrgan_dir,
        } => check(&model, realesrgan_dir)?,

        Commands::Probe { video, json } => {
            let config = UpscaleConfig::from_env();
            let info = probe_video_with(&config.ffprobe, &video)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&info)?);
            } else {
                println!("\n📊 {}", style(video.display()).cyan());
                println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
                println!("🎬 Codec: {}", info.video_codec);
                println!("📐 Resolution: {}x{}", info.width, info.height);
                println!("🎞️  Frames: {} @ {:.3} fps", info.frame_count, info.frame_rate);
                println!("⏱️  Duration: {:.2}s", info.duration);
                println!(
                    "🎵 Audio: {}",
                    if info.has_audio {
                        info.audio_codec.as_deref().unwrap_or("yes")
                    } else {
                        "no"
                    }
                );
                println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
            }
        }
    }

    Ok(())
}

/// Starts the worker, wires Ctrl-C to its cancel token and renders events
/// until it reports back.
fn run_in_background(job: UpscaleJob, quiet: bool) -> anyhow::Result<UpscaleReport> {
    info!(
        input = %job.input.display(),
        model = job.model.name,
        scale = job.target_scale,
        "Starting upscale job"
    );
    let worker = spawn_worker(job)?;
    let token = worker.cancel_token();
    ctrlc::set_handler(move || token.cancel())?;

    let mut renderer = EventRenderer::new(quiet);
    let mut outcome = None;
    for message in worker.events.iter() {
        match message {
            WorkerMessage::Progress(event) => renderer.render(&event),
            WorkerMessage::Done(result) => outcome = Some(result),
        }
    }
    renderer.finish_bar();
    worker.join()?;

    Ok(outcome.unwrap_or(Err(UpscaleError::WorkerPanicked))?)
}

struct EventRenderer {
    quiet: bool,
    bar: Option<ProgressBar>,
}

impl EventRenderer {
    fn new(quiet: bool) -> Self {
        Self { quiet, bar: None }
    }

    fn finish_bar(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }

    fn println(&self, line: String) {
        match &self.bar {
            Some(bar) => bar.suspend(|| println!("{}", line)),
            None => println!("{}", line),
        }
    }

    fn render(&mut self, event: &ProgressEvent) {
        match event {
            ProgressEvent::Frames { done, total, pass } => {
                let bar = self.bar.get_or_insert_with(|| {
                    let prefix = match pass {
                        Some(pass) => format!("Pass {}", pass),
                        None => "ffmpeg".to_string(),
                    };
                    create_progress_bar(*total, &prefix)
                });
                if *total > 0 {
                    bar.set_length(*total);
                }
                bar.set_position(*done);
            }
            ProgressEvent::Step(_) => {
                self.finish_bar();
                if !self.quiet {
                    println!("\n{}", style(event).green());
                }
            }
            ProgressEvent::Warning(_) => self.println(style(event).yellow().to_string()),
            ProgressEvent::Log(_) => {
                if !self.quiet {
                    self.println(style(event).dim().to_string());
                }
            }
            ProgressEvent::Finished(_) => {
                self.finish_bar();
                println!("\n{}", style(event).green().bold());
            }
        }
    }
}

fn print_report(report: &UpscaleReport) {
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    let size = std::fs::metadata(&report.output).map(|m| m.len()).unwrap_or(0);
    println!(
        "📁 Output: {} ({})",
        style(report.output.display()).cyan(),
        format_bytes(size)
    );
    println!("🎞️  Frames: {} @ {:.3} fps", report.frames, report.fps);
    println!("🔁 Passes: {}", report.passes);
    println!("🎵 Audio: {}", if report.audio_kept { "kept" } else { "none" });
    println!("⚡ CUDA: {}", report.cuda);
    println!("⏱️  Time: {}", format_duration(report.elapsed));
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
}

fn print_models() {
    println!("\n{:<30} {:<12} {:>6}  Targets", "Model", "Category", "Native");
    println!("{}", "-".repeat(64));
    for model in MODELS {
        let targets: Vec<String> = model.targets.iter().map(|t| format!("x{}", t)).collect();
        let category = match model.category {
            ModelCategory::Universal => style(model.category.as_str()).green(),
            ModelCategory::Anime => style(model.category.as_str()).magenta(),
        };
        println!(
            "{:<30} {:<12} {:>6}  {}",
            model.name,
            category,
            format!("x{}", model.base_scale()),
            targets.join(", ")
        );
    }
}

fn status_line(ok: bool, label: &str, detail: impl std::fmt::Display) {
    let mark = if ok { style("✅").green() } else { style("❌").red() };
    println!("{} {:<22} {}", mark, label, detail);
}

/// Resolved path plus the first line of `-version`, e.g. `ffmpeg version 7.1`.
fn tool_detail(resolved: &Result<PathBuf, UpscaleError>, name: &str) -> String {
    let path = match resolved {
        Ok(path) => path,
        Err(_) => return format!("{} not found on PATH", name),
    };
    let version = execute_external_command_checked(name, &["-version"])
        .ok()
        .and_then(|r| r.stdout.lines().next().map(|l| l.trim().to_string()));
    match version {
        Some(version) => format!("{} ({})", path.display(), version),
        None => path.display().to_string(),
    }
}

fn check(model: &str, realesrgan_dir: Option<PathBuf>) -> anyhow::Result<()> {
    let mut config = UpscaleConfig::from_env();
    if let Some(dir) = realesrgan_dir {
        config.realesrgan_dir = dir;
    }
    let model = find_model(model)?;
    let env = RealEsrganEnv::locate(&config.realesrgan_dir);

    println!("\n🔍 Environment check");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    let ffmpeg = ensure_tool(&config.ffmpeg);
    status_line(ffmpeg.is_ok(), "ffmpeg", tool_detail(&ffmpeg, &config.ffmpeg));
    let ffprobe = ensure_tool(&config.ffprobe);
    status_line(ffprobe.is_ok(), "ffprobe", tool_detail(&ffprobe, &config.ffprobe));
    status_line(env.python.is_file(), "venv interpreter", env.python.display());
    status_line(env.script.is_file(), INFERENCE_SCRIPT, env.script.display());
    let weights = env.weights_path(model);
    status_line(weights.is_file(), "model weights", weights.display());

    let verified = env.verify(model);
    if verified.is_ok() {
        let spinner = create_spinner("Asking torch about CUDA...");
        let cuda = env.probe_cuda();
        spinner.finish_and_clear();
        status_line(cuda.is_available(), "CUDA", &cuda);
    }
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    verified?;
    ffmpeg?;
    ffprobe?;
    println!("{}", style("Ready to upscale.").green().bold());
    Ok(())
}
