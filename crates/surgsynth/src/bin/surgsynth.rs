use std::error::Error;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};

use surgsynth::composite::{default_types, CompositeOptions, Compositor, DEFAULT_OUTPUT};
use surgsynth::overlay::{
    process_image, process_video, Detector, FrameSink, FrameSource, OverlayParams,
    PrecomputedDetector, SequenceReader, SequenceWriter, IMAGE_CONFIDENCE, VIDEO_CONFIDENCE,
};
use surgsynth::render::{DriverMode, RenderConfig, RenderDriver, SilhouetteBackend};

#[derive(Parser, Debug)]
#[command(name = "surgsynth", version, about = "Synthetic surgical-tool dataset tools")]
struct Cli {
    /// error, warn, info, debug, trace, off, quiet or verbose
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Emit JSON logs through tracing instead of the plain logger.
    #[cfg(feature = "tracing")]
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Render a labelled dataset from a render config.
    Render(RenderArgs),
    /// Paste foreground cutouts onto random backgrounds.
    Composite(CompositeArgs),
    /// Draw detection predictions over images or videos.
    #[command(subcommand)]
    Overlay(OverlayCommand),
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ModeArg {
    Single,
    Paired,
}

impl From<ModeArg> for DriverMode {
    fn from(m: ModeArg) -> Self {
        match m {
            ModeArg::Single => DriverMode::Single,
            ModeArg::Paired => DriverMode::Paired,
        }
    }
}

#[derive(Args, Debug)]
struct RenderArgs {
    #[arg(long)]
    config: PathBuf,
    #[arg(long)]
    output_dir: Option<PathBuf>,
    #[arg(long)]
    num_images: Option<usize>,
    #[arg(long, value_enum)]
    mode: Option<ModeArg>,
    #[arg(long)]
    seed: Option<u64>,
    /// Pause before rendering so a debugger can attach.
    #[arg(long)]
    debug: bool,
}

#[derive(Args, Debug)]
struct CompositeArgs {
    /// Directory of foregrounds with alpha.
    #[arg(long)]
    images: PathBuf,
    #[arg(long)]
    backgrounds: PathBuf,
    /// File extensions to process.
    #[arg(long, num_args = 1.., default_values_t = default_types())]
    types: Vec<String>,
    /// Overwrite the foreground files instead of writing to --output.
    #[arg(long)]
    overwrite: bool,
    /// Output directory; `output` resolves inside --images.
    #[arg(long, default_value = DEFAULT_OUTPUT)]
    output: PathBuf,
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Subcommand, Debug)]
enum OverlayCommand {
    /// Overlay a single image.
    Image(OverlayImageArgs),
    /// Overlay a video file or a frame-sequence directory.
    Video(OverlayVideoArgs),
}

/// Where detections come from: saved predictions or a live model.
#[derive(Args, Debug)]
struct DetectorArgs {
    /// Predictions JSON exported from the model.
    #[arg(long, required_unless_present = "model", conflicts_with = "model")]
    predictions: Option<PathBuf>,
    /// YOLOv8-seg model exported to ONNX (build with `--features onnx`).
    #[arg(long)]
    model: Option<PathBuf>,
    /// Model class names in output order, comma separated. Defaults to the
    /// names stored in the model.
    #[arg(long, value_delimiter = ',', requires = "model")]
    classes: Option<Vec<String>>,
}

#[derive(Args, Debug)]
struct OverlayImageArgs {
    #[arg(long)]
    input: PathBuf,
    #[arg(long)]
    output: PathBuf,
    #[command(flatten)]
    detector: DetectorArgs,
    #[arg(long, default_value_t = IMAGE_CONFIDENCE)]
    conf: f32,
}

#[derive(Args, Debug)]
struct OverlayVideoArgs {
    /// Video file (build with `--features video`) or frame-sequence
    /// directory. The output takes the same form.
    #[arg(long)]
    input: PathBuf,
    #[arg(long)]
    output: PathBuf,
    #[command(flatten)]
    detector: DetectorArgs,
    #[arg(long, default_value_t = VIDEO_CONFIDENCE)]
    conf: f32,
    /// Override the input frame rate.
    #[arg(long)]
    fps: Option<f64>,
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_logging(&cli)?;

    match cli.command {
        Command::Render(args) => run_render(args),
        Command::Composite(args) => run_composite(args),
        Command::Overlay(OverlayCommand::Image(args)) => run_overlay_image(args),
        Command::Overlay(OverlayCommand::Video(args)) => run_overlay_video(args),
    }
}

fn init_logging(cli: &Cli) -> Result<(), Box<dyn Error>> {
    #[cfg(feature = "tracing")]
    {
        let _ = tracing_log::LogTracer::init();
        surgsynth::core::init_tracing(cli.log_json);
        Ok(())
    }
    #[cfg(not(feature = "tracing"))]
    {
        let level = surgsynth::core::parse_level(&cli.log_level)
            .ok_or_else(|| format!("unknown log level: {}", cli.log_level))?;
        surgsynth::core::init_with_level(level)?;
        Ok(())
    }
}

fn run_render(args: RenderArgs) -> Result<(), Box<dyn Error>> {
    let mut config = RenderConfig::load_json(&args.config)?;
    if let Some(dir) = args.output_dir {
        config.output_dir = dir;
    }
    if let Some(n) = args.num_images {
        config.num_images = n;
    }
    if let Some(mode) = args.mode {
        config.mode = mode.into();
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    config.debug |= args.debug;

    let coco_dir = config.coco_dir();
    let summary = RenderDriver::new(config, SilhouetteBackend::new())?.run()?;
    for unit in summary.shortfalls() {
        eprintln!(
            "{}: {} of {} images after {} tries",
            unit.label, unit.accepted, unit.requested, unit.tries
        );
    }
    println!(
        "rendered {} images with {} annotations into {}",
        summary.images,
        summary.annotations,
        coco_dir.display()
    );
    Ok(())
}

fn run_composite(args: CompositeArgs) -> Result<(), Box<dyn Error>> {
    let options = CompositeOptions {
        images: args.images,
        backgrounds: args.backgrounds,
        types: args.types,
        overwrite: args.overwrite,
        output: args.output,
        seed: args.seed,
    };
    let mut compositor = Compositor::new(options)?;
    let total = compositor.foregrounds()?.len();

    let pb = ProgressBar::new(total as u64);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("[{bar:40.cyan/blue}] {pos}/{len} {msg}")
    {
        pb.set_style(style.progress_chars("=>-"));
    }
    let records = compositor.run(|record| {
        pb.set_message(
            record
                .foreground
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        );
        pb.inc(1);
    })?;
    pb.finish_with_message("done");

    let darkened = records.iter().filter(|r| r.darken_factor.is_some()).count();
    println!("wrote {} composites ({} darkened)", records.len(), darkened);
    Ok(())
}

fn build_detector(args: DetectorArgs) -> Result<Box<dyn Detector>, Box<dyn Error>> {
    if let Some(path) = args.predictions {
        return Ok(Box::new(PrecomputedDetector::load_json(&path)?));
    }
    let Some(model) = args.model else {
        return Err("one of --predictions or --model is required".into());
    };
    load_model(model, args.classes)
}

#[cfg(feature = "onnx")]
fn load_model(
    model: PathBuf,
    classes: Option<Vec<String>>,
) -> Result<Box<dyn Detector>, Box<dyn Error>> {
    Ok(Box::new(surgsynth::overlay::YoloSegDetector::load(model, classes)?))
}

#[cfg(not(feature = "onnx"))]
fn load_model(
    model: PathBuf,
    _classes: Option<Vec<String>>,
) -> Result<Box<dyn Detector>, Box<dyn Error>> {
    Err(format!(
        "{}: running a model needs a build with `--features onnx`",
        model.display()
    )
    .into())
}

fn run_overlay_image(args: OverlayImageArgs) -> Result<(), Box<dyn Error>> {
    let mut detector = build_detector(args.detector)?;
    let drawn = process_image(
        &args.input,
        &args.output,
        detector.as_mut(),
        &OverlayParams::with_confidence(args.conf),
    )?;
    println!("{} detections -> {}", drawn, args.output.display());
    Ok(())
}

type VideoIo = (Box<dyn FrameSource>, Box<dyn FrameSink>);

/// Frame-sequence directories go through the sequence reader; anything else
/// is a container file.
fn open_video(args: &OverlayVideoArgs) -> Result<VideoIo, Box<dyn Error>> {
    if args.input.is_dir() {
        let source = SequenceReader::open(&args.input, args.fps)?;
        let sink = SequenceWriter::create(&args.output, source.fps(), source.dimensions())?;
        return Ok((Box::new(source), Box::new(sink)));
    }
    open_video_file(args)
}

#[cfg(feature = "video")]
fn open_video_file(args: &OverlayVideoArgs) -> Result<VideoIo, Box<dyn Error>> {
    use surgsynth::overlay::{VideoFileReader, VideoFileWriter};

    let source = VideoFileReader::open(&args.input, args.fps)?;
    let sink = VideoFileWriter::create(&args.output, source.fps(), source.dimensions())?;
    Ok((Box::new(source), Box::new(sink)))
}

#[cfg(not(feature = "video"))]
fn open_video_file(args: &OverlayVideoArgs) -> Result<VideoIo, Box<dyn Error>> {
    Err(format!(
        "{}: video files need a build with `--features video`; \
         frame-sequence directories work without it",
        args.input.display()
    )
    .into())
}

fn run_overlay_video(args: OverlayVideoArgs) -> Result<(), Box<dyn Error>> {
    let (mut source, mut sink) = open_video(&args)?;
    let mut detector = build_detector(args.detector)?;
    let summary = process_video(
        source.as_mut(),
        sink.as_mut(),
        detector.as_mut(),
        &OverlayParams::with_confidence(args.conf),
    )?;
    println!(
        "{} frames, {} detections -> {}",
        summary.frames,
        summary.detections,
        args.output.display()
    );
    Ok(())
}
