use std::{f32::consts::TAU, path::PathBuf, sync::Arc};

use clap::{Args, Parser, Subcommand};
use pulse_visualiser_core::{
    AnalyserNode, AppConfig, AudioContext, BackdropImage, BackdropSource, ChannelObserver,
    FramePacer, PixelSurface, PulseVizError, SchedulerEvent, SyncScheduler, VisualMode,
};
use tracing_subscriber::EnvFilter;

fn main() -> pulse_visualiser_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Demo(args) => run_demo(args),
        Commands::DefaultConfig => {
            println!("{}", serde_json::to_string_pretty(&AppConfig::default())?);
            Ok(())
        }
    }
}

/// Renders a synthetic beat through the full pipeline on simulated time and
/// prints the resulting feature summary.
fn run_demo(args: DemoArgs) -> pulse_visualiser_core::Result<()> {
    let mut config = match &args.config {
        Some(path) => AppConfig::from_path(path)?,
        None => AppConfig::default(),
    };
    if let Some(mode) = args.mode {
        config.visual.mode = mode;
    }
    let config = config.sanitized();
    tracing::info!(
        bpm = args.bpm,
        seconds = args.seconds,
        mode = ?config.visual.mode,
        "starting demo"
    );

    let context = AudioContext::new(config.audio.sample_rate);
    let analyser = context.create_analyser(&config.analysis)?;

    let mut scheduler = SyncScheduler::new(&config);
    scheduler.bind_audio(&context, Some(Arc::clone(&analyser) as Arc<dyn AnalyserNode>))?;
    scheduler.attach_surface(Box::new(PixelSurface::new(args.width, args.height)))?;
    if let Some(path) = &args.backdrop {
        let image = BackdropImage::open(path)?;
        scheduler
            .engine_mut()
            .set_background_image(BackdropSource::Image(image));
    }

    let (observer, events) = ChannelObserver::bounded(1024);
    scheduler.subscribe(observer);

    let mut synth = BeatSynth::new(args.bpm, config.audio.sample_rate);
    let mut pacer = FramePacer::new(config.scheduler.refresh_hz);
    let mut now = 0.0;
    scheduler.start(now)?;

    let mut skipped = 0u32;
    while now < args.seconds {
        let next = pacer.next_slot(now);
        analyser.push_samples(&synth.render(next - now))?;
        now = next;
        scheduler.tick(now)?;

        for event in events.try_iter() {
            match event {
                SchedulerEvent::Skipped { .. } => skipped += 1,
                SchedulerEvent::Tick { frame, bpm, .. } if frame % 60 == 0 => {
                    tracing::debug!(frame, bpm, "demo progress");
                }
                _ => {}
            }
        }
    }

    tracing::info!(
        frames = scheduler.frames_rendered(),
        skipped,
        bpm = scheduler.extractor().bpm(),
        "demo finished"
    );
    println!(
        "{}",
        serde_json::to_string_pretty(&scheduler.extractor().extract_features())?
    );

    let released = scheduler.stop();
    if let Some(path) = &args.output {
        let surface = released
            .surface
            .ok_or_else(|| PulseVizError::render("no surface to read back"))?;
        let image = surface
            .read_back()?
            .ok_or_else(|| PulseVizError::render("surface cannot be read back"))?;
        image.save(path)?;
        tracing::info!(path = %path.display(), "wrote last frame");
    }
    Ok(())
}

/// Kick drum on every beat over a quiet sustained tone.
struct BeatSynth {
    sample_rate: f32,
    beat_len: usize,
    position: usize,
}

impl BeatSynth {
    fn new(bpm: f32, sample_rate: u32) -> Self {
        let sample_rate = sample_rate as f32;
        let bpm = if bpm.is_finite() && bpm > 0.0 { bpm } else { 120.0 };
        Self {
            sample_rate,
            beat_len: ((60.0 / bpm) * sample_rate).max(1.0) as usize,
            position: 0,
        }
    }

    /// Next `seconds` of audio.
    fn render(&mut self, seconds: f64) -> Vec<f32> {
        let count = (seconds.max(0.0) * f64::from(self.sample_rate)) as usize;
        (0..count)
            .map(|_| {
                let t = self.position as f32 / self.sample_rate;
                let since_beat = (self.position % self.beat_len) as f32 / self.sample_rate;
                self.position += 1;
                let kick = (-since_beat * 14.0).exp() * (TAU * 55.0 * since_beat).sin();
                let tone = 0.15 * (TAU * 440.0 * t).sin();
                (0.8 * kick + tone).clamp(-1.0, 1.0)
            })
            .collect()
    }
}

fn parse_mode(raw: &str) -> Result<VisualMode, String> {
    serde_json::from_value(serde_json::Value::String(raw.to_ascii_lowercase()))
        .map_err(|_| format!("unknown mode `{raw}` (gradient, equalizer, spotlight, combined)"))
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Beat-synchronised music visualiser", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Drive the visualiser with a synthetic beat and report what it heard.
    Demo(DemoArgs),
    /// Print the default configuration as JSON.
    DefaultConfig,
}

#[derive(Args, Debug)]
struct DemoArgs {
    /// Tempo of the synthetic beat.
    #[arg(long, default_value_t = 120.0)]
    bpm: f32,
    /// Simulated playback length in seconds.
    #[arg(long, default_value_t = 12.0)]
    seconds: f64,
    /// Starting visual mode; overrides the configuration file.
    #[arg(long, value_parser = parse_mode)]
    mode: Option<VisualMode>,
    /// JSON configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Image drawn behind the layers.
    #[arg(long)]
    backdrop: Option<PathBuf>,
    /// Write the last rendered frame as a PNG.
    #[arg(short, long)]
    output: Option<PathBuf>,
    #[arg(long, default_value_t = 640)]
    width: u32,
    #[arg(long, default_value_t = 360)]
    height: u32,
}
