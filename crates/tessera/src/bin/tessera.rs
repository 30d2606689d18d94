//! # TESSERA
//!
//! Runs a synthetic training session and a synthetic detection demo through
//! the sync kernel and prints a summary.
//!
//! ```bash
//! tessera                          # defaults
//! tessera --config tessera.toml    # sizes from a config file
//! tessera --epochs 10 --frames 300
//! RUST_LOG=tessera_core=debug tessera
//! ```

use std::process::ExitCode;
use std::time::Instant;

use tessera::core::{FrameTag, SyncConfig};
use tessera::{
    run_demo, train, DemoReport, Detector, FrameSource, Renderer, Step, TesseraError,
    TesseraResult, TrainingOutcome, TrainingPlan,
};
use tracing_subscriber::EnvFilter;

const LAYER_WIDTH: usize = 64;
const FRAME_PIXELS: usize = 32 * 32;

struct Args {
    config: Option<String>,
    epochs: usize,
    frames: u64,
}

impl Args {
    fn parse() -> TesseraResult<Self> {
        let mut args = Self {
            config: None,
            epochs: TrainingPlan::default().epochs,
            frames: 120,
        };
        let mut iter = std::env::args().skip(1);
        while let Some(flag) = iter.next() {
            let mut value = || {
                iter.next()
                    .ok_or_else(|| TesseraError::Config(format!("{flag} needs a value")))
            };
            match flag.as_str() {
                "--config" => args.config = Some(value()?),
                "--epochs" => args.epochs = parse_number(&flag, &value()?)?,
                "--frames" => args.frames = parse_number(&flag, &value()?)?,
                other => return Err(TesseraError::Config(format!("unknown argument {other}"))),
            }
        }
        Ok(args)
    }
}

fn parse_number<T: std::str::FromStr>(flag: &str, raw: &str) -> TesseraResult<T> {
    raw.parse()
        .map_err(|_| TesseraError::Config(format!("{flag}: expected a number, got {raw}")))
}

// =============================================================================
// SYNTHETIC COLLABORATORS
// =============================================================================

/// Gradient of 0.5 * w^2 per weight.
fn quadratic_gradient(_: Step, weights: &[f32], grads: &mut [f32]) -> f32 {
    let mut loss = 0.0;
    for (w, g) in weights.iter().zip(grads.iter_mut()) {
        *g += *w;
        loss += 0.5 * w * w;
    }
    loss
}

/// Moving gradient bar.
struct SyntheticCamera {
    frame: u64,
    frames: u64,
}

impl FrameSource for SyntheticCamera {
    type Frame = Vec<u8>;

    fn next_frame(&mut self) -> Option<Vec<u8>> {
        if self.frame >= self.frames {
            return None;
        }
        let offset = self.frame as usize;
        self.frame += 1;
        Some(
            (0..FRAME_PIXELS)
                .map(|i| ((i + offset) % 256) as u8)
                .collect(),
        )
    }
}

/// Counts pixels above a threshold.
struct BrightSpotDetector {
    threshold: u8,
}

impl Detector<Vec<u8>> for BrightSpotDetector {
    type Output = usize;

    fn detect(&mut self, frame: &Vec<u8>) -> usize {
        frame.iter().filter(|&&p| p > self.threshold).count()
    }
}

#[derive(Default)]
struct TallyRenderer {
    drawn: u64,
    last: Option<(u64, usize)>,
}

impl Renderer<usize> for &mut TallyRenderer {
    fn render(&mut self, tag: FrameTag, spots: &usize) {
        self.drawn += 1;
        self.last = Some((tag.sequence, *spots));
    }
}

// =============================================================================
// MAIN
// =============================================================================

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "tessera failed");
            eprintln!("   ✗ FATAL: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> TesseraResult<()> {
    let args = Args::parse()?;
    let config = match &args.config {
        Some(path) => SyncConfig::from_file(path)?,
        None => SyncConfig::default(),
    };

    println!("═══════════════════════════════════════════════════════════════════");
    println!("                       TESSERA v{}", env!("CARGO_PKG_VERSION"));
    println!("═══════════════════════════════════════════════════════════════════");
    println!();
    println!("  Layers:   {}", config.num_layers);
    println!("  Workers:  {}", config.worker_threads);
    println!("  Ring:     {} slots", config.demo.ring_len);
    println!();

    let plan = TrainingPlan {
        epochs: args.epochs,
        learning_rate: 0.1,
        ..TrainingPlan::default()
    };
    let weights = vec![vec![1.0f32; LAYER_WIDTH]; config.num_layers];
    let start = Instant::now();
    let outcome = train(&config, &plan, weights, quadratic_gradient)?;
    print_training(&outcome, start.elapsed().as_secs_f64());

    let mut renderer = TallyRenderer::default();
    let report = run_demo(
        &config,
        SyntheticCamera {
            frame: 0,
            frames: args.frames,
        },
        BrightSpotDetector { threshold: 200 },
        &mut renderer,
        None,
    )?;
    print_demo(&report, &renderer);

    Ok(())
}

fn print_training(outcome: &TrainingOutcome, seconds: f64) {
    let first = outcome.stats.epoch_loss.first().copied().unwrap_or(0.0);
    let last = outcome.stats.epoch_loss.last().copied().unwrap_or(0.0);

    println!("┌─ TRAINING ─────────────────────────────────────────────────────┐");
    println!("│ Epochs:             {}", outcome.epochs_completed);
    println!("│ Samples:            {}", outcome.seen_samples);
    println!("│ Batches:            {}", outcome.stats.batches);
    println!("│ Loss (first/last):  {first:.4} / {last:.4}");
    println!("│ Reports:            {}", outcome.reports.len());
    println!("│ Wall time:          {:.3} ms", seconds * 1000.0);
    println!("└──────────────────────────────────────────────────────────────────┘");
    println!();
}

fn print_demo(report: &DemoReport, renderer: &TallyRenderer) {
    let stats = &report.stats;
    println!("┌─ DEMO ─────────────────────────────────────────────────────────┐");
    println!("│ Captured:           {}", stats.frames_captured);
    println!("│ Inferred:           {}", stats.frames_inferred);
    println!("│ Rendered:           {}", renderer.drawn);
    println!("│ Frames dropped:     {}", stats.frames_dropped);
    println!("│ Detections dropped: {}", stats.detections_dropped);
    if let Some((seq, spots)) = renderer.last {
        println!("│ Last frame:         #{seq} ({spots} bright spots)");
    }
    println!("│ Wall time:          {:.3} ms", report.elapsed.as_secs_f64() * 1000.0);
    println!("└──────────────────────────────────────────────────────────────────┘");
}
