use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use geltouch::analysis::PressClassifier;
use geltouch::config::AppConfig;
use geltouch::measurement::{FeatureMode, FeatureVector};
use geltouch::monitor::Monitor;
use geltouch::source::{create_data_source, DataSource, DeviceRegistry, SweepCapable};

#[derive(Parser, Debug)]
#[command(
    name = "touch_monitor",
    about = "Collect, train, and monitor gel-pad press detection"
)]
struct Cli {
    /// Configuration file (JSON); defaults apply when missing
    #[arg(long, default_value = "geltouch.json")]
    config: PathBuf,
    /// Directory holding the classifier artifact
    #[arg(long, default_value = "models")]
    model_dir: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Collect labeled samples from the configured source and train
    Train {
        /// Samples collected per class
        #[arg(long, default_value_t = 30)]
        per_class: usize,
        /// Train on spectral sweep features instead of single-pair features
        #[arg(long)]
        sweep: bool,
    },
    /// Run the monitor loop, printing one JSON event per tick
    Monitor {
        /// Number of events to print before exiting
        #[arg(long, default_value_t = 50)]
        ticks: u64,
        /// Baseline samples for drift calibration before monitoring (0 = skip)
        #[arg(long, default_value_t = 0)]
        calibrate: usize,
    },
    /// Print a summary of the saved classifier
    Info,
}

fn main() -> ExitCode {
    geltouch::init_logging();
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::from(1)
        }
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load_from_file(&cli.config);

    match cli.command {
        Commands::Train { per_class, sweep } => run_train(&config, &cli.model_dir, per_class, sweep),
        Commands::Monitor { ticks, calibrate } => {
            run_monitor(&config, &cli.model_dir, ticks, calibrate)
        }
        Commands::Info => run_info(&config, &cli.model_dir),
    }
}

fn run_train(config: &AppConfig, model_dir: &PathBuf, per_class: usize, sweep: bool) -> Result<()> {
    let spectral = sweep || config.monitor.use_sweep;
    let mode = if spectral {
        FeatureMode::Spectral
    } else {
        FeatureMode::Compact
    };

    let mut source =
        create_data_source(config, DeviceRegistry::default()).context("building data source")?;
    if !source.connect() {
        bail!("data source failed to connect");
    }
    println!("Source: {}", source.device_info());

    let mut classifier = PressClassifier::new(mode, config.classifier.clone());

    let (released_pos, pressed_pos) = touch_positions(config)?;
    for (label, name, position) in [
        (0u8, "released", released_pos),
        (1u8, "pressed", pressed_pos),
    ] {
        prepare_phase(source.as_mut(), name, position);
        println!("Collecting {} '{}' samples...", per_class, name);
        let vectors = collect_vectors(source.as_mut(), mode, per_class, config)?;
        classifier
            .add_samples_batch(&vectors, label)
            .context("buffering samples")?;
    }

    let report = classifier.train().context("training classifier")?;
    println!(
        "Trained: train={:.1}%, test={:.1}% ({} train / {} test)",
        report.train_accuracy * 100.0,
        report.test_accuracy * 100.0,
        report.n_train,
        report.n_test
    );

    let path = classifier.save(model_dir).context("saving artifact")?;
    println!("Saved {}", path.display());
    source.disconnect();
    Ok(())
}

fn run_monitor(
    config: &AppConfig,
    model_dir: &PathBuf,
    ticks: u64,
    calibrate: usize,
) -> Result<()> {
    let mut classifier = PressClassifier::load(model_dir, config.classifier.clone())
        .context("loading classifier artifact")?;
    println!("{}", classifier.info());

    let mut source =
        create_data_source(config, DeviceRegistry::default()).context("building data source")?;
    if !source.connect() {
        bail!("data source failed to connect");
    }

    if calibrate > 0 {
        let (released_pos, _) = touch_positions(config)?;
        prepare_phase(source.as_mut(), "released", released_pos);
        println!("Collecting {} baseline samples for calibration...", calibrate);
        let vectors = collect_vectors(source.as_mut(), classifier.mode(), calibrate, config)?;
        let report = classifier.calibrate(&vectors).context("calibrating")?;
        println!("Calibrated: drift norm {:.3} sigma", report.drift_norm);
    }

    // The trained mode decides the acquisition path, not the config flag
    let mut monitor_config = config.monitor.clone();
    monitor_config.use_sweep = classifier.mode() == FeatureMode::Spectral;

    let mut monitor = Monitor::start(
        source,
        classifier,
        monitor_config,
        config.measurement.sweep.clone(),
        config.classifier.grid_positions.clone(),
    );
    let mut events = monitor.subscribe();
    for _ in 0..ticks {
        let event = events
            .blocking_recv()
            .context("monitor loop ended unexpectedly")?;
        println!("{}", serde_json::to_string(&event)?);
    }
    monitor.stop();
    Ok(())
}

fn run_info(config: &AppConfig, model_dir: &PathBuf) -> Result<()> {
    let classifier = PressClassifier::load(model_dir, config.classifier.clone())
        .context("loading classifier artifact")?;
    println!("{}", classifier.info());
    Ok(())
}

/// (released, pressed) collection positions on the pad
///
/// Pressed is the midpoint of the monitored pair's path; released is the
/// pad corner farthest from it.
fn touch_positions(config: &AppConfig) -> Result<((f64, f64), (f64, f64))> {
    let pair = config
        .measurement
        .pairs
        .get(config.monitor.pair_index)
        .with_context(|| format!("pair index {} not configured", config.monitor.pair_index))?;
    let source = config
        .geometry
        .terminal(&pair.source)
        .with_context(|| format!("unknown terminal '{}'", pair.source))?;
    let sink = config
        .geometry
        .terminal(&pair.sink)
        .with_context(|| format!("unknown terminal '{}'", pair.sink))?;

    let pressed = (
        (source.x_mm + sink.x_mm) / 2.0,
        (source.y_mm + sink.y_mm) / 2.0,
    );
    let (w, h) = (config.geometry.gel_width_mm, config.geometry.gel_height_mm);
    let released = [(0.0, 0.0), (w, 0.0), (w, h), (0.0, h)]
        .into_iter()
        .max_by(|a, b| {
            let da = (pressed.0 - a.0).hypot(pressed.1 - a.1);
            let db = (pressed.0 - b.0).hypot(pressed.1 - b.1);
            da.total_cmp(&db)
        })
        .unwrap_or((w, h));
    Ok((released, pressed))
}

/// Move the simulated touch, or walk the operator through the phase
fn prepare_phase(source: &mut dyn DataSource, name: &str, position: (f64, f64)) {
    if source.ground_truth().is_some() {
        source.set_ground_truth(position.0, position.1);
    } else {
        // Real hardware: the operator is the ground truth
        print!(
            "Put the pad in the '{}' state and press Enter to continue... ",
            name
        );
        let _ = std::io::stdout().flush();
        let mut line = String::new();
        let _ = std::io::stdin().lock().read_line(&mut line);
    }
}

/// Acquire `n` feature vectors in the requested mode
fn collect_vectors(
    source: &mut dyn DataSource,
    mode: FeatureMode,
    n: usize,
    config: &AppConfig,
) -> Result<Vec<FeatureVector>> {
    let mut vectors = Vec::with_capacity(n);
    for _ in 0..n {
        match mode {
            FeatureMode::Compact => {
                let samples = source
                    .measure_impedance_vector()
                    .context("measuring impedance")?;
                let sample = samples
                    .get(config.monitor.pair_index)
                    .with_context(|| format!("pair index {} not measured", config.monitor.pair_index))?;
                vectors.push(FeatureVector::compact(sample.magnitude_ohm, sample.phase_rad));
            }
            FeatureMode::Spectral => {
                let sweep_cfg = &config.measurement.sweep;
                let sweep_capable = source
                    .as_sweep_capable()
                    .context("configured source is not sweep-capable")?;
                let sweep = sweep_capable
                    .sweep_impedance(sweep_cfg.start_hz, sweep_cfg.stop_hz, sweep_cfg.points)
                    .context("running sweep")?;
                let features = sweep_capable
                    .extract_spectral_features(Some(&sweep))
                    .context("extracting spectral features")?;
                vectors.push(features.to_feature_vector());
            }
        }
    }
    Ok(vectors)
}
