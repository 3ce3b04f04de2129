// Real-time monitor loop
//
// One worker thread drives the measure -> extract -> classify pipeline on a
// fixed tick and publishes results on a tokio broadcast channel, the same
// fan-out shape the GUI and metrics consumers subscribe to. A failed tick
// is published as a stage-tagged error event and the loop keeps running;
// stop() prevents the next tick from being scheduled but never interrupts
// one in flight, and joins the worker before returning.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::analysis::PressClassifier;
use crate::config::{MonitorConfig, SweepConfig};
use crate::error::{ErrorCode, SourceError};
use crate::source::{DataSource, SweepCapable};

/// Broadcast buffer depth; enough for several seconds of ticks
const EVENT_CHANNEL_DEPTH: usize = 100;

/// One classified measurement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationEvent {
    pub tick: u64,
    pub label: u8,
    pub confidence: f64,
    pub magnitude_ohm: f64,
    pub phase_rad: f64,
    /// Simulator-only known touch position
    pub ground_truth: Option<(f64, f64)>,
    /// Grid class nearest to the ground truth, when grid centers are known
    pub expected_class: Option<u8>,
}

/// A tick that failed, tagged with the stage that failed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickErrorEvent {
    pub tick: u64,
    pub stage: String,
    pub code: i32,
    pub message: String,
}

/// Events published by the monitor loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MonitorEvent {
    Classification(ClassificationEvent),
    TickError(TickErrorEvent),
}

/// Handle to a running monitor loop
pub struct Monitor {
    stop_flag: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    events_tx: broadcast::Sender<MonitorEvent>,
}

impl Monitor {
    /// Start the loop on its own thread
    ///
    /// The monitor takes ownership of the source and the trained classifier;
    /// the source is disconnected when the loop exits. Calibrate the
    /// classifier before starting if a baseline correction is wanted.
    pub fn start(
        mut source: Box<dyn DataSource>,
        classifier: PressClassifier,
        config: MonitorConfig,
        sweep: SweepConfig,
        grid_positions: Vec<(f64, f64)>,
    ) -> Self {
        let stop_flag = Arc::new(AtomicBool::new(false));
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_DEPTH);

        let worker_stop = stop_flag.clone();
        let worker_tx = events_tx.clone();
        let worker = thread::Builder::new()
            .name("touch-monitor".to_string())
            .spawn(move || {
                let interval = Duration::from_millis(config.interval_ms);
                let mut tick = 0u64;

                log::info!(
                    "[Monitor] Started: interval {} ms, mode {}",
                    config.interval_ms,
                    if config.use_sweep { "spectral" } else { "compact" }
                );

                while !worker_stop.load(Ordering::SeqCst) {
                    let tick_started = Instant::now();
                    tick += 1;

                    let event = match run_tick(source.as_mut(), &classifier, &config, &sweep) {
                        Ok((magnitude_ohm, phase_rad, label, confidence)) => {
                            let ground_truth = source.ground_truth();
                            let expected_class = ground_truth
                                .and_then(|position| nearest_grid_class(&grid_positions, position));
                            MonitorEvent::Classification(ClassificationEvent {
                                tick,
                                label,
                                confidence,
                                magnitude_ohm,
                                phase_rad,
                                ground_truth,
                                expected_class,
                            })
                        }
                        Err(mut error) => {
                            error.tick = tick;
                            log::warn!(
                                "[Monitor] Tick {} failed at stage {}: {} (code {})",
                                tick,
                                error.stage,
                                error.message,
                                error.code
                            );
                            MonitorEvent::TickError(error)
                        }
                    };
                    // No subscribers is not an error; results are simply
                    // dropped until someone listens
                    let _ = worker_tx.send(event);

                    if worker_stop.load(Ordering::SeqCst) {
                        break;
                    }
                    let elapsed = tick_started.elapsed();
                    if elapsed < interval {
                        thread::sleep(interval - elapsed);
                    }
                }

                source.disconnect();
                log::info!("[Monitor] Stopped after {} ticks", tick);
            })
            .expect("spawning touch-monitor thread");

        Self {
            stop_flag,
            worker: Some(worker),
            events_tx,
        }
    }

    /// Subscribe to classification and error events
    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.events_tx.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Stop scheduling ticks and join the worker. Safe to call twice.
    pub fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("[Monitor] Worker thread panicked");
            }
        }
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        self.stop();
    }
}

/// One acquisition + classification pass
fn run_tick(
    source: &mut dyn DataSource,
    classifier: &PressClassifier,
    config: &MonitorConfig,
    sweep: &SweepConfig,
) -> Result<(f64, f64, u8, f64), TickErrorEvent> {
    if config.use_sweep {
        let sweep_capable = source.as_sweep_capable().ok_or_else(|| {
            tick_error(&SourceError::AnalyzerFailure {
                details: "configured source is not sweep-capable".to_string(),
            })
        })?;
        let result = sweep_capable
            .sweep_impedance(sweep.start_hz, sweep.stop_hz, sweep.points)
            .map_err(|err| tick_error(&err))?;
        let features = sweep_capable
            .extract_spectral_features(Some(&result))
            .map_err(|err| tick_error(&err))?;
        let (label, confidence) = classifier
            .predict(features.peak_magnitude, features.peak_phase, Some(&features))
            .map_err(|err| tick_error(&err))?;
        Ok((features.peak_magnitude, features.peak_phase, label, confidence))
    } else {
        let samples = source
            .measure_impedance_vector()
            .map_err(|err| tick_error(&err))?;
        let sample = samples.get(config.pair_index).ok_or_else(|| {
            tick_error(&SourceError::AnalyzerFailure {
                details: format!(
                    "pair index {} out of range ({} pairs measured)",
                    config.pair_index,
                    samples.len()
                ),
            })
        })?;
        let (label, confidence) = classifier
            .predict(sample.magnitude_ohm, sample.phase_rad, None)
            .map_err(|err| tick_error(&err))?;
        Ok((sample.magnitude_ohm, sample.phase_rad, label, confidence))
    }
}

fn tick_error(err: &dyn ErrorCode) -> TickErrorEvent {
    TickErrorEvent {
        tick: 0,
        stage: err.stage().to_string(),
        code: err.code(),
        message: err.message(),
    }
}

/// Index of the grid center nearest to `position`
fn nearest_grid_class(grid_positions: &[(f64, f64)], position: (f64, f64)) -> Option<u8> {
    grid_positions
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| {
            let da = (position.0 - a.0).hypot(position.1 - a.1);
            let db = (position.0 - b.0).hypot(position.1 - b.1);
            da.total_cmp(&db)
        })
        .map(|(index, _)| index as u8)
}
