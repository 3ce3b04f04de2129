//! End-to-end pipeline tests on the local simulator
//!
//! These tests run the full acquisition -> feature -> classifier path the
//! way the binaries drive it: a factory-built simulator source collects
//! labeled samples at known touch positions, the classifier trains on
//! them, and fresh measurements classify correctly. No hardware, no
//! network.

use once_cell::sync::Lazy;

use geltouch::analysis::PressClassifier;
use geltouch::config::{AppConfig, SourceMode};
use geltouch::measurement::{FeatureMode, FeatureVector};
use geltouch::source::{create_data_source, DataSource, DeviceRegistry, SweepCapable};

/// Deterministic configuration shared by every test in this file
static TEST_CONFIG: Lazy<AppConfig> = Lazy::new(|| {
    let mut config = AppConfig::default();
    config.source = SourceMode::Simulator;
    config.simulation.seed = Some(1234);
    config.classifier.hidden_layers = vec![16, 8];
    config.classifier.max_iter = 600;
    config
});

/// Pressed on the monitored pair vs released far away
const PRESSED_MM: (f64, f64) = (50.0, 0.0);
const RELEASED_MM: (f64, f64) = (50.0, 100.0);

fn connected_simulator() -> Box<dyn DataSource> {
    let mut source = create_data_source(&TEST_CONFIG, DeviceRegistry::default()).unwrap();
    assert!(source.connect());
    source
}

fn collect_compact(
    source: &mut dyn DataSource,
    position: (f64, f64),
    n: usize,
) -> Vec<FeatureVector> {
    source.set_ground_truth(position.0, position.1);
    (0..n)
        .map(|_| {
            let samples = source.measure_impedance_vector().unwrap();
            FeatureVector::compact(samples[0].magnitude_ohm, samples[0].phase_rad)
        })
        .collect()
}

#[test]
fn test_train_and_classify_press_events() {
    let mut source = connected_simulator();

    let mut classifier =
        PressClassifier::new(FeatureMode::Compact, TEST_CONFIG.classifier.clone());
    let released = collect_compact(source.as_mut(), RELEASED_MM, 20);
    let pressed = collect_compact(source.as_mut(), PRESSED_MM, 20);
    classifier.add_samples_batch(&released, 0).unwrap();
    classifier.add_samples_batch(&pressed, 1).unwrap();

    let report = classifier.train().unwrap();
    assert!(report.train_accuracy > 0.9);
    assert_eq!(classifier.get_sample_counts(), (20, 20));

    // Fresh measurements at both positions classify correctly
    for (position, expected) in [(RELEASED_MM, 0u8), (PRESSED_MM, 1u8)] {
        source.set_ground_truth(position.0, position.1);
        let mut correct = 0;
        for _ in 0..10 {
            let samples = source.measure_impedance_vector().unwrap();
            let (label, _) = classifier
                .predict(samples[0].magnitude_ohm, samples[0].phase_rad, None)
                .unwrap();
            if label == expected {
                correct += 1;
            }
        }
        assert!(correct >= 8, "only {}/10 correct for label {}", correct, expected);
    }
}

#[test]
fn test_spectral_pipeline_on_synthetic_sweeps() {
    let mut source = connected_simulator();

    let mut classifier =
        PressClassifier::new(FeatureMode::Spectral, TEST_CONFIG.classifier.clone());
    for (position, label) in [(RELEASED_MM, 0u8), (PRESSED_MM, 1u8)] {
        source.set_ground_truth(position.0, position.1);
        for _ in 0..8 {
            let sweep_capable = source.as_sweep_capable().unwrap();
            let sweep = sweep_capable.sweep_impedance(2_000.0, 20_000.0, 50).unwrap();
            assert_eq!(sweep.len(), 50);
            let features = sweep_capable.extract_spectral_features(Some(&sweep)).unwrap();
            classifier
                .add_sample(&features.to_feature_vector(), label)
                .unwrap();
        }
    }

    let report = classifier.train().unwrap();
    assert!(report.train_accuracy > 0.9);

    source.set_ground_truth(PRESSED_MM.0, PRESSED_MM.1);
    let sweep_capable = source.as_sweep_capable().unwrap();
    sweep_capable.sweep_impedance(2_000.0, 20_000.0, 50).unwrap();
    let features = sweep_capable.extract_spectral_features(None).unwrap();
    let (label, confidence) = classifier
        .predict(features.peak_magnitude, features.peak_phase, Some(&features))
        .unwrap();
    assert_eq!(label, 1);
    assert!(confidence > 0.5);
}

#[test]
fn test_drift_calibration_recovers_shifted_baseline() {
    let mut source = connected_simulator();

    // Train on a clean baseline
    let mut classifier =
        PressClassifier::new(FeatureMode::Compact, TEST_CONFIG.classifier.clone());
    let released = collect_compact(source.as_mut(), RELEASED_MM, 20);
    let pressed = collect_compact(source.as_mut(), PRESSED_MM, 20);
    classifier.add_samples_batch(&released, 0).unwrap();
    classifier.add_samples_batch(&pressed, 1).unwrap();
    classifier.train().unwrap();

    // The sensor baseline drifts hard: every magnitude now reads half of
    // its true value, putting released readings where pressed ones trained
    let drifted = |fv: &FeatureVector| {
        let magnitude = 10f64.powf(fv.values[0]) - 1.0;
        FeatureVector::compact(magnitude * 0.5, fv.values[1])
    };

    let baseline: Vec<FeatureVector> = collect_compact(source.as_mut(), RELEASED_MM, 10)
        .iter()
        .map(&drifted)
        .collect();
    let report = classifier.calibrate(&baseline).unwrap();
    assert!(report.drift_norm > 0.0);

    // Drifted released measurements still classify as released
    let probes: Vec<FeatureVector> = collect_compact(source.as_mut(), RELEASED_MM, 10)
        .iter()
        .map(&drifted)
        .collect();
    let mut correct = 0;
    for probe in &probes {
        let (label, _) = classifier.predict_vector(probe).unwrap();
        if label == 0 {
            correct += 1;
        }
    }
    assert!(correct >= 8, "only {}/10 drifted probes classified released", correct);

    classifier.reset_calibration();
}

#[test]
fn test_artifact_survives_save_and_load() {
    let dir = tempfile::tempdir().unwrap();
    let mut source = connected_simulator();

    let mut classifier =
        PressClassifier::new(FeatureMode::Compact, TEST_CONFIG.classifier.clone());
    classifier
        .add_samples_batch(&collect_compact(source.as_mut(), RELEASED_MM, 10), 0)
        .unwrap();
    classifier
        .add_samples_batch(&collect_compact(source.as_mut(), PRESSED_MM, 10), 1)
        .unwrap();
    classifier.train().unwrap();

    let probe = collect_compact(source.as_mut(), PRESSED_MM, 1).remove(0);
    let before = classifier.predict_vector(&probe).unwrap();

    classifier.save(dir.path()).unwrap();
    let mut restored = PressClassifier::load(dir.path(), TEST_CONFIG.classifier.clone()).unwrap();

    assert_eq!(restored.predict_vector(&probe).unwrap(), before);
    assert_eq!(restored.get_sample_counts(), (10, 10));

    // The restored buffer still supports calibration
    let baseline = collect_compact(source.as_mut(), RELEASED_MM, 5);
    assert!(restored.calibrate(&baseline).is_ok());
}
