// PressClassifier - trainable press/no-press detection over impedance features
//
// Wraps a small MLP and a standardization scaler behind one classifier that
// owns the training sample buffer, training, inference, baseline drift
// calibration, and versioned persistence. One parameterized implementation
// covers both feature modes:
//
// Compact (2-D):  [log10(|Z|+1), phase]              single-pair measurements
// Spectral (10-D): reactance peak + band aggregates   frequency sweeps
//
// Labels: 0 = released (no press). The binary detector uses label 1 for
// pressed; the 9-point grid classifier uses labels 0..8 with the same code
// path (argmax output instead of a 0.5 threshold).

use std::fs;
use std::path::{Path, PathBuf};

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::analysis::mlp::{argmax, LayerParams, MlpClassifier};
use crate::analysis::scaler::StandardScaler;
use crate::analysis::spectral::SpectralFeatures;
use crate::config::ClassifierConfig;
use crate::error::ModelError;
use crate::measurement::{FeatureMode, FeatureVector};

/// Artifact schema version checked on load
pub const SCHEMA_VERSION: u32 = 1;

/// Minimum buffered samples before training is allowed
pub const MIN_TRAINING_SAMPLES: usize = 4;

const ARTIFACT_FILE: &str = "press_classifier.json";
const LEARNING_RATE: f64 = 0.01;

/// Accuracy metrics from the last training run
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    pub train_accuracy: f64,
    pub test_accuracy: f64,
    pub n_train: usize,
    pub n_test: usize,
}

/// Estimated baseline drift from a calibration pass
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationReport {
    /// Per-feature offset between the fresh baseline and the training-time
    /// released-class mean
    pub drift: Vec<f64>,
    /// Drift magnitude in units of the trained scale
    pub drift_norm: f64,
}

/// Everything needed to restore a trained classifier, written atomically
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ClassifierArtifact {
    schema_version: u32,
    mode: FeatureMode,
    scaler: StandardScaler,
    layers: Vec<LayerParams>,
    report: Option<TrainingReport>,
    training_x: Vec<Vec<f64>>,
    training_y: Vec<u8>,
}

/// Trainable press classifier with online drift calibration
pub struct PressClassifier {
    mode: FeatureMode,
    config: ClassifierConfig,
    x_buf: Vec<Vec<f64>>,
    y_buf: Vec<u8>,
    model: Option<MlpClassifier>,
    scaler: Option<StandardScaler>,
    /// Drift-corrected copy of `scaler`; preferred at inference time when
    /// present. The trained scaler is never mutated.
    calibrated_scaler: Option<StandardScaler>,
    report: Option<TrainingReport>,
}

impl PressClassifier {
    pub fn new(mode: FeatureMode, config: ClassifierConfig) -> Self {
        Self {
            mode,
            config,
            x_buf: Vec::new(),
            y_buf: Vec::new(),
            model: None,
            scaler: None,
            calibrated_scaler: None,
            report: None,
        }
    }

    pub fn mode(&self) -> FeatureMode {
        self.mode
    }

    pub fn is_ready(&self) -> bool {
        self.model.is_some() && self.scaler.is_some()
    }

    pub fn is_calibrated(&self) -> bool {
        self.calibrated_scaler.is_some()
    }

    pub fn last_report(&self) -> Option<TrainingReport> {
        self.report
    }

    // ------------------------------------------------------------------
    // Sample buffer
    // ------------------------------------------------------------------

    /// Append one labeled feature vector to the training buffer
    ///
    /// The vector's mode must match the classifier's mode.
    pub fn add_sample(&mut self, features: &FeatureVector, label: u8) -> Result<(), ModelError> {
        self.check_mode(features)?;
        self.x_buf.push(features.values.clone());
        self.y_buf.push(label);
        Ok(())
    }

    /// Append a batch of same-labeled vectors
    pub fn add_samples_batch(
        &mut self,
        features: &[FeatureVector],
        label: u8,
    ) -> Result<(), ModelError> {
        for fv in features {
            self.add_sample(fv, label)?;
        }
        Ok(())
    }

    /// (released count, pressed count) in the buffer
    ///
    /// Any non-zero label counts as pressed, so the grid classifier reports
    /// sensible totals too.
    pub fn get_sample_counts(&self) -> (usize, usize) {
        let released = self.y_buf.iter().filter(|label| **label == 0).count();
        (released, self.y_buf.len() - released)
    }

    pub fn total_samples(&self) -> usize {
        self.y_buf.len()
    }

    pub fn clear_samples(&mut self) {
        self.x_buf.clear();
        self.y_buf.clear();
    }

    // ------------------------------------------------------------------
    // Training
    // ------------------------------------------------------------------

    /// Train the MLP from the buffered samples
    ///
    /// Requires at least [`MIN_TRAINING_SAMPLES`] samples and two distinct
    /// labels. The split is stratified and seeded; the scaler is fitted on
    /// the training split only. The buffer itself is left untouched so
    /// incremental retraining and later calibration remain possible.
    pub fn train(&mut self) -> Result<TrainingReport, ModelError> {
        if self.y_buf.len() < MIN_TRAINING_SAMPLES {
            return Err(ModelError::InsufficientData {
                collected: self.y_buf.len(),
                required: MIN_TRAINING_SAMPLES,
            });
        }

        let mut labels: Vec<u8> = self.y_buf.clone();
        labels.sort_unstable();
        labels.dedup();
        if labels.len() < 2 {
            return Err(ModelError::SingleClass {
                label: labels[0],
            });
        }
        // Output layer covers 0..=max_label even if a middle class is absent
        let n_classes = (*labels.last().unwrap_or(&1) as usize + 1).max(2);

        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let (train_idx, test_idx) = stratified_split(&self.y_buf, self.config.test_ratio, &mut rng);

        let dims = self.mode.dims();
        let x_train = rows_to_matrix(&self.x_buf, &train_idx, dims);
        let y_train: Vec<u8> = train_idx.iter().map(|i| self.y_buf[*i]).collect();

        let scaler = StandardScaler::fit(&x_train);
        let x_train_scaled = scaler.transform(&x_train);

        let mut model = MlpClassifier::new(dims, &self.config.hidden_layers, n_classes, &mut rng);
        let loss = model.train(
            &x_train_scaled,
            &y_train,
            self.config.max_iter,
            LEARNING_RATE,
        );

        let train_accuracy = model.accuracy(&x_train_scaled, &y_train);
        let test_accuracy = if test_idx.is_empty() {
            train_accuracy
        } else {
            let x_test = rows_to_matrix(&self.x_buf, &test_idx, dims);
            let y_test: Vec<u8> = test_idx.iter().map(|i| self.y_buf[*i]).collect();
            model.accuracy(&scaler.transform(&x_test), &y_test)
        };

        let report = TrainingReport {
            train_accuracy,
            test_accuracy,
            n_train: train_idx.len(),
            n_test: test_idx.len(),
        };
        log::info!(
            "[Classifier] Training complete: train={:.1}%, test={:.1}%, n=({}/{}), final loss={:.4}",
            report.train_accuracy * 100.0,
            report.test_accuracy * 100.0,
            report.n_train,
            report.n_test,
            loss
        );

        self.model = Some(model);
        self.scaler = Some(scaler);
        // A fresh model invalidates any previous drift estimate
        self.calibrated_scaler = None;
        self.report = Some(report);
        Ok(report)
    }

    // ------------------------------------------------------------------
    // Inference
    // ------------------------------------------------------------------

    /// Classify one measurement
    ///
    /// In compact mode pass the pair's magnitude and phase; in spectral mode
    /// pass the extracted sweep features (magnitude/phase arguments then
    /// carry the sweep's peak values, matching the acquisition path). The
    /// inputs must match the trained mode.
    ///
    /// Returns `(label, confidence)`. For the binary detector the confidence
    /// is P(press) and the label is thresholded at 0.5; with more than two
    /// classes the label is the argmax and the confidence its probability.
    pub fn predict(
        &self,
        magnitude_ohm: f64,
        phase_rad: f64,
        sweep_features: Option<&SpectralFeatures>,
    ) -> Result<(u8, f64), ModelError> {
        let features = match (self.mode, sweep_features) {
            (FeatureMode::Compact, None) => FeatureVector::compact(magnitude_ohm, phase_rad),
            (FeatureMode::Spectral, Some(sf)) => sf.to_feature_vector(),
            (FeatureMode::Compact, Some(_)) => {
                return Err(ModelError::FeatureModeMismatch {
                    trained: FeatureMode::Compact,
                    given: FeatureMode::Spectral,
                })
            }
            (FeatureMode::Spectral, None) => {
                return Err(ModelError::FeatureModeMismatch {
                    trained: FeatureMode::Spectral,
                    given: FeatureMode::Compact,
                })
            }
        };
        self.predict_vector(&features)
    }

    /// Classify a pre-built feature vector
    pub fn predict_vector(&self, features: &FeatureVector) -> Result<(u8, f64), ModelError> {
        self.check_mode(features)?;
        let (model, scaler) = match (&self.model, &self.scaler) {
            (Some(model), Some(scaler)) => (model, scaler),
            _ => return Err(ModelError::NotReady),
        };

        // The drift-corrected scaler wins when a calibration is active
        let active_scaler = self.calibrated_scaler.as_ref().unwrap_or(scaler);
        let scaled = active_scaler.transform_row(&features.values);
        let probs = model.predict_proba(&scaled);

        if model.n_outputs() == 2 {
            let confidence = probs[1];
            let label = u8::from(confidence >= 0.5);
            Ok((label, confidence))
        } else {
            let label = argmax(&probs);
            Ok((label as u8, probs[label]))
        }
    }

    // ------------------------------------------------------------------
    // Drift calibration
    // ------------------------------------------------------------------

    /// Re-anchor the feature standardization to the current baseline
    ///
    /// `released_features` are freshly measured vectors taken in a known
    /// released state. The drift is the offset between their mean and the
    /// training-time mean of the released class; subsequent predictions use
    /// a shifted scaler copy until [`reset_calibration`](Self::reset_calibration)
    /// is called. No retraining happens and the trained scaler is preserved.
    pub fn calibrate(
        &mut self,
        released_features: &[FeatureVector],
    ) -> Result<CalibrationReport, ModelError> {
        let scaler = self.scaler.as_ref().ok_or(ModelError::NotReady)?;
        if released_features.is_empty() {
            return Err(ModelError::CalibrationUnavailable);
        }
        for fv in released_features {
            self.check_mode(fv)?;
        }

        let dims = self.mode.dims();
        let train_released: Vec<&Vec<f64>> = self
            .x_buf
            .iter()
            .zip(self.y_buf.iter())
            .filter(|(_, label)| **label == 0)
            .map(|(row, _)| row)
            .collect();

        if train_released.is_empty() {
            log::warn!(
                "[Classifier] No released-class samples in the training buffer; \
                 calibration reports zero drift"
            );
            return Ok(CalibrationReport {
                drift: vec![0.0; dims],
                drift_norm: 0.0,
            });
        }

        let mut train_mean = vec![0.0; dims];
        for row in &train_released {
            for (acc, v) in train_mean.iter_mut().zip(row.iter()) {
                *acc += v;
            }
        }
        for v in train_mean.iter_mut() {
            *v /= train_released.len() as f64;
        }

        let mut baseline_mean = vec![0.0; dims];
        for fv in released_features {
            for (acc, v) in baseline_mean.iter_mut().zip(fv.values.iter()) {
                *acc += v;
            }
        }
        for v in baseline_mean.iter_mut() {
            *v /= released_features.len() as f64;
        }

        let drift: Vec<f64> = baseline_mean
            .iter()
            .zip(train_mean.iter())
            .map(|(b, t)| b - t)
            .collect();
        let drift_norm = scaler.drift_norm(&drift);

        self.calibrated_scaler = Some(scaler.shifted(&drift));
        log::info!(
            "[Classifier] Calibration complete: drift norm {:.2} sigma over {} baseline samples",
            drift_norm,
            released_features.len()
        );

        Ok(CalibrationReport { drift, drift_norm })
    }

    /// Discard the drift correction and return to the trained scaler
    pub fn reset_calibration(&mut self) {
        self.calibrated_scaler = None;
        log::info!("[Classifier] Calibration reset");
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    /// Save model, scaler, feature mode, and the training buffer
    ///
    /// The artifact is written to a temp file and renamed into place so a
    /// crash mid-write never leaves a truncated artifact. The active drift
    /// calibration is deliberately not persisted; a restart begins from the
    /// trained scaler.
    pub fn save(&self, dir: &Path) -> Result<PathBuf, ModelError> {
        let (model, scaler) = match (&self.model, &self.scaler) {
            (Some(model), Some(scaler)) => (model, scaler),
            _ => return Err(ModelError::NotReady),
        };

        let artifact = ClassifierArtifact {
            schema_version: SCHEMA_VERSION,
            mode: self.mode,
            scaler: scaler.clone(),
            layers: model.to_params(),
            report: self.report,
            training_x: self.x_buf.clone(),
            training_y: self.y_buf.clone(),
        };

        fs::create_dir_all(dir)?;
        let path = dir.join(ARTIFACT_FILE);
        let tmp_path = dir.join(format!("{}.tmp", ARTIFACT_FILE));
        fs::write(&tmp_path, serde_json::to_vec_pretty(&artifact)?)?;
        fs::rename(&tmp_path, &path)?;

        log::info!(
            "[Classifier] Saved artifact to {:?} (mode {:?}, {} buffered samples)",
            path,
            self.mode,
            self.y_buf.len()
        );
        Ok(path)
    }

    /// Restore a classifier from a saved artifact directory
    pub fn load(dir: &Path, config: ClassifierConfig) -> Result<Self, ModelError> {
        let path = dir.join(ARTIFACT_FILE);
        let contents = fs::read_to_string(&path)?;
        let artifact: ClassifierArtifact = serde_json::from_str(&contents)?;

        if artifact.schema_version != SCHEMA_VERSION {
            return Err(ModelError::SchemaVersion {
                found: artifact.schema_version,
                supported: SCHEMA_VERSION,
            });
        }

        let model = MlpClassifier::from_params(&artifact.layers).ok_or(ModelError::Storage {
            reason: "inconsistent layer shapes in artifact".to_string(),
        })?;
        if model.n_inputs() != artifact.mode.dims()
            || artifact.scaler.n_features() != artifact.mode.dims()
        {
            return Err(ModelError::Storage {
                reason: format!(
                    "artifact dimensions disagree with mode {:?}",
                    artifact.mode
                ),
            });
        }

        log::info!(
            "[Classifier] Loaded artifact from {:?} (mode {:?}, {} buffered samples)",
            path,
            artifact.mode,
            artifact.training_y.len()
        );

        Ok(Self {
            mode: artifact.mode,
            config,
            x_buf: artifact.training_x,
            y_buf: artifact.training_y,
            model: Some(model),
            scaler: Some(artifact.scaler),
            calibrated_scaler: None,
            report: artifact.report,
        })
    }

    /// One-line operator summary
    pub fn info(&self) -> String {
        if !self.is_ready() {
            return "Model not trained".to_string();
        }
        let (released, pressed) = self.get_sample_counts();
        let report = self.report.unwrap_or(TrainingReport {
            train_accuracy: 0.0,
            test_accuracy: 0.0,
            n_train: 0,
            n_test: 0,
        });
        format!(
            "MLP({:?})  train={:.1}%  test={:.1}%  n=({}+{}){}",
            self.mode,
            report.train_accuracy * 100.0,
            report.test_accuracy * 100.0,
            released,
            pressed,
            if self.is_calibrated() {
                "  [calibrated]"
            } else {
                ""
            }
        )
    }

    fn check_mode(&self, features: &FeatureVector) -> Result<(), ModelError> {
        if features.mode != self.mode {
            return Err(ModelError::FeatureModeMismatch {
                trained: self.mode,
                given: features.mode,
            });
        }
        Ok(())
    }
}

/// Seeded stratified train/test index split
///
/// Per class: shuffle, then hold out round(n * ratio) samples, always
/// leaving at least one training sample and holding out at least one test
/// sample when the class has two or more.
fn stratified_split(labels: &[u8], test_ratio: f64, rng: &mut StdRng) -> (Vec<usize>, Vec<usize>) {
    let mut by_class: Vec<(u8, Vec<usize>)> = Vec::new();
    for (idx, label) in labels.iter().enumerate() {
        match by_class.iter_mut().find(|(l, _)| l == label) {
            Some((_, indices)) => indices.push(idx),
            None => by_class.push((*label, vec![idx])),
        }
    }
    by_class.sort_by_key(|(label, _)| *label);

    let ratio = test_ratio.clamp(0.0, 0.5);
    let mut train = Vec::new();
    let mut test = Vec::new();
    for (_, mut indices) in by_class {
        indices.shuffle(rng);
        let n = indices.len();
        let n_test = if n < 2 {
            0
        } else {
            ((n as f64 * ratio).round() as usize).clamp(1, n - 1)
        };
        test.extend_from_slice(&indices[..n_test]);
        train.extend_from_slice(&indices[n_test..]);
    }
    (train, test)
}

fn rows_to_matrix(rows: &[Vec<f64>], indices: &[usize], dims: usize) -> Array2<f64> {
    let mut out = Array2::zeros((indices.len(), dims));
    for (i, idx) in indices.iter().enumerate() {
        for (j, v) in rows[*idx].iter().enumerate() {
            out[[i, j]] = *v;
        }
    }
    out
}

#[cfg(test)]
#[path = "classifier_tests.rs"]
mod tests;
