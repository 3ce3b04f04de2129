// Small multilayer perceptron trained with Adam
//
// ReLU hidden layers, softmax output, full-batch cross-entropy training.
// The network is sized from configuration (hidden_layers) and initialized
// from a seeded RNG so training runs are reproducible.

use ndarray::{Array1, Array2, Axis};
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

const ADAM_BETA1: f64 = 0.9;
const ADAM_BETA2: f64 = 0.999;
const ADAM_EPS: f64 = 1e-8;

/// Flattened layer parameters for the persisted artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerParams {
    pub rows: usize,
    pub cols: usize,
    pub weights: Vec<f64>,
    pub bias: Vec<f64>,
}

#[derive(Debug, Clone)]
struct DenseLayer {
    /// (outputs, inputs)
    weights: Array2<f64>,
    bias: Array1<f64>,
}

impl DenseLayer {
    fn new<R: Rng>(n_inputs: usize, n_outputs: usize, rng: &mut R) -> Self {
        // He initialization for ReLU stacks
        let std = (2.0 / n_inputs as f64).sqrt();
        let normal = Normal::new(0.0, std).unwrap_or_else(|_| Normal::new(0.0, 1.0).unwrap());
        Self {
            weights: Array2::from_shape_fn((n_outputs, n_inputs), |_| normal.sample(rng)),
            bias: Array1::zeros(n_outputs),
        }
    }
}

/// Feed-forward classifier network
#[derive(Debug, Clone)]
pub struct MlpClassifier {
    layers: Vec<DenseLayer>,
    n_inputs: usize,
    n_outputs: usize,
}

impl MlpClassifier {
    pub fn new<R: Rng>(n_inputs: usize, hidden: &[usize], n_outputs: usize, rng: &mut R) -> Self {
        let mut sizes = Vec::with_capacity(hidden.len() + 2);
        sizes.push(n_inputs);
        sizes.extend_from_slice(hidden);
        sizes.push(n_outputs);

        let layers = sizes
            .windows(2)
            .map(|pair| DenseLayer::new(pair[0], pair[1], rng))
            .collect();

        Self {
            layers,
            n_inputs,
            n_outputs,
        }
    }

    pub fn n_inputs(&self) -> usize {
        self.n_inputs
    }

    pub fn n_outputs(&self) -> usize {
        self.n_outputs
    }

    /// Train on standardized features with integer labels
    ///
    /// Full-batch Adam; returns the final cross-entropy loss. Stops early
    /// once the loss improvement stalls.
    pub fn train(
        &mut self,
        x: &Array2<f64>,
        y: &[u8],
        max_iter: usize,
        learning_rate: f64,
    ) -> f64 {
        let n = x.nrows();
        debug_assert_eq!(n, y.len());

        let mut one_hot = Array2::zeros((n, self.n_outputs));
        for (i, label) in y.iter().enumerate() {
            one_hot[[i, *label as usize]] = 1.0;
        }

        let mut m_w: Vec<Array2<f64>> = self
            .layers
            .iter()
            .map(|l| Array2::zeros(l.weights.raw_dim()))
            .collect();
        let mut v_w = m_w.clone();
        let mut m_b: Vec<Array1<f64>> = self
            .layers
            .iter()
            .map(|l| Array1::zeros(l.bias.raw_dim()))
            .collect();
        let mut v_b = m_b.clone();

        let mut loss = f64::INFINITY;
        let mut stalled = 0usize;

        for step in 1..=max_iter {
            // Forward pass, keeping activations for backprop
            let mut activations = vec![x.clone()];
            for (idx, layer) in self.layers.iter().enumerate() {
                let mut z = activations[idx].dot(&layer.weights.t()) + &layer.bias;
                if idx + 1 < self.layers.len() {
                    z.mapv_inplace(|v| v.max(0.0));
                }
                activations.push(z);
            }
            let probs = softmax_rows(activations.last().expect("forward output"));

            let new_loss = cross_entropy(&probs, y);
            if (loss - new_loss).abs() < 1e-9 {
                stalled += 1;
                if stalled >= 10 {
                    loss = new_loss;
                    break;
                }
            } else {
                stalled = 0;
            }
            loss = new_loss;

            // Backward pass
            let mut delta = (&probs - &one_hot) / n as f64;
            for idx in (0..self.layers.len()).rev() {
                let grad_w = delta.t().dot(&activations[idx]);
                let grad_b = delta.sum_axis(Axis(0));

                if idx > 0 {
                    // Propagate through the ReLU of the previous layer
                    let mut next = delta.dot(&self.layers[idx].weights);
                    next.zip_mut_with(&activations[idx], |d, a| {
                        if *a <= 0.0 {
                            *d = 0.0;
                        }
                    });
                    delta = next;
                }

                adam_update(
                    &mut self.layers[idx].weights,
                    &grad_w,
                    &mut m_w[idx],
                    &mut v_w[idx],
                    step,
                    learning_rate,
                );
                adam_update_bias(
                    &mut self.layers[idx].bias,
                    &grad_b,
                    &mut m_b[idx],
                    &mut v_b[idx],
                    step,
                    learning_rate,
                );
            }
        }

        loss
    }

    /// Class probabilities for one standardized feature row
    pub fn predict_proba(&self, row: &[f64]) -> Vec<f64> {
        debug_assert_eq!(row.len(), self.n_inputs);
        let mut activation = Array1::from(row.to_vec());
        for (idx, layer) in self.layers.iter().enumerate() {
            let mut z = layer.weights.dot(&activation) + &layer.bias;
            if idx + 1 < self.layers.len() {
                z.mapv_inplace(|v| v.max(0.0));
            }
            activation = z;
        }
        softmax_vec(activation.as_slice().unwrap_or(&[]))
    }

    /// Fraction of rows whose argmax matches the label
    pub fn accuracy(&self, x: &Array2<f64>, y: &[u8]) -> f64 {
        if y.is_empty() {
            return 0.0;
        }
        let correct = x
            .rows()
            .into_iter()
            .zip(y.iter())
            .filter(|(row, label)| {
                let probs = self.predict_proba(row.as_slice().unwrap_or(&[]));
                argmax(&probs) == **label as usize
            })
            .count();
        correct as f64 / y.len() as f64
    }

    pub fn to_params(&self) -> Vec<LayerParams> {
        self.layers
            .iter()
            .map(|layer| LayerParams {
                rows: layer.weights.nrows(),
                cols: layer.weights.ncols(),
                weights: layer.weights.iter().copied().collect(),
                bias: layer.bias.to_vec(),
            })
            .collect()
    }

    /// Rebuild a network from persisted parameters
    ///
    /// Returns None when a layer's dimensions and data disagree or the
    /// layer chain is inconsistent.
    pub fn from_params(params: &[LayerParams]) -> Option<Self> {
        if params.is_empty() {
            return None;
        }
        let mut layers = Vec::with_capacity(params.len());
        for (idx, p) in params.iter().enumerate() {
            if p.weights.len() != p.rows * p.cols || p.bias.len() != p.rows {
                return None;
            }
            if idx > 0 && params[idx - 1].rows != p.cols {
                return None;
            }
            let weights = Array2::from_shape_vec((p.rows, p.cols), p.weights.clone()).ok()?;
            layers.push(DenseLayer {
                weights,
                bias: Array1::from(p.bias.clone()),
            });
        }
        let n_inputs = params[0].cols;
        let n_outputs = params[params.len() - 1].rows;
        Some(Self {
            layers,
            n_inputs,
            n_outputs,
        })
    }
}

fn adam_update(
    weights: &mut Array2<f64>,
    grad: &Array2<f64>,
    m: &mut Array2<f64>,
    v: &mut Array2<f64>,
    step: usize,
    learning_rate: f64,
) {
    let bias1 = 1.0 - ADAM_BETA1.powi(step as i32);
    let bias2 = 1.0 - ADAM_BETA2.powi(step as i32);
    azip_update(
        weights.iter_mut(),
        grad.iter(),
        m.iter_mut(),
        v.iter_mut(),
        bias1,
        bias2,
        learning_rate,
    );
}

fn adam_update_bias(
    bias: &mut Array1<f64>,
    grad: &Array1<f64>,
    m: &mut Array1<f64>,
    v: &mut Array1<f64>,
    step: usize,
    learning_rate: f64,
) {
    let bias1 = 1.0 - ADAM_BETA1.powi(step as i32);
    let bias2 = 1.0 - ADAM_BETA2.powi(step as i32);
    azip_update(
        bias.iter_mut(),
        grad.iter(),
        m.iter_mut(),
        v.iter_mut(),
        bias1,
        bias2,
        learning_rate,
    );
}

fn azip_update<'a>(
    params: impl Iterator<Item = &'a mut f64>,
    grads: impl Iterator<Item = &'a f64>,
    m: impl Iterator<Item = &'a mut f64>,
    v: impl Iterator<Item = &'a mut f64>,
    bias1: f64,
    bias2: f64,
    learning_rate: f64,
) {
    for (((p, g), m), v) in params.zip(grads).zip(m).zip(v) {
        *m = ADAM_BETA1 * *m + (1.0 - ADAM_BETA1) * g;
        *v = ADAM_BETA2 * *v + (1.0 - ADAM_BETA2) * g * g;
        let m_hat = *m / bias1;
        let v_hat = *v / bias2;
        *p -= learning_rate * m_hat / (v_hat.sqrt() + ADAM_EPS);
    }
}

fn softmax_rows(logits: &Array2<f64>) -> Array2<f64> {
    let mut out = logits.clone();
    for mut row in out.rows_mut() {
        let max = row.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        row.mapv_inplace(|v| v / sum);
    }
    out
}

fn softmax_vec(logits: &[f64]) -> Vec<f64> {
    let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = logits.iter().map(|v| (v - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.into_iter().map(|v| v / sum).collect()
}

fn cross_entropy(probs: &Array2<f64>, y: &[u8]) -> f64 {
    let mut total = 0.0;
    for (i, label) in y.iter().enumerate() {
        total -= probs[[i, *label as usize]].max(1e-15).ln();
    }
    total / y.len() as f64
}

pub(crate) fn argmax(values: &[f64]) -> usize {
    values
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.total_cmp(b))
        .map(|(i, _)| i)
        .unwrap_or(0)
}
