//! Closed-set identification from the per-class genuine scores.

use serde::Serialize;

use crate::error::{Error, Result};

/// Micro-averaged one-vs-rest rates of a fold's identification decisions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RecognitionMetrics {
    pub far: f64,
    pub frr: f64,
    pub accuracy: f64,
}

/// Pick, for every test row, the class whose model gave the highest score.
///
/// `scores[c][i]` is the genuine probability of row `i` under `classes[c]`.
pub fn identify(classes: &[u32], scores: &[Vec<f64>]) -> Vec<u32> {
    let rows = scores.first().map_or(0, Vec::len);
    (0..rows)
        .map(|i| {
            let best = (0..classes.len()).fold(0, |best, c| {
                if scores[c][i] > scores[best][i] {
                    c
                } else {
                    best
                }
            });
            classes[best]
        })
        .collect()
}

pub fn recognition_metrics(
    classes: &[u32],
    truth: &[u32],
    predicted: &[u32],
) -> Result<RecognitionMetrics> {
    if truth.len() != predicted.len() {
        return Err(Error::ShapeMismatch {
            what: "true vs predicted labels",
            left: (truth.len(), 1),
            right: (predicted.len(), 1),
        });
    }
    if truth.is_empty() || classes.is_empty() {
        return Err(Error::EmptyTable);
    }

    let n = truth.len() as f64;
    let (mut tp, mut fp, mut fn_, mut tn) = (0.0, 0.0, 0.0, 0.0);
    for &class in classes {
        let mut counts = [0.0f64; 3];
        for (&t, &p) in truth.iter().zip(predicted) {
            match (t == class, p == class) {
                (true, true) => counts[0] += 1.0,
                (false, true) => counts[1] += 1.0,
                (true, false) => counts[2] += 1.0,
                (false, false) => {}
            }
        }
        tp += counts[0];
        fp += counts[1];
        fn_ += counts[2];
        tn += n - counts.iter().sum::<f64>();
    }

    Ok(RecognitionMetrics {
        far: fp / (fp + tn),
        frr: fn_ / (tp + fn_),
        accuracy: (tp + tn) / (tp + tn + fp + fn_),
    })
}
