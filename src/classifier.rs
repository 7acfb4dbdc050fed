use ndarray::{Array2, ArrayView2};

use crate::error::Result;

/// Binary label for samples of the class a model is trained for.
pub const GENUINE: u8 = 0;
/// Binary label for every other sample.
pub const IMPOSTOR: u8 = 1;

/// One-vs-rest labels for `class`, in the order of `labels`.
pub fn binary_labels(labels: &[u32], class: u32) -> Vec<u8> {
    labels
        .iter()
        .map(|&l| if l == class { GENUINE } else { IMPOSTOR })
        .collect()
}

/// Fits a probability-calibrated binary classifier.
pub trait Trainer: Sync {
    type Model: Classifier;

    fn fit(&self, features: ArrayView2<'_, f64>, labels: &[u8]) -> Result<Self::Model>;
}

pub trait Classifier: Send + Sync {
    /// Probability of [`GENUINE`] for each row.
    fn genuine_probability(&self, features: ArrayView2<'_, f64>) -> Vec<f64>;

    /// Per-row probabilities, column 0 for [`GENUINE`] and column 1 for [`IMPOSTOR`].
    fn predict_proba(&self, features: ArrayView2<'_, f64>) -> Array2<f64> {
        let genuine = self.genuine_probability(features);
        let mut out = Array2::zeros((genuine.len(), 2));
        for (mut row, p) in out.outer_iter_mut().zip(genuine) {
            row[0] = p;
            row[1] = 1.0 - p;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_labels_mark_members_genuine_and_keep_order() {
        let labels = [3, 1, 3, 2, 1];
        let binary = binary_labels(&labels, 3);
        assert_eq!(binary, vec![GENUINE, IMPOSTOR, GENUINE, IMPOSTOR, IMPOSTOR]);
    }

    #[test]
    fn binary_labels_have_two_values_for_every_present_class() {
        let labels = [1, 2, 2, 3, 3, 3];
        for class in [1, 2, 3] {
            let binary = binary_labels(&labels, class);
            assert_eq!(binary.len(), labels.len());
            assert!(binary.contains(&GENUINE));
            assert!(binary.contains(&IMPOSTOR));
            for (b, l) in binary.iter().zip(labels) {
                assert_eq!(*b == GENUINE, l == class);
            }
        }
    }
}
