//! ROC sweep and the per-fold authentication metrics derived from it.

use serde::Serialize;

use crate::classifier::GENUINE;
use crate::error::{Error, Result};

/// Receiver operating characteristic over descending score thresholds.
///
/// Index 0 is the all-reject point with an infinite threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct Roc {
    pub fpr: Vec<f64>,
    pub tpr: Vec<f64>,
    pub thresholds: Vec<f64>,
}

impl Roc {
    pub fn fnr(&self) -> Vec<f64> {
        self.tpr.iter().map(|t| 1.0 - t).collect()
    }

    pub fn len(&self) -> usize {
        self.fpr.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fpr.is_empty()
    }
}

/// Sweep every distinct score, higher scores accepted first. Points lying on a
/// straight segment between their neighbours are dropped.
pub fn roc_curve(truth: &[u8], scores: &[f64], positive: u8) -> Result<Roc> {
    if truth.len() != scores.len() {
        return Err(Error::ShapeMismatch {
            what: "ground truth vs scores",
            left: (truth.len(), 1),
            right: (scores.len(), 1),
        });
    }
    let positives = truth.iter().filter(|&&t| t == positive).count();
    let negatives = truth.len() - positives;
    if positives == 0 || negatives == 0 {
        return Err(Error::DegenerateScores {
            genuine: positives,
            impostor: negatives,
        });
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

    let mut tps = Vec::new();
    let mut fps = Vec::new();
    let mut thresholds = Vec::new();
    let (mut tp, mut fp) = (0usize, 0usize);
    for (pos, &i) in order.iter().enumerate() {
        if truth[i] == positive {
            tp += 1;
        } else {
            fp += 1;
        }
        let last_of_run = order
            .get(pos + 1)
            .map_or(true, |&next| scores[next] != scores[i]);
        if last_of_run {
            tps.push(tp as f64);
            fps.push(fp as f64);
            thresholds.push(scores[i]);
        }
    }

    if fps.len() > 2 {
        let keep: Vec<usize> = (0..fps.len())
            .filter(|&i| {
                i == 0
                    || i == fps.len() - 1
                    || fps[i + 1] - 2.0 * fps[i] + fps[i - 1] != 0.0
                    || tps[i + 1] - 2.0 * tps[i] + tps[i - 1] != 0.0
            })
            .collect();
        tps = keep.iter().map(|&i| tps[i]).collect();
        fps = keep.iter().map(|&i| fps[i]).collect();
        thresholds = keep.iter().map(|&i| thresholds[i]).collect();
    }

    let fpr = std::iter::once(0.0)
        .chain(fps.iter().map(|f| f / negatives as f64))
        .collect();
    let tpr = std::iter::once(0.0)
        .chain(tps.iter().map(|t| t / positives as f64))
        .collect();
    let thresholds = std::iter::once(f64::INFINITY).chain(thresholds).collect();
    Ok(Roc {
        fpr,
        tpr,
        thresholds,
    })
}

/// First index minimizing |FNR - FPR|.
pub fn equal_error_index(fpr: &[f64], fnr: &[f64]) -> usize {
    fpr.iter()
        .zip(fnr)
        .map(|(p, n)| (n - p).abs())
        .enumerate()
        .filter(|(_, d)| !d.is_nan())
        .fold(None, |best: Option<(usize, f64)>, (i, d)| match best {
            Some((_, bd)) if bd <= d => best,
            _ => Some((i, d)),
        })
        .map_or(0, |(i, _)| i)
}

/// Lowest-FNR index past the all-reject point whose FPR is within
/// `far_target`, or `(1, true)` when there is none.
pub fn operating_index(fpr: &[f64], fnr: &[f64], far_target: f64) -> (usize, bool) {
    let best = (1..fpr.len())
        .filter(|&i| fpr[i] <= far_target)
        .fold(None, |best: Option<usize>, i| match best {
            Some(b) if fnr[b] <= fnr[i] => Some(b),
            _ => Some(i),
        });
    match best {
        Some(i) => (i, false),
        None => (1, true),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FoldMetrics {
    pub far: f64,
    pub frr: f64,
    pub eer: f64,
    pub eer_threshold: f64,
    /// Set when no threshold met the FAR target and index 1 was used.
    pub fallback: bool,
}

/// Authentication metrics from the pooled scores of one fold.
///
/// `scores` are genuine probabilities and `truth` the binary labels, with
/// [`GENUINE`] as the class to accept.
pub fn fold_metrics(truth: &[u8], scores: &[f64], far_target: f64) -> Result<FoldMetrics> {
    let roc = roc_curve(truth, scores, GENUINE)?;
    let fnr = roc.fnr();

    let eer_idx = equal_error_index(&roc.fpr, &fnr);
    let (op_idx, fallback) = operating_index(&roc.fpr, &fnr, far_target);
    if fallback {
        log::warn!(
            "No threshold reaches FAR <= {}; using the first non-trivial threshold",
            far_target
        );
    }

    Ok(FoldMetrics {
        far: roc.fpr[op_idx],
        frr: fnr[op_idx],
        eer: roc.fpr[eer_idx],
        eer_threshold: roc.thresholds[eer_idx],
        fallback,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_reference_roc_points() {
        let truth = [1, 1, 2, 2];
        let scores = [0.1, 0.4, 0.35, 0.8];
        let roc = roc_curve(&truth, &scores, 2).unwrap();
        assert_eq!(roc.fpr, vec![0.0, 0.0, 0.5, 0.5, 1.0]);
        assert_eq!(roc.tpr, vec![0.0, 0.5, 0.5, 1.0, 1.0]);
        assert_eq!(roc.thresholds[1..], [0.8, 0.4, 0.35, 0.1]);
        assert!(roc.thresholds[0].is_infinite());
    }

    #[test]
    fn collinear_points_are_dropped() {
        let truth = [0, 0, 0, 1];
        let scores = [0.9, 0.8, 0.7, 0.1];
        let roc = roc_curve(&truth, &scores, 0).unwrap();
        assert_eq!(roc.tpr, vec![0.0, 1.0 / 3.0, 1.0, 1.0]);
        assert_eq!(roc.thresholds[1..], [0.9, 0.7, 0.1]);
    }

    #[test]
    fn perfect_separation_has_zero_eer() {
        let scores = [0.9, 0.8, 0.3, 0.1];
        let truth = [0, 0, 1, 1];
        let m = fold_metrics(&truth, &scores, 0.001).unwrap();
        assert_eq!(m.eer, 0.0);
        assert!(
            (0.3..=0.8).contains(&m.eer_threshold),
            "threshold {}",
            m.eer_threshold
        );
        assert_eq!(m.far, 0.0);
        assert_eq!(m.frr, 0.0);
        assert!(!m.fallback);
    }

    #[test]
    fn aggregator_is_idempotent() {
        let scores = [0.9, 0.2, 0.75, 0.4, 0.6, 0.1, 0.55, 0.3];
        let truth = [0, 1, 0, 1, 1, 1, 0, 1];
        let a = fold_metrics(&truth, &scores, 0.001).unwrap();
        let b = fold_metrics(&truth, &scores, 0.001).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn operating_point_takes_the_lowest_fnr_within_target() {
        let fpr = [0.0, 0.0, 0.0005, 0.001, 0.01, 1.0];
        let fnr = [1.0, 0.6, 0.4, 0.3, 0.1, 0.0];
        assert_eq!(operating_index(&fpr, &fnr, 0.001), (3, false));
    }

    #[test]
    fn operating_point_ignores_the_all_reject_point() {
        let fpr = [0.0, 0.2, 0.5, 1.0];
        let fnr = [1.0, 0.5, 0.2, 0.0];
        assert_eq!(operating_index(&fpr, &fnr, 0.001), (1, true));
    }

    #[test]
    fn fallback_uses_index_one() {
        // the top score is an impostor, so FPR leaves zero at the first threshold
        let scores = [0.95, 0.9, 0.8, 0.7, 0.2];
        let truth = [1, 0, 1, 0, 1];
        let m = fold_metrics(&truth, &scores, 0.001).unwrap();
        let roc = roc_curve(&truth, &scores, 0).unwrap();
        assert!(m.fallback);
        assert_eq!(m.far, roc.fpr[1]);
        assert_eq!(m.frr, 1.0 - roc.tpr[1]);
    }

    #[test]
    fn single_label_scores_are_degenerate() {
        let err = fold_metrics(&[0, 0], &[0.2, 0.3], 0.001).unwrap_err();
        assert!(matches!(
            err,
            Error::DegenerateScores {
                genuine: 2,
                impostor: 0
            }
        ));
    }

    #[test]
    fn equal_error_index_prefers_the_first_minimum() {
        let fpr = [0.0, 0.25, 0.5, 1.0];
        let fnr = [1.0, 0.25, 0.5, 0.0];
        assert_eq!(equal_error_index(&fpr, &fnr), 1);
    }
}
