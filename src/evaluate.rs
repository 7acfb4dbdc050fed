//! k-fold cross-validated evaluation of per-subject one-vs-rest classifiers.
//!
//! Every fold trains one classifier per subject on the fold's training rows
//! plus their mirrored-image companions, scores the held-out rows with every
//! classifier, and reduces the pooled scores to fold metrics.

use ndarray::{concatenate, Array2, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;
use uuid::Uuid;

use crate::classifier::{binary_labels, Classifier, Trainer};
use crate::config::{EvaluationConfig, Mode};
use crate::error::{Error, Result};
use crate::executor::BatchExecutor;
use crate::folds::{Fold, StratifiedKFold};
use crate::recognition::{identify, recognition_metrics, RecognitionMetrics};
use crate::report::{AuthenticationSummary, RecognitionSummary, Report, Results};
use crate::roc::{fold_metrics, FoldMetrics};
use crate::table::FeatureTable;

/// Training and test rows of one fold.
pub struct FoldData {
    pub train: Array2<f64>,
    pub train_labels: Vec<u32>,
    pub test: Array2<f64>,
    pub test_labels: Vec<u32>,
    /// Distinct training labels, ascending.
    pub classes: Vec<u32>,
}

impl FoldData {
    /// Normal training rows stacked on their flipped counterparts; the test
    /// set only uses normal rows.
    pub fn build(normal: &FeatureTable, flipped: &FeatureTable, fold: &Fold) -> Result<Self> {
        let upper = normal.select_rows(&fold.train);
        let lower = flipped.select_rows(&fold.train);
        let train = concatenate(Axis(0), &[upper.view(), lower.view()]).map_err(|_| {
            Error::ShapeMismatch {
                what: "training rows vs flipped training rows",
                left: upper.dim(),
                right: lower.dim(),
            }
        })?;

        let mut train_labels = normal.select_labels(&fold.train);
        train_labels.extend_from_within(..);
        let mut classes = train_labels.clone();
        classes.sort_unstable();
        classes.dedup();

        Ok(Self {
            train,
            train_labels,
            test: normal.select_rows(&fold.test),
            test_labels: normal.select_labels(&fold.test),
            classes,
        })
    }
}

pub struct ClassModel<M> {
    pub class: u32,
    pub model: M,
}

/// Genuine scores of one class model over the test rows, with the matching
/// binary ground truth.
#[derive(Debug, Clone)]
pub struct ClassScores {
    pub class: u32,
    pub scores: Vec<f64>,
    pub truth: Vec<u8>,
}

pub fn train_classes<T: Trainer>(
    executor: &BatchExecutor,
    trainer: &T,
    train: ArrayView2<'_, f64>,
    labels: &[u32],
    classes: &[u32],
) -> Result<Vec<ClassModel<T::Model>>> {
    executor.run(classes, |&class| {
        log::debug!("Training - class {}", class);
        let binary = binary_labels(labels, class);
        let model = trainer.fit(train, &binary)?;
        Ok(ClassModel { class, model })
    })
}

pub fn test_classes<M: Classifier>(
    executor: &BatchExecutor,
    models: &[ClassModel<M>],
    test: ArrayView2<'_, f64>,
    labels: &[u32],
) -> Result<Vec<ClassScores>> {
    executor.run(models, |m| {
        log::debug!("Testing - class {}", m.class);
        Ok(ClassScores {
            class: m.class,
            scores: m.model.genuine_probability(test),
            truth: binary_labels(labels, m.class),
        })
    })
}

/// Train and score every class of one fold.
pub fn score_fold<T: Trainer>(
    executor: &BatchExecutor,
    trainer: &T,
    data: &FoldData,
) -> Result<Vec<ClassScores>> {
    let models = train_classes(
        executor,
        trainer,
        data.train.view(),
        &data.train_labels,
        &data.classes,
    )?;
    test_classes(executor, &models, data.test.view(), &data.test_labels)
}

pub fn authentication_metrics(scored: &[ClassScores], far_target: f64) -> Result<FoldMetrics> {
    let scores: Vec<f64> = scored.iter().flat_map(|c| c.scores.iter().copied()).collect();
    let truth: Vec<u8> = scored.iter().flat_map(|c| c.truth.iter().copied()).collect();
    fold_metrics(&truth, &scores, far_target)
}

pub fn identification_metrics(scored: &[ClassScores], data: &FoldData) -> Result<RecognitionMetrics> {
    let classes: Vec<u32> = scored.iter().map(|c| c.class).collect();
    let scores: Vec<Vec<f64>> = scored.iter().map(|c| c.scores.clone()).collect();
    let predicted = identify(&classes, &scores);
    recognition_metrics(&classes, &data.test_labels, &predicted)
}

/// Run the cross-validation protocol over a feature table and its flipped
/// companion.
pub fn run<T: Trainer>(
    normal: &FeatureTable,
    flipped: &FeatureTable,
    cfg: &EvaluationConfig,
    trainer: &T,
) -> Result<Report> {
    normal.check_companion(flipped)?;

    let seed = cfg.seed.unwrap_or_else(rand::random);
    log::info!("Fold shuffle seed: {}", seed);
    let splitter = StratifiedKFold::new(cfg.folds, cfg.sparse_classes)?;
    let folds = splitter.split(normal.labels(), &mut StdRng::seed_from_u64(seed))?;
    let executor = BatchExecutor::new(cfg.batch_size)?;

    let mut auth = Vec::with_capacity(folds.len());
    let mut recog = Vec::with_capacity(folds.len());
    for (k, fold) in folds.iter().enumerate() {
        log::info!(
            "Fold - {} ({} train, {} test)",
            k,
            fold.train.len(),
            fold.test.len()
        );
        let in_fold = |e: Error| e.in_fold(k);
        let data = FoldData::build(normal, flipped, fold).map_err(in_fold)?;
        let scored = score_fold(&executor, trainer, &data).map_err(in_fold)?;

        match cfg.mode {
            Mode::Authentication => {
                let m = authentication_metrics(&scored, cfg.far_target).map_err(in_fold)?;
                log::info!(
                    "Fold {}: FAR {} FRR {} EER {} (threshold {})",
                    k,
                    m.far,
                    m.frr,
                    m.eer,
                    m.eer_threshold
                );
                auth.push(m);
            }
            Mode::Recognition => {
                let m = identification_metrics(&scored, &data).map_err(in_fold)?;
                log::info!(
                    "Fold {}: FAR {} FRR {} Accuracy {}",
                    k,
                    m.far,
                    m.frr,
                    m.accuracy
                );
                recog.push(m);
            }
        }
    }

    let results = match cfg.mode {
        Mode::Authentication => Results::Authentication {
            summary: AuthenticationSummary::from_folds(&auth),
            per_fold: auth,
        },
        Mode::Recognition => Results::Recognition {
            summary: RecognitionSummary::from_folds(&recog),
            per_fold: recog,
        },
    };

    // Test sets are disjoint, so together they are the evaluated rows.
    let evaluated: Vec<usize> = folds.iter().flat_map(|f| f.test.iter().copied()).collect();
    let mut classes = normal.select_labels(&evaluated);
    classes.sort_unstable();
    classes.dedup();

    Ok(Report {
        run_id: Uuid::new_v4(),
        seed,
        folds: folds.len(),
        samples: evaluated.len(),
        classes: classes.len(),
        results,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn fold_data_doubles_training_rows_with_flipped_copies() {
        let normal = FeatureTable::new(array![[0.0], [1.0], [2.0], [3.0]], vec![1, 1, 2, 2]).unwrap();
        let flipped =
            FeatureTable::new(array![[10.0], [11.0], [12.0], [13.0]], vec![1, 1, 2, 2]).unwrap();
        let fold = Fold {
            train: vec![0, 2],
            test: vec![1, 3],
        };
        let data = FoldData::build(&normal, &flipped, &fold).unwrap();
        assert_eq!(data.train, array![[0.0], [2.0], [10.0], [12.0]]);
        assert_eq!(data.train_labels, vec![1, 2, 1, 2]);
        assert_eq!(data.test, array![[1.0], [3.0]]);
        assert_eq!(data.test_labels, vec![1, 2]);
        assert_eq!(data.classes, vec![1, 2]);
    }

    #[test]
    fn pooled_scores_keep_class_order() {
        let scored = vec![
            ClassScores {
                class: 1,
                scores: vec![0.9, 0.2],
                truth: vec![0, 1],
            },
            ClassScores {
                class: 2,
                scores: vec![0.1, 0.8],
                truth: vec![1, 0],
            },
        ];
        let m = authentication_metrics(&scored, 0.001).unwrap();
        assert_eq!(m.eer, 0.0);
        assert_eq!(m.frr, 0.0);
    }
}
