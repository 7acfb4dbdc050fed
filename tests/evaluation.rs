use std::sync::atomic::{AtomicUsize, Ordering};

use faceauth::classifier::Trainer;
use faceauth::config::{EvaluationConfig, Mode};
use faceauth::folds::SparseClassPolicy;
use faceauth::report::Results;
use faceauth::svm::LinearSvmModel;
use faceauth::{evaluate, Error, FeatureTable, LinearSvm};
use ndarray::{Array2, ArrayView2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// `per_class` noisy samples around a distinct centre for each of `classes`
/// subjects, plus a slightly perturbed flipped copy.
fn clustered(classes: u32, per_class: usize, dim: usize, seed: u64) -> (FeatureTable, FeatureTable) {
    let mut rng = StdRng::seed_from_u64(seed);
    let rows = classes as usize * per_class;
    let mut normal = Array2::<f64>::zeros((rows, dim));
    let mut flipped = Array2::<f64>::zeros((rows, dim));
    let mut labels = Vec::with_capacity(rows);
    for c in 0..classes {
        for i in 0..per_class {
            let r = c as usize * per_class + i;
            for d in 0..dim {
                let centre = if d % classes as usize == c as usize { 3.0 } else { 0.0 };
                let v = centre + rng.gen_range(-0.3..0.3);
                normal[[r, d]] = v;
                flipped[[r, d]] = v + rng.gen_range(-0.05..0.05);
            }
            labels.push(c + 1);
        }
    }
    (
        FeatureTable::new(normal, labels.clone()).unwrap(),
        FeatureTable::new(flipped, labels).unwrap(),
    )
}

/// Linear SVM that records how many models it fitted.
#[derive(Default)]
struct CountingSvm {
    inner: LinearSvm,
    fits: AtomicUsize,
}

impl Trainer for CountingSvm {
    type Model = LinearSvmModel;

    fn fit(&self, features: ArrayView2<'_, f64>, labels: &[u8]) -> faceauth::Result<LinearSvmModel> {
        self.fits.fetch_add(1, Ordering::SeqCst);
        self.inner.fit(features, labels)
    }
}

fn config(mode: Mode) -> EvaluationConfig {
    EvaluationConfig {
        folds: 5,
        batch_size: 2,
        seed: Some(7),
        far_target: 0.1,
        mode,
        ..EvaluationConfig::default()
    }
}

#[test]
fn authentication_run_separates_clustered_subjects() {
    let (normal, flipped) = clustered(3, 10, 6, 1);
    let trainer = CountingSvm::default();
    let report = evaluate::run(&normal, &flipped, &config(Mode::Authentication), &trainer).unwrap();
    // one model per subject per fold
    assert_eq!(trainer.fits.load(Ordering::SeqCst), 15);

    assert_eq!(report.seed, 7);
    assert_eq!(report.folds, 5);
    assert_eq!(report.samples, 30);
    assert_eq!(report.classes, 3);
    match &report.results {
        Results::Authentication { per_fold, summary } => {
            assert_eq!(per_fold.len(), 5);
            for m in per_fold {
                assert!((0.0..=1.0).contains(&m.far));
                assert!((0.0..=1.0).contains(&m.frr));
            }
            assert!(summary.eer.mean < 0.2, "eer {}", summary.eer.mean);
        }
        other => panic!("unexpected results {other:?}"),
    }
    let text = report.to_string();
    assert!(text.contains("Authentication Results:"));
    assert!(text.contains("Threshold:"));
}

#[test]
fn same_seed_gives_same_metrics() {
    let (normal, flipped) = clustered(3, 10, 6, 2);
    let cfg = config(Mode::Authentication);
    let a = evaluate::run(&normal, &flipped, &cfg, &LinearSvm::default()).unwrap();
    let b = evaluate::run(&normal, &flipped, &cfg, &LinearSvm::default()).unwrap();
    match (&a.results, &b.results) {
        (Results::Authentication { per_fold: x, .. }, Results::Authentication { per_fold: y, .. }) => {
            assert_eq!(x, y)
        }
        _ => panic!("expected authentication results"),
    }
}

#[test]
fn recognition_run_identifies_subjects() {
    let (normal, flipped) = clustered(3, 10, 6, 3);
    let report = evaluate::run(&normal, &flipped, &config(Mode::Recognition), &LinearSvm::default()).unwrap();
    match &report.results {
        Results::Recognition { per_fold, summary } => {
            assert_eq!(per_fold.len(), 5);
            assert!(summary.accuracy.mean > 0.9, "accuracy {}", summary.accuracy.mean);
        }
        other => panic!("unexpected results {other:?}"),
    }
}

#[test]
fn mismatched_flipped_table_fails_before_fitting() {
    let (normal, _) = clustered(3, 10, 6, 4);
    let (short, _) = clustered(3, 9, 6, 4);
    let trainer = CountingSvm::default();
    let err = evaluate::run(&normal, &short, &config(Mode::Authentication), &trainer).unwrap_err();
    assert!(matches!(err, Error::ShapeMismatch { .. }), "{err}");
    assert_eq!(trainer.fits.load(Ordering::SeqCst), 0);
}

#[test]
fn singleton_class_fails_or_is_excluded() {
    let (normal, flipped) = clustered(3, 10, 4, 5);
    let append = |t: &FeatureTable| {
        let mut rows = t.features().to_owned();
        rows.push_row(ndarray::ArrayView1::from(&[9.0, 9.0, 9.0, 9.0])).unwrap();
        let mut labels = t.labels().to_vec();
        labels.push(4);
        FeatureTable::new(rows, labels).unwrap()
    };
    let (normal, flipped) = (append(&normal), append(&flipped));

    let cfg = config(Mode::Authentication);
    let err = evaluate::run(&normal, &flipped, &cfg, &LinearSvm::default()).unwrap_err();
    assert!(matches!(err, Error::SparseClass { label: 4, count: 1, .. }), "{err}");

    let cfg = EvaluationConfig {
        sparse_classes: SparseClassPolicy::Exclude,
        ..cfg
    };
    let report = evaluate::run(&normal, &flipped, &cfg, &LinearSvm::default()).unwrap();
    assert_eq!(report.samples, 30);
    assert_eq!(report.classes, 3);
}
