use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{what}: left has shape {left:?}, right has shape {right:?}")]
    ShapeMismatch {
        what: &'static str,
        left: (usize, usize),
        right: (usize, usize),
    },
    #[error("label mismatch at row {row}: {left} vs {right}")]
    LabelMismatch { row: usize, left: u32, right: u32 },
    #[error("expected {expected}-dim embedding, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("{}:{line}: expected {expected} columns, found {actual}", path.display())]
    RaggedRow {
        path: PathBuf,
        line: usize,
        expected: usize,
        actual: usize,
    },
    #[error("row {row}: invalid subject label {value} (must be a positive integer)")]
    InvalidLabel { row: usize, value: f64 },
    #[error("feature table is empty")]
    EmptyTable,
    #[error("class {label} has {count} sample(s), fewer than {folds} folds")]
    SparseClass { label: u32, count: usize, folds: usize },
    #[error("need at least two classes to split, found {0}")]
    TooFewClasses(usize),
    #[error("need at least 2 folds, got {0}")]
    InvalidFoldCount(usize),
    #[error("fold {fold}: {source}")]
    Fold {
        fold: usize,
        #[source]
        source: Box<Error>,
    },
    #[error("scores need both genuine and impostor samples ({genuine} genuine, {impostor} impostor)")]
    DegenerateScores { genuine: usize, impostor: usize },
    #[error("classifier fit failed: {0}")]
    Fit(String),
    #[error("{}:{line}: {message}", path.display())]
    Parse {
        path: PathBuf,
        line: usize,
        message: String,
    },
    #[error("worker pool: {0}")]
    Pool(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("encoding: {0}")]
    Encode(#[from] postcard::Error),
}

impl Error {
    pub(crate) fn in_fold(self, fold: usize) -> Self {
        Error::Fold {
            fold,
            source: Box::new(self),
        }
    }
}
