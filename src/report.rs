use std::fmt;
use std::path::Path;

use serde::Serialize;
use uuid::Uuid;

use crate::error::Result;
use crate::recognition::RecognitionMetrics;
use crate::roc::FoldMetrics;

/// Mean and population standard deviation of a per-fold metric.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Stat {
    pub mean: f64,
    pub std: f64,
}

impl Stat {
    pub fn of(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self {
                mean: f64::NAN,
                std: f64::NAN,
            };
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        Self {
            mean,
            std: var.sqrt(),
        }
    }
}

impl fmt::Display for Stat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (+/- {})", self.mean, self.std)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AuthenticationSummary {
    /// Mean EER threshold, the recommended decision cutoff.
    pub threshold: Stat,
    pub far: Stat,
    pub frr: Stat,
    pub eer: Stat,
}

impl AuthenticationSummary {
    pub fn from_folds(folds: &[FoldMetrics]) -> Self {
        let pick = |f: fn(&FoldMetrics) -> f64| Stat::of(&folds.iter().map(f).collect::<Vec<_>>());
        Self {
            threshold: pick(|m| m.eer_threshold),
            far: pick(|m| m.far),
            frr: pick(|m| m.frr),
            eer: pick(|m| m.eer),
        }
    }
}

impl fmt::Display for AuthenticationSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Threshold: {}   FAR: {}   FRR: {}   EER: {}",
            self.threshold.mean, self.far, self.frr, self.eer
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RecognitionSummary {
    pub far: Stat,
    pub frr: Stat,
    pub accuracy: Stat,
}

impl RecognitionSummary {
    pub fn from_folds(folds: &[RecognitionMetrics]) -> Self {
        let pick =
            |f: fn(&RecognitionMetrics) -> f64| Stat::of(&folds.iter().map(f).collect::<Vec<_>>());
        Self {
            far: pick(|m| m.far),
            frr: pick(|m| m.frr),
            accuracy: pick(|m| m.accuracy),
        }
    }
}

impl fmt::Display for RecognitionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FAR: {}   FRR: {}   Accuracy: {}",
            self.far, self.frr, self.accuracy
        )
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum Results {
    Authentication {
        per_fold: Vec<FoldMetrics>,
        summary: AuthenticationSummary,
    },
    Recognition {
        per_fold: Vec<RecognitionMetrics>,
        summary: RecognitionSummary,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub run_id: Uuid,
    /// Seed used for fold shuffling; replays the same split.
    pub seed: u64,
    pub folds: usize,
    /// Rows that appeared in a test set; excluded sparse classes are not counted.
    pub samples: usize,
    pub classes: usize,
    #[serde(flatten)]
    pub results: Results,
}

impl Report {
    pub fn write_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::File::create(path)?;
        serde_json::to_writer_pretty(std::io::BufWriter::new(file), self)
            .map_err(std::io::Error::from)?;
        Ok(())
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", "-".repeat(86))?;
        match &self.results {
            Results::Authentication { summary, .. } => {
                writeln!(f, "Authentication Results:")?;
                write!(f, "{summary}")
            }
            Results::Recognition { summary, .. } => {
                writeln!(f, "Recognition Results:")?;
                write!(f, "{summary}")
            }
        }
    }
}
