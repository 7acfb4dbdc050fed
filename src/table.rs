//! Feature tables: one embedding row per image plus its 1-based subject label.
//!
//! Two on-disk encodings are supported and picked from the file extension:
//! whitespace separated text (`.txt`, readable by `numpy.loadtxt`, label in the
//! last column) and postcard binary (`.bin`).

use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use ndarray::{Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TableFormat {
    #[default]
    Txt,
    Bin,
}

impl TableFormat {
    pub fn extension(self) -> &'static str {
        match self {
            TableFormat::Txt => "txt",
            TableFormat::Bin => "bin",
        }
    }

    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("bin") => TableFormat::Bin,
            _ => TableFormat::Txt,
        }
    }
}

impl std::str::FromStr for TableFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "txt" => Ok(TableFormat::Txt),
            "bin" => Ok(TableFormat::Bin),
            other => Err(format!("unknown table format `{other}` (expected txt or bin)")),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredTable {
    dim: u32,
    labels: Vec<u32>,
    values: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeatureTable {
    features: Array2<f64>,
    labels: Vec<u32>,
}

impl FeatureTable {
    pub fn new(features: Array2<f64>, labels: Vec<u32>) -> Result<Self> {
        if labels.is_empty() || features.ncols() == 0 {
            return Err(Error::EmptyTable);
        }
        if features.nrows() != labels.len() {
            return Err(Error::ShapeMismatch {
                what: "features vs labels",
                left: features.dim(),
                right: (labels.len(), 1),
            });
        }
        if let Some(row) = labels.iter().position(|&l| l == 0) {
            return Err(Error::InvalidLabel { row, value: 0.0 });
        }
        Ok(Self { features, labels })
    }

    pub fn features(&self) -> ArrayView2<'_, f64> {
        self.features.view()
    }

    pub fn labels(&self) -> &[u32] {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Embedding dimension, without the label column.
    pub fn dim(&self) -> usize {
        self.features.ncols()
    }

    /// Distinct labels in ascending order.
    pub fn classes(&self) -> Vec<u32> {
        self.labels
            .iter()
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Copy the given rows into a new matrix, in index order.
    pub fn select_rows(&self, rows: &[usize]) -> Array2<f64> {
        self.features.select(Axis(0), rows)
    }

    pub fn select_labels(&self, rows: &[usize]) -> Vec<u32> {
        rows.iter().map(|&i| self.labels[i]).collect()
    }

    /// Verify that `flipped` is a row-for-row companion of this table.
    pub fn check_companion(&self, flipped: &FeatureTable) -> Result<()> {
        if self.features.dim() != flipped.features.dim() {
            return Err(Error::ShapeMismatch {
                what: "feature table vs flipped table",
                left: self.features.dim(),
                right: flipped.features.dim(),
            });
        }
        if let Some(row) = (0..self.len()).find(|&i| self.labels[i] != flipped.labels[i]) {
            return Err(Error::LabelMismatch {
                row,
                left: self.labels[row],
                right: flipped.labels[row],
            });
        }
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        match TableFormat::from_path(path) {
            TableFormat::Txt => {
                let raw = std::fs::read_to_string(path)?;
                Self::parse_text(&raw, path)
            }
            TableFormat::Bin => {
                let data = std::fs::read(path)?;
                let stored: StoredTable = postcard::from_bytes(&data)?;
                let dim = stored.dim as usize;
                let rows = stored.labels.len();
                if dim == 0 || stored.values.len() != rows * dim {
                    return Err(Error::Parse {
                        path: path.to_path_buf(),
                        line: 0,
                        message: format!(
                            "{} values do not fill {rows} rows of {dim} columns",
                            stored.values.len()
                        ),
                    });
                }
                let features = Array2::from_shape_vec((rows, dim), stored.values).map_err(|e| {
                    Error::Parse {
                        path: path.to_path_buf(),
                        line: 0,
                        message: e.to_string(),
                    }
                })?;
                Self::new(features, stored.labels)
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        match TableFormat::from_path(path) {
            TableFormat::Txt => std::fs::write(path, self.to_text())?,
            TableFormat::Bin => {
                let stored = StoredTable {
                    dim: self.dim() as u32,
                    labels: self.labels.clone(),
                    values: self.features.iter().copied().collect(),
                };
                std::fs::write(path, postcard::to_allocvec(&stored)?)?;
            }
        }
        Ok(())
    }

    /// Parse the text layout. `path` is only used for error messages.
    pub fn parse_text(raw: &str, path: &Path) -> Result<Self> {
        let mut width = None;
        let mut values = Vec::new();
        let mut labels = Vec::new();

        for (idx, line) in raw.lines().enumerate() {
            let line_no = idx + 1;
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let row = line
                .split_whitespace()
                .map(str::parse::<f64>)
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| Error::Parse {
                    path: path.to_path_buf(),
                    line: line_no,
                    message: e.to_string(),
                })?;

            let expected = *width.get_or_insert(row.len());
            if row.len() != expected {
                return Err(Error::RaggedRow {
                    path: path.to_path_buf(),
                    line: line_no,
                    expected,
                    actual: row.len(),
                });
            }
            if expected < 2 {
                return Err(Error::Parse {
                    path: path.to_path_buf(),
                    line: line_no,
                    message: "a row needs at least one feature and a label".to_string(),
                });
            }

            let (features, label) = row.split_at(expected - 1);
            labels.push(parse_label(label[0], labels.len())?);
            values.extend_from_slice(features);
        }

        let dim = width.ok_or(Error::EmptyTable)? - 1;
        let features = Array2::from_shape_vec((labels.len(), dim), values).map_err(|e| Error::Parse {
            path: path.to_path_buf(),
            line: 0,
            message: e.to_string(),
        })?;
        Self::new(features, labels)
    }

    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for (row, label) in self.features.outer_iter().zip(&self.labels) {
            for v in row {
                let _ = write!(out, "{v:e} ");
            }
            let _ = writeln!(out, "{label}");
        }
        out
    }
}

fn parse_label(value: f64, row: usize) -> Result<u32> {
    if !value.is_finite() || value < 1.0 || value.fract() != 0.0 || value > u32::MAX as f64 {
        return Err(Error::InvalidLabel { row, value });
    }
    Ok(value as u32)
}

/// Row-at-a-time builder used while extracting embeddings.
#[derive(Debug)]
pub struct TableBuilder {
    dim: usize,
    values: Vec<f64>,
    labels: Vec<u32>,
}

impl TableBuilder {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            values: Vec::new(),
            labels: Vec::new(),
        }
    }

    pub fn push(&mut self, embedding: &[f32], label: u32) -> Result<()> {
        if embedding.len() != self.dim {
            return Err(Error::DimensionMismatch {
                expected: self.dim,
                actual: embedding.len(),
            });
        }
        if label == 0 {
            return Err(Error::InvalidLabel {
                row: self.labels.len(),
                value: 0.0,
            });
        }
        self.values.extend(embedding.iter().map(|&v| v as f64));
        self.labels.push(label);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn finish(self) -> Result<FeatureTable> {
        let rows = self.labels.len();
        let features = Array2::from_shape_vec((rows, self.dim), self.values)
            .map_err(|_| Error::EmptyTable)?;
        FeatureTable::new(features, self.labels)
    }
}

/// Path of the mirrored-image companion: `x_feat.txt` -> `x_feat_flip.txt`.
pub fn flip_path(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{stem}_flip.{}", ext.to_string_lossy()),
        None => format!("{stem}_flip"),
    };
    path.with_file_name(name)
}

/// Load a table and its flipped companion, checking they line up.
pub fn load_pair(path: &Path, flipped: Option<&Path>) -> Result<(FeatureTable, FeatureTable)> {
    let flipped_path = flipped.map(Path::to_path_buf).unwrap_or_else(|| flip_path(path));
    log::info!("Loading features from {}", path.display());
    let normal = FeatureTable::load(path)?;
    log::info!("Loading flipped features from {}", flipped_path.display());
    let flipped = FeatureTable::load(&flipped_path)?;
    normal.check_companion(&flipped)?;
    log::info!(
        "Loaded {} rows, {} dims, {} subjects",
        normal.len(),
        normal.dim(),
        normal.classes().len()
    );
    Ok((normal, flipped))
}
