use anyhow::{Context, Result};
use directories::ProjectDirs;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::folds::SparseClassPolicy;
use crate::svm::SvmParams;
use crate::table::TableFormat;

pub static CONFIG_PATH: Lazy<PathBuf> = Lazy::new(|| {
    std::env::var_os("FACEAUTH_CONFIG")
        .map(PathBuf::from)
        .or_else(|| {
            ProjectDirs::from("", "", "faceauth").map(|dirs| dirs.config_dir().join("config.toml"))
        })
        .unwrap_or_else(|| PathBuf::from("faceauth.toml"))
});

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub evaluation: EvaluationConfig,
    pub extraction: ExtractionConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Authentication,
    Recognition,
}

impl std::str::FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "authentication" | "auth" => Ok(Mode::Authentication),
            "recognition" | "recog" => Ok(Mode::Recognition),
            other => Err(format!(
                "unknown mode `{other}` (expected authentication or recognition)"
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    pub folds: usize,
    /// Classifiers trained or tested at once.
    pub batch_size: usize,
    /// Fixed seed for fold shuffling; a random one is drawn and logged if unset.
    pub seed: Option<u64>,
    /// Highest FAR accepted at the reported operating point.
    pub far_target: f64,
    pub sparse_classes: SparseClassPolicy,
    pub mode: Mode,
    pub svm: SvmParams,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            folds: 5,
            batch_size: 10,
            seed: None,
            far_target: 0.001,
            sparse_classes: SparseClassPolicy::Fail,
            mode: Mode::Authentication,
            svm: SvmParams::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Parent of the per-dataset image directories.
    pub images_root: PathBuf,
    pub data_dir: PathBuf,
    pub model_dir: PathBuf,
    pub align: bool,
    pub detector_threshold: f32,
    pub format: TableFormat,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            images_root: PathBuf::from("images"),
            data_dir: PathBuf::from("data"),
            model_dir: PathBuf::from("models"),
            align: true,
            detector_threshold: 0.6,
            format: TableFormat::Txt,
        }
    }
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path.unwrap_or(&CONFIG_PATH);
    if !path.exists() {
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config at {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
}

pub fn save_config(cfg: &Config, path: Option<&Path>) -> Result<()> {
    let path = path.unwrap_or(&CONFIG_PATH);
    let data = toml::to_string_pretty(cfg)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, data)?;
    Ok(())
}
