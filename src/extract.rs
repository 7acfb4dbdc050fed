//! Dataset walking and embedding extraction.
//!
//! A dataset is a directory with one subdirectory per subject. Subjects are
//! labelled 1..=n in case-insensitive name order; every image is embedded as
//! is and mirrored, producing two tables that line up row for row.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use faceauth_vision::FaceEmbedder;
use walkdir::WalkDir;

use crate::table::{flip_path, FeatureTable, TableBuilder, TableFormat};

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "gif", "tif", "tiff", "pgm", "ppm", "webp"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject {
    pub name: String,
    pub label: u32,
    pub images: Vec<PathBuf>,
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.iter().any(|x| e.eq_ignore_ascii_case(x)))
        .unwrap_or(false)
}

fn images_in(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut images = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = entry.with_context(|| format!("listing {}", dir.display()))?;
        if entry.file_type().is_file() && is_image(entry.path()) {
            images.push(entry.into_path());
        }
    }
    Ok(images)
}

pub fn list_subjects(dataset_dir: &Path) -> Result<Vec<Subject>> {
    if !dataset_dir.is_dir() {
        anyhow::bail!("dataset directory not found: {}", dataset_dir.display());
    }

    let mut dirs = Vec::new();
    for entry in WalkDir::new(dataset_dir).min_depth(1).max_depth(1) {
        let entry = entry.with_context(|| format!("listing {}", dataset_dir.display()))?;
        if entry.file_type().is_dir() {
            let name = entry.file_name().to_string_lossy().into_owned();
            dirs.push((name, entry.into_path()));
        }
    }
    dirs.sort_by(|(a, _), (b, _)| a.to_lowercase().cmp(&b.to_lowercase()).then_with(|| a.cmp(b)));

    dirs.into_iter()
        .enumerate()
        .map(|(i, (name, path))| {
            Ok(Subject {
                name,
                label: i as u32 + 1,
                images: images_in(&path)?,
            })
        })
        .collect()
}

pub struct ExtractedTables {
    pub normal: FeatureTable,
    pub flipped: FeatureTable,
}

impl ExtractedTables {
    pub fn save(&self, path: &Path) -> Result<PathBuf> {
        let flipped = flip_path(path);
        self.normal
            .save(path)
            .with_context(|| format!("writing {}", path.display()))?;
        self.flipped
            .save(&flipped)
            .with_context(|| format!("writing {}", flipped.display()))?;
        Ok(flipped)
    }
}

/// Embed every image of the dataset and its horizontal mirror.
pub fn extract_dataset<E: FaceEmbedder>(
    embedder: &mut E,
    dataset_dir: &Path,
    align: bool,
) -> Result<ExtractedTables> {
    let subjects = list_subjects(dataset_dir)?;
    log::info!(
        "Found {} subjects in {}",
        subjects.len(),
        dataset_dir.display()
    );

    let mut normal = TableBuilder::new(embedder.dim());
    let mut flipped = TableBuilder::new(embedder.dim());
    for subject in &subjects {
        log::info!(
            "Subject {} ({}): {} images",
            subject.label,
            subject.name,
            subject.images.len()
        );
        for path in &subject.images {
            let img = image::open(path).with_context(|| format!("decoding {}", path.display()))?;
            let mirrored = img.fliph();

            let row = embedder
                .embed(&img, align)
                .with_context(|| format!("embedding {}", path.display()))?;
            normal.push(&row, subject.label)?;
            let row = embedder
                .embed(&mirrored, align)
                .with_context(|| format!("embedding flipped {}", path.display()))?;
            flipped.push(&row, subject.label)?;
        }
    }

    if normal.is_empty() {
        anyhow::bail!("no images found under {}", dataset_dir.display());
    }
    log::info!("Extracted {} rows", normal.len());
    Ok(ExtractedTables {
        normal: normal.finish()?,
        flipped: flipped.finish()?,
    })
}

/// `<data_dir>/<dataset>_<method>_feat.<ext>`; the flipped table sits next to it.
pub fn output_path(data_dir: &Path, dataset: &str, method: &str, format: TableFormat) -> PathBuf {
    data_dir.join(format!("{dataset}_{method}_feat.{}", format.extension()))
}
