use std::path::{Path, PathBuf};

use anyhow::Result;
use faceauth::extract::{extract_dataset, list_subjects, output_path};
use faceauth::table::{load_pair, TableFormat};
use faceauth::FaceEmbedder;
use image::{DynamicImage, GenericImageView, Rgb, RgbImage};

/// Embeds an image as the red value of its left- and right-most pixels.
struct EdgeEmbedder {
    calls: usize,
}

impl FaceEmbedder for EdgeEmbedder {
    fn dim(&self) -> usize {
        2
    }

    fn embed(&mut self, img: &DynamicImage, _align: bool) -> Result<Vec<f32>> {
        self.calls += 1;
        let (w, _) = img.dimensions();
        Ok(vec![
            img.get_pixel(0, 0)[0] as f32,
            img.get_pixel(w - 1, 0)[0] as f32,
        ])
    }
}

fn temp_dataset() -> PathBuf {
    let root = std::env::temp_dir().join(format!("faceauth-ds-{}", uuid::Uuid::new_v4()));
    let write = |subject: &str, file: &str, left: u8| {
        let dir = root.join(subject);
        std::fs::create_dir_all(&dir).unwrap();
        let mut img = RgbImage::from_pixel(4, 4, Rgb([0, 0, 0]));
        for y in 0..4 {
            img.put_pixel(0, y, Rgb([left, 0, 0]));
        }
        img.save(dir.join(file)).unwrap();
    };
    write("bob", "b.png", 20);
    write("bob", "a.png", 10);
    write("Alice", "1.png", 30);
    write("carol", "x.png", 40);
    std::fs::write(root.join("carol").join("notes.txt"), "not an image").unwrap();
    root
}

fn cleanup(root: &Path) {
    std::fs::remove_dir_all(root).ok();
}

#[test]
fn subjects_are_sorted_case_insensitively() {
    let root = temp_dataset();
    let subjects = list_subjects(&root).unwrap();
    let names: Vec<_> = subjects.iter().map(|s| (s.name.as_str(), s.label)).collect();
    assert_eq!(names, vec![("Alice", 1), ("bob", 2), ("carol", 3)]);
    let bob: Vec<_> = subjects[1]
        .images
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(bob, vec!["a.png", "b.png"]);
    assert_eq!(subjects[2].images.len(), 1);
    cleanup(&root);
}

#[test]
fn extraction_writes_normal_and_mirrored_tables() {
    let root = temp_dataset();
    let mut embedder = EdgeEmbedder { calls: 0 };
    let tables = extract_dataset(&mut embedder, &root, false).unwrap();
    assert_eq!(embedder.calls, 8);

    assert_eq!(tables.normal.labels(), &[1, 2, 2, 3]);
    assert_eq!(tables.flipped.labels(), tables.normal.labels());
    // bob/a.png has its marked column on the left, the mirror on the right
    assert_eq!(tables.normal.features().row(1).to_vec(), vec![10.0, 0.0]);
    assert_eq!(tables.flipped.features().row(1).to_vec(), vec![0.0, 10.0]);

    let out = root.join("data");
    let path = output_path(&out, "toy", "edge", TableFormat::Bin);
    tables.save(&path).unwrap();
    let (normal, flipped) = load_pair(&path, None).unwrap();
    assert_eq!(normal, tables.normal);
    assert_eq!(flipped, tables.flipped);
    cleanup(&root);
}

#[test]
fn missing_dataset_is_an_error() {
    let mut embedder = EdgeEmbedder { calls: 0 };
    let missing = std::env::temp_dir().join(format!("faceauth-missing-{}", uuid::Uuid::new_v4()));
    assert!(extract_dataset(&mut embedder, &missing, false).is_err());
}
