//! ONNX face embedding models.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use image::DynamicImage;
use ndarray::Array4;
use ort::{session::Session, value::Value};

use crate::align::{align_face, resize_face};
use crate::detect::{Detector, DETECTOR_MODEL_FILE};
use crate::model::{load_session, Device};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingMethod {
    ArcFace,
    FaceNet,
}

impl EmbeddingMethod {
    pub fn name(&self) -> &'static str {
        match self {
            EmbeddingMethod::ArcFace => "arcface",
            EmbeddingMethod::FaceNet => "facenet",
        }
    }

    /// Side of the square input crop.
    pub fn input_size(&self) -> u32 {
        match self {
            EmbeddingMethod::ArcFace => 112,
            EmbeddingMethod::FaceNet => 160,
        }
    }

    pub fn dim(&self) -> usize {
        512
    }

    pub fn model_file(&self) -> &'static str {
        match self {
            EmbeddingMethod::ArcFace => "arcface.onnx",
            EmbeddingMethod::FaceNet => "facenet.onnx",
        }
    }

    /// Model input tensor for an already cropped `input_size` square face.
    pub fn tensor(&self, face: &DynamicImage) -> Array4<f32> {
        let rgb = face.to_rgb8();
        let (w, h) = (rgb.width() as usize, rgb.height() as usize);
        match self {
            EmbeddingMethod::ArcFace => {
                let mut t = Array4::<f32>::zeros((1, 3, h, w));
                for (x, y, p) in rgb.enumerate_pixels() {
                    for c in 0..3 {
                        t[[0, c, y as usize, x as usize]] = (p[c] as f32 - 127.5) / 127.5;
                    }
                }
                t
            }
            EmbeddingMethod::FaceNet => {
                let mut t = Array4::<f32>::zeros((1, h, w, 3));
                for (x, y, p) in rgb.enumerate_pixels() {
                    for c in 0..3 {
                        t[[0, y as usize, x as usize, c]] = p[c] as f32;
                    }
                }
                prewhiten(&mut t);
                t
            }
        }
    }
}

impl FromStr for EmbeddingMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "arcface" => Ok(EmbeddingMethod::ArcFace),
            "facenet" => Ok(EmbeddingMethod::FaceNet),
            other => Err(format!(
                "unknown embedding method `{other}` (expected arcface or facenet)"
            )),
        }
    }
}

impl fmt::Display for EmbeddingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Zero mean, unit variance over the whole image. The deviation is floored at
/// `1 / sqrt(n)` so flat images stay finite.
fn prewhiten(t: &mut Array4<f32>) {
    let n = t.len() as f32;
    if n == 0.0 {
        return;
    }
    let mean = t.sum() / n;
    let var = t.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n;
    let std = var.sqrt().max(1.0 / n.sqrt());
    t.mapv_inplace(|v| (v - mean) / std);
}

pub fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
}

/// Turns a face image into a fixed-length feature vector.
pub trait FaceEmbedder {
    fn dim(&self) -> usize;

    fn embed(&mut self, img: &DynamicImage, align: bool) -> Result<Vec<f32>>;
}

pub struct OnnxEmbedder {
    method: EmbeddingMethod,
    session: Session,
    detector: Option<Detector>,
}

impl OnnxEmbedder {
    /// Load `<model_dir>/<method model file>`, plus the YuNet detector when a
    /// detection threshold is given.
    pub fn load(
        method: EmbeddingMethod,
        model_dir: &Path,
        device: Device,
        detector_threshold: Option<f32>,
    ) -> Result<Self> {
        let session = load_session(&model_dir.join(method.model_file()), device)
            .with_context(|| format!("loading {} embedding model", method))?;
        let detector = detector_threshold
            .map(|t| Detector::load(&model_dir.join(DETECTOR_MODEL_FILE), device, t))
            .transpose()
            .context("loading face detector")?;
        Ok(Self {
            method,
            session,
            detector,
        })
    }

    fn crop(&mut self, img: &DynamicImage, align: bool) -> Result<DynamicImage> {
        let size = self.method.input_size();
        if !align {
            return Ok(resize_face(img, size));
        }
        let detector = self
            .detector
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("alignment requested but no face detector loaded"))?;
        match detector.best(img)? {
            Some(face) => align_face(img, &face.landmarks, size),
            None => {
                log::warn!("no face detected, using the resized image");
                Ok(resize_face(img, size))
            }
        }
    }
}

impl FaceEmbedder for OnnxEmbedder {
    fn dim(&self) -> usize {
        self.method.dim()
    }

    fn embed(&mut self, img: &DynamicImage, align: bool) -> Result<Vec<f32>> {
        let face = self.crop(img, align)?;
        let dim = self.method.dim();
        let input = Value::from_array(self.method.tensor(&face))?;
        let outputs = self.session.run(ort::inputs![input])?;
        let (_shape, data) = outputs[0].try_extract_tensor::<f32>()?;

        if data.len() != dim {
            anyhow::bail!(
                "{} model produced {} values, expected {}",
                self.method,
                data.len(),
                dim
            );
        }
        let mut embedding = data.to_vec();
        l2_normalize(&mut embedding);
        Ok(embedding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn solid(size: u32, rgb: [u8; 3]) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(size, size, Rgb(rgb)))
    }

    #[test]
    fn method_names_parse() {
        assert_eq!("ArcFace".parse::<EmbeddingMethod>(), Ok(EmbeddingMethod::ArcFace));
        assert_eq!("facenet".parse::<EmbeddingMethod>(), Ok(EmbeddingMethod::FaceNet));
        assert!("vgg".parse::<EmbeddingMethod>().is_err());
        assert_eq!(EmbeddingMethod::FaceNet.to_string(), "facenet");
    }

    #[test]
    fn arcface_tensor_is_nchw_and_centred() {
        let t = EmbeddingMethod::ArcFace.tensor(&solid(112, [255, 0, 127]));
        assert_eq!(t.shape(), &[1, 3, 112, 112]);
        assert_eq!(t[[0, 0, 5, 5]], 1.0);
        assert_eq!(t[[0, 1, 5, 5]], -1.0);
        assert!(t[[0, 2, 5, 5]].abs() < 0.01);
    }

    #[test]
    fn facenet_tensor_is_nhwc_and_whitened() {
        let mut img = RgbImage::new(160, 160);
        for (x, _, p) in img.enumerate_pixels_mut() {
            *p = Rgb([x as u8, 50, 200]);
        }
        let t = EmbeddingMethod::FaceNet.tensor(&DynamicImage::ImageRgb8(img));
        assert_eq!(t.shape(), &[1, 160, 160, 3]);
        let n = t.len() as f32;
        let mean = t.sum() / n;
        let var = t.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n;
        assert!(mean.abs() < 1e-3);
        assert!((var - 1.0).abs() < 1e-2);
    }

    #[test]
    fn flat_image_prewhitens_to_zero() {
        let t = EmbeddingMethod::FaceNet.tensor(&solid(160, [9, 9, 9]));
        assert!(t.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn normalize_gives_unit_length() {
        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v);
        assert_eq!(v, vec![0.6, 0.8]);

        let mut zero = vec![0.0; 3];
        l2_normalize(&mut zero);
        assert_eq!(zero, vec![0.0; 3]);
    }
}
