//! YuNet face detection, used to find landmarks for alignment.
//!
//! The model takes a 640x640 BGR planar image and emits twelve tensors: for
//! strides 8, 16 and 32 in turn, the class scores, then the objectness scores,
//! then the box regressions (4 values), then the landmark regressions (10
//! values). Scores are already sigmoid-activated.

use std::path::Path;

use anyhow::Result;
use image::{DynamicImage, GenericImageView};
use ndarray::Array4;
use ort::{session::Session, value::Value};

use crate::model::{load_session, Device};

pub const DETECTOR_MODEL_FILE: &str = "face_detection_yunet_2023mar.onnx";

const INPUT_SIZE: u32 = 640;
const STRIDES: [usize; 3] = [8, 16, 32];

#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub bbox: [f32; 4], // x, y, w, h
    pub score: f32,
    /// Eyes, nose tip and mouth corners, in image pixels.
    pub landmarks: [[f32; 2]; 5],
}

pub struct Detector {
    session: Session,
    score_threshold: f32,
    nms_threshold: f32,
}

impl Detector {
    pub fn load(path: &Path, device: Device, score_threshold: f32) -> Result<Self> {
        Ok(Self {
            session: load_session(path, device)?,
            score_threshold,
            nms_threshold: 0.3,
        })
    }

    pub fn detect(&mut self, img: &DynamicImage) -> Result<Vec<Detection>> {
        let (tensor, frame) = letterbox(img);
        let outputs = self.session.run(ort::inputs![Value::from_array(tensor)?])?;

        let mut raw = Vec::with_capacity(outputs.len());
        for (_name, output) in outputs.iter() {
            let (shape, data) = output.try_extract_tensor::<f32>()?;
            raw.push((shape.iter().copied().collect::<Vec<i64>>(), data.to_vec()));
        }

        let found = decode(&raw, INPUT_SIZE as usize, self.score_threshold)?;
        let kept = nms(found, self.nms_threshold);
        Ok(kept.into_iter().map(|d| frame.restore(d)).collect())
    }

    /// Highest-scoring face, if any.
    pub fn best(&mut self, img: &DynamicImage) -> Result<Option<Detection>> {
        Ok(self
            .detect(img)?
            .into_iter()
            .max_by(|a, b| a.score.total_cmp(&b.score)))
    }
}

/// Scale and padding applied when fitting an image into the square input.
#[derive(Debug, Clone, Copy)]
struct Frame {
    scale: f32,
    offset_x: f32,
    offset_y: f32,
}

impl Frame {
    fn restore(&self, mut d: Detection) -> Detection {
        d.bbox[0] = (d.bbox[0] - self.offset_x) / self.scale;
        d.bbox[1] = (d.bbox[1] - self.offset_y) / self.scale;
        d.bbox[2] /= self.scale;
        d.bbox[3] /= self.scale;
        for p in &mut d.landmarks {
            p[0] = (p[0] - self.offset_x) / self.scale;
            p[1] = (p[1] - self.offset_y) / self.scale;
        }
        d
    }
}

fn letterbox(img: &DynamicImage) -> (Array4<f32>, Frame) {
    let (w, h) = img.dimensions();
    let scale = INPUT_SIZE as f32 / w.max(h).max(1) as f32;
    let (nw, nh) = (
        ((w as f32 * scale) as u32).max(1),
        ((h as f32 * scale) as u32).max(1),
    );
    let resized = img
        .resize_exact(nw, nh, image::imageops::FilterType::Triangle)
        .to_rgb8();
    let (ox, oy) = ((INPUT_SIZE - nw) / 2, (INPUT_SIZE - nh) / 2);

    let size = INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, p) in resized.enumerate_pixels() {
        let (tx, ty) = ((x + ox) as usize, (y + oy) as usize);
        // BGR planes
        tensor[[0, 0, ty, tx]] = p[2] as f32;
        tensor[[0, 1, ty, tx]] = p[1] as f32;
        tensor[[0, 2, ty, tx]] = p[0] as f32;
    }

    (
        tensor,
        Frame {
            scale,
            offset_x: ox as f32,
            offset_y: oy as f32,
        },
    )
}

/// Decode raw outputs into detections in input-pixel coordinates.
pub fn decode(
    outputs: &[(Vec<i64>, Vec<f32>)],
    input_size: usize,
    score_threshold: f32,
) -> Result<Vec<Detection>> {
    if outputs.len() < 4 * STRIDES.len() {
        anyhow::bail!(
            "expected {} detector outputs, got {}",
            4 * STRIDES.len(),
            outputs.len()
        );
    }

    let mut detections = Vec::new();
    for (s, &stride) in STRIDES.iter().enumerate() {
        let cols = input_size / stride;
        let cells = cols * cols;
        let cls = tensor_rows(&outputs[s], cells, 1)?;
        let obj = tensor_rows(&outputs[s + 3], cells, 1)?;
        let bbox = tensor_rows(&outputs[s + 6], cells, 4)?;
        let kps = tensor_rows(&outputs[s + 9], cells, 10)?;

        let step = stride as f32;
        for idx in 0..cells {
            let score = (cls[idx].clamp(0.0, 1.0) * obj[idx].clamp(0.0, 1.0)).sqrt();
            if score < score_threshold {
                continue;
            }
            let (r, c) = ((idx / cols) as f32, (idx % cols) as f32);
            let b = &bbox[idx * 4..idx * 4 + 4];
            let cx = (c + b[0]) * step;
            let cy = (r + b[1]) * step;
            let w = b[2].exp() * step;
            let h = b[3].exp() * step;

            let k = &kps[idx * 10..idx * 10 + 10];
            let mut landmarks = [[0.0f32; 2]; 5];
            for (i, p) in landmarks.iter_mut().enumerate() {
                *p = [(k[i * 2] + c) * step, (k[i * 2 + 1] + r) * step];
            }

            detections.push(Detection {
                bbox: [cx - w / 2.0, cy - h / 2.0, w, h],
                score,
                landmarks,
            });
        }
    }
    Ok(detections)
}

fn tensor_rows<'a>(output: &'a (Vec<i64>, Vec<f32>), rows: usize, cols: usize) -> Result<&'a [f32]> {
    let (shape, data) = output;
    if data.len() != rows * cols {
        anyhow::bail!(
            "detector output {:?} does not hold {} x {} values",
            shape,
            rows,
            cols
        );
    }
    Ok(data)
}

/// Greedy non-maximum suppression, highest score first.
pub fn nms(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut keep: Vec<Detection> = Vec::new();
    for d in detections {
        if keep.iter().all(|k| iou(&k.bbox, &d.bbox) <= iou_threshold) {
            keep.push(d);
        }
    }
    keep
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = (a[0] + a[2]).min(b[0] + b[2]);
    let y2 = (a[1] + a[3]).min(b[1] + b[3]);
    if x2 <= x1 || y2 <= y1 {
        return 0.0;
    }
    let inter = (x2 - x1) * (y2 - y1);
    inter / (a[2] * a[3] + b[2] * b[3] - inter)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_outputs(input_size: usize) -> Vec<(Vec<i64>, Vec<f32>)> {
        let mut outputs = Vec::new();
        for width in [1usize, 1, 4, 10] {
            for stride in STRIDES {
                let cells = (input_size / stride).pow(2);
                outputs.push((
                    vec![1, cells as i64, width as i64],
                    vec![0.0; cells * width],
                ));
            }
        }
        outputs
    }

    #[test]
    fn decodes_a_single_cell() {
        let input_size = 64;
        let mut outputs = empty_outputs(input_size);
        // stride 32 grid is 2x2; light up row 1, column 0
        let idx = 2;
        outputs[2].1[idx] = 0.81;
        outputs[5].1[idx] = 1.0;
        outputs[8].1[idx * 4..idx * 4 + 4].copy_from_slice(&[0.5, 0.25, 0.0, 0.0]);
        outputs[11].1[idx * 10] = 0.5;
        outputs[11].1[idx * 10 + 1] = 0.5;

        let found = decode(&outputs, input_size, 0.5).unwrap();
        assert_eq!(found.len(), 1);
        let d = &found[0];
        assert!((d.score - 0.9).abs() < 1e-6);
        // centre (0.5 * 32, 1.25 * 32), size exp(0) * 32
        assert!((d.bbox[0] - 0.0).abs() < 1e-4);
        assert!((d.bbox[1] - 24.0).abs() < 1e-4);
        assert!((d.bbox[2] - 32.0).abs() < 1e-4);
        assert_eq!(d.landmarks[0], [16.0, 48.0]);
    }

    #[test]
    fn short_outputs_are_rejected() {
        let outputs = empty_outputs(64);
        assert!(decode(&outputs[..11], 64, 0.5).is_err());
    }

    #[test]
    fn nms_drops_overlapping_boxes() {
        let det = |x: f32, score: f32| Detection {
            bbox: [x, x, 20.0, 20.0],
            score,
            landmarks: [[0.0; 2]; 5],
        };
        let kept = nms(vec![det(10.0, 0.8), det(12.0, 0.9), det(100.0, 0.85)], 0.3);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].score, 0.9);
        assert_eq!(kept[1].score, 0.85);
    }

    #[test]
    fn frame_restores_original_coordinates() {
        let frame = Frame {
            scale: 2.0,
            offset_x: 0.0,
            offset_y: 80.0,
        };
        let d = frame.restore(Detection {
            bbox: [20.0, 100.0, 40.0, 40.0],
            score: 1.0,
            landmarks: [[40.0, 120.0]; 5],
        });
        assert_eq!(d.bbox, [10.0, 10.0, 20.0, 20.0]);
        assert_eq!(d.landmarks[0], [20.0, 20.0]);
    }
}
