//! Five-point similarity alignment onto the ArcFace reference landmarks.

use anyhow::Result;
use image::{DynamicImage, GenericImageView, Rgb, RgbImage};

/// Left eye, right eye, nose tip, left and right mouth corners in a 112x112 crop.
pub const REFERENCE_LANDMARKS: [[f32; 2]; 5] = [
    [38.2946, 51.6963],
    [73.5318, 51.5014],
    [56.0252, 71.7366],
    [41.5493, 92.3655],
    [70.7299, 92.2041],
];

/// Reference landmarks scaled to a `size` x `size` crop.
pub fn reference_landmarks(size: u32) -> [[f32; 2]; 5] {
    let s = size as f32 / 112.0;
    REFERENCE_LANDMARKS.map(|[x, y]| [x * s, y * s])
}

/// `p' = [[a, -b], [b, a]] p + t`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Similarity {
    pub a: f32,
    pub b: f32,
    pub tx: f32,
    pub ty: f32,
}

impl Similarity {
    /// Least-squares similarity mapping `src` onto `dst`.
    pub fn estimate(src: &[[f32; 2]], dst: &[[f32; 2]]) -> Option<Self> {
        if src.len() != dst.len() || src.len() < 2 {
            return None;
        }
        let n = src.len() as f32;
        let mean = |pts: &[[f32; 2]]| {
            let (sx, sy) = pts.iter().fold((0.0, 0.0), |(x, y), p| (x + p[0], y + p[1]));
            [sx / n, sy / n]
        };
        let ms = mean(src);
        let md = mean(dst);

        let (mut dot, mut cross, mut norm) = (0.0, 0.0, 0.0);
        for (s, d) in src.iter().zip(dst) {
            let (sx, sy) = (s[0] - ms[0], s[1] - ms[1]);
            let (dx, dy) = (d[0] - md[0], d[1] - md[1]);
            dot += sx * dx + sy * dy;
            cross += sx * dy - sy * dx;
            norm += sx * sx + sy * sy;
        }
        if norm <= f32::EPSILON {
            return None;
        }

        let a = dot / norm;
        let b = cross / norm;
        Some(Self {
            a,
            b,
            tx: md[0] - (a * ms[0] - b * ms[1]),
            ty: md[1] - (b * ms[0] + a * ms[1]),
        })
    }

    pub fn apply(&self, p: [f32; 2]) -> [f32; 2] {
        [
            self.a * p[0] - self.b * p[1] + self.tx,
            self.b * p[0] + self.a * p[1] + self.ty,
        ]
    }

    pub fn inverse(&self) -> Option<Self> {
        let k = self.a * self.a + self.b * self.b;
        if k <= f32::EPSILON {
            return None;
        }
        let (a, b) = (self.a / k, -self.b / k);
        Some(Self {
            a,
            b,
            tx: -(a * self.tx - b * self.ty),
            ty: -(b * self.tx + a * self.ty),
        })
    }
}

/// Warp `img` so that `landmarks` land on the reference positions of a
/// `size` x `size` crop. Pixels mapped from outside the image stay black.
pub fn align_face(img: &DynamicImage, landmarks: &[[f32; 2]; 5], size: u32) -> Result<DynamicImage> {
    let to_crop = Similarity::estimate(landmarks, &reference_landmarks(size))
        .ok_or_else(|| anyhow::anyhow!("degenerate landmarks {:?}", landmarks))?;
    let to_image = to_crop
        .inverse()
        .ok_or_else(|| anyhow::anyhow!("alignment transform is not invertible"))?;

    let src = img.to_rgb8();
    let mut out = RgbImage::new(size, size);
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        let [sx, sy] = to_image.apply([x as f32, y as f32]);
        if let Some(rgb) = sample_bilinear(&src, sx, sy) {
            *pixel = rgb;
        }
    }
    Ok(DynamicImage::ImageRgb8(out))
}

fn sample_bilinear(img: &RgbImage, x: f32, y: f32) -> Option<Rgb<u8>> {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 || x < 0.0 || y < 0.0 || x > (w - 1) as f32 || y > (h - 1) as f32 {
        return None;
    }
    let (x0, y0) = (x.floor() as u32, y.floor() as u32);
    let (x1, y1) = ((x0 + 1).min(w - 1), (y0 + 1).min(h - 1));
    let (fx, fy) = (x - x0 as f32, y - y0 as f32);

    let weights = [
        ((1.0 - fx) * (1.0 - fy), img.get_pixel(x0, y0)),
        (fx * (1.0 - fy), img.get_pixel(x1, y0)),
        ((1.0 - fx) * fy, img.get_pixel(x0, y1)),
        (fx * fy, img.get_pixel(x1, y1)),
    ];
    let mut rgb = [0.0f32; 3];
    for (wt, p) in weights {
        for c in 0..3 {
            rgb[c] += wt * p[c] as f32;
        }
    }
    Some(Rgb(rgb.map(|v| v.round().clamp(0.0, 255.0) as u8)))
}

/// Plain resize used when no landmarks are available.
pub fn resize_face(img: &DynamicImage, size: u32) -> DynamicImage {
    if img.dimensions() == (size, size) {
        return img.clone();
    }
    img.resize_exact(size, size, image::imageops::FilterType::Triangle)
}
