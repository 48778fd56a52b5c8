use image::{Rgb, RgbImage};
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};

use super::detector::Landmarks;
use super::EngineError;

/// Edge of the aligned crop fed to the recognition model
pub const ALIGNED_SIZE: u32 = 112;

/// Reference keypoint positions in a 112x112 ArcFace crop
const REFERENCE_LANDMARKS: Landmarks = [
    (38.2946, 51.6963),
    (73.5318, 51.5014),
    (56.0252, 71.7366),
    (41.5493, 92.3655),
    (70.7299, 92.2041),
];

/// Warp a detected face onto the canonical 112x112 crop
pub fn align_face(image: &RgbImage, landmarks: &Landmarks) -> Result<RgbImage, EngineError> {
    let [a, b, tx, ty] = similarity_transform(landmarks, &REFERENCE_LANDMARKS)
        .ok_or_else(|| EngineError::Embedding("Degenerate facial landmarks".to_string()))?;

    let projection = Projection::from_matrix([a, -b, tx, b, a, ty, 0.0, 0.0, 1.0])
        .ok_or_else(|| EngineError::Embedding("Singular alignment transform".to_string()))?;

    let mut aligned = RgbImage::new(ALIGNED_SIZE, ALIGNED_SIZE);
    warp_into(
        image,
        &projection,
        Interpolation::Bilinear,
        Rgb([0, 0, 0]),
        &mut aligned,
    );
    Ok(aligned)
}

/// Least-squares similarity transform mapping `src` onto `dst`.
///
/// Returns `[a, b, tx, ty]` for `u = a*x - b*y + tx`, `v = b*x + a*y + ty`.
fn similarity_transform(src: &Landmarks, dst: &Landmarks) -> Option<[f32; 4]> {
    let n = src.len() as f32;
    let (sx, sy) = src.iter().fold((0.0, 0.0), |acc, p| (acc.0 + p.0, acc.1 + p.1));
    let (dx, dy) = dst.iter().fold((0.0, 0.0), |acc, p| (acc.0 + p.0, acc.1 + p.1));
    let (mx, my) = (sx / n, sy / n);
    let (mu, mv) = (dx / n, dy / n);

    let mut norm = 0.0;
    let mut dot = 0.0;
    let mut cross = 0.0;
    for (s, d) in src.iter().zip(dst.iter()) {
        let (x, y) = (s.0 - mx, s.1 - my);
        let (u, v) = (d.0 - mu, d.1 - mv);
        norm += x * x + y * y;
        dot += x * u + y * v;
        cross += x * v - y * u;
    }

    if norm < 1e-6 {
        return None;
    }

    let a = dot / norm;
    let b = cross / norm;
    let tx = mu - a * mx + b * my;
    let ty = mv - b * mx - a * my;
    Some([a, b, tx, ty])
}
