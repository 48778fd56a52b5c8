use image::{imageops, RgbImage};
use ort::session::Session;
use ort::value::Value;
use std::cmp::Ordering;
use std::path::Path;

use super::session::load_session;
use super::{EngineError, FaceRegion};

/// SCRFD square input edge
const INPUT_SIZE: u32 = 640;

/// Three feature pyramid levels, two anchors per location
const STRIDES: [usize; 3] = [8, 16, 32];
const ANCHORS_PER_CELL: usize = 2;

const NMS_IOU_THRESHOLD: f32 = 0.4;

const PIXEL_MEAN: f32 = 127.5;
const PIXEL_STD: f32 = 128.0;

/// Five facial keypoints: left eye, right eye, nose, left and right mouth corner
pub type Landmarks = [(f32, f32); 5];

#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub landmarks: Landmarks,
    pub score: f32,
}

impl Detection {
    pub fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    pub fn iou(&self, other: &Detection) -> f32 {
        let w = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0);
        let h = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
        let intersection = w * h;
        let union = self.area() + other.area() - intersection;

        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }

    /// Larger, more confident faces first
    fn prominence(&self) -> f32 {
        self.score * self.area().sqrt()
    }

    /// Integer box clamped to the image bounds
    pub fn region(&self, width: u32, height: u32) -> FaceRegion {
        let x1 = self.x1.max(0.0).min(width as f32);
        let y1 = self.y1.max(0.0).min(height as f32);
        let x2 = self.x2.max(0.0).min(width as f32);
        let y2 = self.y2.max(0.0).min(height as f32);

        FaceRegion {
            x: x1.round() as i32,
            y: y1.round() as i32,
            width: (x2 - x1).round().max(1.0) as u32,
            height: (y2 - y1).round().max(1.0) as u32,
        }
    }
}

pub struct ScrfdDetector {
    session: Session,
    confidence_threshold: f32,
}

impl ScrfdDetector {
    pub fn new(model_path: &Path, confidence_threshold: f32) -> Result<Self, EngineError> {
        let session = load_session(model_path)?;
        Ok(Self {
            session,
            confidence_threshold,
        })
    }

    /// Detect faces, most prominent first. An empty vector means no face.
    pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<Detection>, EngineError> {
        let (input, scale) = letterbox(image);

        let input_value = Value::from_array(input)
            .map_err(|e| EngineError::Detection(format!("Failed to create input tensor: {}", e)))?;

        let outputs = self
            .session
            .run(ort::inputs![input_value])
            .map_err(|e| EngineError::Detection(e.to_string()))?;

        // Grouped as all scores, then all boxes, then all keypoints
        if outputs.len() < STRIDES.len() * 3 {
            return Err(EngineError::Detection(format!(
                "Expected {} detector outputs, got {}",
                STRIDES.len() * 3,
                outputs.len()
            )));
        }

        let mut detections = Vec::new();
        for (level, &stride) in STRIDES.iter().enumerate() {
            let (_, scores) = outputs[level]
                .try_extract_tensor::<f32>()
                .map_err(|e| EngineError::Detection(format!("stride {} scores: {}", stride, e)))?;
            let (_, boxes) = outputs[level + STRIDES.len()]
                .try_extract_tensor::<f32>()
                .map_err(|e| EngineError::Detection(format!("stride {} boxes: {}", stride, e)))?;
            let (_, keypoints) = outputs[level + 2 * STRIDES.len()]
                .try_extract_tensor::<f32>()
                .map_err(|e| EngineError::Detection(format!("stride {} keypoints: {}", stride, e)))?;

            decode_level(
                stride,
                scores,
                boxes,
                keypoints,
                self.confidence_threshold,
                &mut detections,
            );
        }

        log::debug!("{} raw detections before NMS", detections.len());

        let mut faces = non_max_suppression(detections, NMS_IOU_THRESHOLD);
        for face in &mut faces {
            face.rescale(1.0 / scale);
        }
        faces.sort_by(|a, b| {
            b.prominence()
                .partial_cmp(&a.prominence())
                .unwrap_or(Ordering::Equal)
        });

        Ok(faces)
    }
}

impl Detection {
    fn rescale(&mut self, factor: f32) {
        self.x1 *= factor;
        self.y1 *= factor;
        self.x2 *= factor;
        self.y2 *= factor;
        for point in &mut self.landmarks {
            point.0 *= factor;
            point.1 *= factor;
        }
    }
}

/// Resize preserving aspect ratio into the top-left of a black square and
/// build an NCHW tensor. Returns the tensor and the applied scale.
fn letterbox(image: &RgbImage) -> (([usize; 4], Vec<f32>), f32) {
    let (width, height) = image.dimensions();
    let scale = (INPUT_SIZE as f32 / width as f32).min(INPUT_SIZE as f32 / height as f32);
    let new_w = ((width as f32 * scale).round() as u32).clamp(1, INPUT_SIZE);
    let new_h = ((height as f32 * scale).round() as u32).clamp(1, INPUT_SIZE);

    let resized = imageops::resize(image, new_w, new_h, imageops::FilterType::Triangle);
    let mut canvas = RgbImage::new(INPUT_SIZE, INPUT_SIZE);
    imageops::replace(&mut canvas, &resized, 0, 0);

    let plane = (INPUT_SIZE * INPUT_SIZE) as usize;
    let mut data = vec![0.0f32; plane * 3];
    for (i, pixel) in canvas.pixels().enumerate() {
        for c in 0..3 {
            data[c * plane + i] = (pixel[c] as f32 - PIXEL_MEAN) / PIXEL_STD;
        }
    }

    let shape = [1, 3, INPUT_SIZE as usize, INPUT_SIZE as usize];
    ((shape, data), scale)
}

/// Decode one pyramid level into detections in letterboxed input coordinates
fn decode_level(
    stride: usize,
    scores: &[f32],
    boxes: &[f32],
    keypoints: &[f32],
    threshold: f32,
    out: &mut Vec<Detection>,
) {
    let cells = INPUT_SIZE as usize / stride;
    let step = stride as f32;

    for idx in 0..cells * cells * ANCHORS_PER_CELL {
        let Some(&score) = scores.get(idx) else {
            break;
        };
        if score < threshold {
            continue;
        }

        let (Some(b), Some(k)) = (
            boxes.get(idx * 4..idx * 4 + 4),
            keypoints.get(idx * 10..idx * 10 + 10),
        ) else {
            continue;
        };

        let cell = idx / ANCHORS_PER_CELL;
        let cx = (cell % cells) as f32 * step;
        let cy = (cell / cells) as f32 * step;

        let mut landmarks = [(0.0, 0.0); 5];
        for (p, point) in landmarks.iter_mut().enumerate() {
            *point = (cx + k[p * 2] * step, cy + k[p * 2 + 1] * step);
        }

        out.push(Detection {
            x1: cx - b[0] * step,
            y1: cy - b[1] * step,
            x2: cx + b[2] * step,
            y2: cy + b[3] * step,
            landmarks,
            score,
        });
    }
}

fn non_max_suppression(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));

    let mut kept: Vec<Detection> = Vec::with_capacity(detections.len());
    for candidate in detections {
        if kept.iter().all(|k| k.iou(&candidate) <= iou_threshold) {
            kept.push(candidate);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(x1: f32, y1: f32, x2: f32, y2: f32, score: f32) -> Detection {
        Detection {
            x1,
            y1,
            x2,
            y2,
            landmarks: [(0.0, 0.0); 5],
            score,
        }
    }

    #[test]
    fn test_iou() {
        let a = det(0.0, 0.0, 10.0, 10.0, 0.9);
        let b = det(5.0, 5.0, 15.0, 15.0, 0.9);
        // 25 / (100 + 100 - 25)
        assert!((a.iou(&b) - 25.0 / 175.0).abs() < 1e-4);
        assert_eq!(a.iou(&det(20.0, 20.0, 30.0, 30.0, 0.5)), 0.0);
    }

    #[test]
    fn test_nms_keeps_best_of_overlapping() {
        let kept = non_max_suppression(
            vec![
                det(1.0, 1.0, 11.0, 11.0, 0.7),
                det(0.0, 0.0, 10.0, 10.0, 0.9),
                det(50.0, 50.0, 60.0, 60.0, 0.6),
            ],
            NMS_IOU_THRESHOLD,
        );

        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].score, 0.9);
        assert_eq!(kept[1].score, 0.6);
    }

    #[test]
    fn test_decode_level_places_anchor() {
        let stride = 32;
        let cells = INPUT_SIZE as usize / stride;
        let count = cells * cells * ANCHORS_PER_CELL;
        let mut scores = vec![0.0; count];
        let mut boxes = vec![0.0; count * 4];
        let keypoints = vec![0.0; count * 10];

        // second anchor of the cell at column 2, row 1
        let idx = (cells + 2) * ANCHORS_PER_CELL + 1;
        scores[idx] = 0.8;
        boxes[idx * 4..idx * 4 + 4].copy_from_slice(&[1.0, 1.0, 2.0, 2.0]);

        let mut out = Vec::new();
        decode_level(stride, &scores, &boxes, &keypoints, 0.5, &mut out);

        assert_eq!(out.len(), 1);
        let d = &out[0];
        assert_eq!((d.x1, d.y1, d.x2, d.y2), (32.0, 0.0, 128.0, 96.0));
        assert_eq!(d.landmarks[2], (64.0, 32.0));
    }

    #[test]
    fn test_letterbox_scale() {
        let image = RgbImage::new(1280, 640);
        let ((shape, data), scale) = letterbox(&image);
        assert_eq!(shape, [1, 3, 640, 640]);
        assert_eq!(data.len(), 3 * 640 * 640);
        assert!((scale - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_region_is_clamped() {
        let region = det(-5.0, 10.0, 50.0, 200.0, 0.9).region(40, 100);
        assert_eq!(region, FaceRegion { x: 0, y: 10, width: 40, height: 90 });
    }
}
