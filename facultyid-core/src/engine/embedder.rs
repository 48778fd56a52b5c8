use image::RgbImage;
use ndarray::Array1;
use ort::session::Session;
use ort::value::Value;
use std::path::Path;

use super::align::ALIGNED_SIZE;
use super::session::load_session;
use super::EngineError;

/// L2-normalised face embedding
pub type Embedding = Array1<f32>;

const PIXEL_MEAN: f32 = 127.5;
const PIXEL_STD: f32 = 127.5;

pub struct ArcFaceEmbedder {
    session: Session,
    dimension: usize,
}

impl ArcFaceEmbedder {
    pub fn new(model_path: &Path, dimension: usize) -> Result<Self, EngineError> {
        let session = load_session(model_path)?;
        Ok(Self { session, dimension })
    }

    /// Embed an aligned 112x112 face crop
    pub fn embed(&mut self, aligned: &RgbImage) -> Result<Embedding, EngineError> {
        if aligned.dimensions() != (ALIGNED_SIZE, ALIGNED_SIZE) {
            return Err(EngineError::Embedding(format!(
                "Aligned face must be {0}x{0}, got {1}x{2}",
                ALIGNED_SIZE,
                aligned.width(),
                aligned.height()
            )));
        }

        let input_value = Value::from_array(to_tensor(aligned))
            .map_err(|e| EngineError::Embedding(format!("Failed to create input tensor: {}", e)))?;

        let outputs = self
            .session
            .run(ort::inputs![input_value])
            .map_err(|e| EngineError::Embedding(e.to_string()))?;

        let (_, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EngineError::Embedding(format!("Failed to extract embedding: {}", e)))?;

        if data.len() < self.dimension {
            return Err(EngineError::Embedding(format!(
                "Expected a {}-dimensional embedding, got {} values",
                self.dimension,
                data.len()
            )));
        }

        Ok(normalize(Array1::from(data[..self.dimension].to_vec())))
    }
}

fn to_tensor(image: &RgbImage) -> ([usize; 4], Vec<f32>) {
    let size = ALIGNED_SIZE as usize;
    let plane = size * size;
    let mut data = vec![0.0f32; plane * 3];

    for (i, pixel) in image.pixels().enumerate() {
        for c in 0..3 {
            data[c * plane + i] = (pixel[c] as f32 - PIXEL_MEAN) / PIXEL_STD;
        }
    }

    ([1, 3, size, size], data)
}

pub fn normalize(mut embedding: Embedding) -> Embedding {
    let norm = embedding.dot(&embedding).sqrt();
    if norm > 0.0 {
        embedding /= norm;
    }
    embedding
}

/// Cosine distance between two normalised embeddings, in `[0, 2]`
pub fn cosine_distance(a: &Embedding, b: &Embedding) -> f32 {
    1.0 - a.dot(b)
}
