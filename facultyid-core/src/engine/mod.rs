//! Face recognition engine.
//!
//! The pipeline talks to the engine only through [`RecognitionEngine`]:
//! pixels and a reference directory in, ranked candidate rows out.
//! [`OnnxEngine`] is the bundled implementation (SCRFD detection, ArcFace
//! embeddings, cosine search over a cached gallery index).

pub mod align;
pub mod detector;
pub mod embedder;
pub mod gallery;
mod session;

use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::EngineConfig;
use detector::{Detection, ScrfdDetector};
use embedder::{ArcFaceEmbedder, Embedding};
use gallery::Gallery;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("No face detected in the image")]
    NoFaceDetected,
    #[error("Model file not found: {0}")]
    ModelNotFound(PathBuf),
    #[error("Failed to create session: {0}")]
    Session(String),
    #[error("Detection failed: {0}")]
    Detection(String),
    #[error("Embedding failed: {0}")]
    Embedding(String),
    #[error("Gallery error: {0}")]
    Gallery(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Whether a query image without a detectable face is a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enforcement {
    /// No face is [`EngineError::NoFaceDetected`] (interactive requests)
    Required,
    /// No face yields zero candidates (live video)
    Relaxed,
}

/// Face bounding box in source-image pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FaceRegion {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// One ranked row returned by an engine
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    /// Reference image that matched
    pub identity: PathBuf,
    /// Cosine distance, smaller is closer
    pub distance: f32,
    /// Where the matched face sits in the query image
    pub region: FaceRegion,
}

pub trait RecognitionEngine: Send {
    /// Search `gallery_dir` for faces in `image`, closest candidates first
    fn find(
        &mut self,
        image: &RgbImage,
        gallery_dir: &Path,
        enforcement: Enforcement,
    ) -> Result<Vec<Candidate>, EngineError>;
}

impl<E: RecognitionEngine + ?Sized> RecognitionEngine for Box<E> {
    fn find(
        &mut self,
        image: &RgbImage,
        gallery_dir: &Path,
        enforcement: Enforcement,
    ) -> Result<Vec<Candidate>, EngineError> {
        (**self).find(image, gallery_dir, enforcement)
    }
}

/// Embedding model presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelPreset {
    /// InsightFace w600k ResNet-50
    #[serde(rename = "arcface_r50")]
    ArcFaceR50,
    /// InsightFace w600k MobileFaceNet, smaller and faster
    #[serde(rename = "mobilefacenet")]
    MobileFaceNet,
}

impl ModelPreset {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelPreset::ArcFaceR50 => "arcface_r50",
            ModelPreset::MobileFaceNet => "mobilefacenet",
        }
    }

    pub fn file_name(&self) -> &'static str {
        match self {
            ModelPreset::ArcFaceR50 => "w600k_r50.onnx",
            ModelPreset::MobileFaceNet => "w600k_mbf.onnx",
        }
    }

    pub fn embedding_dim(&self) -> usize {
        512
    }

    pub fn default_distance_threshold(&self) -> f32 {
        match self {
            ModelPreset::ArcFaceR50 => 0.68,
            ModelPreset::MobileFaceNet => 0.6,
        }
    }
}

impl fmt::Display for ModelPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Face detector presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DetectorPreset {
    #[serde(rename = "scrfd_10g")]
    Scrfd10g,
    #[serde(rename = "scrfd_500m")]
    Scrfd500m,
}

impl DetectorPreset {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectorPreset::Scrfd10g => "scrfd_10g",
            DetectorPreset::Scrfd500m => "scrfd_500m",
        }
    }

    pub fn file_name(&self) -> &'static str {
        match self {
            DetectorPreset::Scrfd10g => "det_10g.onnx",
            DetectorPreset::Scrfd500m => "det_500m.onnx",
        }
    }
}

impl fmt::Display for DetectorPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// ONNX Runtime backed engine.
///
/// Construct with [`OnnxEngine::load`]; both models are loaded up front so
/// the first request does not pay for it.
pub struct OnnxEngine {
    model: ModelPreset,
    detector_preset: DetectorPreset,
    detector: ScrfdDetector,
    embedder: ArcFaceEmbedder,
    distance_threshold: f32,
    gallery: Option<Gallery>,
}

impl OnnxEngine {
    pub fn load(config: &EngineConfig) -> Result<Self, EngineError> {
        log::info!(
            "Loading face detector ({}) and embedding model ({})...",
            config.detector,
            config.model
        );

        let detector = ScrfdDetector::new(
            &config.model_dir.join(config.detector.file_name()),
            config.confidence_threshold,
        )?;
        let embedder = ArcFaceEmbedder::new(
            &config.model_dir.join(config.model.file_name()),
            config.model.embedding_dim(),
        )?;

        Ok(Self {
            model: config.model,
            detector_preset: config.detector,
            detector,
            embedder,
            distance_threshold: config.effective_distance_threshold(),
            gallery: None,
        })
    }

    /// Run one throwaway inference so runtime graph setup happens now
    pub fn warm_up(&mut self) -> Result<(), EngineError> {
        let blank = RgbImage::new(100, 100);
        self.detector.detect(&blank)?;
        log::debug!("Engine warm-up complete");
        Ok(())
    }

    /// Detected faces, most prominent first
    pub fn detect_faces(&mut self, image: &RgbImage) -> Result<Vec<Detection>, EngineError> {
        self.detector.detect(image)
    }

    fn cache_name(&self) -> String {
        format!(
            "representations_{}_{}.bin",
            self.model.as_str(),
            self.detector_preset.as_str()
        )
    }
}

fn embed_face(
    embedder: &mut ArcFaceEmbedder,
    image: &RgbImage,
    face: &Detection,
) -> Result<Embedding, EngineError> {
    let aligned = align::align_face(image, &face.landmarks)?;
    embedder.embed(&aligned)
}

/// Faces of the query image to search for.
///
/// Detection is skipped entirely when nothing is enrolled. `Required`
/// matches only the most prominent face and treats an empty detection as
/// [`EngineError::NoFaceDetected`]; `Relaxed` matches every face.
fn select_faces<F>(
    enrolled: usize,
    enforcement: Enforcement,
    detect: F,
) -> Result<Vec<Detection>, EngineError>
where
    F: FnOnce() -> Result<Vec<Detection>, EngineError>,
{
    if enrolled == 0 {
        log::debug!("Gallery has no enrolled faces");
        return Ok(Vec::new());
    }

    let mut faces = detect()?;
    match enforcement {
        Enforcement::Required if faces.is_empty() => Err(EngineError::NoFaceDetected),
        Enforcement::Required => {
            faces.truncate(1);
            Ok(faces)
        }
        Enforcement::Relaxed => Ok(faces),
    }
}

impl RecognitionEngine for OnnxEngine {
    fn find(
        &mut self,
        image: &RgbImage,
        gallery_dir: &Path,
        enforcement: Enforcement,
    ) -> Result<Vec<Candidate>, EngineError> {
        if self.gallery.as_ref().map(|g| g.dir()) != Some(gallery_dir) {
            self.gallery = Some(Gallery::open(gallery_dir, &self.cache_name()));
        }

        let Self {
            detector,
            embedder,
            gallery,
            distance_threshold,
            ..
        } = self;
        let gallery = gallery
            .as_mut()
            .ok_or_else(|| EngineError::Gallery("Gallery not initialised".to_string()))?;

        gallery.refresh(|reference| {
            let faces = detector.detect(reference)?;
            match faces.first() {
                Some(face) => embed_face(embedder, reference, face).map(Some),
                None => Ok(None),
            }
        })?;

        let considered = select_faces(gallery.enrolled(), enforcement, || detector.detect(image))?;
        if considered.is_empty() {
            return Ok(Vec::new());
        }

        let (width, height) = image.dimensions();
        let mut candidates = Vec::new();
        for face in &considered {
            let embedding = embed_face(embedder, image, face)?;
            let region = face.region(width, height);
            candidates.extend(
                gallery
                    .search(&embedding, *distance_threshold)
                    .into_iter()
                    .map(|(identity, distance)| Candidate {
                        identity,
                        distance,
                        region,
                    }),
            );
        }

        candidates.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        log::debug!(
            "{} candidates for {} face(s)",
            candidates.len(),
            considered.len()
        );
        Ok(candidates)
    }
}
