pub mod capture;
pub mod classify;
pub mod config;
pub mod decode;
pub mod engine;
pub mod overlay;
pub mod registry;
pub mod resolver;
pub mod scrape;

pub use classify::{Outcome, RecognitionService};
pub use config::Config;
pub use engine::{Candidate, Enforcement, FaceRegion, OnnxEngine, RecognitionEngine};
pub use registry::{FacultyRecord, FacultyRegistry};
pub use resolver::{MatchResolver, ResolvedMatch};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("Camera error: {0}")]
    Capture(#[from] capture::CaptureError),
    #[error("Engine error: {0}")]
    Engine(#[from] engine::EngineError),
    #[error("Decode error: {0}")]
    Decode(#[from] decode::DecodeError),
    #[error("Registry error: {0}")]
    Registry(#[from] registry::RegistryError),
    #[error("Dataset build error: {0}")]
    Scrape(#[from] scrape::ScrapeError),
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

/// Load the faculty data and the ONNX engine described by `config` and wire
/// them into a ready recognition service.
///
/// A missing or unreadable faculty data file only produces an empty
/// registry; missing model files are an error.
pub fn open_service(config: &Config) -> Result<RecognitionService<OnnxEngine>, Error> {
    let registry = FacultyRegistry::load(&config.storage.data_path);
    let engine = OnnxEngine::load(&config.engine)?;
    let resolver = MatchResolver::new(engine, &config.storage.gallery_dir);

    Ok(RecognitionService::new(registry, resolver))
}
