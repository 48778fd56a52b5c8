use image::RgbImage;
use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use crate::engine::{Candidate, EngineError, Enforcement, FaceRegion, RecognitionEngine};

/// Winning candidate, reduced to what downstream code may see
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedMatch {
    pub key: String,
    pub distance: f32,
    pub region: FaceRegion,
}

/// Runs the engine against the reference directory and picks winners
pub struct MatchResolver<E> {
    engine: E,
    gallery_dir: PathBuf,
}

impl<E: RecognitionEngine> MatchResolver<E> {
    pub fn new<P: AsRef<Path>>(engine: E, gallery_dir: P) -> Self {
        Self {
            engine,
            gallery_dir: gallery_dir.as_ref().to_path_buf(),
        }
    }

    pub fn gallery_dir(&self) -> &Path {
        &self.gallery_dir
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    /// All candidate rows, best first (ties ordered by identity key)
    pub fn resolve(
        &mut self,
        pixels: &RgbImage,
        enforcement: Enforcement,
    ) -> Result<Vec<Candidate>, EngineError> {
        let mut candidates = self.engine.find(pixels, &self.gallery_dir, enforcement)?;
        candidates.sort_by(compare_candidates);
        Ok(candidates)
    }

    /// The single closest candidate, if any
    pub fn best_match(
        &mut self,
        pixels: &RgbImage,
        enforcement: Enforcement,
    ) -> Result<Option<ResolvedMatch>, EngineError> {
        let candidates = self.engine.find(pixels, &self.gallery_dir, enforcement)?;
        Ok(select_best(&candidates))
    }
}

/// Smallest distance wins; equal distances fall back to the identity key.
/// Candidates whose path yields no identity key are skipped.
pub fn select_best(candidates: &[Candidate]) -> Option<ResolvedMatch> {
    let mut ranked: Vec<&Candidate> = candidates.iter().collect();
    ranked.sort_by(|a, b| compare_candidates(a, b));

    ranked.into_iter().find_map(|candidate| {
        let Some(key) = identity_key_from_path(&candidate.identity) else {
            log::warn!(
                "Ignoring candidate {} with no usable identity key",
                candidate.identity.display()
            );
            return None;
        };

        Some(ResolvedMatch {
            key,
            distance: candidate.distance,
            region: candidate.region,
        })
    })
}

fn compare_candidates(a: &Candidate, b: &Candidate) -> Ordering {
    a.distance
        .total_cmp(&b.distance)
        .then_with(|| a.identity.file_stem().cmp(&b.identity.file_stem()))
}

/// Identity key of a reference image: its file name without the extension
pub fn identity_key_from_path(path: &Path) -> Option<String> {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .filter(|stem| !stem.is_empty())
}
