use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use super::embedder::{cosine_distance, Embedding};
use super::EngineError;

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GalleryEntry {
    file_name: String,
    modified_ms: u64,
    // None when the reference image had no usable face
    embedding: Option<Embedding>,
}

/// Embedding index over a directory of reference images.
///
/// Each image is embedded once; the index is cached next to the images and
/// refreshed when files are added, changed or removed.
pub struct Gallery {
    dir: PathBuf,
    cache_path: PathBuf,
    entries: Vec<GalleryEntry>,
}

impl Gallery {
    /// Open the gallery, reusing a cached index when one exists
    pub fn open(dir: &Path, cache_name: &str) -> Self {
        let cache_path = dir.join(cache_name);
        let entries = match fs::read(&cache_path) {
            Ok(data) => bincode::deserialize(&data).unwrap_or_else(|e| {
                log::warn!("Ignoring corrupt gallery cache {}: {}", cache_path.display(), e);
                Vec::new()
            }),
            Err(_) => Vec::new(),
        };

        Self {
            dir: dir.to_path_buf(),
            cache_path,
            entries,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Number of reference images with a usable embedding
    pub fn enrolled(&self) -> usize {
        self.entries.iter().filter(|e| e.embedding.is_some()).count()
    }

    /// Bring the index in line with the directory contents.
    ///
    /// `embed` is called for every new or modified image and returns the
    /// embedding of its face, or `None` when no face was found. An image
    /// that fails to embed is kept out of the search like a faceless one
    /// and does not affect the rest of the index. Returns whether the
    /// index changed.
    pub fn refresh<F>(&mut self, mut embed: F) -> Result<bool, EngineError>
    where
        F: FnMut(&RgbImage) -> Result<Option<Embedding>, EngineError>,
    {
        if !self.dir.is_dir() {
            return Err(EngineError::Gallery(format!(
                "Reference directory {} does not exist",
                self.dir.display()
            )));
        }

        let on_disk = self.scan()?;
        let mut cached: HashMap<String, GalleryEntry> = self
            .entries
            .drain(..)
            .map(|e| (e.file_name.clone(), e))
            .collect();
        let previous = cached.len();

        let mut changed = false;
        let mut entries = Vec::with_capacity(on_disk.len());
        for (file_name, modified_ms) in on_disk {
            match cached.remove(&file_name) {
                Some(entry) if entry.modified_ms == modified_ms => entries.push(entry),
                _ => {
                    let embedding = self.index_image(&file_name, &mut embed);
                    entries.push(GalleryEntry {
                        file_name,
                        modified_ms,
                        embedding,
                    });
                    changed = true;
                }
            }
        }

        if !cached.is_empty() {
            log::debug!(
                "{} of {} reference images were removed",
                cached.len(),
                previous
            );
            changed = true;
        }

        self.entries = entries;
        if changed {
            log::info!(
                "Gallery {} indexed: {} of {} images usable",
                self.dir.display(),
                self.enrolled(),
                self.entries.len()
            );
            self.save_cache();
        }

        Ok(changed)
    }

    /// Reference images within `threshold`, closest first
    pub fn search(&self, query: &Embedding, threshold: f32) -> Vec<(PathBuf, f32)> {
        let mut rows: Vec<(PathBuf, f32)> = self
            .entries
            .iter()
            .filter_map(|entry| {
                let embedding = entry.embedding.as_ref()?;
                let distance = cosine_distance(query, embedding);
                (distance <= threshold).then(|| (self.dir.join(&entry.file_name), distance))
            })
            .collect();

        rows.sort_by(|a, b| a.1.total_cmp(&b.1));
        rows
    }

    fn scan(&self) -> Result<Vec<(String, u64)>, EngineError> {
        let mut files = Vec::new();

        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let is_image = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
                .unwrap_or(false);
            if !is_image {
                continue;
            }

            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let modified_ms = fs::metadata(&path)?
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0);

            files.push((file_name.to_string(), modified_ms));
        }

        files.sort();
        Ok(files)
    }

    fn index_image<F>(&self, file_name: &str, embed: &mut F) -> Option<Embedding>
    where
        F: FnMut(&RgbImage) -> Result<Option<Embedding>, EngineError>,
    {
        let path = self.dir.join(file_name);
        let image = match image::open(&path) {
            Ok(img) => img.to_rgb8(),
            Err(e) => {
                log::warn!("Skipping unreadable reference image {}: {}", path.display(), e);
                return None;
            }
        };

        match embed(&image) {
            Ok(Some(embedding)) => Some(embedding),
            Ok(None) => {
                log::warn!("No face found in reference image {}", path.display());
                None
            }
            Err(e) => {
                log::warn!("Skipping reference image {}: {}", path.display(), e);
                None
            }
        }
    }

    fn save_cache(&self) {
        let result = bincode::serialize(&self.entries)
            .map_err(|e| e.to_string())
            .and_then(|data| fs::write(&self.cache_path, data).map_err(|e| e.to_string()));

        if let Err(e) = result {
            log::warn!("Failed to write gallery cache {}: {}", self.cache_path.display(), e);
        }
    }
}
