use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::engine::{DetectorPreset, ModelPreset};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub engine: EngineConfig,
    pub camera: CameraConfig,
    pub live: LiveConfig,
    pub overlay: OverlayConfig,
    pub server: ServerConfig,
    pub scrape: ScrapeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory of enrolled reference images, one `<identity_key>.jpg` per person
    pub gallery_dir: PathBuf,
    /// JSON document mapping identity key to faculty details
    pub data_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            gallery_dir: PathBuf::from("faculty_db"),
            data_path: PathBuf::from("faculty_data.json"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub model: ModelPreset,
    pub detector: DetectorPreset,
    pub model_dir: PathBuf,
    pub confidence_threshold: f32,

    // Falls back to the model preset's own threshold
    pub distance_threshold: Option<f32>,
}

impl EngineConfig {
    pub fn effective_distance_threshold(&self) -> f32 {
        self.distance_threshold
            .unwrap_or_else(|| self.model.default_distance_threshold())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model: ModelPreset::ArcFaceR50,
            detector: DetectorPreset::Scrfd10g,
            model_dir: PathBuf::from("models"),
            confidence_threshold: 0.5,
            distance_threshold: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub device: String,
    pub width: u32,
    pub height: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            width: 640,
            height: 480,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    pub poll_interval_secs: u64,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 2,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    /// TrueType font used for the name/designation/department lines
    pub font_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// Largest accepted request body; data URLs of camera photos run to megabytes
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:5000".to_string(),
            max_body_bytes: 32 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrapeConfig {
    pub url: String,
    pub card_selector: String,
    pub name_selector: String,
    pub designation_selector: String,
    pub image_selector: String,
    pub department: String,
    pub user_agent: String,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            url: "https://www.mmmut.ac.in/FacultyList?ab=11".to_string(),
            card_selector: r#"div.row.m-0[style*="border"]"#.to_string(),
            name_selector: r#"h5[style*="font-weight: bolder"]"#.to_string(),
            designation_selector: r#"span[id*="Label4"]"#.to_string(),
            image_selector: "img.img_th".to_string(),
            department: "Civil Engineering".to_string(),
            user_agent: "Mozilla/5.0".to_string(),
        }
    }
}

impl Config {
    /// Load configuration with fallback chain:
    /// 1. /etc/facultyid/facultyid.toml (system-wide)
    /// 2. ~/.config/facultyid/facultyid.toml (user)
    /// 3. Compiled defaults
    pub fn load() -> Result<Self, ConfigError> {
        if let Ok(config) = Self::load_from_path("/etc/facultyid/facultyid.toml") {
            config.validate()?;
            return Ok(config);
        }

        if let Some(home) = std::env::var_os("HOME") {
            let user_config = PathBuf::from(home)
                .join(".config")
                .join("facultyid")
                .join("facultyid.toml");
            if let Ok(config) = Self::load_from_path(&user_config) {
                config.validate()?;
                return Ok(config);
            }
        }

        let config = Self::default();
        config.validate()?;
        Ok(config)
    }

    /// Load from an explicit path, or walk the fallback chain when none is given.
    /// An explicit path that cannot be read is an error rather than a silent fallback.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => {
                let config = Self::load_from_path(path)?;
                config.validate()?;
                Ok(config)
            }
            None => Self::load(),
        }
    }

    /// Load configuration from a specific file path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage.gallery_dir.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "Gallery directory cannot be empty".to_string(),
            ));
        }

        if self.storage.data_path.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "Faculty data path cannot be empty".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.engine.confidence_threshold) {
            return Err(ConfigError::Validation(
                "Detection confidence threshold must be between 0.0 and 1.0".to_string(),
            ));
        }

        // Cosine distance lives in [0, 2]
        if !(0.0..=2.0).contains(&self.engine.effective_distance_threshold()) {
            return Err(ConfigError::Validation(
                "Distance threshold must be between 0.0 and 2.0".to_string(),
            ));
        }

        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(ConfigError::Validation(
                "Camera dimensions must be non-zero".to_string(),
            ));
        }

        if self.live.poll_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "Poll interval must be greater than 0".to_string(),
            ));
        }

        if self.server.bind.parse::<SocketAddr>().is_err() {
            return Err(ConfigError::Validation(format!(
                "Server bind address is not a valid socket address: {}",
                self.server.bind
            )));
        }

        if self.server.max_body_bytes == 0 {
            return Err(ConfigError::Validation(
                "Server body limit must be greater than 0".to_string(),
            ));
        }

        if self.scrape.url.is_empty() {
            return Err(ConfigError::Validation(
                "Scrape URL cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}
