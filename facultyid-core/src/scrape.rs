use scraper::{ElementRef, Html, Selector};
use std::fs;
use std::path::Path;
use thiserror::Error;
use url::Url;

use crate::config::ScrapeConfig;
use crate::decode::{decode_bytes, DecodeError};
use crate::registry::{identity_key, FacultyRecord, FacultyRegistry, RegistryError};

#[derive(Error, Debug)]
pub enum ScrapeError {
    #[error("download failed for {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("invalid selector {0:?}")]
    Selector(String),
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("no faculty entries found on the page; check the selectors")]
    NoEntries,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to write faculty data: {0}")]
    Registry(#[from] RegistryError),
    #[error("unreadable photo: {0}")]
    Decode(#[from] DecodeError),
    #[error("failed to save photo: {0}")]
    Image(#[from] image::ImageError),
}

/// One faculty card extracted from the directory page
#[derive(Debug, Clone, PartialEq)]
pub struct DirectoryEntry {
    pub key: String,
    pub record: FacultyRecord,
    pub image_url: Url,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct BuildReport {
    pub entries: usize,
    pub images_saved: usize,
    pub failures: usize,
}

struct Selectors {
    card: Selector,
    name: Selector,
    designation: Selector,
    image: Selector,
}

impl Selectors {
    fn compile(config: &ScrapeConfig) -> Result<Self, ScrapeError> {
        let parse = |s: &str| Selector::parse(s).map_err(|_| ScrapeError::Selector(s.to_string()));
        Ok(Self {
            card: parse(&config.card_selector)?,
            name: parse(&config.name_selector)?,
            designation: parse(&config.designation_selector)?,
            image: parse(&config.image_selector)?,
        })
    }
}

/// Extract faculty entries from a directory page.
///
/// Cards missing a name, designation or photo are skipped, as are names
/// that leave no usable identity key.
pub fn parse_directory(
    html: &str,
    base_url: &Url,
    config: &ScrapeConfig,
) -> Result<Vec<DirectoryEntry>, ScrapeError> {
    let selectors = Selectors::compile(config)?;
    let document = Html::parse_document(html);

    let mut entries = Vec::new();
    for card in document.select(&selectors.card) {
        let name = card.select(&selectors.name).next().map(element_text);
        let designation = card.select(&selectors.designation).next().map(element_text);
        let src = card
            .select(&selectors.image)
            .next()
            .and_then(|img| img.value().attr("src"));

        let (Some(name), Some(designation), Some(src)) = (name, designation, src) else {
            log::warn!("Skipping a card, missing required elements");
            continue;
        };

        let Some(key) = identity_key(&name) else {
            log::warn!("Skipping entry for '{}' due to invalid name", name);
            continue;
        };

        let image_url = match base_url.join(src.trim()) {
            Ok(url) => url,
            Err(e) => {
                log::warn!("Skipping '{}': bad image URL {:?}: {}", name, src, e);
                continue;
            }
        };

        entries.push(DirectoryEntry {
            key,
            record: FacultyRecord {
                full_name: name,
                designation: title_case(&designation),
                department: config.department.clone(),
            },
            image_url,
        });
    }

    Ok(entries)
}

/// Scrape the directory page and write the gallery and faculty data.
///
/// Individual cards that fail are logged and counted; only a failed page
/// fetch, an empty page or an unwritable output aborts the build.
pub fn build_dataset(
    config: &ScrapeConfig,
    gallery_dir: &Path,
    data_path: &Path,
) -> Result<BuildReport, ScrapeError> {
    let base_url = Url::parse(&config.url)?;
    let client = reqwest::blocking::Client::builder()
        .user_agent(config.user_agent.as_str())
        .build()
        .map_err(|e| ScrapeError::Fetch {
            url: config.url.clone(),
            source: e,
        })?;

    log::info!("Scraping faculty data from: {}", config.url);
    let html = fetch(&client, &config.url)
        .and_then(|response| {
            response.text().map_err(|e| ScrapeError::Fetch {
                url: config.url.clone(),
                source: e,
            })
        })?;

    let entries = parse_directory(&html, &base_url, config)?;
    if entries.is_empty() {
        return Err(ScrapeError::NoEntries);
    }
    log::info!("Found {} faculty members", entries.len());

    fs::create_dir_all(gallery_dir)?;

    let mut report = BuildReport {
        entries: entries.len(),
        ..BuildReport::default()
    };
    let mut records = Vec::with_capacity(entries.len());

    for entry in entries {
        match save_photo(&client, &entry, gallery_dir) {
            Ok(()) => {
                report.images_saved += 1;
                log::info!("Saved photo and data for: {}", entry.record.full_name);
            }
            Err(e) => {
                report.failures += 1;
                log::error!(
                    "Failed to save photo for '{}': {}",
                    entry.record.full_name,
                    e
                );
            }
        }
        records.push((entry.key, entry.record));
    }

    FacultyRegistry::from_records(records).save(data_path)?;
    log::info!(
        "Saved faculty details to {}; images are in {}",
        data_path.display(),
        gallery_dir.display()
    );

    Ok(report)
}

fn fetch(
    client: &reqwest::blocking::Client,
    url: &str,
) -> Result<reqwest::blocking::Response, ScrapeError> {
    client
        .get(url)
        .send()
        .and_then(|r| r.error_for_status())
        .map_err(|e| ScrapeError::Fetch {
            url: url.to_string(),
            source: e,
        })
}

fn save_photo(
    client: &reqwest::blocking::Client,
    entry: &DirectoryEntry,
    gallery_dir: &Path,
) -> Result<(), ScrapeError> {
    let bytes = fetch(client, entry.image_url.as_str())?
        .bytes()
        .map_err(|e| ScrapeError::Fetch {
            url: entry.image_url.to_string(),
            source: e,
        })?;
    let image = decode_bytes(&bytes)?;
    image.save_with_format(
        gallery_dir.join(format!("{}.jpg", entry.key)),
        image::ImageFormat::Jpeg,
    )?;
    Ok(())
}

/// All text under an element with whitespace collapsed
fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Capitalise the first letter of every alphabetic run, lowercase the rest
fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_word = false;

    for c in text.chars() {
        if c.is_alphabetic() {
            if in_word {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            in_word = true;
        } else {
            out.push(c);
            in_word = false;
        }
    }
    out
}
