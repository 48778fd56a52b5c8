use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Descriptive details for one enrolled faculty member
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacultyRecord {
    pub full_name: String,
    pub designation: String,
    pub department: String,
}

/// Read-only mapping from identity key to faculty details.
///
/// Built once at startup and handed to whoever needs lookups; there is no
/// process-wide instance.
#[derive(Debug, Clone, Default)]
pub struct FacultyRegistry {
    records: BTreeMap<String, FacultyRecord>,
}

impl FacultyRegistry {
    /// Load the registry from a JSON document.
    ///
    /// Never fails: a missing, unreadable or malformed document yields an
    /// empty registry, so every lookup reports "not found" instead of the
    /// process refusing to start.
    pub fn load<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        match Self::try_load(path) {
            Ok(registry) => {
                log::info!(
                    "Loaded {} faculty records from {}",
                    registry.len(),
                    path.display()
                );
                registry
            }
            Err(RegistryError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                log::warn!(
                    "Faculty data {} not found; every lookup will miss. Run `facultyid build-db` first.",
                    path.display()
                );
                Self::default()
            }
            Err(e) => {
                log::error!("Failed to load faculty data {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    fn try_load(path: &Path) -> Result<Self, RegistryError> {
        let contents = fs::read_to_string(path)?;
        let records: BTreeMap<String, FacultyRecord> = serde_json::from_str(&contents)?;
        Ok(Self { records })
    }

    pub fn from_records<I>(records: I) -> Self
    where
        I: IntoIterator<Item = (String, FacultyRecord)>,
    {
        Self {
            records: records.into_iter().collect(),
        }
    }

    pub fn lookup(&self, key: &str) -> Option<&FacultyRecord> {
        self.records.get(key)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FacultyRecord)> {
        self.records.iter()
    }

    /// Write the registry as pretty-printed JSON (4-space indent)
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), RegistryError> {
        let mut out = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut out, formatter);
        self.records.serialize(&mut ser)?;
        fs::write(path, out)?;
        Ok(())
    }
}

/// Derive the identity key for a person's name.
///
/// Keeps alphanumerics, `_`, whitespace and `-`, then trims. Returns `None`
/// when nothing usable is left.
pub fn identity_key(name: &str) -> Option<String> {
    let kept: String = name
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-' || c.is_whitespace())
        .collect();
    let trimmed = kept.trim();

    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jane() -> FacultyRecord {
        FacultyRecord {
            full_name: "Jane Doe".to_string(),
            designation: "Professor".to_string(),
            department: "CS".to_string(),
        }
    }

    #[test]
    fn test_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("faculty_data.json");

        let registry = FacultyRegistry::from_records([
            ("janedoe".to_string(), jane()),
            (
                "John Roe".to_string(),
                FacultyRecord {
                    full_name: "Dr. John Roe".to_string(),
                    designation: "Assistant Professor".to_string(),
                    department: "Civil Engineering".to_string(),
                },
            ),
        ]);
        registry.save(&path).unwrap();

        let loaded = FacultyRegistry::load(&path);
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.lookup("janedoe"), Some(&jane()));
        assert_eq!(
            loaded.lookup("John Roe").map(|r| r.full_name.as_str()),
            Some("Dr. John Roe")
        );
    }

    #[test]
    fn test_load_document_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("faculty_data.json");
        fs::write(
            &path,
            r#"{"janedoe": {"full_name": "Jane Doe", "designation": "Professor", "department": "CS"}}"#,
        )
        .unwrap();

        let registry = FacultyRegistry::load(&path);
        assert_eq!(registry.lookup("janedoe"), Some(&jane()));
        assert!(registry.lookup("johndoe").is_none());
    }

    #[test]
    fn test_missing_file_is_empty() {
        let registry = FacultyRegistry::load("/nonexistent/faculty_data.json");
        assert!(registry.is_empty());
        assert!(registry.lookup("janedoe").is_none());
    }

    #[test]
    fn test_malformed_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("faculty_data.json");
        fs::write(&path, "{ not json").unwrap();

        assert!(FacultyRegistry::load(&path).is_empty());
    }

    #[test]
    fn test_saved_json_uses_four_space_indent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("faculty_data.json");
        FacultyRegistry::from_records([("janedoe".to_string(), jane())])
            .save(&path)
            .unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.contains("\n    \"janedoe\""));
    }

    #[test]
    fn test_identity_key() {
        assert_eq!(identity_key("Dr. A. K. Mishra").as_deref(), Some("Dr A K Mishra"));
        assert_eq!(identity_key("  Jane-Doe (HOD) ").as_deref(), Some("Jane-Doe HOD"));
        assert_eq!(identity_key("snake_case").as_deref(), Some("snake_case"));
        assert_eq!(identity_key("..."), None);
        assert_eq!(identity_key("   "), None);
    }
}
