use image::RgbImage;

use crate::decode::decode_data_url;
use crate::engine::{EngineError, Enforcement, RecognitionEngine};
use crate::registry::{FacultyRecord, FacultyRegistry};
use crate::resolver::MatchResolver;

/// Result of one recognition request
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Missing, malformed or undecodable input
    BadRequest(String),
    /// Input was fine but contained no detectable face
    NoFaceDetected,
    /// A face was found but nothing in the gallery is close enough
    NoMatch,
    /// The gallery matched an identity the registry knows nothing about
    MatchWithoutDetails { key: String },
    Success(FacultyRecord),
    /// Engine or I/O failure; the message is for logs only
    InternalError(String),
}

impl Outcome {
    /// Wire status string
    pub fn status(&self) -> &'static str {
        match self {
            Outcome::Success(_) => "success",
            Outcome::NoMatch | Outcome::MatchWithoutDetails { .. } => "not_found",
            Outcome::NoFaceDetected => "no_face",
            Outcome::BadRequest(_) | Outcome::InternalError(_) => "error",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            Outcome::BadRequest(_) => 400,
            Outcome::InternalError(_) => 500,
            _ => 200,
        }
    }

    /// User-facing message; `None` for successes
    pub fn message(&self) -> Option<String> {
        match self {
            Outcome::Success(_) => None,
            Outcome::NoMatch => Some("No match found in the database.".to_string()),
            Outcome::MatchWithoutDetails { .. } => {
                Some("Match found, but no details in JSON.".to_string())
            }
            Outcome::NoFaceDetected => Some(
                "Could not detect a face in the image. Please try again.".to_string(),
            ),
            Outcome::BadRequest(reason) => Some(reason.clone()),
            Outcome::InternalError(_) => {
                Some("An internal error occurred while recognizing the image.".to_string())
            }
        }
    }
}

/// Recognition pipeline: decode, resolve, look up, classify.
///
/// The registry and the engine are injected at construction; nothing is
/// loaded lazily behind the caller's back.
pub struct RecognitionService<E> {
    registry: FacultyRegistry,
    resolver: MatchResolver<E>,
}

impl<E: RecognitionEngine> RecognitionService<E> {
    pub fn new(registry: FacultyRegistry, resolver: MatchResolver<E>) -> Self {
        Self { registry, resolver }
    }

    pub fn registry(&self) -> &FacultyRegistry {
        &self.registry
    }

    pub fn resolver_mut(&mut self) -> &mut MatchResolver<E> {
        &mut self.resolver
    }

    /// Recognize a data-URL image payload (API path)
    pub fn recognize_payload(&mut self, payload: Option<&str>) -> Outcome {
        let payload = match payload {
            Some(p) if !p.trim().is_empty() => p,
            _ => return Outcome::BadRequest("No image data received.".to_string()),
        };

        match decode_data_url(payload) {
            Ok(pixels) => self.recognize_image(&pixels),
            Err(e) => {
                log::debug!("Rejecting undecodable payload: {}", e);
                Outcome::BadRequest(format!("Could not decode image: {}", e))
            }
        }
    }

    /// Recognize already decoded pixels with face detection enforced
    pub fn recognize_image(&mut self, pixels: &RgbImage) -> Outcome {
        let best = match self.resolver.best_match(pixels, Enforcement::Required) {
            Ok(best) => best,
            Err(EngineError::NoFaceDetected) => return Outcome::NoFaceDetected,
            Err(e) => {
                log::error!("Recognition failed: {}", e);
                return Outcome::InternalError(e.to_string());
            }
        };

        let Some(best) = best else {
            return Outcome::NoMatch;
        };

        match self.registry.lookup(&best.key) {
            Some(record) => {
                log::info!(
                    "Recognized {} (distance {:.3})",
                    record.full_name,
                    best.distance
                );
                Outcome::Success(record.clone())
            }
            None => {
                log::warn!(
                    "Gallery matched '{}' but the faculty data has no entry for it",
                    best.key
                );
                Outcome::MatchWithoutDetails { key: best.key }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Candidate, FaceRegion};
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use image::{ImageFormat, Rgb};
    use std::io::Cursor;
    use std::path::{Path, PathBuf};

    enum Script {
        Rows(Vec<&'static str>),
        NoFace,
        Fail,
    }

    struct ScriptedEngine {
        script: Script,
        calls: usize,
        last_enforcement: Option<Enforcement>,
    }

    impl ScriptedEngine {
        fn new(script: Script) -> Self {
            Self {
                script,
                calls: 0,
                last_enforcement: None,
            }
        }
    }

    impl RecognitionEngine for ScriptedEngine {
        fn find(
            &mut self,
            _image: &RgbImage,
            gallery_dir: &Path,
            enforcement: Enforcement,
        ) -> Result<Vec<Candidate>, EngineError> {
            self.calls += 1;
            self.last_enforcement = Some(enforcement);
            match &self.script {
                Script::Rows(names) => Ok(names
                    .iter()
                    .enumerate()
                    .map(|(i, name)| Candidate {
                        identity: gallery_dir.join(format!("{}.jpg", name)),
                        distance: 0.1 * (i + 1) as f32,
                        region: FaceRegion {
                            x: 1,
                            y: 2,
                            width: 3,
                            height: 4,
                        },
                    })
                    .collect()),
                Script::NoFace => Err(EngineError::NoFaceDetected),
                Script::Fail => Err(EngineError::Detection("session exploded".to_string())),
            }
        }
    }

    fn jane() -> FacultyRecord {
        FacultyRecord {
            full_name: "Jane Doe".to_string(),
            designation: "Professor".to_string(),
            department: "CS".to_string(),
        }
    }

    fn service(script: Script) -> RecognitionService<ScriptedEngine> {
        let registry = FacultyRegistry::from_records([("janedoe".to_string(), jane())]);
        let resolver = MatchResolver::new(ScriptedEngine::new(script), PathBuf::from("faculty_db"));
        RecognitionService::new(registry, resolver)
    }

    fn data_url() -> String {
        let img = RgbImage::from_pixel(6, 6, Rgb([10, 20, 30]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        format!("data:image/png;base64,{}", STANDARD.encode(out.into_inner()))
    }

    #[test]
    fn test_success_carries_record() {
        let mut svc = service(Script::Rows(vec!["janedoe", "johndoe"]));
        let outcome = svc.recognize_payload(Some(&data_url()));

        assert_eq!(outcome, Outcome::Success(jane()));
        assert_eq!(outcome.status(), "success");
        assert_eq!(outcome.http_status(), 200);
        assert_eq!(outcome.message(), None);
    }

    #[test]
    fn test_api_path_enforces_detection() {
        let mut svc = service(Script::Rows(vec!["janedoe"]));
        svc.recognize_payload(Some(&data_url()));
        assert_eq!(
            svc.resolver_mut().engine_mut().last_enforcement,
            Some(Enforcement::Required)
        );
    }

    #[test]
    fn test_no_face_is_distinct() {
        let outcome = service(Script::NoFace).recognize_payload(Some(&data_url()));
        assert_eq!(outcome, Outcome::NoFaceDetected);
        assert_eq!(outcome.status(), "no_face");
        assert_eq!(outcome.http_status(), 200);
    }

    #[test]
    fn test_zero_candidates_is_no_match() {
        let outcome = service(Script::Rows(vec![])).recognize_payload(Some(&data_url()));
        assert_eq!(outcome, Outcome::NoMatch);
        assert_eq!(outcome.status(), "not_found");
    }

    #[test]
    fn test_match_without_registry_entry() {
        let outcome = service(Script::Rows(vec!["johndoe", "janedoe"]))
            .recognize_payload(Some(&data_url()));

        assert_eq!(
            outcome,
            Outcome::MatchWithoutDetails {
                key: "johndoe".to_string()
            }
        );
        assert_ne!(outcome, Outcome::NoMatch);
        assert_eq!(outcome.status(), "not_found");
        assert_eq!(
            outcome.message().as_deref(),
            Some("Match found, but no details in JSON.")
        );
    }

    #[test]
    fn test_engine_failure_is_internal_error() {
        let outcome = service(Script::Fail).recognize_payload(Some(&data_url()));
        assert!(matches!(outcome, Outcome::InternalError(ref m) if m.contains("session exploded")));
        assert_eq!(outcome.http_status(), 500);
        assert!(!outcome.message().unwrap().contains("session exploded"));
    }

    #[test]
    fn test_missing_payload_is_bad_request() {
        let mut svc = service(Script::Rows(vec!["janedoe"]));
        for payload in [None, Some(""), Some("   ")] {
            let outcome = svc.recognize_payload(payload);
            assert!(matches!(outcome, Outcome::BadRequest(_)));
            assert_eq!(outcome.http_status(), 400);
        }
        assert_eq!(svc.resolver_mut().engine_mut().calls, 0);
    }

    #[test]
    fn test_malformed_base64_short_circuits_engine() {
        // Even an engine that would fail is never reached
        let mut svc = service(Script::Fail);
        let outcome = svc.recognize_payload(Some("data:image/png;base64,@@@@"));

        assert!(matches!(outcome, Outcome::BadRequest(_)));
        assert_eq!(outcome.status(), "error");
        assert_eq!(svc.resolver_mut().engine_mut().calls, 0);
    }
}
