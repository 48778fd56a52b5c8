use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use std::path::Path;

use super::EngineError;

/// Build a CPU ONNX Runtime session for a model file.
///
/// This is where the one-time model cost is paid; callers keep the session
/// for the lifetime of the engine.
pub(crate) fn load_session(model_path: &Path) -> Result<Session, EngineError> {
    if !model_path.exists() {
        return Err(EngineError::ModelNotFound(model_path.to_path_buf()));
    }

    let session = Session::builder()
        .map_err(|e| EngineError::Session(e.to_string()))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(|e| EngineError::Session(e.to_string()))?
        .commit_from_file(model_path)
        .map_err(|e| {
            EngineError::Session(format!(
                "Failed to load model from {:?}: {}",
                model_path, e
            ))
        })?;

    log::info!("Loaded ONNX model: {:?}", model_path);
    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_model_is_reported() {
        let result = load_session(Path::new("/nonexistent/det_10g.onnx"));
        assert!(matches!(result, Err(EngineError::ModelNotFound(_))));
    }
}
