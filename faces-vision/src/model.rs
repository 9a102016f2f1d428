use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
#[cfg(any(feature = "openvino", feature = "cuda"))]
use ort::ep::{self, ExecutionProvider};
use ort::session::{
    builder::{GraphOptimizationLevel, SessionBuilder},
    Session,
};

pub const DETECTOR_MODEL_FILE: &str = "face_detection_yunet_2023mar.onnx";
pub const CASCADE_MODEL_FILE: &str = "seeta_fd_frontal_v1.0.bin";
pub const ENCODER_MODEL_FILE: &str = "face_recognition_sface_2021dec.onnx";

/// Locations of the model weights the backend loads.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelPaths {
    /// YuNet ONNX detector used for `cnn`.
    pub detector: PathBuf,
    /// SeetaFace cascade used for `hog`.
    pub cascade: PathBuf,
    /// SFace ONNX encoder.
    pub encoder: PathBuf,
}

impl ModelPaths {
    /// Default file names under `dir`.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            detector: dir.join(DETECTOR_MODEL_FILE),
            cascade: dir.join(CASCADE_MODEL_FILE),
            encoder: dir.join(ENCODER_MODEL_FILE),
        }
    }
}

pub fn session_builder() -> Result<SessionBuilder> {
    #[allow(unused_mut)]
    let mut builder =
        Session::builder()?.with_optimization_level(GraphOptimizationLevel::Level3)?;

    #[cfg(feature = "openvino")]
    {
        let ep = ep::OpenVINO::default();
        if ep.is_available()? {
            ep.register(&mut builder)?;
        } else {
            log::warn!("openvino feature is enabled, onnx runtime not compiled with openvino")
        }
    }

    #[cfg(feature = "cuda")]
    {
        let ep = ep::CUDA::default();
        if ep.is_available()? {
            ep.register(&mut builder)?;
        } else {
            log::warn!("cuda feature is enabled, onnx runtime not compiled with cuda")
        }
    }

    Ok(builder)
}

fn session_from_file(path: &Path, what: &str) -> Result<Session> {
    if !path.exists() {
        anyhow::bail!("{} model not found at {}", what, path.display());
    }
    log::debug!("loading {} model from {}", what, path.display());
    session_builder()?
        .commit_from_file(path)
        .with_context(|| format!("load {} model {}", what, path.display()))
}

pub fn detector_session(path: &Path) -> Result<Session> {
    session_from_file(path, "detector")
}

pub fn encoder_session(path: &Path) -> Result<Session> {
    session_from_file(path, "encoder")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_paths_in_dir() {
        let paths = ModelPaths::in_dir(Path::new("/opt/models"));
        assert_eq!(
            paths.detector,
            Path::new("/opt/models/face_detection_yunet_2023mar.onnx")
        );
        assert_eq!(paths.cascade, Path::new("/opt/models/seeta_fd_frontal_v1.0.bin"));
        assert_eq!(
            paths.encoder,
            Path::new("/opt/models/face_recognition_sface_2021dec.onnx")
        );
    }

    #[test]
    fn missing_model_is_an_error() {
        let err = detector_session(Path::new("/nonexistent/yunet.onnx"))
            .err()
            .map(|e| e.to_string())
            .unwrap_or_default();
        assert!(err.contains("detector model not found"));
    }
}
