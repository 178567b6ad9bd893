use anyhow::{Context, Result};
#[cfg(any(feature = "openvino", feature = "cuda"))]
use ort::ep::{self, ExecutionProvider};
use ort::session::{
    builder::{GraphOptimizationLevel, SessionBuilder},
    Session,
};
use std::path::{Path, PathBuf};

pub const DEFAULT_DETECTOR_MODEL: &str = "models/face_detection_yunet_2023mar.onnx";
pub const DEFAULT_RECOGNIZER_MODEL: &str = "models/face_recognition_sface_2021dec.onnx";

/// Locations of the ONNX models used by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelPaths {
    pub detector: PathBuf,
    pub recognizer: PathBuf,
}

impl Default for ModelPaths {
    fn default() -> Self {
        Self {
            detector: PathBuf::from(DEFAULT_DETECTOR_MODEL),
            recognizer: PathBuf::from(DEFAULT_RECOGNIZER_MODEL),
        }
    }
}

impl ModelPaths {
    /// True when both model files exist on disk.
    pub fn available(&self) -> bool {
        self.detector.is_file() && self.recognizer.is_file()
    }
}

pub fn session_builder() -> Result<SessionBuilder> {
    #[allow(unused_mut)]
    let mut builder =
        Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(ort::Error::<()>::from)?;

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

fn load(path: &Path, what: &str) -> Result<Session> {
    log::debug!("loading {} model from {}", what, path.display());
    session_builder()?
        .commit_from_file(path)
        .with_context(|| format!("load {} model {}", what, path.display()))
}

pub fn recog_session(paths: &ModelPaths) -> Result<Session> {
    load(&paths.recognizer, "recognition")
}

pub fn detector_session(paths: &ModelPaths) -> Result<Session> {
    load(&paths.detector, "detector")
}
