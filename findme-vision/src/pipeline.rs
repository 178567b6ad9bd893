use anyhow::{Context, Result};
use image::DynamicImage;
use ort::session::Session;

use crate::face::{self, Detection, Embedding, RECOGNIZER_INPUT};
use crate::model::{self, ModelPaths};

/// Detector knobs passed through to YuNet decoding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorSettings {
    pub score_threshold: f32,
    pub nms_threshold: f32,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            score_threshold: 0.6,
            nms_threshold: 0.3,
        }
    }
}

/// Full pipeline: detect faces → align → encode
pub struct Pipeline {
    pub detector: Session,
    pub encoder: Session,
    pub settings: DetectorSettings,
}

impl Pipeline {
    pub fn new(paths: &ModelPaths, settings: DetectorSettings) -> Result<Self> {
        Ok(Self {
            detector: model::detector_session(paths)?,
            encoder: model::recog_session(paths)?,
            settings,
        })
    }

    fn detect(&mut self, img: &DynamicImage) -> Result<Vec<Detection>> {
        face::detect_faces(
            &mut self.detector,
            img,
            self.settings.score_threshold,
            self.settings.nms_threshold,
        )
        .context("detecting faces")
    }

    fn embed(&mut self, img: &DynamicImage, detection: &Detection) -> Result<Embedding> {
        let crop = face::align_face(img, detection, RECOGNIZER_INPUT).context("aligning face")?;
        face::encode_face(&mut self.encoder, &crop).context("encoding face")
    }

    /// Detect the best face and return it with its embedding.
    /// Fails when the image contains no face.
    pub fn process_image(&mut self, img: &DynamicImage) -> Result<(Detection, Embedding)> {
        let detections = self.detect(img)?;

        // detect_faces returns highest score first
        let Some(best) = detections.into_iter().next() else {
            anyhow::bail!("No face detected in image");
        };

        let embedding = self.embed(img, &best)?;
        Ok((best, embedding))
    }

    /// Detect every face and embed each one, in detector order.
    /// An image without faces yields an empty list.
    pub fn detect_all(&mut self, img: &DynamicImage) -> Result<Vec<(Detection, Embedding)>> {
        let detections = self.detect(img)?;
        log::debug!("{} face(s) after nms", detections.len());

        detections
            .into_iter()
            .map(|d| {
                let embedding = self.embed(img, &d)?;
                Ok((d, embedding))
            })
            .collect()
    }
}
