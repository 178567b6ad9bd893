use serde::{Deserialize, Serialize};

use crate::config::RunConfiguration;
use crate::error::MetricError;
use crate::filter::{is_eligible, BoundingBox, DetectedFace};
use crate::metric::Embedding;

/// How faces within one image are searched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
    /// Stop at the first eligible face within tolerance. Its distance is
    /// reported even if a later face would be closer.
    #[default]
    EarlyExit,
    /// Score every eligible face and report the closest.
    Exhaustive,
}

/// Outcome of matching the faces of one image.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ImageMatch {
    pub matched: bool,
    /// `None` when no face was evaluated.
    pub best_distance: Option<f32>,
    /// Box of the face at `best_distance`.
    pub best_face: Option<BoundingBox>,
    pub evaluated_faces: usize,
}

/// Match the reference against the faces of one candidate image, in the
/// order the encoder supplied them.
pub fn evaluate(
    reference: &Embedding,
    faces: &[DetectedFace],
    config: &RunConfiguration,
) -> Result<ImageMatch, MetricError> {
    let mut best = f32::INFINITY;
    let mut best_face = None;
    let mut matched = false;
    let mut evaluated = 0usize;

    for (i, face) in faces.iter().enumerate() {
        if !is_eligible(face, config.min_face_size) {
            log::debug!(
                "face {}: {}x{} below {}px, skipped",
                i,
                face.bbox.width,
                face.bbox.height,
                config.min_face_size
            );
            continue;
        }

        evaluated += 1;
        let d = config.metric.distance(reference, &face.embedding)?;
        log::debug!("face {}: distance {:.4}", i, d);

        if d < best {
            best = d;
            best_face = Some(face.bbox);
        }
        if d <= config.tolerance {
            matched = true;
            if config.strategy == MatchStrategy::EarlyExit {
                break;
            }
        }
    }

    Ok(ImageMatch {
        matched,
        best_distance: (evaluated > 0).then_some(best),
        best_face,
        evaluated_faces: evaluated,
    })
}
