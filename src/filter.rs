use crate::metric::Embedding;

/// Face bounding box in source image pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// One face found by the encoder in a candidate image.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedFace {
    pub bbox: BoundingBox,
    pub embedding: Embedding,
}

/// A face takes part in matching only if both sides reach `min_size`.
pub fn is_eligible(face: &DetectedFace, min_size: u32) -> bool {
    face.bbox.width >= min_size && face.bbox.height >= min_size
}
