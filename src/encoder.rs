use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, TryLockError};

use anyhow::{Context, Result};
use findme_vision::{Detection, DetectorSettings, ModelPaths, Pipeline};

use crate::filter::{BoundingBox, DetectedFace};
use crate::metric::Embedding;
use crate::scanner::FaceEncoder;

/// `FaceEncoder` backed by the YuNet + SFace pipeline.
///
/// ONNX sessions need exclusive access while running, so each pipeline sits
/// behind a mutex. With a pool, calls are spread round-robin and skip any
/// pipeline still held by an earlier call, such as one that outlived its
/// timeout.
pub struct VisionEncoder {
    pipelines: Vec<Mutex<Pipeline>>,
    next: AtomicUsize,
}

impl VisionEncoder {
    pub fn new(paths: &ModelPaths, settings: DetectorSettings) -> Result<Self> {
        Self::with_pool(paths, settings, 1)
    }

    /// Load `size` independent pipelines so parallel workers do not queue
    /// on one session.
    pub fn with_pool(paths: &ModelPaths, settings: DetectorSettings, size: usize) -> Result<Self> {
        let pipelines = (0..size.max(1))
            .map(|_| Pipeline::new(paths, settings).map(Mutex::new))
            .collect::<Result<Vec<_>>>()
            .context("Failed to initialize face recognition pipeline")?;
        log::debug!("loaded {} pipeline(s)", pipelines.len());
        Ok(Self {
            pipelines,
            next: AtomicUsize::new(0),
        })
    }

    fn pipeline(&self) -> MutexGuard<'_, Pipeline> {
        let start = self.next.fetch_add(1, Ordering::Relaxed);
        acquire(&self.pipelines, start)
    }
}

/// Lock the first free slot at or after `start`, wrapping around. Blocks on
/// `slots[start % len]` only when every slot is held.
pub(crate) fn acquire<T>(slots: &[Mutex<T>], start: usize) -> MutexGuard<'_, T> {
    let len = slots.len();
    for i in 0..len {
        match slots[(start + i) % len].try_lock() {
            Ok(guard) => return guard,
            // sessions keep no state between runs, so a poisoned lock is still usable
            Err(TryLockError::Poisoned(e)) => return e.into_inner(),
            Err(TryLockError::WouldBlock) => continue,
        }
    }

    log::warn!(
        "all {} pipeline(s) busy, waiting; a timed-out encoder call may still hold one",
        len
    );
    slots[start % len]
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}

fn open(path: &Path) -> Result<image::DynamicImage> {
    image::open(path).with_context(|| format!("reading image {}", path.display()))
}

pub(crate) fn to_bbox(d: &Detection) -> BoundingBox {
    let px = |v: f32| v.max(0.0).round() as u32;
    BoundingBox {
        x: px(d.bbox[0]),
        y: px(d.bbox[1]),
        width: px(d.bbox[2]),
        height: px(d.bbox[3]),
    }
}

impl FaceEncoder for VisionEncoder {
    fn encode_reference(&self, path: &Path) -> Result<Embedding> {
        let img = open(path)?;
        let (detection, embedding) = self
            .pipeline()
            .process_image(&img)
            .with_context(|| format!("no usable face in {}", path.display()))?;
        log::debug!(
            "reference face: score {:.3}, bbox {:?}",
            detection.score,
            detection.bbox
        );
        Ok(Embedding(embedding.vector))
    }

    fn detect_faces(&self, path: &Path) -> Result<Vec<DetectedFace>> {
        let img = open(path)?;
        let faces = self.pipeline().detect_all(&img)?;
        Ok(faces
            .into_iter()
            .map(|(d, e)| DetectedFace {
                bbox: to_bbox(&d),
                embedding: Embedding(e.vector),
            })
            .collect())
    }
}
