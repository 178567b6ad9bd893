//! YuNet (2023mar) output decoding.
//!
//! The network emits twelve tensors, four groups of three feature levels
//! (strides 8, 16, 32), in the order `cls, obj, bbox, kps`. Each level is a
//! dense grid of `(input / stride)^2` cells. Per cell:
//!
//! ```text
//! score = sqrt(clamp(cls) * clamp(obj))
//! cx    = (col + dx) * stride        w = exp(dw) * stride
//! cy    = (row + dy) * stride        h = exp(dh) * stride
//! lm_k  = ((col + lx_k) * stride, (row + ly_k) * stride)
//! ```
//!
//! Decoded coordinates are pixels on the square detector canvas.

use anyhow::{bail, Result};
use ndarray::{Array2, ArrayView2};

pub const STRIDES: [usize; 3] = [8, 16, 32];

#[derive(Debug, Clone, PartialEq)]
pub struct RawDetection {
    /// x, y, w, h in canvas pixels
    pub bbox: [f32; 4],
    pub score: f32,
    /// 5 points: x1,y1,...,x5,y5 in canvas pixels
    pub landmarks: [f32; 10],
}

/// One feature level's tensors, reshaped to `[cells, channels]`.
#[derive(Debug, Clone)]
pub struct Level {
    pub stride: usize,
    pub scores: Array2<f32>,
    pub boxes: Array2<f32>,
    pub landmarks: Array2<f32>,
}

fn tensor(
    outputs: &[(&[i64], &[f32])],
    index: usize,
    cells: usize,
    channels: usize,
) -> Result<Array2<f32>> {
    let Some((shape, data)) = outputs.get(index) else {
        bail!("missing yunet output {}", index);
    };
    if shape.len() != 3
        || shape[0] != 1
        || shape[1] as usize != cells
        || shape[2] as usize != channels
    {
        bail!(
            "yunet output {} has shape {:?}, expected [1, {}, {}]",
            index,
            shape,
            cells,
            channels
        );
    }
    Ok(Array2::from_shape_vec((cells, channels), data.to_vec())?)
}

/// Group raw session outputs into per-stride levels with fused scores.
pub fn parse_outputs(outputs: &[(&[i64], &[f32])], input_size: usize) -> Result<Vec<Level>> {
    if outputs.len() != 12 {
        bail!("yunet produced {} outputs, expected 12", outputs.len());
    }

    STRIDES
        .iter()
        .enumerate()
        .map(|(i, &stride)| {
            let side = input_size / stride;
            let cells = side * side;
            let cls = tensor(outputs, i, cells, 1)?;
            let obj = tensor(outputs, i + 3, cells, 1)?;
            let scores = fuse_scores(cls.view(), obj.view());
            Ok(Level {
                stride,
                scores,
                boxes: tensor(outputs, i + 6, cells, 4)?,
                landmarks: tensor(outputs, i + 9, cells, 10)?,
            })
        })
        .collect()
}

fn fuse_scores(cls: ArrayView2<f32>, obj: ArrayView2<f32>) -> Array2<f32> {
    let mut fused = cls.to_owned();
    fused.zip_mut_with(&obj, |c, &o| {
        *c = ((*c).clamp(0.0, 1.0) * o.clamp(0.0, 1.0)).sqrt();
    });
    fused
}

/// Decode every cell whose fused score reaches `score_threshold`.
pub fn decode(levels: &[Level], score_threshold: f32, input_size: usize) -> Vec<RawDetection> {
    let mut detections = Vec::new();

    for level in levels {
        let side = input_size / level.stride;
        let stride = level.stride as f32;

        for (idx, &score) in level.scores.column(0).iter().enumerate() {
            if score < score_threshold {
                continue;
            }
            let row = (idx / side) as f32;
            let col = (idx % side) as f32;
            let b = level.boxes.row(idx);

            let cx = (col + b[0]) * stride;
            let cy = (row + b[1]) * stride;
            let w = b[2].exp() * stride;
            let h = b[3].exp() * stride;

            let kps = level.landmarks.row(idx);
            let mut landmarks = [0.0f32; 10];
            for k in 0..5 {
                landmarks[k * 2] = (col + kps[k * 2]) * stride;
                landmarks[k * 2 + 1] = (row + kps[k * 2 + 1]) * stride;
            }

            detections.push(RawDetection {
                bbox: [cx - w / 2.0, cy - h / 2.0, w, h],
                score,
                landmarks,
            });
        }
    }

    detections
}
