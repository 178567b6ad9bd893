use crate::yunet;
use anyhow::{bail, Result};
use image::{imageops::FilterType, DynamicImage, GenericImageView, RgbImage};
use ndarray::Array4;
use ort::{session::Session, value::Value};

/// YuNet runs on a fixed square canvas.
pub const DETECTOR_INPUT: u32 = 640;
/// SFace input side; the ArcFace reference landmarks are defined at this size.
pub const RECOGNIZER_INPUT: u32 = 112;

/// Detection result from YuNet, in source image pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub bbox: [f32; 4], // x, y, w, h
    pub score: f32,
    pub landmarks: [f32; 10], // 5 points: x1,y1,x2,y2,...,x5,y5
}

/// L2-normalized face embedding (SFace output).
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub vector: Vec<f32>,
}

/// Pack an RGB image into a `[1, 3, H, W]` BGR tensor with values in [0, 255].
fn bgr_planes(img: &RgbImage) -> Result<Array4<f32>> {
    let (w, h) = img.dimensions();
    let plane = (w * h) as usize;
    let mut data = vec![0.0f32; 3 * plane];

    for (i, px) in img.pixels().enumerate() {
        data[i] = px[2] as f32;
        data[plane + i] = px[1] as f32;
        data[2 * plane + i] = px[0] as f32;
    }

    Ok(Array4::from_shape_vec((1, 3, h as usize, w as usize), data)?)
}

/// Letterbox `img` into the detector canvas. Returns the canvas, the scale
/// applied and the padding offset.
fn letterbox(img: &DynamicImage) -> (RgbImage, f32, (u32, u32)) {
    let (w, h) = img.dimensions();
    let scale = DETECTOR_INPUT as f32 / w.max(h) as f32;
    let new_w = ((w as f32 * scale) as u32).max(1);
    let new_h = ((h as f32 * scale) as u32).max(1);
    let resized = img.resize_exact(new_w, new_h, FilterType::Triangle).to_rgb8();

    let mut canvas = RgbImage::new(DETECTOR_INPUT, DETECTOR_INPUT);
    let offset = ((DETECTOR_INPUT - new_w) / 2, (DETECTOR_INPUT - new_h) / 2);
    image::imageops::overlay(&mut canvas, &resized, offset.0 as i64, offset.1 as i64);
    (canvas, scale, offset)
}

/// Detect faces in an image using YuNet.
///
/// Detections are returned in source image coordinates, highest score first
/// after NMS. That order is what downstream matching iterates.
pub fn detect_faces(
    session: &mut Session,
    img: &DynamicImage,
    score_threshold: f32,
    nms_threshold: f32,
) -> Result<Vec<Detection>> {
    let (orig_w, orig_h) = img.dimensions();
    if orig_w == 0 || orig_h == 0 {
        bail!("image has zero dimensions");
    }

    let (canvas, scale, (off_x, off_y)) = letterbox(img);
    let input_tensor = Value::from_array(bgr_planes(&canvas)?)?;
    let outputs = session.run(ort::inputs![input_tensor])?;

    let mut owned: Vec<(Vec<i64>, Vec<f32>)> = Vec::new();
    for (_name, output) in outputs.iter() {
        let (shape, data) = output.try_extract_tensor::<f32>()?;
        owned.push((shape.iter().copied().collect(), data.to_vec()));
    }
    let refs: Vec<(&[i64], &[f32])> = owned
        .iter()
        .map(|(s, d)| (s.as_slice(), d.as_slice()))
        .collect();

    let levels = yunet::parse_outputs(&refs, DETECTOR_INPUT as usize)?;
    let raw = yunet::decode(&levels, score_threshold, DETECTOR_INPUT as usize);
    log::debug!("yunet: {} raw detections above {:.2}", raw.len(), score_threshold);

    // Undo letterboxing.
    let to_src_x = |v: f32| (v - off_x as f32) / scale;
    let to_src_y = |v: f32| (v - off_y as f32) / scale;
    let detections: Vec<Detection> = raw
        .into_iter()
        .map(|d| {
            let mut landmarks = [0.0f32; 10];
            for k in 0..5 {
                landmarks[k * 2] = to_src_x(d.landmarks[k * 2]);
                landmarks[k * 2 + 1] = to_src_y(d.landmarks[k * 2 + 1]);
            }
            Detection {
                bbox: [
                    to_src_x(d.bbox[0]),
                    to_src_y(d.bbox[1]),
                    d.bbox[2] / scale,
                    d.bbox[3] / scale,
                ],
                score: d.score,
                landmarks,
            }
        })
        .collect();

    Ok(nms(&detections, nms_threshold))
}

/// Apply non-maximum suppression to remove overlapping detections.
/// The survivors are ordered by descending score.
pub fn nms(detections: &[Detection], iou_threshold: f32) -> Vec<Detection> {
    let mut sorted = detections.to_vec();
    sorted.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut keep: Vec<Detection> = Vec::with_capacity(sorted.len());
    for det in sorted {
        if keep
            .iter()
            .all(|k| compute_iou(&k.bbox, &det.bbox) <= iou_threshold)
        {
            keep.push(det);
        }
    }
    keep
}

fn compute_iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = (a[0] + a[2]).min(b[0] + b[2]);
    let y2 = (a[1] + a[3]).min(b[1] + b[3]);

    if x2 <= x1 || y2 <= y1 {
        return 0.0;
    }

    let inter = (x2 - x1) * (y2 - y1);
    inter / (a[2] * a[3] + b[2] * b[3] - inter)
}

/// Rotate, scale and crop the face so the eyes land on the ArcFace reference
/// positions of a `size`×`size` crop. Sampling is bilinear; pixels mapped
/// outside the source stay black.
pub fn align_face(img: &DynamicImage, detection: &Detection, size: u32) -> Result<DynamicImage> {
    const REF_LEFT_EYE: (f32, f32) = (38.2946, 51.6963);
    const REF_RIGHT_EYE: (f32, f32) = (73.5318, 51.5014);

    let unit = size as f32 / RECOGNIZER_INPUT as f32;
    let left = (detection.landmarks[0], detection.landmarks[1]);
    let right = (detection.landmarks[2], detection.landmarks[3]);

    let (dx, dy) = (right.0 - left.0, right.1 - left.1);
    let eye_dist = (dx * dx + dy * dy).sqrt();
    if eye_dist < f32::EPSILON {
        bail!("degenerate landmarks: eyes coincide");
    }
    let ref_dist = (REF_RIGHT_EYE.0 - REF_LEFT_EYE.0).hypot(REF_RIGHT_EYE.1 - REF_LEFT_EYE.1);

    // Similarity transform output = s*R(-theta)*input + t
    let scale = unit * ref_dist / eye_dist;
    let theta = dy.atan2(dx);
    let (sin, cos) = theta.sin_cos();
    let (a, b) = (scale * cos, scale * sin);

    let src_center = ((left.0 + right.0) / 2.0, (left.1 + right.1) / 2.0);
    let dst_center = (
        (REF_LEFT_EYE.0 + REF_RIGHT_EYE.0) / 2.0 * unit,
        (REF_LEFT_EYE.1 + REF_RIGHT_EYE.1) / 2.0 * unit,
    );
    let tx = dst_center.0 - (a * src_center.0 + b * src_center.1);
    let ty = dst_center.1 - (-b * src_center.0 + a * src_center.1);

    let src = img.to_rgb8();
    let (src_w, src_h) = src.dimensions();
    let det = a * a + b * b;
    let mut out = RgbImage::new(size, size);

    for (ox, oy, px) in out.enumerate_pixels_mut() {
        let (u, v) = (ox as f32 - tx, oy as f32 - ty);
        let sx = (a * u - b * v) / det;
        let sy = (b * u + a * v) / det;
        if sx < 0.0 || sy < 0.0 || sx >= src_w as f32 || sy >= src_h as f32 {
            continue;
        }

        let (x0, y0) = (sx.floor() as u32, sy.floor() as u32);
        let (x1, y1) = ((x0 + 1).min(src_w - 1), (y0 + 1).min(src_h - 1));
        let (fx, fy) = (sx - x0 as f32, sy - y0 as f32);
        let weights = [
            (x0, y0, (1.0 - fx) * (1.0 - fy)),
            (x1, y0, fx * (1.0 - fy)),
            (x0, y1, (1.0 - fx) * fy),
            (x1, y1, fx * fy),
        ];
        for c in 0..3 {
            let v: f32 = weights
                .iter()
                .map(|&(x, y, w)| src.get_pixel(x, y)[c] as f32 * w)
                .sum();
            px[c] = v.round().clamp(0.0, 255.0) as u8;
        }
    }

    Ok(DynamicImage::ImageRgb8(out))
}

/// Encode an aligned face crop to an L2-normalized embedding using SFace.
pub fn encode_face(session: &mut Session, face_img: &DynamicImage) -> Result<Embedding> {
    let crop = face_img
        .resize_exact(RECOGNIZER_INPUT, RECOGNIZER_INPUT, FilterType::Triangle)
        .to_rgb8();
    let input_tensor = Value::from_array(bgr_planes(&crop)?)?;

    let outputs = session.run(ort::inputs![input_tensor])?;
    let (shape, data) = outputs[0].try_extract_tensor::<f32>()?;

    // Expecting [1, 128]
    let len = if shape.len() == 2 { shape[1] as usize } else { data.len() };
    let mut vector = data[..len].to_vec();

    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        vector.iter_mut().for_each(|x| *x /= norm);
    }

    Ok(Embedding { vector })
}
