//! YuNet detector post-processing.
//!
//! YuNet is anchor-free: every grid cell of the three feature maps (strides 8,
//! 16 and 32) predicts one face. Per stride the network emits
//! - cls: [1, H*W, 1] classification score
//! - obj: [1, H*W, 1] objectness score
//! - bbox: [1, H*W, 4] (dx, dy, log w, log h) in stride units
//! - kps: [1, H*W, 10] 5 landmark offsets in stride units
//!
//! Output order is cls_8, cls_16, cls_32, obj_8, ..., bbox_8, ..., kps_8, ...

use anyhow::Result;
use ndarray::Array2;

pub const STRIDES: [usize; 3] = [8, 16, 32];

/// Detection in canvas pixel space.
#[derive(Debug, Clone)]
pub struct RawDetection {
    pub bbox: [f32; 4], // x, y, w, h
    pub score: f32,
    pub landmarks: [f32; 10],
}

/// Decoded tensors of one stride.
#[derive(Debug)]
pub struct StrideOutput {
    pub stride: usize,
    pub scores: Array2<f32>,    // [H*W, 1], already cls/obj fused
    pub bboxes: Array2<f32>,    // [H*W, 4]
    pub landmarks: Array2<f32>, // [H*W, 10]
}

/// Fused YuNet confidence: geometric mean of the clamped cls and obj scores.
pub fn fuse_scores(cls: f32, obj: f32) -> f32 {
    (cls.clamp(0.0, 1.0) * obj.clamp(0.0, 1.0)).sqrt()
}

fn tensor(
    outputs: &[(&[i64], &[f32])],
    idx: usize,
    kind: &str,
    expected_count: usize,
    width: usize,
) -> Result<Array2<f32>> {
    let Some((shape, data)) = outputs.get(idx) else {
        anyhow::bail!("Missing {} output at index {}", kind, idx);
    };
    if shape.len() != 3 || shape[0] != 1 || shape[2] != width as i64 {
        anyhow::bail!(
            "Unexpected {} shape at index {}: {:?}, expected [1, {}, {}]",
            kind,
            idx,
            shape,
            expected_count,
            width
        );
    }
    if shape[1] as usize != expected_count {
        anyhow::bail!(
            "Expected {} locations for {} at index {}, got {}",
            expected_count,
            kind,
            idx,
            shape[1]
        );
    }
    Ok(Array2::from_shape_vec((expected_count, width), data.to_vec())?)
}

/// Split the 12 raw YuNet outputs of a square `input_size` canvas per stride.
pub fn parse_outputs(outputs: &[(&[i64], &[f32])], input_size: usize) -> Result<Vec<StrideOutput>> {
    if input_size % 32 != 0 {
        anyhow::bail!("YuNet input size {} is not a multiple of 32", input_size);
    }

    let n = STRIDES.len();
    let mut parsed = Vec::with_capacity(n);
    for (i, &stride) in STRIDES.iter().enumerate() {
        let grid = input_size / stride;
        let count = grid * grid;

        let cls = tensor(outputs, i, "cls", count, 1)?;
        let obj = tensor(outputs, i + n, "obj", count, 1)?;
        let bboxes = tensor(outputs, i + 2 * n, "bbox", count, 4)?;
        let landmarks = tensor(outputs, i + 3 * n, "kps", count, 10)?;

        let mut scores = cls;
        scores.zip_mut_with(&obj, |c, &o| *c = fuse_scores(*c, o));

        parsed.push(StrideOutput {
            stride,
            scores,
            bboxes,
            landmarks,
        });
    }
    Ok(parsed)
}

/// Decode grid predictions scoring at least `score_threshold`.
///
/// cx = (col + dx) * stride, cy = (row + dy) * stride,
/// w = exp(dw) * stride, h = exp(dh) * stride
pub fn decode_detections(
    strides: &[StrideOutput],
    score_threshold: f32,
    input_size: usize,
) -> Result<Vec<RawDetection>> {
    let mut detections = Vec::new();

    for out in strides {
        let grid = input_size / out.stride;
        let stride = out.stride as f32;
        if out.scores.nrows() != grid * grid {
            anyhow::bail!(
                "Expected {} boxes for stride {} ({}x{} grid), got {}",
                grid * grid,
                out.stride,
                grid,
                grid,
                out.scores.nrows()
            );
        }

        for row in 0..grid {
            for col in 0..grid {
                let idx = row * grid + col;
                let score = out.scores[[idx, 0]];
                if score < score_threshold {
                    continue;
                }

                let cx = (col as f32 + out.bboxes[[idx, 0]]) * stride;
                let cy = (row as f32 + out.bboxes[[idx, 1]]) * stride;
                let w = out.bboxes[[idx, 2]].exp() * stride;
                let h = out.bboxes[[idx, 3]].exp() * stride;

                let mut landmarks = [0.0f32; 10];
                for k in 0..5 {
                    landmarks[k * 2] = (col as f32 + out.landmarks[[idx, k * 2]]) * stride;
                    landmarks[k * 2 + 1] = (row as f32 + out.landmarks[[idx, k * 2 + 1]]) * stride;
                }

                detections.push(RawDetection {
                    bbox: [cx - w / 2.0, cy - h / 2.0, w, h],
                    score,
                    landmarks,
                });
            }
        }
    }

    Ok(detections)
}
