use anyhow::{Context, Result};
use image::RgbImage;
use ndarray::Array4;
use ort::{session::Session, value::Value};

use crate::backend::FaceRegion;
use crate::yunet::{self, RawDetection};

/// Side of the square face chip fed to the encoder.
pub const CHIP_SIZE: u32 = 112;

/// Reference eye positions in a 112x112 chip (ArcFace template).
const REF_LEFT_EYE: (f32, f32) = (38.2946, 51.6963);
const REF_RIGHT_EYE: (f32, f32) = (73.5318, 51.5014);

/// Tunables of the CNN detector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectOptions {
    pub score_threshold: f32,
    pub nms_threshold: f32,
    /// Longest side of the raster handed to a detector, after upsampling.
    pub max_input_size: u32,
}

impl Default for DetectOptions {
    fn default() -> Self {
        Self {
            score_threshold: 0.6,
            nms_threshold: 0.3,
            max_input_size: 1280,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelOrder {
    Rgb,
    Bgr,
}

/// Resize factor applied before detection: `2^upsample`, capped so the
/// longest side stays within `max_side`. Never below 1, so images already
/// larger than the cap are scanned at native resolution.
pub fn detection_scale(width: u32, height: u32, upsample: u32, max_side: u32) -> f32 {
    let longest = width.max(height).max(1) as f32;
    let upscale = 2f32.powi(upsample.min(16) as i32);
    upscale.min((max_side as f32 / longest).max(1.0))
}

/// Placement of an image on the square YuNet canvas.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    /// Canvas side, a multiple of 32.
    pub side: u32,
    /// Original pixels to canvas pixels, the same on both axes.
    pub scale: f32,
    pub width: u32,
    pub height: u32,
    pub offset_x: u32,
    pub offset_y: u32,
}

impl Letterbox {
    pub fn new(width: u32, height: u32, upsample: u32, max_side: u32) -> Self {
        let longest = width.max(height).max(1);
        let scale = detection_scale(width, height, upsample, max_side);
        let side = (((longest as f32 * scale).round() as u32).div_ceil(32) * 32).max(32);
        let scale = side as f32 / longest as f32;
        let new_width = ((width as f32 * scale).round() as u32).clamp(1, side);
        let new_height = ((height as f32 * scale).round() as u32).clamp(1, side);
        Self {
            side,
            scale,
            width: new_width,
            height: new_height,
            offset_x: (side - new_width) / 2,
            offset_y: (side - new_height) / 2,
        }
    }

    fn unmap_x(&self, v: f32) -> f32 {
        (v - self.offset_x as f32) / self.scale
    }

    fn unmap_y(&self, v: f32) -> f32 {
        (v - self.offset_y as f32) / self.scale
    }

    /// Canvas detection to a region in original pixels, trimmed to
    /// `width` x `height`.
    pub fn unmap_detection(&self, d: &RawDetection, width: u32, height: u32) -> FaceRegion {
        let bbox = [
            self.unmap_x(d.bbox[0]),
            self.unmap_y(d.bbox[1]),
            d.bbox[2] / self.scale,
            d.bbox[3] / self.scale,
        ];
        let mut landmarks = [0.0f32; 10];
        for i in 0..5 {
            landmarks[i * 2] = self.unmap_x(d.landmarks[i * 2]);
            landmarks[i * 2 + 1] = self.unmap_y(d.landmarks[i * 2 + 1]);
        }
        FaceRegion::from_xywh(bbox, d.score, width, height).with_landmarks(landmarks)
    }
}

/// Pack an RGB raster as a [1, 3, H, W] f32 tensor in [0, 255].
pub fn to_nchw(img: &RgbImage, order: ChannelOrder) -> Result<Array4<f32>> {
    let (w, h) = img.dimensions();
    let pixel_count = (w * h) as usize;
    let mut data = vec![0.0f32; 3 * pixel_count];

    let (first, rest) = data.split_at_mut(pixel_count);
    let (second, third) = rest.split_at_mut(pixel_count);
    let (r_channel, g_channel, b_channel) = match order {
        ChannelOrder::Rgb => (first, second, third),
        ChannelOrder::Bgr => (third, second, first),
    };

    for (i, px) in img.as_raw().chunks_exact(3).enumerate() {
        r_channel[i] = px[0] as f32;
        g_channel[i] = px[1] as f32;
        b_channel[i] = px[2] as f32;
    }

    Ok(Array4::from_shape_vec((1, 3, h as usize, w as usize), data)?)
}

/// Detect faces with the YuNet model, boxes in original image pixels.
pub fn detect_faces(
    session: &mut Session,
    img: &RgbImage,
    upsample: u32,
    opts: &DetectOptions,
) -> Result<Vec<FaceRegion>> {
    let (orig_width, orig_height) = img.dimensions();
    if orig_width == 0 || orig_height == 0 {
        return Ok(vec![]);
    }

    // Square canvas sized by the upsample factor, aspect preserved by padding.
    let lb = Letterbox::new(orig_width, orig_height, upsample, opts.max_input_size);
    let side = lb.side;

    let resized = image::imageops::resize(
        img,
        lb.width,
        lb.height,
        image::imageops::FilterType::Triangle,
    );
    let mut canvas = RgbImage::new(side, side);
    image::imageops::overlay(&mut canvas, &resized, lb.offset_x as i64, lb.offset_y as i64);

    log::debug!(
        "cnn detector: {}x{} -> canvas {} (scale {:.3})",
        orig_width,
        orig_height,
        side,
        lb.scale
    );

    let input_tensor = Value::from_array(to_nchw(&canvas, ChannelOrder::Bgr)?)?;
    let outputs = session.run(ort::inputs![input_tensor])?;

    let mut output_data: Vec<(Vec<i64>, Vec<f32>)> = Vec::new();
    for (_name, output) in outputs.iter() {
        let (shape, data) = output.try_extract_tensor::<f32>()?;
        output_data.push((shape.iter().copied().collect(), data.to_vec()));
    }
    let output_refs: Vec<(&[i64], &[f32])> = output_data
        .iter()
        .map(|(s, d)| (s.as_slice(), d.as_slice()))
        .collect();

    let strides = yunet::parse_outputs(&output_refs, side as usize)?;
    let raw = yunet::decode_detections(&strides, opts.score_threshold, side as usize)?;
    let kept = nms(&raw, opts.nms_threshold);

    let regions = kept
        .iter()
        .map(|d| lb.unmap_detection(d, orig_width, orig_height))
        .filter(|r| !r.is_empty())
        .collect();

    Ok(regions)
}

/// Non-maximum suppression, survivors sorted by descending score.
pub fn nms(detections: &[RawDetection], iou_threshold: f32) -> Vec<RawDetection> {
    let mut sorted = detections.to_vec();
    sorted.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<RawDetection> = Vec::new();
    for candidate in sorted {
        if keep
            .iter()
            .all(|k| compute_iou(&k.bbox, &candidate.bbox) <= iou_threshold)
        {
            keep.push(candidate);
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
    let union = a[2] * a[3] + b[2] * b[3] - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

/// Forward map `out = [a b; c d] * in + [tx ty]`, sampled inversely with
/// bilinear interpolation. Pixels mapping outside the source stay black.
#[allow(clippy::too_many_arguments)]
fn warp_affine(
    img: &RgbImage,
    a: f32,
    b: f32,
    c: f32,
    d: f32,
    tx: f32,
    ty: f32,
    size: u32,
) -> RgbImage {
    let (img_w, img_h) = img.dimensions();
    let mut output = RgbImage::new(size, size);
    let det = a * d - b * c;
    if det.abs() < f32::EPSILON || img_w == 0 || img_h == 0 {
        return output;
    }

    for out_y in 0..size {
        for out_x in 0..size {
            let tmp_x = out_x as f32 - tx;
            let tmp_y = out_y as f32 - ty;
            let in_x = (d * tmp_x - b * tmp_y) / det;
            let in_y = (-c * tmp_x + a * tmp_y) / det;

            if in_x < 0.0 || in_y < 0.0 || in_x >= img_w as f32 || in_y >= img_h as f32 {
                continue;
            }

            let x0 = in_x.floor() as u32;
            let y0 = in_y.floor() as u32;
            let x1 = (x0 + 1).min(img_w - 1);
            let y1 = (y0 + 1).min(img_h - 1);
            let fx = in_x - x0 as f32;
            let fy = in_y - y0 as f32;

            let p00 = img.get_pixel(x0, y0);
            let p10 = img.get_pixel(x1, y0);
            let p01 = img.get_pixel(x0, y1);
            let p11 = img.get_pixel(x1, y1);

            let w00 = (1.0 - fx) * (1.0 - fy);
            let w10 = fx * (1.0 - fy);
            let w01 = (1.0 - fx) * fy;
            let w11 = fx * fy;

            let mut px = [0u8; 3];
            for (ch, v) in px.iter_mut().enumerate() {
                let s = p00[ch] as f32 * w00
                    + p10[ch] as f32 * w10
                    + p01[ch] as f32 * w01
                    + p11[ch] as f32 * w11;
                *v = s.round().clamp(0.0, 255.0) as u8;
            }
            output.put_pixel(out_x, out_y, image::Rgb(px));
        }
    }

    output
}

/// Rotate and scale so the eyes land on the reference template.
pub fn align_face(img: &RgbImage, landmarks: &[f32; 10], size: u32) -> RgbImage {
    let left_eye = (landmarks[0], landmarks[1]);
    let right_eye = (landmarks[2], landmarks[3]);

    let eye_dx = right_eye.0 - left_eye.0;
    let eye_dy = right_eye.1 - left_eye.1;
    let angle = eye_dy.atan2(eye_dx);
    let eye_dist = (eye_dx * eye_dx + eye_dy * eye_dy).sqrt();

    let k = size as f32 / CHIP_SIZE as f32;
    let ref_dx = REF_RIGHT_EYE.0 - REF_LEFT_EYE.0;
    let ref_dy = REF_RIGHT_EYE.1 - REF_LEFT_EYE.1;
    let ref_dist = (ref_dx * ref_dx + ref_dy * ref_dy).sqrt();
    let ref_angle = ref_dy.atan2(ref_dx);

    if eye_dist <= f32::EPSILON {
        return RgbImage::new(size, size);
    }
    let scale = k * ref_dist / eye_dist;
    let rot = ref_angle - angle;

    let a = scale * rot.cos();
    let b = -scale * rot.sin();
    let c = scale * rot.sin();
    let d = scale * rot.cos();

    let eye_center = ((left_eye.0 + right_eye.0) / 2.0, (left_eye.1 + right_eye.1) / 2.0);
    let ref_center = (
        k * (REF_LEFT_EYE.0 + REF_RIGHT_EYE.0) / 2.0,
        k * (REF_LEFT_EYE.1 + REF_RIGHT_EYE.1) / 2.0,
    );
    let tx = ref_center.0 - (a * eye_center.0 + b * eye_center.1);
    let ty = ref_center.1 - (c * eye_center.0 + d * eye_center.1);

    warp_affine(img, a, b, c, d, tx, ty, size)
}

/// Square crop centred on the region, used when no landmarks are known.
pub fn crop_face(img: &RgbImage, region: &FaceRegion, size: u32) -> RgbImage {
    let side = region.width().max(region.height()).max(1) as f32;
    let cx = (region.left + region.right) as f32 / 2.0;
    let cy = (region.top + region.bottom) as f32 / 2.0;

    let scale = size as f32 / side;
    let tx = size as f32 / 2.0 - scale * cx;
    let ty = size as f32 / 2.0 - scale * cy;

    warp_affine(img, scale, 0.0, 0.0, scale, tx, ty, size)
}

/// Face chip for `region`: landmark alignment when available, else a crop.
pub fn face_chip(img: &RgbImage, region: &FaceRegion) -> RgbImage {
    match &region.landmarks {
        Some(landmarks) => align_face(img, landmarks, CHIP_SIZE),
        None => crop_face(img, region, CHIP_SIZE),
    }
}

/// In-place L2 normalization; zero vectors are left untouched.
pub fn l2_normalize(values: &mut [f32]) {
    let norm = values.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        values.iter_mut().for_each(|v| *v /= norm);
    }
}

/// Encode a 112x112 chip to an L2-normalized SFace embedding.
pub fn encode_face(session: &mut Session, chip: &RgbImage) -> Result<Vec<f32>> {
    let chip = if chip.dimensions() == (CHIP_SIZE, CHIP_SIZE) {
        chip.clone()
    } else {
        image::imageops::resize(
            chip,
            CHIP_SIZE,
            CHIP_SIZE,
            image::imageops::FilterType::Triangle,
        )
    };

    let input_tensor = Value::from_array(to_nchw(&chip, ChannelOrder::Rgb)?)?;
    let outputs = session.run(ort::inputs![input_tensor])?;
    let (shape, data) = outputs[0]
        .try_extract_tensor::<f32>()
        .context("extracting embedding tensor")?;

    // [1, D] or flat [D]
    let dim = if shape.len() == 2 {
        shape[1] as usize
    } else {
        data.len()
    };
    if dim == 0 || dim > data.len() {
        anyhow::bail!(
            "Unexpected embedding shape {:?}",
            shape.iter().copied().collect::<Vec<i64>>()
        );
    }

    let mut embedding = data[..dim].to_vec();
    l2_normalize(&mut embedding);
    Ok(embedding)
}
