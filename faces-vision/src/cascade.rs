//! Fast CPU detector: SeetaFace funnel cascade over classical image features.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{Context, Result};
use image::{GrayImage, RgbImage};

use crate::backend::FaceRegion;
use crate::face::detection_scale;

const MIN_FACE_SIZE: u32 = 20;
const SCORE_THRESHOLD: f64 = 2.0;
const PYRAMID_SCALE_FACTOR: f32 = 0.8;
const WINDOW_STEP: u32 = 4;

pub struct Cascade {
    model: rustface::Model,
}

impl Cascade {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!("cascade model not found at {}", path.display());
        }
        let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        let model = rustface::read_model(BufReader::new(file))
            .map_err(|e| anyhow::anyhow!("reading cascade model {}: {}", path.display(), e))?;
        log::debug!("loaded cascade model from {}", path.display());
        Ok(Self { model })
    }

    /// Detect faces, boxes in original image pixels sorted by descending score.
    pub fn detect(&self, img: &RgbImage, upsample: u32, max_side: u32) -> Vec<FaceRegion> {
        let (width, height) = img.dimensions();
        if width == 0 || height == 0 {
            return vec![];
        }

        let scale = detection_scale(width, height, upsample, max_side);
        let gray = scaled_gray(img, scale);
        log::debug!(
            "hog detector: {}x{} -> {}x{}",
            width,
            height,
            gray.width(),
            gray.height()
        );

        let mut detector = rustface::create_detector_with_model(self.model.clone());
        detector.set_min_face_size(MIN_FACE_SIZE);
        detector.set_score_thresh(SCORE_THRESHOLD);
        detector.set_pyramid_scale_factor(PYRAMID_SCALE_FACTOR);
        detector.set_slide_window_step(WINDOW_STEP, WINDOW_STEP);

        let faces = detector.detect(&rustface::ImageData::new(
            gray.as_raw(),
            gray.width(),
            gray.height(),
        ));

        let mut regions: Vec<FaceRegion> = faces
            .iter()
            .map(|face| {
                let bbox = face.bbox();
                let xywh = rescale_box(
                    [
                        bbox.x() as f32,
                        bbox.y() as f32,
                        bbox.width() as f32,
                        bbox.height() as f32,
                    ],
                    gray.dimensions(),
                    (width, height),
                );
                FaceRegion::from_xywh(xywh, face.score() as f32, width, height)
            })
            .filter(|r| !r.is_empty())
            .collect();

        regions.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        regions
    }
}

/// Map an `[x, y, w, h]` box from the scanned raster back to the original
/// image. Each axis uses the factor actually applied after rounding.
fn rescale_box(xywh: [f32; 4], scanned: (u32, u32), original: (u32, u32)) -> [f32; 4] {
    let sx = scanned.0 as f32 / original.0.max(1) as f32;
    let sy = scanned.1 as f32 / original.1.max(1) as f32;
    [xywh[0] / sx, xywh[1] / sy, xywh[2] / sx, xywh[3] / sy]
}

fn scaled_gray(img: &RgbImage, scale: f32) -> GrayImage {
    let gray = image::imageops::grayscale(img);
    if (scale - 1.0).abs() < f32::EPSILON {
        return gray;
    }
    let w = ((img.width() as f32 * scale).round() as u32).max(1);
    let h = ((img.height() as f32 * scale).round() as u32).max(1);
    image::imageops::resize(&gray, w, h, image::imageops::FilterType::Triangle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scaled_gray_dimensions() {
        let img = RgbImage::from_pixel(30, 20, image::Rgb([90, 90, 90]));
        let up = scaled_gray(&img, 4.0);
        assert_eq!(up.dimensions(), (120, 80));
        assert!(up.get_pixel(60, 40)[0].abs_diff(90) <= 1);

        let same = scaled_gray(&img, 1.0);
        assert_eq!(same.dimensions(), (30, 20));
    }

    #[test]
    fn test_rescale_box_per_axis() {
        assert_eq!(
            rescale_box([60.0, 50.0, 40.0, 50.0], (600, 250), (300, 100)),
            [30.0, 20.0, 20.0, 20.0]
        );
        assert_eq!(
            rescale_box([7.0, 9.0, 20.0, 20.0], (300, 100), (300, 100)),
            [7.0, 9.0, 20.0, 20.0]
        );
    }

    #[test]
    fn test_upsampled_box_maps_to_original_pixels() {
        // Upsampled twice, so the raster is four times larger on each axis.
        let img = RgbImage::from_pixel(90, 30, image::Rgb([0, 0, 0]));
        let gray = scaled_gray(&img, detection_scale(90, 30, 2, 1280));
        assert_eq!(gray.dimensions(), (360, 120));

        let xywh = rescale_box([40.0, 20.0, 80.0, 80.0], gray.dimensions(), img.dimensions());
        let region = FaceRegion::from_xywh(xywh, 3.0, 90, 30);
        assert_eq!(
            (region.left, region.top, region.right, region.bottom),
            (10, 5, 30, 25)
        );
    }

    #[test]
    fn test_missing_cascade_model() {
        let err = Cascade::load(Path::new("/nonexistent/seeta.bin"))
            .err()
            .map(|e| e.to_string())
            .unwrap_or_default();
        assert!(err.contains("cascade model not found"));
    }
}
