//! Output face records and the box normalization they carry.

use anyhow::{Context, Result};
use faces_vision::FaceRegion;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Emitted boxes are this much larger than the raw detection.
pub const BOX_SCALING: f64 = 1.65;
/// Decimal places kept in the normalized geometry.
pub const PRECISION: usize = 5;
/// The backends expose no calibrated confidence.
pub const CONFIDENCE: f64 = 1.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceRecord {
    pub id: String,
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
    pub detector: String,
    pub confidence: f64,
    pub encoding: Vec<f32>,
}

/// Normalized centre and margin-expanded size of a region.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizedBox {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

/// Round to `places` decimals from the exact binary value, ties to even.
pub fn round_to(value: f64, places: usize) -> Result<f64> {
    let text = format!("{:.*}", places, value);
    text.parse::<f64>()
        .with_context(|| format!("rounding {} to {} places", value, places))
}

impl NormalizedBox {
    pub fn from_region(region: &FaceRegion, image_width: u32, image_height: u32) -> Result<Self> {
        let width = (region.right - region.left) as f64;
        let height = (region.bottom - region.top) as f64;
        let iw = image_width as f64;
        let ih = image_height as f64;

        Ok(Self {
            x: round_to((region.left as f64 + width / 2.0) / iw, PRECISION)?,
            y: round_to((region.top as f64 + height / 2.0) / ih, PRECISION)?,
            w: round_to(width * BOX_SCALING / iw, PRECISION)?,
            h: round_to(height * BOX_SCALING / ih, PRECISION)?,
        })
    }
}

impl FaceRecord {
    /// Record with a fresh random id.
    pub fn new(
        region: &FaceRegion,
        encoding: Vec<f32>,
        image_width: u32,
        image_height: u32,
        detector: &str,
    ) -> Result<Self> {
        let b = NormalizedBox::from_region(region, image_width, image_height)?;
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            x: b.x,
            y: b.y,
            w: b.w,
            h: b.h,
            detector: detector.to_string(),
            confidence: CONFIDENCE,
            encoding,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(top: i32, right: i32, bottom: i32, left: i32) -> FaceRegion {
        FaceRegion {
            top,
            right,
            bottom,
            left,
            score: 0.9,
            landmarks: None,
        }
    }

    #[test]
    fn normalizes_square_face() {
        let b = NormalizedBox::from_region(&region(100, 600, 500, 200), 1000, 1000).unwrap();
        assert_eq!(b.x, 0.4);
        assert_eq!(b.y, 0.3);
        assert_eq!(b.w, 0.66);
        assert_eq!(b.h, 0.66);
    }

    #[test]
    fn normalizes_per_axis() {
        // 640x480, box 64 wide x 48 high centred at (96, 72).
        let b = NormalizedBox::from_region(&region(48, 128, 96, 64), 640, 480).unwrap();
        assert_eq!(b.x, 0.15);
        assert_eq!(b.y, 0.15);
        assert_eq!(b.w, round_to(64.0 * 1.65 / 640.0, 5).unwrap());
        assert_eq!(b.w, 0.165);
        assert_eq!(b.h, 0.165);
    }

    #[test]
    fn rounds_to_five_places() {
        // Thirds and sevenths.
        let b = NormalizedBox::from_region(&region(0, 100, 100, 0), 300, 700).unwrap();
        assert_eq!(b.x, 0.16667);
        assert_eq!(b.y, 0.07143);
        assert_eq!(b.w, 0.55);
        assert_eq!(b.h, 0.23571);
    }

    #[test]
    fn exact_ties_round_to_even() {
        // 16 / 1024 = 0.015625 exactly.
        let b = NormalizedBox::from_region(&region(0, 32, 32, 0), 1024, 1024).unwrap();
        assert_eq!(b.x, 0.01562);
        assert_eq!(b.y, 0.01562);
        assert_eq!(round_to(0.25, 1).unwrap(), 0.2);
        assert_eq!(round_to(0.75, 1).unwrap(), 0.8);
    }

    #[test]
    fn rounds_the_stored_value_not_its_decimal_spelling() {
        // 5.5 / 4000 and 2 * 1.65 / 4000 are stored just below the
        // halfway point, so they round down.
        let b = NormalizedBox::from_region(&region(0, 11, 2, 0), 4000, 4000).unwrap();
        assert_eq!(b.x, 0.00137);
        assert_eq!(b.h, 0.00082);
        assert_eq!(round_to(5.5 / 4000.0, 5).unwrap(), 0.00137);
        assert_eq!(round_to(2.0 * 1.65 / 4000.0, 5).unwrap(), 0.00082);
    }

    #[test]
    fn expanded_box_may_exceed_image() {
        let b = NormalizedBox::from_region(&region(0, 100, 100, 0), 100, 100).unwrap();
        assert_eq!(b.w, 1.65);
        assert_eq!(b.x, 0.5);
    }

    #[test]
    fn record_fields() {
        let r = region(100, 600, 500, 200);
        let a = FaceRecord::new(&r, vec![0.5; 128], 1000, 1000, "faces-vision@0.1.0").unwrap();
        let b = FaceRecord::new(&r, vec![0.5; 128], 1000, 1000, "faces-vision@0.1.0").unwrap();

        assert_eq!(a.confidence, 1.0);
        assert_eq!(a.detector, "faces-vision@0.1.0");
        assert_eq!(a.encoding.len(), 128);
        assert_ne!(a.id, b.id);
        assert!(Uuid::parse_str(&a.id).is_ok());
        assert_eq!((a.x, a.y, a.w, a.h), (b.x, b.y, b.w, b.h));
    }

    #[test]
    fn serializes_schema_fields() {
        let record =
            FaceRecord::new(&region(0, 10, 10, 0), vec![0.25, -0.5], 20, 20, "lib@1").unwrap();
        let value = serde_json::to_value(&record).unwrap();
        let obj = value.as_object().unwrap();
        for key in ["id", "x", "y", "w", "h", "detector", "confidence", "encoding"] {
            assert!(obj.contains_key(key), "missing {}", key);
        }
        assert_eq!(obj.len(), 8);
        assert_eq!(value["encoding"], serde_json::json!([0.25, -0.5]));
        assert_eq!(value["x"], serde_json::json!(0.25));
        assert_eq!(value["w"], serde_json::json!(0.825));
    }
}
