use std::fmt;
use std::str::FromStr;

use anyhow::Result;
use image::RgbImage;

/// Face region detection algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DetectorModel {
    /// Fast CPU cascade over classical image features.
    Hog,
    /// Deep-learning detector, slower with better recall.
    #[default]
    Cnn,
}

impl DetectorModel {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectorModel::Hog => "hog",
            DetectorModel::Cnn => "cnn",
        }
    }
}

impl fmt::Display for DetectorModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DetectorModel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hog" => Ok(DetectorModel::Hog),
            "cnn" => Ok(DetectorModel::Cnn),
            other => Err(format!(
                "unknown detector model '{other}', expected \"hog\" or \"cnn\""
            )),
        }
    }
}

/// A detected face in pixel space, top-left origin.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceRegion {
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
    pub left: i32,
    /// Detector score, backend specific scale.
    pub score: f32,
    /// 5 points: x1,y1,...,x5,y5 in pixels (left eye, right eye, nose, mouth corners).
    pub landmarks: Option<[f32; 10]>,
}

impl FaceRegion {
    /// Build a region from a float `[x, y, w, h]` box, trimmed to the image bounds.
    pub fn from_xywh(bbox: [f32; 4], score: f32, width: u32, height: u32) -> Self {
        let [x, y, w, h] = bbox;
        Self {
            top: (y.round() as i32).max(0),
            right: ((x + w).round() as i32).min(width as i32),
            bottom: ((y + h).round() as i32).min(height as i32),
            left: (x.round() as i32).max(0),
            score,
            landmarks: None,
        }
    }

    pub fn with_landmarks(mut self, landmarks: [f32; 10]) -> Self {
        self.landmarks = Some(landmarks);
        self
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }

    /// Regions trimmed down to nothing carry no face.
    pub fn is_empty(&self) -> bool {
        self.width() <= 0 || self.height() <= 0
    }
}

/// Face detection and embedding capability the extraction pipeline runs on.
pub trait FaceBackend {
    /// Locate faces, enlarging the image `upsample` times (x2 each) first.
    fn detect(
        &mut self,
        img: &RgbImage,
        upsample: u32,
        model: DetectorModel,
    ) -> Result<Vec<FaceRegion>>;

    /// One embedding per region, in region order.
    fn encode(&mut self, img: &RgbImage, regions: &[FaceRegion], model: &str)
        -> Result<Vec<Vec<f32>>>;

    /// `<library-name>@<version>` of the code producing regions and embeddings.
    fn detector_tag(&self) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_detector_model() {
        assert_eq!("hog".parse::<DetectorModel>(), Ok(DetectorModel::Hog));
        assert_eq!("cnn".parse::<DetectorModel>(), Ok(DetectorModel::Cnn));
        assert!("CNN".parse::<DetectorModel>().is_err());
        assert!("yolo".parse::<DetectorModel>().is_err());
        assert_eq!(DetectorModel::default(), DetectorModel::Cnn);
        assert_eq!(DetectorModel::Hog.to_string(), "hog");
    }

    #[test]
    fn region_is_trimmed_to_image() {
        let region = FaceRegion::from_xywh([-10.4, -3.0, 120.0, 80.0], 0.9, 100, 60);
        assert_eq!(region.left, 0);
        assert_eq!(region.top, 0);
        assert_eq!(region.right, 100);
        assert_eq!(region.bottom, 60);
        assert_eq!(region.width(), 100);
        assert_eq!(region.height(), 60);
        assert!(region.landmarks.is_none());
    }

    #[test]
    fn region_rounds_to_pixels() {
        let region = FaceRegion::from_xywh([10.6, 20.2, 30.0, 40.0], 0.9, 640, 480);
        assert_eq!((region.top, region.right, region.bottom, region.left), (20, 41, 60, 11));
        assert!(!region.is_empty());
    }

    #[test]
    fn region_outside_image_is_empty() {
        let region = FaceRegion::from_xywh([200.0, 10.0, 20.0, 20.0], 0.9, 100, 100);
        assert!(region.is_empty());
    }
}
