use anyhow::{Context, Result};
use image::RgbImage;
use ort::session::Session;

use crate::backend::{DetectorModel, FaceBackend, FaceRegion};
use crate::cascade::Cascade;
use crate::face::{self, DetectOptions};
use crate::model::{self, ModelPaths};

/// Name of the only encoder model this backend ships.
pub const DEFAULT_ENCODER: &str = "default";

/// ONNX/cascade backed detect → align → encode.
///
/// Models are loaded on first use, so a `hog` run never touches the CNN
/// detector weights.
pub struct Pipeline {
    paths: ModelPaths,
    options: DetectOptions,
    detector: Option<Session>,
    cascade: Option<Cascade>,
    encoder: Option<Session>,
}

impl Pipeline {
    pub fn new(paths: ModelPaths, options: DetectOptions) -> Self {
        Self {
            paths,
            options,
            detector: None,
            cascade: None,
            encoder: None,
        }
    }

    fn detector(&mut self) -> Result<&mut Session> {
        if self.detector.is_none() {
            self.detector = Some(model::detector_session(&self.paths.detector)?);
        }
        self.detector.as_mut().context("detector session unavailable")
    }

    fn cascade(&mut self) -> Result<&Cascade> {
        if self.cascade.is_none() {
            self.cascade = Some(Cascade::load(&self.paths.cascade)?);
        }
        self.cascade.as_ref().context("cascade model unavailable")
    }

    fn encoder(&mut self) -> Result<&mut Session> {
        if self.encoder.is_none() {
            self.encoder = Some(model::encoder_session(&self.paths.encoder)?);
        }
        self.encoder.as_mut().context("encoder session unavailable")
    }
}

impl FaceBackend for Pipeline {
    fn detect(
        &mut self,
        img: &RgbImage,
        upsample: u32,
        model: DetectorModel,
    ) -> Result<Vec<FaceRegion>> {
        let opts = self.options;
        let regions = match model {
            DetectorModel::Cnn => face::detect_faces(self.detector()?, img, upsample, &opts)
                .context("detecting faces")?,
            DetectorModel::Hog => self.cascade()?.detect(img, upsample, opts.max_input_size),
        };
        log::info!("{} detector found {} face(s)", model, regions.len());
        Ok(regions)
    }

    fn encode(
        &mut self,
        img: &RgbImage,
        regions: &[FaceRegion],
        model: &str,
    ) -> Result<Vec<Vec<f32>>> {
        if model != DEFAULT_ENCODER {
            anyhow::bail!("unknown encoder model '{}'", model);
        }
        if regions.is_empty() {
            return Ok(vec![]);
        }

        let session = self.encoder()?;
        regions
            .iter()
            .enumerate()
            .map(|(i, region)| {
                let chip = face::face_chip(img, region);
                face::encode_face(session, &chip).with_context(|| format!("encoding face {}", i))
            })
            .collect()
    }

    fn detector_tag(&self) -> String {
        format!("{}@{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn missing_models() -> Pipeline {
        Pipeline::new(
            ModelPaths::in_dir(Path::new("/nonexistent/models")),
            DetectOptions::default(),
        )
    }

    #[test]
    fn test_detector_tag() {
        let pipeline = missing_models();
        assert_eq!(
            pipeline.detector_tag(),
            format!("faces-vision@{}", env!("CARGO_PKG_VERSION"))
        );
    }

    #[test]
    fn test_unknown_encoder_model() {
        let mut pipeline = missing_models();
        let img = RgbImage::new(8, 8);
        let err = pipeline.encode(&img, &[], "large").unwrap_err();
        assert!(err.to_string().contains("unknown encoder model"));
    }

    #[test]
    fn test_encode_nothing_loads_nothing() {
        let mut pipeline = missing_models();
        let img = RgbImage::new(8, 8);
        assert!(pipeline.encode(&img, &[], DEFAULT_ENCODER).unwrap().is_empty());
        assert!(pipeline.encoder.is_none());
    }

    #[test]
    fn test_missing_models_fail_detection() {
        let mut pipeline = missing_models();
        let img = RgbImage::new(8, 8);
        assert!(pipeline.detect(&img, 2, DetectorModel::Cnn).is_err());
        assert!(pipeline.detect(&img, 2, DetectorModel::Hog).is_err());
    }
}
