use std::path::Path;

use anyhow::{Context, Result};
use faces_vision::{DetectorModel, FaceBackend, DEFAULT_ENCODER};
use image::RgbImage;
use log::{debug, info};

use crate::record::FaceRecord;

/// Each doubling helps with small faces at the cost of speed.
pub const UPSAMPLE_TIMES: u32 = 2;
/// Encoder model handed to the backend.
pub const ENCODER_MODEL: &str = DEFAULT_ENCODER;

/// Decode an image file to 3-channel RGB, whatever its source format.
pub fn load_image(path: &Path) -> Result<RgbImage> {
    let img = image::open(path).with_context(|| format!("opening image {}", path.display()))?;
    debug!(
        "loaded {} ({}x{}, {:?})",
        path.display(),
        img.width(),
        img.height(),
        img.color()
    );
    Ok(img.to_rgb8())
}

/// Detect, encode and normalize every face in `img`.
pub fn extract_faces<B: FaceBackend + ?Sized>(
    backend: &mut B,
    img: &RgbImage,
    model: DetectorModel,
) -> Result<Vec<FaceRecord>> {
    let (width, height) = img.dimensions();

    let regions = backend
        .detect(img, UPSAMPLE_TIMES, model)
        .with_context(|| format!("detecting faces with {}", model))?;
    if regions.is_empty() {
        info!("no faces found");
        return Ok(vec![]);
    }

    let encodings = backend
        .encode(img, &regions, ENCODER_MODEL)
        .context("encoding faces")?;
    if encodings.len() != regions.len() {
        anyhow::bail!(
            "encoder returned {} embeddings for {} faces",
            encodings.len(),
            regions.len()
        );
    }

    let detector = backend.detector_tag();
    let records = regions
        .iter()
        .zip(encodings)
        .map(|(region, encoding)| FaceRecord::new(region, encoding, width, height, &detector))
        .collect::<Result<Vec<_>>>()?;

    info!("extracted {} face(s)", records.len());
    Ok(records)
}

/// Serialize records as one JSON array.
pub fn to_json(records: &[FaceRecord]) -> Result<String> {
    serde_json::to_string(records).context("serializing faces")
}
