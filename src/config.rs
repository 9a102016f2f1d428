use anyhow::{Context, Result};
use faces_vision::{DetectOptions, ModelPaths};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub static CONFIG_PATH: Lazy<&'static Path> = Lazy::new(|| {
    Path::new(
        option_env!("FIND_FACES_CONFIG_PATH").unwrap_or("/usr/local/etc/find-faces/config.toml"),
    )
});

pub static MODEL_DIR: Lazy<&'static Path> = Lazy::new(|| {
    Path::new(option_env!("FIND_FACES_MODEL_DIR").unwrap_or("/usr/local/share/find-faces/models"))
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// YuNet ONNX model used by `--model cnn`.
    pub detector_model: PathBuf,
    /// SeetaFace cascade used by `--model hog`.
    pub cascade_model: PathBuf,
    /// SFace ONNX model producing the embeddings.
    pub encoder_model: PathBuf,
    pub score_threshold: f32,
    pub nms_threshold: f32,
    /// Longest side of the detection raster after upsampling.
    pub max_input_size: u32,
}

impl Default for Config {
    fn default() -> Self {
        let models = ModelPaths::in_dir(&MODEL_DIR);
        let detect = DetectOptions::default();
        Self {
            detector_model: models.detector,
            cascade_model: models.cascade,
            encoder_model: models.encoder,
            score_threshold: detect.score_threshold,
            nms_threshold: detect.nms_threshold,
            max_input_size: detect.max_input_size,
        }
    }
}

impl Config {
    pub fn model_paths(&self) -> ModelPaths {
        ModelPaths {
            detector: self.detector_model.clone(),
            cascade: self.cascade_model.clone(),
            encoder: self.encoder_model.clone(),
        }
    }

    pub fn detect_options(&self) -> DetectOptions {
        DetectOptions {
            score_threshold: self.score_threshold,
            nms_threshold: self.nms_threshold,
            max_input_size: self.max_input_size,
        }
    }

    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.score_threshold) {
            anyhow::bail!("score_threshold must be within [0, 1], got {}", self.score_threshold);
        }
        if !(0.0..=1.0).contains(&self.nms_threshold) {
            anyhow::bail!("nms_threshold must be within [0, 1], got {}", self.nms_threshold);
        }
        if self.max_input_size < 32 {
            anyhow::bail!("max_input_size must be at least 32, got {}", self.max_input_size);
        }
        Ok(())
    }
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path.unwrap_or(&CONFIG_PATH);
    if !path.exists() {
        log::debug!("no config at {}, using defaults", path.display());
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config at {}", path.display()))?;
    let cfg: Config =
        toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}
