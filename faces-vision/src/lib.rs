pub mod backend;
pub mod cascade;
pub mod face;
pub mod model;
pub mod pipeline;
pub mod yunet;

// Re-export commonly used types
pub use backend::{DetectorModel, FaceBackend, FaceRegion};
pub use face::DetectOptions;
pub use model::ModelPaths;
pub use pipeline::{Pipeline, DEFAULT_ENCODER};
