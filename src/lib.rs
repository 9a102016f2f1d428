pub mod config;
pub mod extract;
pub mod record;

// Re-export backend types for convenience
pub use extract::{extract_faces, load_image, to_json};
pub use faces_vision::{DetectorModel, FaceBackend, FaceRegion, Pipeline};
pub use record::FaceRecord;
