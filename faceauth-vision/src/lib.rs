pub mod align;
pub mod detect;
pub mod embed;
pub mod model;

// Re-export commonly used types
pub use detect::{Detection, Detector};
pub use embed::{EmbeddingMethod, FaceEmbedder, OnnxEmbedder};
pub use model::Device;
