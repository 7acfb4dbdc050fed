pub mod classifier;
pub mod config;
pub mod error;
pub mod evaluate;
pub mod executor;
pub mod extract;
pub mod folds;
pub mod recognition;
pub mod report;
pub mod roc;
pub mod svm;
pub mod table;

pub use error::{Error, Result};
pub use report::Report;
pub use svm::{LinearSvm, SvmParams};
pub use table::{FeatureTable, TableFormat};

// Re-export vision types for convenience
pub use faceauth_vision::{Device, EmbeddingMethod, FaceEmbedder, OnnxEmbedder};
