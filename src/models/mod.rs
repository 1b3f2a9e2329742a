//! Classifier abstraction and model loading

pub mod inference;
#[cfg(feature = "onnx")]
pub mod loader;

pub use inference::{Classifier, FixedClassifier, ScoringAdapter};
#[cfg(feature = "onnx")]
pub use loader::OnnxClassifier;
