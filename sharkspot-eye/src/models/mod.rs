//! Classifier seam and model artifact resolution

pub mod classifier;

pub use classifier::{resolve_model_path, Classifier, ClassifierBackend};

#[cfg(test)]
pub use classifier::MockClassifier;
