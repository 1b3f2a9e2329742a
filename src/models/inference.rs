//! Scoring adapter around an opaque binary classifier

use crate::error::ScoringError;
use crate::feature_extractor::FeatureVector;
use crate::types::outcome::{Label, Verdict};
use std::sync::Arc;
use tracing::debug;

/// A pre-trained binary classifier.
///
/// Implementations are loaded once at startup and never mutated afterwards;
/// they are shared read-only with the consumer loop.
pub trait Classifier: Send + Sync {
    /// Predicted class: 1 for fraud, 0 for legitimate
    fn predict(&self, features: &FeatureVector) -> Result<i64, ScoringError>;

    /// Probability of the positive (fraud) class
    fn predict_confidence(&self, features: &FeatureVector) -> Result<f64, ScoringError>;

    /// Class and positive-class probability together.
    ///
    /// Override when a single inference pass yields both.
    fn classify(&self, features: &FeatureVector) -> Result<(i64, f64), ScoringError> {
        Ok((self.predict(features)?, self.predict_confidence(features)?))
    }

    /// Name used in logs
    fn name(&self) -> &str {
        "classifier"
    }
}

/// Shapes feature vectors into classifier input and classifier output into verdicts
#[derive(Clone)]
pub struct ScoringAdapter {
    classifier: Arc<dyn Classifier>,
}

impl ScoringAdapter {
    pub fn new(classifier: Arc<dyn Classifier>) -> Self {
        Self { classifier }
    }

    /// Score one feature vector
    pub fn score(&self, features: &FeatureVector) -> Result<Verdict, ScoringError> {
        let (class, confidence) = self.classifier.classify(features)?;

        let label = match class {
            1 => Label::Fraud,
            0 => Label::Legit,
            other => return Err(ScoringError::InvalidLabel(other)),
        };
        if !(0.0..=1.0).contains(&confidence) {
            return Err(ScoringError::InvalidConfidence(confidence));
        }

        debug!(
            model = %self.classifier.name(),
            label = %label,
            confidence = confidence,
            "Scored transaction"
        );

        Ok(Verdict { label, confidence })
    }

    /// Name of the wrapped classifier
    pub fn model_name(&self) -> &str {
        self.classifier.name()
    }
}

/// Classifier that always returns the same class and probability.
///
/// Stands in for a trained model in tests and local dry runs.
#[derive(Debug, Clone, Copy)]
pub struct FixedClassifier {
    class: i64,
    confidence: f64,
}

impl FixedClassifier {
    pub fn new(class: i64, confidence: f64) -> Self {
        Self { class, confidence }
    }
}

impl Classifier for FixedClassifier {
    fn predict(&self, _features: &FeatureVector) -> Result<i64, ScoringError> {
        Ok(self.class)
    }

    fn predict_confidence(&self, _features: &FeatureVector) -> Result<f64, ScoringError> {
        Ok(self.confidence)
    }

    fn name(&self) -> &str {
        "fixed"
    }
}
