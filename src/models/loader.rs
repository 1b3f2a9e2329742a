//! ONNX classifier loader

use crate::error::ScoringError;
use crate::feature_extractor::FeatureVector;
use crate::models::inference::Classifier;
use anyhow::{Context, Result};
use ort::memory::Allocator;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::{DowncastableTarget, DynMapValueType, DynSequenceValueType, Tensor};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};

/// Binary classifier exported to ONNX, run through ONNX Runtime.
///
/// Expects the usual converter layout: a `label` output holding the
/// predicted class and a probabilities output holding one column per class,
/// either as a `[batch, classes]` tensor or as `seq(map(int64, float))`.
pub struct OnnxClassifier {
    /// Model name for logs
    name: String,
    /// Sessions need exclusive access to run
    session: Mutex<Session>,
    /// Input name for the feature tensor
    input_name: String,
    /// Output holding the predicted class, if the export has one
    label_output: Option<String>,
    /// Output holding class probabilities
    probability_output: String,
}

impl OnnxClassifier {
    /// Load the model artifact; any failure here is fatal to startup
    pub fn load<P: AsRef<Path>>(path: P, onnx_threads: usize) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            anyhow::bail!("Model file not found: {}", path.display());
        }

        info!(path = %path.display(), threads = onnx_threads, "Loading ONNX model");

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(onnx_threads)?
            .commit_from_file(path)
            .with_context(|| format!("Failed to load model from {}", path.display()))?;

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .unwrap_or_else(|| "float_input".to_string());

        let label_output = session
            .outputs
            .iter()
            .find(|o| o.name.contains("label"))
            .map(|o| o.name.clone());

        let probability_output = session
            .outputs
            .iter()
            .find(|o| o.name.contains("prob"))
            .or_else(|| session.outputs.iter().rfind(|o| !o.name.contains("label")))
            .map(|o| o.name.clone())
            .unwrap_or_else(|| "probabilities".to_string());

        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "onnx".to_string());

        info!(
            model = %name,
            input = %input_name,
            label = ?label_output,
            probabilities = %probability_output,
            "Model loaded successfully"
        );

        Ok(Self {
            name,
            session: Mutex::new(session),
            input_name,
            label_output,
            probability_output,
        })
    }

    /// Run the session once, returning the raw label (if exported) and the
    /// fraud-class probability
    fn infer(&self, features: &FeatureVector) -> Result<(Option<i64>, f64)> {
        let mut session = self
            .session
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        // Prepare input tensor - shape [1, num_features]
        let values = features.as_slice().to_vec();
        let shape = vec![1_i64, values.len() as i64];
        let input_tensor =
            Tensor::from_array((shape, values)).context("Failed to create input tensor")?;

        let outputs = session.run(ort::inputs![&self.input_name => input_tensor])?;

        let label = match &self.label_output {
            Some(name) => match outputs.get(name.as_str()) {
                Some(output) => {
                    let (_, data) = output
                        .try_extract_tensor::<i64>()
                        .context("Failed to read label output")?;
                    data.first().copied()
                }
                None => None,
            },
            None => None,
        };

        let probability = self.extract_probability(&outputs)?;

        debug!(model = %self.name, label = ?label, probability = probability, "Inference complete");

        Ok((label, probability))
    }

    /// Extract fraud probability from the session outputs
    fn extract_probability(&self, outputs: &ort::session::SessionOutputs) -> Result<f64> {
        let output = outputs
            .get(self.probability_output.as_str())
            .with_context(|| format!("Missing output {:?}", self.probability_output))?;

        // Tensor format (XGBoost, Random Forest)
        if let Ok((shape, data)) = output.try_extract_tensor::<f32>() {
            return fraud_prob_from_tensor(&shape, data);
        }

        // Sequence format (zipmap exports) - seq(map(int64, float))
        let dtype = output.dtype();
        if DynSequenceValueType::can_downcast(&dtype) {
            return fraud_prob_from_sequence_map(output);
        }

        anyhow::bail!(
            "Unsupported probability output type for {:?}",
            self.probability_output
        )
    }
}

impl Classifier for OnnxClassifier {
    fn predict(&self, features: &FeatureVector) -> Result<i64, ScoringError> {
        self.classify(features).map(|(label, _)| label)
    }

    fn predict_confidence(&self, features: &FeatureVector) -> Result<f64, ScoringError> {
        self.classify(features).map(|(_, probability)| probability)
    }

    fn classify(&self, features: &FeatureVector) -> Result<(i64, f64), ScoringError> {
        let (label, probability) = self
            .infer(features)
            .map_err(|e| ScoringError::Inference(format!("{e:#}")))?;
        // Exports without a label output decide at the default 0.5 cut-off
        let label = label.unwrap_or(if probability >= 0.5 { 1 } else { 0 });
        Ok((label, probability))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Extract fraud probability from tensor data
fn fraud_prob_from_tensor(shape: &ort::tensor::Shape, data: &[f32]) -> Result<f64> {
    let classes = shape.last().copied().unwrap_or(0);
    match classes {
        // [batch, classes] or [classes] - fraud class is index 1
        n if n >= 2 => data.get(1).map(|&v| v as f64),
        // Single probability column
        1 => data.first().map(|&v| v as f64),
        _ => None,
    }
    .context("Empty probability tensor")
}

/// Extract probability from seq(map(int64, float)) format
fn fraud_prob_from_sequence_map(output: &ort::value::DynValue) -> Result<f64> {
    let allocator = Allocator::default();

    let sequence = output
        .downcast_ref::<DynSequenceValueType>()
        .map_err(|e| anyhow::anyhow!("Failed to downcast to sequence: {}", e))?;

    let maps = sequence.try_extract_sequence::<DynMapValueType>(&allocator)?;
    let map_value = maps.first().context("Empty sequence")?;
    let kv_pairs = map_value.try_extract_key_values::<i64, f32>()?;

    if let Some((_, prob)) = kv_pairs.iter().find(|(class_id, _)| *class_id == 1) {
        return Ok(*prob as f64);
    }
    if let Some((_, prob)) = kv_pairs.iter().find(|(class_id, _)| *class_id == 0) {
        return Ok(1.0 - *prob as f64);
    }

    anyhow::bail!("No probability found in map")
}
