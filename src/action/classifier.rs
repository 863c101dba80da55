//! Action classification on an assembled pose sequence.
//!
//! The classifier itself is an opaque pretrained model. [`classify`] wraps any
//! [`ActionClassifier`] so that every failure turns into "no result this
//! frame" instead of an error.

use anyhow::{Context, Result};
use ort::session::Session;
use ort::value::Tensor;
use std::collections::HashMap;
use std::path::Path;

use super::assembler::{ModelInput, MODEL_INPUT_SHAPE};
use crate::config::ClassifierConfig;
use crate::pose::detector::load_session;

/// Top label and its probability.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationResult {
    pub label: String,
    pub confidence: f32,
}

/// Raw classifier output: the predicted label plus the per-label probabilities.
#[derive(Debug, Clone, Default)]
pub struct Prediction {
    pub label: String,
    pub probabilities: HashMap<String, f32>,
}

pub trait ActionClassifier {
    /// Shape of the tensor the model accepts.
    fn input_shape(&self) -> [usize; 3] {
        MODEL_INPUT_SHAPE
    }

    fn predict(&mut self, input: &ModelInput) -> Result<Prediction>;
}

/// Run the classifier, returning `None` on a shape mismatch or inference failure.
///
/// The confidence is the probability of the predicted label clamped to
/// `[0, 1]`, or 0.0 when the label has no entry in the probability map or
/// the value is NaN. Models emitting raw logits should softmax them first;
/// clamping only keeps the contract.
pub fn classify<C: ActionClassifier + ?Sized>(
    classifier: &mut C,
    input: &ModelInput,
) -> Option<ClassificationResult> {
    let expected = classifier.input_shape();
    if input.shape() != expected {
        log::warn!(
            "classifier input shape {:?} does not match expected {:?}",
            input.shape(),
            expected
        );
        return None;
    }

    let prediction = match classifier.predict(input) {
        Ok(p) => p,
        Err(e) => {
            log::warn!("classification failed: {:#}", e);
            return None;
        }
    };

    let confidence = prediction
        .probabilities
        .get(&prediction.label)
        .copied()
        .filter(|p| !p.is_nan())
        .map_or(0.0, |p| p.clamp(0.0, 1.0));

    Some(ClassificationResult {
        label: prediction.label,
        confidence,
    })
}

/// ONNX action classifier.
///
/// Expects a `[1, 60, 3, 18]` float input (batch axis added here) and a
/// `[1, labels]` probability output. When `label_output` is configured the
/// predicted label index is read from that int64 output, otherwise the
/// highest probability wins.
pub struct OnnxActionClassifier {
    session: Session,
    input_name: String,
    probabilities_output: String,
    label_output: Option<String>,
    labels: Vec<String>,
}

impl OnnxActionClassifier {
    pub fn new<P: AsRef<Path>>(model_path: P, config: &ClassifierConfig) -> Result<Self> {
        if config.labels.is_empty() {
            anyhow::bail!("classifier needs at least one label");
        }

        let session = load_session(model_path.as_ref())?;

        Ok(Self {
            session,
            input_name: config.input_name.clone(),
            probabilities_output: config.probabilities_output.clone(),
            label_output: config.label_output.clone(),
            labels: config.labels.clone(),
        })
    }

    pub fn from_config(config: &ClassifierConfig) -> Result<Self> {
        Self::new(&config.model_path, config)
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }
}

impl ActionClassifier for OnnxActionClassifier {
    fn predict(&mut self, input: &ModelInput) -> Result<Prediction> {
        let batched = input.clone().insert_axis(ndarray::Axis(0));
        let input_tensor = Tensor::from_array(batched)?;
        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => input_tensor])
            .context("Inference failed")?;

        let probs: ndarray::ArrayViewD<f32> = outputs[self.probabilities_output.as_str()]
            .try_extract_array()
            .context("Failed to extract probabilities")?;
        let scores: Vec<f32> = probs.iter().copied().collect();

        let probabilities = label_probabilities(&self.labels, &scores);

        let label_index = match &self.label_output {
            Some(name) => {
                let label: ndarray::ArrayViewD<i64> = outputs[name.as_str()]
                    .try_extract_array()
                    .context("Failed to extract label")?;
                let idx = label
                    .iter()
                    .next()
                    .copied()
                    .context("Empty label output")?;
                usize::try_from(idx).context("Negative label index")?
            }
            None => argmax(&scores).context("Empty probability output")?,
        };

        let label = self
            .labels
            .get(label_index)
            .cloned()
            .with_context(|| format!("Label index {} out of range", label_index))?;

        Ok(Prediction {
            label,
            probabilities,
        })
    }
}

/// Pair labels with scores; labels without a score are left out.
fn label_probabilities(labels: &[String], scores: &[f32]) -> HashMap<String, f32> {
    labels
        .iter()
        .zip(scores.iter())
        .map(|(label, &p)| (label.clone(), p))
        .collect()
}

fn argmax(scores: &[f32]) -> Option<usize> {
    scores
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.total_cmp(b))
        .map(|(i, _)| i)
}
