use ndarray::Array4;
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::path::Path;
use std::sync::Arc;

use crate::error::ClassifyError;
use crate::model_config::{ClassifierConfig, OutputActivation};
use crate::preprocess::Preprocessor;
use crate::tumor_model::{Model, ModelError, OnnxModel, softmax};

/// Response body of the prediction endpoint.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Prediction {
    #[serde(rename = "type")]
    pub label: String,
    pub probabilities: Probabilities,
}

/// Percentages keyed by label, kept in label-set order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Probabilities(Vec<(String, f32)>);

impl Probabilities {
    pub fn get(&self, label: &str) -> Option<f32> {
        self.0.iter().find(|(l, _)| l == label).map(|&(_, p)| p)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f32)> {
        self.0.iter().map(|(l, p)| (l.as_str(), *p))
    }

    pub fn total(&self) -> f32 {
        self.0.iter().map(|(_, p)| p).sum()
    }
}

impl Serialize for Probabilities {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (label, percent) in &self.0 {
            map.serialize_entry(label, percent)?;
        }
        map.end()
    }
}

/// Runs preprocessed images through the model and labels the scores.
///
/// Holds no mutable state; one instance is shared by every request.
pub struct PredictionService {
    model: Arc<dyn Model>,
    config: ClassifierConfig,
    preprocessor: Preprocessor,
}

impl PredictionService {
    pub fn new(model: Arc<dyn Model>, config: ClassifierConfig) -> Self {
        let preprocessor = Preprocessor::new(config.size, config.resample);
        Self {
            model,
            config,
            preprocessor,
        }
    }

    /// Loads `model.onnx` and the optional classifier config from `model_dir`.
    pub fn from_model_dir(model_dir: &Path, intra_threads: usize) -> Result<Self, ModelError> {
        let config = ClassifierConfig::load(model_dir)?;
        let model = OnnxModel::new(model_dir, intra_threads)?;
        tracing::info!(
            "Classifier ready: labels={:?}, input={}x{}, resample={:?}",
            config.labels,
            config.size.width,
            config.size.height,
            config.resample
        );
        Ok(Self::new(Arc::new(model), config))
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    pub fn model(&self) -> &dyn Model {
        self.model.as_ref()
    }

    pub fn classify_bytes(&self, bytes: &[u8]) -> Result<Prediction, ClassifyError> {
        let batch = self.preprocessor.tensor_from_bytes(bytes)?;
        self.predict(&batch)
    }

    pub fn classify_path(&self, path: &Path) -> Result<Prediction, ClassifyError> {
        let batch = self.preprocessor.tensor_from_path(path)?;
        self.predict(&batch)
    }

    pub fn predict(&self, batch: &Array4<f32>) -> Result<Prediction, ClassifyError> {
        let scores = self.model.predict(batch)?;

        let classes = self.config.num_classes();
        if scores.shape() != [1, classes] {
            return Err(ModelError::OutputShape(scores.shape().to_vec()).into());
        }

        let mut row: Vec<f32> = scores.row(0).to_vec();
        if self.config.output_activation == OutputActivation::Softmax {
            row = softmax(&row);
        }

        if row.iter().any(|score| !score.is_finite()) {
            return Err(ModelError::NonFiniteScores.into());
        }
        let best = argmax(&row);

        let probabilities = self
            .config
            .labels
            .iter()
            .zip(&row)
            .map(|(label, &score)| (label.clone(), score * 100.0))
            .collect();

        Ok(Prediction {
            label: self.config.labels[best].clone(),
            probabilities: Probabilities(probabilities),
        })
    }
}

/// Index of the largest score; ties go to the lowest index.
/// Callers pass a non-empty row of finite scores.
fn argmax(scores: &[f32]) -> usize {
    let mut best = 0;
    for (i, &score) in scores.iter().enumerate().skip(1) {
        if score > scores[best] {
            best = i;
        }
    }
    best
}
