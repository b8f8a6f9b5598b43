// src/model_config.rs
use image::imageops::FilterType;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use crate::tumor_model::ModelError;

/// Name of the optional JSON file read from the model directory.
pub const CLASSIFIER_CONFIG_FILE: &str = "classifier_config.json";

/// Labels in the order the network was trained with.
pub const DEFAULT_LABELS: [&str; 4] = ["glioma", "meningioma", "notumor", "pituitary"];

/// Everything the preprocessor and the prediction service need to agree on
/// with the trained network.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct ClassifierConfig {
    pub labels: Vec<String>,
    pub size: ImageSize,
    pub resample: ResampleFilter,
    pub output_activation: OutputActivation,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
pub struct ImageSize {
    pub height: usize,
    pub width: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ResampleFilter {
    Nearest,
    Triangle,
    #[default]
    CatmullRom,
    Gaussian,
    Lanczos3,
}

impl From<ResampleFilter> for FilterType {
    fn from(filter: ResampleFilter) -> Self {
        match filter {
            ResampleFilter::Nearest => FilterType::Nearest,
            ResampleFilter::Triangle => FilterType::Triangle,
            ResampleFilter::CatmullRom => FilterType::CatmullRom,
            ResampleFilter::Gaussian => FilterType::Gaussian,
            ResampleFilter::Lanczos3 => FilterType::Lanczos3,
        }
    }
}

/// What the network's last layer emits.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputActivation {
    /// Scores are already a probability distribution.
    #[default]
    None,
    /// Scores are logits and get a softmax before reporting.
    Softmax,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            labels: DEFAULT_LABELS.iter().map(|l| l.to_string()).collect(),
            size: ImageSize {
                height: 150,
                width: 150,
            },
            resample: ResampleFilter::default(),
            output_activation: OutputActivation::default(),
        }
    }
}

impl ClassifierConfig {
    /// Reads `classifier_config.json` from `model_dir`, falling back to the
    /// defaults when the file is absent.
    pub fn load(model_dir: &Path) -> Result<Self, ModelError> {
        let path = model_dir.join(CLASSIFIER_CONFIG_FILE);
        if !path.exists() {
            tracing::info!(
                "No {} in {}, using default classifier config",
                CLASSIFIER_CONFIG_FILE,
                model_dir.display()
            );
            return Self::default().validated();
        }

        tracing::info!("Loading classifier config from: {}", path.display());
        let file = std::fs::File::open(&path)?;
        let config: ClassifierConfig = serde_json::from_reader(file)?;
        config.validated()
    }

    pub fn validated(self) -> Result<Self, ModelError> {
        if self.labels.is_empty() {
            return Err(ModelError::InvalidConfig("label set is empty".to_string()));
        }
        let mut seen = HashSet::new();
        for label in &self.labels {
            if !seen.insert(label.as_str()) {
                return Err(ModelError::InvalidConfig(format!(
                    "duplicate label: {label}"
                )));
            }
        }
        if self.size.height == 0 || self.size.width == 0 {
            return Err(ModelError::InvalidConfig(format!(
                "image size must be non-zero, got {}x{}",
                self.size.width, self.size.height
            )));
        }
        Ok(self)
    }

    pub fn num_classes(&self) -> usize {
        self.labels.len()
    }
}
