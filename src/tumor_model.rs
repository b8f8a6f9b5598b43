use ndarray::{Array2, Array4, Ix2};
use ort::inputs;
use ort::session::builder::{GraphOptimizationLevel, SessionBuilder};
use ort::session::{Session, SessionOutputs};
use std::path::Path;

/// File name of the network inside the model directory.
pub const MODEL_FILE: &str = "model.onnx";

#[derive(thiserror::Error, Debug)]
pub enum ModelError {
    #[error("ONNX Runtime error: {0}")]
    Ort(#[from] ort::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Configuration error: {0}")]
    Config(#[from] serde_json::Error),
    #[error("Invalid classifier config: {0}")]
    InvalidConfig(String),
    #[error("Invalid path for model files: {0}")]
    InvalidPath(String),
    #[error("Model has no {0} tensors")]
    MissingTensor(&'static str),
    #[error("Model output '{0}' not found")]
    OutputNotFound(String),
    #[error("Unexpected model output shape {0:?}")]
    OutputShape(Vec<usize>),
    #[error("Model produced NaN or infinite scores")]
    NonFiniteScores,
}

/// The one capability the prediction service needs from a trained network:
/// a batch of NHWC images in, one row of class scores per image out.
pub trait Model: Send + Sync {
    fn predict(&self, batch: &Array4<f32>) -> Result<Array2<f32>, ModelError>;

    /// Short description used by the info endpoint.
    fn describe(&self) -> ModelDescription {
        ModelDescription::default()
    }
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ModelDescription {
    pub backend: String,
    pub input: Option<String>,
    pub output: Option<String>,
}

/// ONNX export of the trained classifier.
pub struct OnnxModel {
    session: Session,
    input_name: String,
    output_name: String,
}

impl OnnxModel {
    pub fn new(model_dir: &Path, intra_threads: usize) -> Result<Self, ModelError> {
        let model_path = model_dir.join(MODEL_FILE);
        tracing::info!("Loading model from: {}", model_path.display());

        if !model_path.exists() {
            return Err(ModelError::InvalidPath(format!(
                "Model file not found: {}",
                model_path.display()
            )));
        }

        let session = SessionBuilder::new()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(intra_threads)?
            .commit_from_file(&model_path)?;

        // Keras exports name their tensors after layers, so discover them.
        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .ok_or(ModelError::MissingTensor("input"))?;
        let output_name = session
            .outputs
            .first()
            .map(|output| output.name.clone())
            .ok_or(ModelError::MissingTensor("output"))?;

        for (i, output) in session.outputs.iter().enumerate() {
            tracing::debug!("Model output[{}]: '{}'", i, output.name);
        }
        tracing::info!(
            "ONNX Runtime session created: input='{}', output='{}', intra_threads={}",
            input_name,
            output_name,
            intra_threads
        );

        Ok(Self {
            session,
            input_name,
            output_name,
        })
    }
}

impl Model for OnnxModel {
    fn predict(&self, batch: &Array4<f32>) -> Result<Array2<f32>, ModelError> {
        let inputs = inputs![self.input_name.as_str() => batch.view()]?;
        let outputs: SessionOutputs = self.session.run(inputs)?;

        let output_value = outputs
            .get(self.output_name.as_str())
            .ok_or_else(|| ModelError::OutputNotFound(self.output_name.clone()))?;

        let scores = output_value.try_extract_tensor::<f32>()?;
        let shape = scores.shape().to_vec();
        let scores = scores
            .into_dimensionality::<Ix2>()
            .map_err(|_| ModelError::OutputShape(shape))?;

        Ok(scores.to_owned())
    }

    fn describe(&self) -> ModelDescription {
        ModelDescription {
            backend: "onnxruntime".to_string(),
            input: Some(self.input_name.clone()),
            output: Some(self.output_name.clone()),
        }
    }
}

/// Numerically stable softmax over one row of logits.
pub fn softmax(data: &[f32]) -> Vec<f32> {
    let max_val = data.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
    let exps: Vec<f32> = data.iter().map(|&x| (x - max_val).exp()).collect();
    let sum_exps: f32 = exps.iter().sum();
    exps.into_iter().map(|x| x / sum_exps).collect()
}
