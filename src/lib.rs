pub mod config;
pub mod error;
pub mod model_config;
pub mod prediction;
pub mod preprocess;
pub mod scratch;
pub mod server;
pub mod tumor_model;

pub use config::ServerConfig;
pub use error::{ClassifyError, StartupError};
pub use model_config::ClassifierConfig;
pub use prediction::{Prediction, PredictionService, Probabilities};
pub use tumor_model::{Model, ModelError, OnnxModel};
