use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use tumor_classifier::{PredictionService, ServerConfig, StartupError, server};

#[derive(Parser)]
#[command(name = "tumor-classifier")]
#[command(about = "Classifies uploaded brain MRI scans by tumor type")]
struct Args {
    /// Server bind address
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:8000")]
    bind: String,

    /// Directory containing model.onnx and an optional classifier_config.json
    #[arg(long, env = "MODEL_DIR", default_value = "model")]
    model_dir: PathBuf,

    /// Allowed browser origins, comma separated
    #[arg(
        long = "cors-origin",
        env = "CORS_ORIGINS",
        value_delimiter = ',',
        default_value = "http://localhost:3000"
    )]
    cors_origins: Vec<String>,

    /// Stage uploads in this directory instead of decoding them in memory
    #[arg(long, env = "SCRATCH_DIR")]
    scratch_dir: Option<PathBuf>,

    /// Largest accepted request body in bytes
    #[arg(long, env = "MAX_UPLOAD_BYTES", default_value_t = 20 * 1024 * 1024)]
    max_upload_bytes: usize,

    /// ONNX Runtime intra-op threads (defaults to the CPU count)
    #[arg(long, env = "INTRA_THREADS")]
    intra_threads: Option<usize>,

    /// Log level, overridden by RUST_LOG
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn into_config(self) -> ServerConfig {
        let defaults = ServerConfig::default();
        ServerConfig {
            bind_addr: self.bind,
            model_dir: self.model_dir,
            cors_origins: self.cors_origins,
            scratch_dir: self.scratch_dir,
            max_upload_bytes: self.max_upload_bytes,
            intra_threads: self.intra_threads.unwrap_or(defaults.intra_threads).max(1),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .with_target(false)
        .init();

    let config = args.into_config();
    tracing::info!("Starting tumor classifier...");
    tracing::info!("Bind address: {}", config.bind_addr);
    tracing::info!("Model directory: {}", config.model_dir.display());
    tracing::info!("CORS origins: {:?}", config.cors_origins);

    // Fail fast: no server without a model.
    let service = PredictionService::from_model_dir(&config.model_dir, config.intra_threads)
        .map_err(StartupError::from)
        .with_context(|| format!("loading model from {}", config.model_dir.display()))?;

    server::serve(config, service).await?;

    Ok(())
}
