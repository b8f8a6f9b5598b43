use std::path::PathBuf;

/// Process-level settings, fixed at startup.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,

    /// Directory holding `model.onnx` and the optional classifier config.
    pub model_dir: PathBuf,

    /// Browser origins allowed to call the API.
    pub cors_origins: Vec<String>,

    /// When set, uploads are staged here for the duration of the request.
    /// Otherwise they are decoded straight from memory.
    pub scratch_dir: Option<PathBuf>,

    pub max_upload_bytes: usize,

    /// ONNX Runtime intra-op threads.
    pub intra_threads: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8000".to_string(),
            model_dir: PathBuf::from("model"),
            cors_origins: vec!["http://localhost:3000".to_string()],
            scratch_dir: None,
            max_upload_bytes: 20 * 1024 * 1024,
            intra_threads: num_cpus::get(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_decode_in_memory() {
        let config = ServerConfig::default();
        assert!(config.scratch_dir.is_none());
        assert_eq!(config.cors_origins, vec!["http://localhost:3000"]);
        assert!(config.intra_threads >= 1);
    }
}
