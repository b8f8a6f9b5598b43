use axum::{
    Json, Router,
    body::Bytes,
    extract::{
        DefaultBodyLimit, Multipart, State,
        multipart::{MultipartError, MultipartRejection},
    },
    http::{HeaderValue, StatusCode},
    routing::{get, post},
};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tower_http::{
    cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::config::ServerConfig;
use crate::error::{ClassifyError, StartupError};
use crate::prediction::{Prediction, PredictionService};
use crate::scratch::ScratchDir;

pub const PREDICTION_ROUTE: &str = "/predictions-for-uploaded-image";

/// Multipart field carrying the image.
pub const UPLOAD_FIELD: &str = "file";

/// Shared, read-only handler state.
#[derive(Clone)]
pub struct AppState {
    service: Arc<PredictionService>,
    scratch: Option<ScratchDir>,
}

impl AppState {
    pub fn new(service: PredictionService, scratch: Option<ScratchDir>) -> Self {
        Self {
            service: Arc::new(service),
            scratch,
        }
    }

    /// Blocking; call from the blocking pool.
    fn classify(&self, upload: Upload) -> Result<Prediction, ClassifyError> {
        match &self.scratch {
            Some(scratch) => {
                let staged = scratch.stage(upload.file_name.as_deref(), &upload.data)?;
                self.service.classify_path(staged.path())
            }
            None => self.service.classify_bytes(&upload.data),
        }
    }
}

struct Upload {
    file_name: Option<String>,
    data: Bytes,
}

pub fn router(state: AppState, config: &ServerConfig) -> Result<Router, StartupError> {
    let cors = cors_layer(&config.cors_origins)?;

    Ok(Router::new()
        .route(PREDICTION_ROUTE, post(predictions_for_uploaded_image))
        .route("/health", get(health_handler))
        .route("/api/info", get(info_handler))
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state))
}

fn cors_layer(origins: &[String]) -> Result<CorsLayer, StartupError> {
    let origins = origins
        .iter()
        .map(|origin| {
            let origin = origin.trim();
            if origin == "*" {
                // Wildcards cannot be combined with credentials.
                return Err(StartupError::InvalidOrigin(origin.to_string()));
            }
            HeaderValue::from_str(origin)
                .map_err(|_| StartupError::InvalidOrigin(origin.to_string()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request()))
}

pub async fn serve(config: ServerConfig, service: PredictionService) -> Result<(), StartupError> {
    let scratch = config.scratch_dir.clone().map(ScratchDir::new);
    if let Some(scratch) = &scratch {
        tracing::info!("Staging uploads in {}", scratch.root().display());
    }

    let app = router(AppState::new(service, scratch), &config)?;

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .map_err(|source| StartupError::Bind {
            addr: config.bind_addr.clone(),
            source,
        })?;

    tracing::info!("Server starting on http://{}", config.bind_addr);
    tracing::info!("API endpoints:");
    tracing::info!("  POST {}", PREDICTION_ROUTE);
    tracing::info!("  GET  /health");
    tracing::info!("  GET  /api/info");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(StartupError::Serve)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

pub async fn predictions_for_uploaded_image(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<Prediction>, ClassifyError> {
    let start_time = Instant::now();
    let request_id = uuid::Uuid::new_v4();

    // A body that is not multipart cannot carry a file.
    let mut multipart = multipart.map_err(|rejection| {
        tracing::debug!("Rejected non-multipart body: {}", rejection);
        ClassifyError::NoFile
    })?;

    let upload = read_upload(&mut multipart).await?.ok_or(ClassifyError::NoFile)?;
    tracing::info!(
        "Processing upload: request_id={}, file_name={:?}, bytes={}",
        request_id,
        upload.file_name,
        upload.data.len()
    );

    let prediction = tokio::task::spawn_blocking(move || state.classify(upload))
        .await
        .map_err(|e| ClassifyError::Internal(format!("classification task failed: {e}")))??;

    tracing::info!(
        "Prediction completed: request_id={}, type={}, time={:.3}s",
        request_id,
        prediction.label,
        start_time.elapsed().as_secs_f32()
    );

    Ok(Json(prediction))
}

/// Returns the first non-empty `file` field; other fields are skipped.
async fn read_upload(multipart: &mut Multipart) -> Result<Option<Upload>, ClassifyError> {
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some(UPLOAD_FIELD) {
            tracing::debug!("Ignoring multipart field: {:?}", field.name());
            continue;
        }

        let file_name = field.file_name().map(str::to_string);
        let data = field.bytes().await.map_err(multipart_error)?;

        // Browsers send an empty part when the file input was left blank.
        if data.is_empty() {
            continue;
        }
        return Ok(Some(Upload { file_name, data }));
    }
    Ok(None)
}

fn multipart_error(err: MultipartError) -> ClassifyError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ClassifyError::UploadTooLarge(err.body_text())
    } else {
        ClassifyError::MalformedUpload(err.body_text())
    }
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn info_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let config = state.service.config();
    Json(json!({
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "labels": config.labels,
        "input_size": config.size,
        "resample": config.resample,
        "output_activation": config.output_activation,
        "model": state.service.model().describe(),
        "scratch_staging": state.scratch.is_some(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cors_rejects_wildcard_and_garbage() {
        assert!(matches!(
            cors_layer(&["*".to_string()]),
            Err(StartupError::InvalidOrigin(_))
        ));
        assert!(matches!(
            cors_layer(&["http://bad\norigin".to_string()]),
            Err(StartupError::InvalidOrigin(_))
        ));
        assert!(cors_layer(&["http://localhost:3000".to_string(), " https://clinic.example ".to_string()]).is_ok());
    }
}
