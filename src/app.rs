use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        DefaultBodyLimit, FromRef, Multipart, Path, Query, State,
        multipart::{MultipartError, MultipartRejection},
        rejection::JsonRejection,
    },
    http::{HeaderValue, Method, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};
use tracing::{error, info, warn};

use crate::auth::{Principal, TokenKey};
use crate::chart::ChartRequest;
use crate::config::{Config, CorsConfig};
use crate::error::AppError;
use crate::pipeline::{
    AnalysisOutcome, IngestOutcome, Pipeline, UploadDetail, UploadFile,
};
use crate::saving::{StoreError, UploadSummary};

/// Multipart field carrying the workbook
pub const FILE_FIELD: &str = "file";

/// Room for multipart boundaries and headers on top of the file itself
const MULTIPART_OVERHEAD: usize = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub token_key: TokenKey,
}

impl AppState {
    pub fn from_config(config: &Config) -> Result<Self, StoreError> {
        Ok(AppState {
            pipeline: Arc::new(Pipeline::from_config(config)?),
            token_key: TokenKey::new(&config.jwt_secret),
        })
    }
}

impl FromRef<AppState> for TokenKey {
    fn from_ref(state: &AppState) -> Self {
        state.token_key.clone()
    }
}

#[derive(Deserialize)]
struct ExportQuery {
    format: Option<String>,
}

pub fn create_app(state: AppState, config: &Config) -> Router {
    let body_limit = state.pipeline.max_upload_bytes() + MULTIPART_OVERHEAD;

    Router::new()
        .route("/health", get(health))
        .route("/api/uploads", post(ingest_upload).get(list_uploads))
        .route("/api/uploads/:id", get(fetch_upload).delete(delete_upload))
        .route("/api/uploads/:id/analyze", post(analyze_upload))
        .route("/api/uploads/:id/export", get(export_upload))
        .nest_service("/uploads", ServeDir::new(&config.public_dir))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer(&config.cors))
                .layer(DefaultBodyLimit::max(body_limit)),
        )
        .with_state(state)
}

pub async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let state = AppState::from_config(&config)?;
    let app = create_app(state, &config);

    let address = config.address();
    let listener = TcpListener::bind(&address).await?;
    info!("Listening on http://{address}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shut down");
    Ok(())
}

fn cors_layer(cors: &CorsConfig) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    let origin = cors.origin.as_deref().and_then(|origin| {
        HeaderValue::from_str(origin)
            .map_err(|e| warn!("Ignoring CORS_ORIGIN '{origin}': {e}"))
            .ok()
    });

    match origin {
        Some(origin) => layer
            .allow_origin(origin)
            .allow_credentials(cors.credentials),
        None => layer.allow_origin(Any),
    }
}

/// Run a pipeline call on the blocking pool
async fn blocking<T, F>(work: F) -> Result<T, AppError>
where
    F: FnOnce() -> Result<T, AppError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(AppError::internal)?
}

fn multipart_error(e: MultipartError) -> AppError {
    AppError::validation(format!("Invalid upload: {}", e.body_text()))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn ingest_upload(
    State(state): State<AppState>,
    principal: Principal,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<IngestOutcome>, AppError> {
    let mut multipart = multipart.map_err(|e| AppError::validation(e.body_text()))?;

    let mut files = Vec::new();
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        let file_name = field.file_name().unwrap_or("upload").to_string();
        let content_type = field.content_type().map(str::to_string);
        let bytes = field.bytes().await.map_err(multipart_error)?;

        files.push(UploadFile {
            file_name,
            content_type,
            bytes: bytes.to_vec(),
        });
    }

    let pipeline = state.pipeline.clone();
    let outcome = blocking(move || pipeline.ingest(&principal, files)).await?;
    Ok(Json(outcome))
}

async fn list_uploads(
    State(state): State<AppState>,
    principal: Principal,
) -> Result<Json<Vec<UploadSummary>>, AppError> {
    let pipeline = state.pipeline.clone();
    Ok(Json(blocking(move || pipeline.list_uploads(&principal)).await?))
}

async fn fetch_upload(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<String>,
) -> Result<Json<UploadDetail>, AppError> {
    let pipeline = state.pipeline.clone();
    Ok(Json(
        blocking(move || pipeline.fetch_upload(&principal, &id)).await?,
    ))
}

async fn delete_upload(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let pipeline = state.pipeline.clone();
    blocking(move || pipeline.delete_upload(&principal, &id)).await?;
    Ok(Json(json!({ "message": "Upload deleted." })))
}

async fn analyze_upload(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<String>,
    body: Result<Json<ChartRequest>, JsonRejection>,
) -> Result<Json<AnalysisOutcome>, AppError> {
    let Json(request) = body.map_err(|e| AppError::validation(e.body_text()))?;

    let pipeline = state.pipeline.clone();
    let outcome = blocking(move || pipeline.analyze(&principal, &id, &request)).await?;
    Ok(Json(outcome))
}

async fn export_upload(
    State(state): State<AppState>,
    principal: Principal,
    Path(id): Path<String>,
    Query(query): Query<ExportQuery>,
) -> Result<Response, AppError> {
    let format = query.format.unwrap_or_else(|| "xlsx".to_string());

    let pipeline = state.pipeline.clone();
    let export = blocking(move || pipeline.export_upload(&principal, &id, &format)).await?;

    Ok((
        [
            (header::CONTENT_TYPE, export.mime.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", export.file_name.replace('"', "")),
            ),
        ],
        export.bytes,
    )
        .into_response())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }

        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                error!("Failed to install signal handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
