use crate::error::ApiError;
use crate::events::EventPublisher;
use crate::health;
use crate::observability::{metrics::Metrics, Logger};
use crate::pipeline::PipelineHandle;
use crate::protocol::{Project, UploadResponse};
use crate::storage::{StoredUpload, UploadStorage, DOWNLOADS_PREFIX};
use crate::store::ProjectStore;
use axum::extract::multipart::{Field, MultipartError, MultipartRejection};
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::io;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use uuid::Uuid;

const FILE_FIELD: &str = "file";
const NO_FILE: &str = "No file uploaded";
const PROJECT_NOT_FOUND: &str = "Project not found";
const UPLOAD_FAILED: &str = "Upload failed";
// Room for multipart boundaries and part headers on top of the file itself
const MULTIPART_OVERHEAD_BYTES: u64 = 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub store: ProjectStore,
    pub storage: UploadStorage,
    pub pipeline: PipelineHandle,
    pub events: EventPublisher,
    pub logger: Logger,
    pub metrics: Arc<Metrics>,
    pub readiness: Arc<AtomicBool>,
    pub draining: Arc<AtomicBool>,
    pub max_upload_bytes: u64,
    pub max_concurrency: usize,
    pub version: String,
}

pub fn router(state: AppState) -> Router {
    let body_limit = usize::try_from(state.max_upload_bytes.saturating_add(MULTIPART_OVERHEAD_BYTES))
        .unwrap_or(usize::MAX);
    let downloads = ServeDir::new(state.storage.base_dir());

    Router::new()
        .route("/api/upload", post(upload).layer(DefaultBodyLimit::max(body_limit)))
        .route("/api/projects/:id", get(get_project))
        .merge(health::routes())
        .nest_service(DOWNLOADS_PREFIX, downloads)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// `POST /api/upload`: stores the `file` part and queues the project for processing.
pub async fn upload(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>, ApiError> {
    let Ok(mut multipart) = multipart else {
        state.metrics.uploads_rejected_total.inc();
        return Err(ApiError::bad_request(NO_FILE));
    };

    let project_id = Uuid::new_v4();
    let (filename, stored) = match receive_file(&state, &mut multipart, project_id).await {
        Ok(Some(received)) => received,
        Ok(None) => {
            state.metrics.uploads_rejected_total.inc();
            return Err(ApiError::bad_request(NO_FILE));
        }
        Err(e) => {
            state.metrics.uploads_rejected_total.inc();
            return Err(e);
        }
    };

    let project = Project::new(project_id, filename, stored.path.clone());
    state.store.insert(project.clone()).await;
    // Announced before the job can start so `uploaded` precedes every stage event
    state.events.project_changed(&project).await;

    if let Err(e) = state.pipeline.enqueue(project_id) {
        let msg = if e.is_transient() { "Processing queue is full" } else { "Processing is unavailable" };
        if let Ok(failed) = state.store.fail(&project_id, msg.to_string()).await {
            state.events.project_changed(&failed).await;
        }
        state.store.remove(&project_id).await;
        state.storage.discard(&stored.path).await;
        state.metrics.uploads_rejected_total.inc();
        state.logger.warn("Could not queue project", Some(&json!({
            "project_id": project_id.to_string(),
            "error": e.message()
        })));
        return Err(ApiError::Unavailable(msg.to_string()));
    }

    state.metrics.uploads_total.inc();
    state.metrics.upload_bytes_total.inc_by(stored.size);
    state.logger.info("Project created", Some(&json!({
        "project_id": project_id.to_string(),
        "filename": project.filename,
        "size_bytes": stored.size
    })));

    Ok(Json(UploadResponse { project_id }))
}

/// `GET /api/projects/:id`
pub async fn get_project(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Project>, ApiError> {
    let project = match Uuid::parse_str(&id) {
        Ok(id) => state.store.get(&id).await,
        Err(_) => None,
    };
    project.map(Json).ok_or_else(|| ApiError::not_found(PROJECT_NOT_FOUND))
}

/// Stores the first `file` part that carries a file name. Other parts are skipped.
async fn receive_file(
    state: &AppState,
    multipart: &mut Multipart,
    project_id: Uuid,
) -> Result<Option<(String, StoredUpload)>, ApiError> {
    let mut received: Option<(String, StoredUpload)> = None;
    loop {
        let mut field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                if let Some((_, stored)) = &received {
                    state.storage.discard(&stored.path).await;
                }
                return Err(multipart_error(e));
            }
        };
        if received.is_some() || field.name() != Some(FILE_FIELD) {
            continue;
        }
        let Some(original) = field.file_name().filter(|n| !n.is_empty()).map(str::to_string) else {
            continue;
        };
        let stored = store_field(state, project_id, &original, &mut field).await?;
        received = Some((original, stored));
    }
    Ok(received)
}

async fn store_field(
    state: &AppState,
    project_id: Uuid,
    original: &str,
    field: &mut Field<'_>,
) -> Result<StoredUpload, ApiError> {
    let mut sink = state
        .storage
        .create(project_id, original)
        .await
        .map_err(|e| upload_failed(state, project_id, e))?;

    loop {
        let chunk = match field.chunk().await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => break,
            Err(e) => {
                sink.abort().await;
                return Err(multipart_error(e));
            }
        };
        if sink.written() + chunk.len() as u64 > state.max_upload_bytes {
            sink.abort().await;
            return Err(ApiError::PayloadTooLarge(format!(
                "File exceeds the maximum upload size of {} bytes",
                state.max_upload_bytes
            )));
        }
        if let Err(e) = sink.write_chunk(&chunk).await {
            sink.abort().await;
            return Err(upload_failed(state, project_id, e));
        }
    }

    let path = sink.path().to_path_buf();
    match sink.finish().await {
        Ok(stored) => Ok(stored),
        Err(e) => {
            state.storage.discard(&path).await;
            Err(upload_failed(state, project_id, e))
        }
    }
}

fn multipart_error(e: MultipartError) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(e.body_text())
    } else {
        ApiError::bad_request(format!("Malformed upload: {}", e.body_text()))
    }
}

fn upload_failed(state: &AppState, project_id: Uuid, e: io::Error) -> ApiError {
    state.logger.error("Upload error", Some(&json!({
        "project_id": project_id.to_string(),
        "error": e.to_string()
    })));
    ApiError::internal(UPLOAD_FAILED)
}
