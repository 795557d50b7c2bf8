//! Job submission, polling and download handlers.

use axum::body::{Body, Bytes};
use axum::extract::{Multipart, Path, Request, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tower::ServiceExt;
use tower_http::services::ServeFile;
use tracing::{info, warn};

use montage_models::{JobId, JobStatus, StatusRecord, ValidationError};
use montage_worker::{ArtifactLookup, SubmitRequest};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Response for an accepted job.
#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub task_id: JobId,
    pub status: JobStatus,
    pub message: String,
}

/// One uploaded file from the multipart body.
struct Upload {
    file_name: String,
    bytes: Bytes,
}

/// Accept a clip archive and music track and start a montage job.
///
/// Multipart fields: `video` (ZIP), `audio` (MP3), optional `fade_duration`.
pub async fn process_video(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<SubmitResponse>)> {
    let mut video: Option<Upload> = None;
    let mut audio: Option<Upload> = None;
    let mut fade_duration: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Invalid multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "video" | "audio" => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("Failed to read {}: {}", name, e)))?;
                let upload = Some(Upload { file_name, bytes });
                if name == "video" {
                    video = upload;
                } else {
                    audio = upload;
                }
            }
            "fade_duration" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("Invalid fade_duration: {}", e)))?;
                fade_duration = Some(text);
            }
            _ => {}
        }
    }

    let video = video.ok_or(ValidationError::MissingArchive)?;
    let audio = audio.ok_or(ValidationError::MissingAudio)?;

    let job_id = state
        .orchestrator
        .submit(SubmitRequest {
            archive_name: video.file_name,
            archive: video.bytes,
            audio_name: audio.file_name,
            audio: audio.bytes,
            fade_duration,
        })
        .await?;

    info!(job_id = %job_id, "Task queued");

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            task_id: job_id,
            status: JobStatus::Pending,
            message: "Task created and queued".to_string(),
        }),
    ))
}

/// Get the latest status record of a task.
pub async fn task_status(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> ApiResult<Json<StatusRecord>> {
    let job_id = parse_task_id(&task_id)?;

    state
        .orchestrator
        .get_status(&job_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Task not found"))
}

/// Stream the finished montage as `result_<id>.mp4`.
pub async fn download(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
    request: Request,
) -> ApiResult<Response> {
    let job_id = parse_task_id(&task_id)?;

    let path = match state.orchestrator.get_artifact(&job_id).await? {
        ArtifactLookup::Ready { path, .. } => path,
        ArtifactLookup::NotFound => return Err(ApiError::not_found("Task not found")),
        ArtifactLookup::NotReady(status) => {
            return Err(ApiError::bad_request(format!(
                "File not available. Task status: {}",
                status
            )))
        }
        ArtifactLookup::Expired => return Err(ApiError::not_found("File not found or deleted")),
    };

    let response = ServeFile::new(&path)
        .oneshot(request)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to serve file: {}", e)))?;

    if response.status() == StatusCode::NOT_FOUND {
        // Deleted between lookup and open
        warn!(job_id = %job_id, "Artifact vanished before download");
        return Err(ApiError::not_found("File not found or deleted"));
    }

    let mut response = response.map(Body::new);
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("video/mp4"));
    let disposition = format!("attachment; filename=\"result_{}.mp4\"", job_id);
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }

    Ok(response.into_response())
}

/// Ids that can never exist are reported the same as unknown ones.
fn parse_task_id(raw: &str) -> ApiResult<JobId> {
    JobId::parse(raw).ok_or_else(|| ApiError::not_found("Task not found"))
}
