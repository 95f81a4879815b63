//! Legacy clip API routes, kept as aliases over the job service.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;

use super::jobs::{parse_job_id, parse_submission, SubmitJobRequest};
use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct ClipVideoResponse {
    pub request_id: String,
}

#[derive(Debug, Serialize)]
pub struct ClipProgressResponse {
    pub task_id: String,
    pub status: String,
    pub progress: u8,
}

#[derive(Debug, Serialize)]
pub struct ClippedVideoResponse {
    pub video_url: String,
}

/// POST /api/clip-video/
pub async fn clip_video(
    State(state): State<AppState>,
    body: Result<Json<SubmitJobRequest>, JsonRejection>,
) -> ApiResult<Json<ClipVideoResponse>> {
    let (source, start, end) = parse_submission(body)?;
    let id = state.submissions.submit(&source, start, end).await?;
    Ok(Json(ClipVideoResponse {
        request_id: id.to_string(),
    }))
}

/// GET /api/clip-progress/:id
pub async fn clip_progress(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ClipProgressResponse>> {
    let id = parse_job_id(&id)?;
    let status = state.submissions.get_status(&id).await?;
    Ok(Json(ClipProgressResponse {
        task_id: id.to_string(),
        status: status.state.to_string(),
        progress: status.progress_percent,
    }))
}

/// GET /api/get-clipped-video/:id
pub async fn get_clipped_video(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ClippedVideoResponse>> {
    let id = parse_job_id(&id)?;
    let video_url = state.submissions.get_result(&id).await?;
    Ok(Json(ClippedVideoResponse { video_url }))
}
