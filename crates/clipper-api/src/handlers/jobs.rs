//! Job submission, status, result and download handlers.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use validator::{Validate, ValidationError};

use clipper_models::{Job, JobId, JobState, OffsetValue};

use crate::auth::Identity;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Body of `POST /jobs`. Also accepts the field names of the older clip API.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SubmitJobRequest {
    #[serde(alias = "source", alias = "video_url")]
    #[validate(custom(function = "not_blank"))]
    pub source_locator: String,

    #[serde(alias = "start", alias = "start_time")]
    pub start_offset: OffsetValue,

    #[serde(alias = "end", alias = "end_time")]
    pub end_offset: OffsetValue,
}

fn not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        let mut err = ValidationError::new("blank");
        err.message = Some("sourceLocator must not be empty".into());
        return Err(err);
    }
    Ok(())
}

#[derive(Debug, Serialize)]
pub struct SubmitJobResponse {
    pub id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusResponse {
    pub id: String,
    pub state: JobState,
    pub progress_percent: u8,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_locator: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

impl From<Job> for JobStatusResponse {
    fn from(job: Job) -> Self {
        Self {
            progress_percent: job.reported_progress(),
            id: job.id.to_string(),
            state: job.state,
            created_at: job.created_at,
            updated_at: job.updated_at,
            result_locator: job.result_locator,
            error_detail: job.error_detail,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResultResponse {
    pub result_locator: String,
}

/// Validate a request body and resolve its offsets to seconds.
pub(crate) fn parse_submission(
    body: Result<Json<SubmitJobRequest>, JsonRejection>,
) -> ApiResult<(String, f64, f64)> {
    let Json(request) = body.map_err(|e| ApiError::bad_request(e.body_text()))?;
    request.validate().map_err(|e| ApiError::bad_request(e.to_string()))?;

    let start = request
        .start_offset
        .to_seconds()
        .map_err(|e| ApiError::InvalidRange(format!("startOffset: {e}")))?;
    let end = request
        .end_offset
        .to_seconds()
        .map_err(|e| ApiError::InvalidRange(format!("endOffset: {e}")))?;

    Ok((request.source_locator.trim().to_string(), start, end))
}

/// Job ids are generated server-side; anything else cannot exist.
pub(crate) fn parse_job_id(raw: &str) -> ApiResult<JobId> {
    let valid = (8..=64).contains(&raw.len())
        && raw.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
    if !valid {
        return Err(ApiError::not_found(format!("job {raw}")));
    }
    Ok(JobId::from_string(raw))
}

/// POST /jobs
pub async fn submit_job(
    State(state): State<AppState>,
    identity: Option<Extension<Identity>>,
    body: Result<Json<SubmitJobRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let (source, start, end) = parse_submission(body)?;
    let id = state.submissions.submit(&source, start, end).await?;

    info!(
        job_id = %id,
        subject = identity.as_ref().map(|Extension(i)| i.subject.as_str()).unwrap_or("anonymous"),
        "Accepted clip job [{}s - {}s] of {}", start, end, source
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitJobResponse { id: id.to_string() }),
    ))
}

/// GET /jobs/:id
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<JobStatusResponse>> {
    let id = parse_job_id(&id)?;
    let job = state.submissions.get_job(&id).await?;
    Ok(Json(job.into()))
}

/// GET /jobs/:id/result
pub async fn get_job_result(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<JobResultResponse>> {
    let id = parse_job_id(&id)?;
    let result_locator = state.submissions.get_result(&id).await?;
    Ok(Json(JobResultResponse { result_locator }))
}

/// GET /jobs/:id/download
pub async fn download_job_result(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let id = parse_job_id(&id)?;
    let locator = state.submissions.get_result(&id).await?;
    let bytes = state.artifacts.get(&locator).await?;

    let disposition = format!("attachment; filename=\"{id}.mp4\"");
    Ok((
        [
            (header::CONTENT_TYPE, "video/mp4".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> ApiResult<(String, f64, f64)> {
        let request: SubmitJobRequest = serde_json::from_str(json).unwrap();
        parse_submission(Ok(Json(request)))
    }

    #[test]
    fn test_aliases_and_timestamps() {
        let (source, start, end) =
            parse(r#"{"video_url": " https://x/y.mp4 ", "start_time": "00:00:10", "end_time": "01:05"}"#)
                .unwrap();
        assert_eq!(source, "https://x/y.mp4");
        assert_eq!(start, 10.0);
        assert_eq!(end, 65.0);

        let (_, start, end) = parse(r#"{"source": "a.mp4", "start": 1.5, "end": 2}"#).unwrap();
        assert_eq!((start, end), (1.5, 2.0));
    }

    #[test]
    fn test_blank_source_rejected() {
        let err = parse(r#"{"sourceLocator": "  ", "startOffset": 0, "endOffset": 1}"#).unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[test]
    fn test_bad_timestamp_is_invalid_range() {
        let err = parse(r#"{"sourceLocator": "a.mp4", "startOffset": "xx:10", "endOffset": 1}"#)
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidRange(_)));
    }

    #[test]
    fn test_parse_job_id() {
        assert!(parse_job_id("550e8400-e29b-41d4-a716-446655440000").is_ok());
        assert!(parse_job_id("short").is_err());
        assert!(parse_job_id("has space in it").is_err());
        assert!(parse_job_id(&"a".repeat(65)).is_err());
    }
}
