use axum::extract::{Multipart, Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::job::JobStatus;
use crate::models::response::{JobStatusResponse, UploadResponse};
use crate::routes::auth::Owner;
use crate::routes::ApiError;
use crate::services::convert::RasterFormat;
use crate::services::pipeline::Scratch;
use crate::services::presenter;

/// POST /api/upload — submit a 2D image for segmentation.
///
/// Returns as soon as the job is created and queued; the pipeline runs
/// detached and its failures surface through the results endpoints, never
/// here.
pub async fn upload_image(
    State(state): State<AppState>,
    owner: Owner,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let mut upload: Option<(String, axum::body::Bytes)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| ApiError::BadRequest("Malformed multipart body".to_string()))?
    {
        if field.name() == Some("image") {
            let file_name = field
                .file_name()
                .map(str::to_owned)
                .ok_or_else(|| ApiError::Validation("No image file provided".to_string()))?;
            let data = field
                .bytes()
                .await
                .map_err(|_| ApiError::BadRequest("Malformed multipart body".to_string()))?;
            upload = Some((file_name, data));
        }
    }

    let (file_name, data) =
        upload.ok_or_else(|| ApiError::Validation("No image file provided".to_string()))?;

    let job = state
        .orchestrator
        .create_job(owner.0, &file_name, &data)
        .await?;

    Ok(Json(UploadResponse {
        message: "Processing started".to_string(),
        job_id: job.id,
        status: job.status,
    }))
}

/// GET /api/results/{id} — status of one job, with presigned URLs once
/// completed.
pub async fn get_result(
    State(state): State<AppState>,
    owner: Owner,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobStatusResponse>, ApiError> {
    let job = state
        .orchestrator
        .get_job(job_id, owner.0)
        .await
        .map_err(ApiError::internal)?
        .ok_or(ApiError::NotFound)?;

    Ok(Json(presenter::status_response(&state.storage, &job).await))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadFormat {
    #[default]
    Nii,
    Png,
}

#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    #[serde(default)]
    pub format: DownloadFormat,
}

/// GET /api/results/{id}/download?format=nii|png — the stored volumetric
/// result, raw or re-encoded to PNG on demand.
pub async fn download_result(
    State(state): State<AppState>,
    owner: Owner,
    Path(job_id): Path<Uuid>,
    Query(query): Query<DownloadQuery>,
) -> Result<Response, ApiError> {
    let job = state
        .orchestrator
        .get_job(job_id, owner.0)
        .await
        .map_err(ApiError::internal)?
        .ok_or(ApiError::NotFound)?;

    if job.status != JobStatus::Completed {
        return Err(ApiError::BadRequest("Job not completed".to_string()));
    }

    // Completed jobs always carry the output key
    let output_key = job
        .output_nii_key
        .as_deref()
        .ok_or(ApiError::Internal)?;

    match query.format {
        DownloadFormat::Nii => {
            let data = state
                .storage
                .get(output_key)
                .await
                .map_err(ApiError::internal)?;

            Ok((
                [
                    (header::CONTENT_TYPE, "application/octet-stream".to_string()),
                    (
                        header::CONTENT_DISPOSITION,
                        format!("attachment; filename=result_{}.nii", job.id),
                    ),
                ],
                data,
            )
                .into_response())
        }
        DownloadFormat::Png => {
            let mut scratch = Scratch::new(&state.scratch_dir);

            let volume_path = scratch.file(&format!("dl_{}_{}.nii", job.id, Uuid::new_v4()));
            state
                .storage
                .download_to(output_key, &volume_path)
                .await
                .map_err(ApiError::internal)?;

            let png_path = state
                .converter
                .to_image(&volume_path, RasterFormat::Png)
                .await
                .map_err(ApiError::internal)?;
            scratch.track(png_path.clone());

            let data = tokio::fs::read(&png_path)
                .await
                .map_err(ApiError::internal)?;

            Ok((
                [
                    (header::CONTENT_TYPE, "image/png".to_string()),
                    (
                        header::CONTENT_DISPOSITION,
                        format!("attachment; filename=result_{}.png", job.id),
                    ),
                ],
                data,
            )
                .into_response())
        }
    }
}

/// GET /api/history — up to 50 of the caller's jobs, newest first.
pub async fn get_history(
    State(state): State<AppState>,
    owner: Owner,
) -> Result<Json<Vec<JobStatusResponse>>, ApiError> {
    let jobs = state
        .orchestrator
        .list_history(owner.0)
        .await
        .map_err(ApiError::internal)?;

    Ok(Json(
        presenter::history_response(&state.storage, &jobs).await,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_download_format_defaults_to_nii() {
        let query: DownloadQuery = serde_json::from_str("{}").unwrap();
        assert_eq!(query.format, DownloadFormat::Nii);
    }

    #[test]
    fn test_download_format_parses_png() {
        let query: DownloadQuery = serde_json::from_str(r#"{"format":"png"}"#).unwrap();
        assert_eq!(query.format, DownloadFormat::Png);
    }

    #[test]
    fn test_unknown_download_format_rejected() {
        assert!(serde_json::from_str::<DownloadQuery>(r#"{"format":"dicom"}"#).is_err());
    }
}
