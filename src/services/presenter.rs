use crate::models::job::{JobStatus, ProcessingJob};
use crate::models::response::JobStatusResponse;
use crate::services::storage::BlobStore;

/// Map a job record into its API-facing shape. Completed jobs get presigned
/// URLs for the original and result images; failed jobs get the error;
/// processing jobs get id/status/timestamps only.
pub async fn status_response(storage: &BlobStore, job: &ProcessingJob) -> JobStatusResponse {
    let mut response = JobStatusResponse {
        id: job.id,
        status: job.status,
        created_at: job.created_at,
        updated_at: job.updated_at,
        original_image_url: None,
        result_image_url: None,
        error: None,
    };

    match job.status {
        JobStatus::Completed => {
            response.result_image_url = resolve_url(storage, job.result_image_key.as_deref()).await;
            response.original_image_url =
                resolve_url(storage, Some(job.original_image_key.as_str())).await;
        }
        JobStatus::Failed => {
            response.error = job.error.clone();
        }
        JobStatus::Processing => {}
    }

    response
}

/// Same per-job URL resolution over a history page, order preserved.
pub async fn history_response(
    storage: &BlobStore,
    jobs: &[ProcessingJob],
) -> Vec<JobStatusResponse> {
    let mut responses = Vec::with_capacity(jobs.len());
    for job in jobs {
        responses.push(status_response(storage, job).await);
    }
    responses
}

/// Presign failures degrade to an omitted field rather than failing the
/// whole response.
async fn resolve_url(storage: &BlobStore, key: Option<&str>) -> Option<String> {
    let key = key?;
    match storage.presigned_url(key).await {
        Ok(url) => Some(url),
        Err(e) => {
            tracing::warn!(key, error = %e, "failed to presign object URL");
            None
        }
    }
}
