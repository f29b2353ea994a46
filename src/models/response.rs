use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::models::job::JobStatus;

/// Response after submitting an image for processing.
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub message: String,
    pub job_id: Uuid,
    pub status: JobStatus,
}

/// Status of a single job as exposed by the API. Completed jobs carry
/// presigned URLs, failed jobs carry the error message, processing jobs
/// carry neither.
#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    pub id: Uuid,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_image_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_image_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
