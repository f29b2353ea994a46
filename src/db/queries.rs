use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::str::FromStr;
use uuid::Uuid;

use crate::models::job::{JobStatus, ProcessingJob};

const JOB_COLUMNS: &str = "id, owner_id, original_image_key, input_nii_key, output_nii_key, \
                           result_image_key, status, error, created_at, updated_at";

fn job_from_row(row: &PgRow) -> Result<ProcessingJob, sqlx::Error> {
    let status_str: String = row.try_get("status")?;
    let status = JobStatus::from_str(&status_str).map_err(|e| sqlx::Error::Decode(Box::new(e)))?;

    Ok(ProcessingJob {
        id: row.try_get("id")?,
        owner_id: row.try_get("owner_id")?,
        original_image_key: row.try_get("original_image_key")?,
        input_nii_key: row.try_get("input_nii_key")?,
        output_nii_key: row.try_get("output_nii_key")?,
        result_image_key: row.try_get("result_image_key")?,
        status,
        error: row.try_get("error")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Insert a new processing job. Rows are born in 'processing' with the
/// original image key already set.
pub async fn create_job(
    pool: &PgPool,
    owner_id: i64,
    original_image_key: &str,
) -> Result<ProcessingJob, sqlx::Error> {
    let row = sqlx::query(&format!(
        r#"
        INSERT INTO processing_jobs (owner_id, original_image_key, status)
        VALUES ($1, $2, 'processing')
        RETURNING {JOB_COLUMNS}
        "#,
    ))
    .bind(owner_id)
    .bind(original_image_key)
    .fetch_one(pool)
    .await?;

    job_from_row(&row)
}

/// Get a job by ID, scoped to its owner. An owner mismatch looks exactly like
/// a missing job.
pub async fn get_job(
    pool: &PgPool,
    job_id: Uuid,
    owner_id: i64,
) -> Result<Option<ProcessingJob>, sqlx::Error> {
    let row = sqlx::query(&format!(
        r#"
        SELECT {JOB_COLUMNS}
        FROM processing_jobs
        WHERE id = $1 AND owner_id = $2
        "#,
    ))
    .bind(job_id)
    .bind(owner_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(job_from_row).transpose()
}

/// Most recent jobs for an owner, newest first.
pub async fn list_history(
    pool: &PgPool,
    owner_id: i64,
    limit: i64,
) -> Result<Vec<ProcessingJob>, sqlx::Error> {
    let rows = sqlx::query(&format!(
        r#"
        SELECT {JOB_COLUMNS}
        FROM processing_jobs
        WHERE owner_id = $1
        ORDER BY created_at DESC
        LIMIT $2
        "#,
    ))
    .bind(owner_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.iter().map(job_from_row).collect()
}

/// Record the volumetric input key after it has been uploaded.
pub async fn set_input_nii_key(pool: &PgPool, job_id: Uuid, key: &str) -> Result<(), sqlx::Error> {
    set_stage_key(pool, job_id, "input_nii_key", key).await
}

/// Record the volumetric output key after it has been uploaded.
pub async fn set_output_nii_key(pool: &PgPool, job_id: Uuid, key: &str) -> Result<(), sqlx::Error> {
    set_stage_key(pool, job_id, "output_nii_key", key).await
}

/// Record the result image key after it has been uploaded.
pub async fn set_result_image_key(
    pool: &PgPool,
    job_id: Uuid,
    key: &str,
) -> Result<(), sqlx::Error> {
    set_stage_key(pool, job_id, "result_image_key", key).await
}

async fn set_stage_key(
    pool: &PgPool,
    job_id: Uuid,
    column: &str,
    key: &str,
) -> Result<(), sqlx::Error> {
    // column comes from the three callers above, never from input
    sqlx::query(&format!(
        r#"
        UPDATE processing_jobs
        SET {column} = $1, updated_at = NOW()
        WHERE id = $2 AND status = 'processing'
        "#,
    ))
    .bind(key)
    .bind(job_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Transition a job to 'completed'. The status guard makes terminal states
/// immutable: once completed or failed, no further transition lands.
pub async fn mark_completed(pool: &PgPool, job_id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE processing_jobs
        SET status = 'completed', updated_at = NOW()
        WHERE id = $1 AND status = 'processing'
        "#,
    )
    .bind(job_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Transition a job to 'failed' with a diagnostic message.
pub async fn mark_failed(pool: &PgPool, job_id: Uuid, error: &str) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE processing_jobs
        SET status = 'failed', error = $1, updated_at = NOW()
        WHERE id = $2 AND status = 'processing'
        "#,
    )
    .bind(error)
    .bind(job_id)
    .execute(pool)
    .await?;

    Ok(())
}
