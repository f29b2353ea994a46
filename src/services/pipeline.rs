use sqlx::PgPool;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::db::queries;
use crate::models::job::ProcessingJob;
use crate::services::convert::{ConvertError, Converter, RasterFormat};
use crate::services::model::{ModelClient, ModelError};
use crate::services::storage::{object_key, BlobStore, ObjectStage, StorageError};

/// History responses never exceed this many jobs, regardless of how many
/// exist for the owner.
pub const HISTORY_LIMIT: i64 = 50;

/// Owns the job lifecycle: creates jobs, drives the staged pipeline, and is
/// the only writer of job state. Readers go through `get_job`/`list_history`.
pub struct JobOrchestrator {
    db: PgPool,
    storage: Arc<BlobStore>,
    converter: Arc<dyn Converter>,
    model: Arc<ModelClient>,
    scratch_dir: PathBuf,
    submit: mpsc::Sender<ProcessingJob>,
}

impl JobOrchestrator {
    pub fn new(
        db: PgPool,
        storage: Arc<BlobStore>,
        converter: Arc<dyn Converter>,
        model: Arc<ModelClient>,
        scratch_dir: PathBuf,
        submit: mpsc::Sender<ProcessingJob>,
    ) -> Self {
        Self {
            db,
            storage,
            converter,
            model,
            scratch_dir,
            submit,
        }
    }

    /// Validate an upload, store the original, create the job row, and hand
    /// the job to the worker pool. Returns as soon as the job is queued; the
    /// pipeline runs detached from the request.
    ///
    /// Validation failures and a full queue reject the upload before any row
    /// or storage write happens.
    pub async fn create_job(
        &self,
        owner_id: i64,
        file_name: &str,
        data: &[u8],
    ) -> Result<ProcessingJob, SubmitError> {
        let ext = allowed_extension(file_name).ok_or_else(|| {
            SubmitError::Validation("Only JPEG and PNG files are allowed".to_string())
        })?;
        let content_type = sniff_content_type(data)?;

        // Reserve the queue slot first so a full pool leaves no side effects
        let permit = self.submit.try_reserve().map_err(|_| SubmitError::QueueFull)?;

        let key = object_key(owner_id, ObjectStage::Original, &ext);
        self.storage.put(&key, data, content_type).await?;

        let job = queries::create_job(&self.db, owner_id, &key).await?;

        tracing::info!(
            job_id = %job.id,
            owner_id,
            original_key = %key,
            "processing job created"
        );
        metrics::counter!("segmentation_jobs_total").increment(1);
        metrics::gauge!("segmentation_queue_depth").increment(1.0);

        permit.send(job.clone());
        Ok(job)
    }

    /// Run the full pipeline for one job. Every stage failure marks the job
    /// failed with a stage-specific diagnostic and halts; scratch files are
    /// removed on every exit path.
    pub async fn run_pipeline(&self, job: ProcessingJob) {
        metrics::gauge!("segmentation_queue_depth").decrement(1.0);

        let started = Instant::now();
        let mut scratch = Scratch::new(&self.scratch_dir);

        tracing::info!(job_id = %job.id, owner_id = job.owner_id, "pipeline started");

        match self.execute(&job, &mut scratch).await {
            Ok(()) => {
                metrics::counter!("segmentation_jobs_completed").increment(1);
                tracing::info!(
                    job_id = %job.id,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "pipeline completed"
                );
            }
            Err(e) => {
                metrics::counter!("segmentation_jobs_failed").increment(1);
                tracing::error!(job_id = %job.id, error = %e, "pipeline failed");

                if let Err(db_err) = queries::mark_failed(&self.db, job.id, &e.to_string()).await {
                    tracing::error!(
                        job_id = %job.id,
                        error = %db_err,
                        "failed to record job failure"
                    );
                }
            }
        }

        metrics::histogram!("segmentation_pipeline_seconds")
            .record(started.elapsed().as_secs_f64());
    }

    async fn execute(
        &self,
        job: &ProcessingJob,
        scratch: &mut Scratch,
    ) -> Result<(), PipelineError> {
        // Stage 1: fetch the original into scratch space
        let image_path = scratch.file(&format!("img_{}_{}", job.id, Uuid::new_v4()));
        self.storage
            .download_to(&job.original_image_key, &image_path)
            .await
            .map_err(PipelineError::FetchOriginal)?;

        // Stage 2: 2D image -> NIfTI volume
        let input_nii = self
            .converter
            .to_volumetric(&image_path)
            .await
            .map_err(PipelineError::ToVolumetric)?;
        scratch.track(input_nii.clone());

        // Stage 3: persist the volumetric input
        let input_key = object_key(job.owner_id, ObjectStage::Input, "nii");
        self.storage
            .put_file(&input_key, &input_nii, "application/octet-stream")
            .await
            .map_err(PipelineError::StoreInput)?;
        queries::set_input_nii_key(&self.db, job.id, &input_key).await?;

        // Stage 4: inference
        let output_nii = self.model.infer(&input_nii).await?;
        scratch.track(output_nii.clone());

        // Stage 5: persist the volumetric output
        let output_key = object_key(job.owner_id, ObjectStage::Output, "nii");
        self.storage
            .put_file(&output_key, &output_nii, "application/octet-stream")
            .await
            .map_err(PipelineError::StoreOutput)?;
        queries::set_output_nii_key(&self.db, job.id, &output_key).await?;

        // Stage 6: NIfTI volume -> viewable PNG
        let result_png = self
            .converter
            .to_image(&output_nii, RasterFormat::Png)
            .await
            .map_err(PipelineError::ToImage)?;
        scratch.track(result_png.clone());

        // Stage 7: persist the result image
        let result_key = object_key(job.owner_id, ObjectStage::OutputPng, "png");
        self.storage
            .put_file(&result_key, &result_png, "image/png")
            .await
            .map_err(PipelineError::StoreResult)?;
        queries::set_result_image_key(&self.db, job.id, &result_key).await?;

        // Stage 8: done
        queries::mark_completed(&self.db, job.id).await?;
        Ok(())
    }

    /// Look up a job for its owner. An owner mismatch is indistinguishable
    /// from a missing job.
    pub async fn get_job(
        &self,
        job_id: Uuid,
        owner_id: i64,
    ) -> Result<Option<ProcessingJob>, sqlx::Error> {
        queries::get_job(&self.db, job_id, owner_id).await
    }

    /// Most recent jobs for an owner, newest first, capped at `HISTORY_LIMIT`.
    pub async fn list_history(&self, owner_id: i64) -> Result<Vec<ProcessingJob>, sqlx::Error> {
        queries::list_history(&self.db, owner_id, HISTORY_LIMIT).await
    }
}

/// Accept `.jpg`/`.jpeg`/`.png` filenames only, returning the normalized
/// extension.
fn allowed_extension(file_name: &str) -> Option<String> {
    let ext = Path::new(file_name)
        .extension()?
        .to_str()?
        .to_ascii_lowercase();
    matches!(ext.as_str(), "jpg" | "jpeg" | "png").then_some(ext)
}

/// Magic-byte sniffing: the content itself must be JPEG or PNG, whatever the
/// filename claims.
fn sniff_content_type(data: &[u8]) -> Result<&'static str, SubmitError> {
    let format = image::guess_format(data).map_err(|_| {
        SubmitError::Validation("Unrecognized image data, only JPEG and PNG are supported".to_string())
    })?;

    match format {
        image::ImageFormat::Jpeg => Ok("image/jpeg"),
        image::ImageFormat::Png => Ok("image/png"),
        _ => Err(SubmitError::Validation(
            "Only JPEG and PNG files are allowed".to_string(),
        )),
    }
}

/// Scratch files for one pipeline run or one download request. Every tracked
/// path is removed when the guard drops, whichever way the run ends.
pub struct Scratch {
    files: Vec<PathBuf>,
    dir: PathBuf,
}

impl Scratch {
    pub fn new(dir: &Path) -> Self {
        Self {
            files: Vec::new(),
            dir: dir.to_path_buf(),
        }
    }

    /// Register a fresh scratch path under the scratch directory.
    pub fn file(&mut self, name: &str) -> PathBuf {
        let path = self.dir.join(name);
        self.files.push(path.clone());
        path
    }

    /// Track an externally created file for cleanup.
    pub fn track(&mut self, path: PathBuf) {
        self.files.push(path);
    }
}

impl Drop for Scratch {
    fn drop(&mut self) {
        for path in &self.files {
            if let Err(e) = std::fs::remove_file(path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %path.display(), error = %e, "failed to remove scratch file");
                }
            }
        }
    }
}

/// Upload-time failures, surfaced synchronously to the caller.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("{0}")]
    Validation(String),

    #[error("Processing queue is full")]
    QueueFull,

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] sqlx::Error),
}

/// Pipeline-stage failures, captured into the job row rather than surfaced
/// over HTTP. Variants carry the stage so the recorded diagnostic names it.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Failed to fetch original image from storage: {0}")]
    FetchOriginal(StorageError),

    #[error("Conversion to volumetric format failed: {0}")]
    ToVolumetric(ConvertError),

    #[error("Failed to upload volumetric input: {0}")]
    StoreInput(StorageError),

    #[error("Model inference failed: {0}")]
    Model(#[from] ModelError),

    #[error("Failed to upload volumetric output: {0}")]
    StoreOutput(StorageError),

    #[error("Conversion to viewable image failed: {0}")]
    ToImage(ConvertError),

    #[error("Failed to upload result image: {0}")]
    StoreResult(StorageError),

    #[error("Failed to update job record: {0}")]
    Persistence(#[from] sqlx::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allowed_extensions() {
        assert_eq!(allowed_extension("scan.png").as_deref(), Some("png"));
        assert_eq!(allowed_extension("scan.JPG").as_deref(), Some("jpg"));
        assert_eq!(allowed_extension("scan.jpeg").as_deref(), Some("jpeg"));
        assert_eq!(allowed_extension("scan.gif"), None);
        assert_eq!(allowed_extension("scan.nii"), None);
        assert_eq!(allowed_extension("scan"), None);
    }

    #[test]
    fn test_sniffing_accepts_real_magic_bytes() {
        let png_magic = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
        assert_eq!(sniff_content_type(&png_magic).unwrap(), "image/png");

        let jpeg_magic = [0xFF, 0xD8, 0xFF, 0xE0];
        assert_eq!(sniff_content_type(&jpeg_magic).unwrap(), "image/jpeg");
    }

    #[test]
    fn test_sniffing_rejects_renamed_garbage() {
        // Ten arbitrary bytes with a .png name are still not an image
        let garbage = [0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09];
        assert!(matches!(
            sniff_content_type(&garbage),
            Err(SubmitError::Validation(_))
        ));
    }

    #[test]
    fn test_scratch_removes_tracked_files_on_drop() {
        let dir = std::env::temp_dir();
        let kept;
        {
            let mut scratch = Scratch::new(&dir);
            let a = scratch.file(&format!("scratch_{}.nii", Uuid::new_v4()));
            std::fs::write(&a, b"a").unwrap();

            let b = dir.join(format!("scratch_{}.png", Uuid::new_v4()));
            std::fs::write(&b, b"b").unwrap();
            scratch.track(b.clone());

            kept = (a, b);
        }
        assert!(!kept.0.exists());
        assert!(!kept.1.exists());
    }

    #[test]
    fn test_scratch_ignores_never_created_files() {
        let dir = std::env::temp_dir();
        let mut scratch = Scratch::new(&dir);
        // Registered but never written; drop must not panic
        scratch.file(&format!("ghost_{}.nii", Uuid::new_v4()));
    }
}
