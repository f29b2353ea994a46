use s3::creds::Credentials;
use s3::{Bucket, BucketConfiguration, Region};
use std::path::Path;
use strum::Display;
use uuid::Uuid;

/// Presigned URLs expire after one hour; past that the store rejects them.
const PRESIGN_TTL_SECS: u32 = 3600;

/// Pipeline stage a stored object belongs to. Forms the middle segment of the
/// object key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ObjectStage {
    #[strum(serialize = "original")]
    Original,
    #[strum(serialize = "input")]
    Input,
    #[strum(serialize = "output")]
    Output,
    #[strum(serialize = "outputPNG")]
    OutputPng,
}

/// Build an object key: `users/{owner}/{stage}/{uuid}.{ext}`.
pub fn object_key(owner_id: i64, stage: ObjectStage, ext: &str) -> String {
    format!("users/{owner_id}/{stage}/{}.{ext}", Uuid::new_v4())
}

/// Client for a MinIO/S3-compatible object store holding original images and
/// pipeline artifacts.
pub struct BlobStore {
    bucket: Box<Bucket>,
    bucket_name: String,
    region: Region,
    credentials: Credentials,
}

impl BlobStore {
    pub fn new(
        bucket_name: &str,
        endpoint: &str,
        access_key: &str,
        secret_key: &str,
        use_tls: bool,
    ) -> Result<Self, StorageError> {
        let scheme = if use_tls { "https" } else { "http" };
        let region = Region::Custom {
            region: "us-east-1".to_string(),
            endpoint: format!("{scheme}://{endpoint}"),
        };

        let credentials = Credentials::new(Some(access_key), Some(secret_key), None, None, None)
            .map_err(|e| StorageError::Config(e.to_string()))?;

        // MinIO serves buckets under the path, not a subdomain
        let bucket = Bucket::new(bucket_name, region.clone(), credentials.clone())
            .map_err(|e| StorageError::Config(e.to_string()))?
            .with_path_style();

        Ok(Self {
            bucket,
            bucket_name: bucket_name.to_string(),
            region,
            credentials,
        })
    }

    /// Provision the bucket if it does not exist yet. Called once at startup.
    pub async fn ensure_bucket(&self) -> Result<(), StorageError> {
        if self.bucket.exists().await.map_err(StorageError::S3)? {
            return Ok(());
        }

        tracing::info!(bucket = %self.bucket_name, "creating storage bucket");
        Bucket::create_with_path_style(
            &self.bucket_name,
            self.region.clone(),
            self.credentials.clone(),
            BucketConfiguration::default(),
        )
        .await
        .map_err(StorageError::S3)?;

        Ok(())
    }

    /// Upload bytes under the given key.
    pub async fn put(&self, key: &str, data: &[u8], content_type: &str) -> Result<(), StorageError> {
        self.bucket
            .put_object_with_content_type(key, data, content_type)
            .await
            .map_err(StorageError::S3)?;
        Ok(())
    }

    /// Upload a local file under the given key.
    pub async fn put_file(
        &self,
        key: &str,
        path: &Path,
        content_type: &str,
    ) -> Result<(), StorageError> {
        let data = tokio::fs::read(path).await?;
        self.put(key, &data, content_type).await
    }

    /// Fetch an object's bytes.
    pub async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let response = self.bucket.get_object(key).await.map_err(StorageError::S3)?;
        Ok(response.to_vec())
    }

    /// Fetch an object into a local file.
    pub async fn download_to(&self, key: &str, dest: &Path) -> Result<(), StorageError> {
        let data = self.get(key).await?;
        tokio::fs::write(dest, &data).await?;
        Ok(())
    }

    /// Delete an object.
    pub async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.bucket.delete_object(key).await.map_err(StorageError::S3)?;
        Ok(())
    }

    /// Connectivity probe for health checks.
    pub async fn health_check(&self) -> Result<(), StorageError> {
        self.bucket.exists().await.map_err(StorageError::S3)?;
        Ok(())
    }

    /// Generate a time-limited, credential-free download URL for an object.
    pub async fn presigned_url(&self, key: &str) -> Result<String, StorageError> {
        self.bucket
            .presign_get(key, PRESIGN_TTL_SECS, None)
            .await
            .map_err(StorageError::S3)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("S3 operation failed: {0}")]
    S3(#[from] s3::error::S3Error),

    #[error("Storage configuration error: {0}")]
    Config(String),

    #[error("Local file error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_key_layout() {
        let key = object_key(42, ObjectStage::Original, "png");
        assert!(key.starts_with("users/42/original/"));
        assert!(key.ends_with(".png"));

        let key = object_key(7, ObjectStage::Input, "nii");
        assert!(key.starts_with("users/7/input/"));
        assert!(key.ends_with(".nii"));
    }

    #[test]
    fn test_stage_segments() {
        assert_eq!(ObjectStage::Original.to_string(), "original");
        assert_eq!(ObjectStage::Input.to_string(), "input");
        assert_eq!(ObjectStage::Output.to_string(), "output");
        assert_eq!(ObjectStage::OutputPng.to_string(), "outputPNG");
    }

    #[test]
    fn test_object_keys_are_unique() {
        let a = object_key(1, ObjectStage::Output, "nii");
        let b = object_key(1, ObjectStage::Output, "nii");
        assert_ne!(a, b);
    }
}
