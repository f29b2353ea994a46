use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string
    pub database_url: String,

    /// HS256 secret for validating bearer tokens issued by the auth service
    pub jwt_secret: String,

    /// Object store endpoint, host:port (MinIO or any S3-compatible store)
    #[serde(default = "default_storage_endpoint")]
    pub storage_endpoint: String,

    /// Object store access key ID
    pub storage_access_key: String,

    /// Object store secret access key
    pub storage_secret_key: String,

    /// Bucket holding originals and pipeline artifacts
    #[serde(default = "default_storage_bucket")]
    pub storage_bucket: String,

    /// Whether to reach the object store over TLS
    #[serde(default)]
    pub storage_use_tls: bool,

    /// External converter script (image <-> NIfTI)
    #[serde(default = "default_converter_script")]
    pub converter_script: PathBuf,

    /// Interpreter used to run the converter script
    #[serde(default = "default_converter_interpreter")]
    pub converter_interpreter: String,

    /// Inference model endpoint URL
    pub model_url: String,

    /// Directory for per-pipeline scratch files
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: PathBuf,

    /// Number of concurrent pipeline workers
    #[serde(default = "default_pipeline_workers")]
    pub pipeline_workers: usize,

    /// Jobs admitted beyond the running ones before uploads are rejected
    #[serde(default = "default_pipeline_queue_depth")]
    pub pipeline_queue_depth: usize,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_storage_endpoint() -> String {
    "localhost:9000".to_string()
}

fn default_storage_bucket() -> String {
    "medical-imaging".to_string()
}

fn default_converter_script() -> PathBuf {
    PathBuf::from("scripts/convert_to_nii.py")
}

fn default_converter_interpreter() -> String {
    "python3".to_string()
}

fn default_scratch_dir() -> PathBuf {
    std::env::temp_dir()
}

fn default_pipeline_workers() -> usize {
    4
}

fn default_pipeline_queue_depth() -> usize {
    16
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }
}
