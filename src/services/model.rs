use reqwest::multipart::{Form, Part};
use reqwest::Client;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Client for the external segmentation model endpoint.
///
/// The model accepts a NIfTI volume as a multipart upload and answers with
/// the segmented volume as its raw response body.
pub struct ModelClient {
    http: Client,
    endpoint: String,
    scratch_dir: PathBuf,
}

impl ModelClient {
    pub fn new(endpoint: &str, scratch_dir: &Path) -> Self {
        Self {
            http: Client::new(),
            endpoint: endpoint.to_string(),
            scratch_dir: scratch_dir.to_path_buf(),
        }
    }

    /// Send a volume for inference and persist the returned volume as a new
    /// scratch file. Any non-success status or transport error is a hard
    /// failure; there is no retry.
    pub async fn infer(&self, volume_path: &Path) -> Result<PathBuf, ModelError> {
        let data = tokio::fs::read(volume_path).await?;
        let file_name = volume_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "input.nii".to_string());

        let part = Part::bytes(data)
            .file_name(file_name)
            .mime_str("application/octet-stream")
            .map_err(ModelError::Http)?;
        let form = Form::new().part("file", part);

        let response = self
            .http
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .await
            .map_err(ModelError::Http)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Inference {
                status: status.as_u16(),
                body,
            });
        }

        let output = self.scratch_dir.join(format!("{}_output.nii", Uuid::new_v4()));
        let body = response.bytes().await.map_err(ModelError::Http)?;
        tokio::fs::write(&output, &body).await?;

        Ok(output)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("Model request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Model returned error {status}: {body}")]
    Inference { status: u16, body: String },

    #[error("Failed to stage model data: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Multipart;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::Router;

    async fn echo_volume(mut multipart: Multipart) -> Result<Vec<u8>, StatusCode> {
        while let Some(field) = multipart.next_field().await.map_err(|_| StatusCode::BAD_REQUEST)? {
            if field.name() == Some("file") {
                let data = field.bytes().await.map_err(|_| StatusCode::BAD_REQUEST)?;
                return Ok(data.to_vec());
            }
        }
        Err(StatusCode::BAD_REQUEST)
    }

    async fn reject_volume() -> (StatusCode, &'static str) {
        (StatusCode::UNPROCESSABLE_ENTITY, "volume has no slices")
    }

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/")
    }

    #[tokio::test]
    async fn test_infer_persists_response_body() {
        let endpoint = serve(Router::new().route("/", post(echo_volume))).await;

        let dir = std::env::temp_dir();
        let input = dir.join(format!("{}.nii", Uuid::new_v4()));
        std::fs::write(&input, b"volume payload").unwrap();

        let client = ModelClient::new(&endpoint, &dir);
        let output = client.infer(&input).await.unwrap();

        assert_ne!(output, input);
        assert_eq!(std::fs::read(&output).unwrap(), b"volume payload");

        std::fs::remove_file(&input).ok();
        std::fs::remove_file(&output).ok();
    }

    #[tokio::test]
    async fn test_error_status_includes_body() {
        let endpoint = serve(Router::new().route("/", post(reject_volume))).await;

        let dir = std::env::temp_dir();
        let input = dir.join(format!("{}.nii", Uuid::new_v4()));
        std::fs::write(&input, b"volume payload").unwrap();

        let client = ModelClient::new(&endpoint, &dir);
        let err = client.infer(&input).await.unwrap_err();

        match err {
            ModelError::Inference { status, body } => {
                assert_eq!(status, 422);
                assert!(body.contains("volume has no slices"));
            }
            other => panic!("expected Inference error, got {other:?}"),
        }

        std::fs::remove_file(&input).ok();
    }

    #[tokio::test]
    async fn test_transport_error_is_a_failure() {
        // Nothing listens here
        let dir = std::env::temp_dir();
        let input = dir.join(format!("{}.nii", Uuid::new_v4()));
        std::fs::write(&input, b"volume payload").unwrap();

        let client = ModelClient::new("http://127.0.0.1:1/", &dir);
        let err = client.infer(&input).await.unwrap_err();
        assert!(matches!(err, ModelError::Http(_)));

        std::fs::remove_file(&input).ok();
    }
}
