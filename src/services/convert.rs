use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use strum::Display;
use tokio::process::Command;
use uuid::Uuid;

/// Raster format for converted output images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum RasterFormat {
    Png,
    Jpeg,
}

/// Two-way conversion between 2D images and the volumetric NIfTI format.
///
/// Backed by an external converter process here, but the seam allows an
/// in-process implementation without touching the orchestrator.
#[async_trait]
pub trait Converter: Send + Sync {
    /// Convert a 2D image into a NIfTI volume, returning the output path.
    async fn to_volumetric(&self, image_path: &Path) -> Result<PathBuf, ConvertError>;

    /// Convert a NIfTI volume back into a viewable image, returning the
    /// output path.
    async fn to_image(
        &self,
        volume_path: &Path,
        format: RasterFormat,
    ) -> Result<PathBuf, ConvertError>;
}

/// Converter backed by an external interpreter + script invocation.
///
/// The script takes input and output paths as positional arguments; a
/// trailing `--reverse` flag selects the volume-to-image direction, and the
/// output path's extension selects the raster format.
pub struct ScriptConverter {
    interpreter: String,
    script: PathBuf,
    scratch_dir: PathBuf,
}

impl ScriptConverter {
    pub fn new(interpreter: &str, script: &Path, scratch_dir: &Path) -> Self {
        Self {
            interpreter: interpreter.to_string(),
            script: script.to_path_buf(),
            scratch_dir: scratch_dir.to_path_buf(),
        }
    }

    async fn run(&self, input: &Path, output: &Path, reverse: bool) -> Result<(), ConvertError> {
        let mut cmd = Command::new(&self.interpreter);
        cmd.arg(&self.script)
            .arg(input)
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if reverse {
            cmd.arg("--reverse");
        }

        let result = cmd.output().await?;

        if !result.status.success() {
            let code = result.status.code().unwrap_or(-1);
            let stderr: String = String::from_utf8_lossy(&result.stderr)
                .chars()
                .take(2000)
                .collect();
            tracing::error!(
                interpreter = %self.interpreter,
                script = %self.script.display(),
                code,
                stderr = %stderr,
                "converter process failed"
            );
            return Err(ConvertError::Process { code, stderr });
        }

        // A zero exit alone is not success; the converter must have produced
        // the file it was asked for.
        if tokio::fs::metadata(output).await.is_err() {
            return Err(ConvertError::OutputMissing(output.display().to_string()));
        }

        Ok(())
    }
}

#[async_trait]
impl Converter for ScriptConverter {
    async fn to_volumetric(&self, image_path: &Path) -> Result<PathBuf, ConvertError> {
        let output = self.scratch_dir.join(format!("{}.nii", Uuid::new_v4()));
        self.run(image_path, &output, false).await?;
        Ok(output)
    }

    async fn to_image(
        &self,
        volume_path: &Path,
        format: RasterFormat,
    ) -> Result<PathBuf, ConvertError> {
        let output = self.scratch_dir.join(format!("{}.{format}", Uuid::new_v4()));
        self.run(volume_path, &output, true).await?;
        Ok(output)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    #[error("Failed to run converter: {0}")]
    Io(#[from] std::io::Error),

    #[error("Converter exited with code {code}: {stderr}")]
    Process { code: i32, stderr: String },

    #[error("Converter output file not created: {0}")]
    OutputMissing(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Write a shell script into the scratch dir and return a converter
    /// driving it via `sh`.
    fn stub_converter(dir: &Path, body: &str) -> ScriptConverter {
        let script = dir.join(format!("stub_{}.sh", Uuid::new_v4()));
        std::fs::write(&script, body).unwrap();
        ScriptConverter::new("sh", &script, dir)
    }

    #[tokio::test]
    async fn test_to_volumetric_success() {
        let dir = std::env::temp_dir();
        // $1 = input, $2 = output
        let converter = stub_converter(&dir, "cp \"$1\" \"$2\"\n");

        let input = dir.join(format!("in_{}.png", Uuid::new_v4()));
        std::fs::write(&input, b"fake image bytes").unwrap();

        let output = converter.to_volumetric(&input).await.unwrap();
        assert_eq!(output.extension().unwrap(), "nii");
        assert_eq!(std::fs::read(&output).unwrap(), b"fake image bytes");

        std::fs::remove_file(&input).ok();
        std::fs::remove_file(&output).ok();
    }

    #[tokio::test]
    async fn test_to_image_passes_reverse_flag() {
        let dir = std::env::temp_dir();
        // Fails unless --reverse is the third argument
        let converter = stub_converter(
            &dir,
            "[ \"$3\" = \"--reverse\" ] || exit 9\ncp \"$1\" \"$2\"\n",
        );

        let input = dir.join(format!("vol_{}.nii", Uuid::new_v4()));
        std::fs::write(&input, b"volume bytes").unwrap();

        let output = converter.to_image(&input, RasterFormat::Png).await.unwrap();
        assert_eq!(output.extension().unwrap(), "png");

        std::fs::remove_file(&input).ok();
        std::fs::remove_file(&output).ok();
    }

    #[tokio::test]
    async fn test_reencoding_is_deterministic() {
        let dir = std::env::temp_dir();
        let converter = stub_converter(&dir, "cp \"$1\" \"$2\"\n");

        let input = dir.join(format!("vol_{}.nii", Uuid::new_v4()));
        std::fs::write(&input, b"volume bytes").unwrap();

        let first = converter.to_image(&input, RasterFormat::Png).await.unwrap();
        let second = converter.to_image(&input, RasterFormat::Png).await.unwrap();
        assert_ne!(first, second);
        assert_eq!(
            std::fs::read(&first).unwrap(),
            std::fs::read(&second).unwrap()
        );

        std::fs::remove_file(&input).ok();
        std::fs::remove_file(&first).ok();
        std::fs::remove_file(&second).ok();
    }

    #[tokio::test]
    async fn test_nonzero_exit_captures_stderr() {
        let dir = std::env::temp_dir();
        let converter = stub_converter(&dir, "echo 'unsupported voxel layout' >&2\nexit 3\n");

        let input = dir.join(format!("in_{}.png", Uuid::new_v4()));
        std::fs::write(&input, b"x").unwrap();

        let err = converter.to_volumetric(&input).await.unwrap_err();
        match err {
            ConvertError::Process { code, stderr } => {
                assert_eq!(code, 3);
                assert!(stderr.contains("unsupported voxel layout"));
            }
            other => panic!("expected Process error, got {other:?}"),
        }

        std::fs::remove_file(&input).ok();
    }

    #[tokio::test]
    async fn test_missing_output_is_a_failure() {
        let dir = std::env::temp_dir();
        // Exits cleanly without writing anything
        let converter = stub_converter(&dir, "exit 0\n");

        let input = dir.join(format!("in_{}.png", Uuid::new_v4()));
        std::fs::write(&input, b"x").unwrap();

        let err = converter.to_volumetric(&input).await.unwrap_err();
        assert!(matches!(err, ConvertError::OutputMissing(_)));

        std::fs::remove_file(&input).ok();
    }
}
