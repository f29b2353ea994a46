use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Status of a processing job. Jobs are created already in `Processing`;
/// `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// One unit of work tracking an image from upload through conversion,
/// inference, and result availability.
///
/// Object keys are populated strictly in pipeline order: a completed job has
/// all four, a failed job has whatever prefix the pipeline reached.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessingJob {
    pub id: Uuid,
    pub owner_id: i64,
    pub original_image_key: String,
    pub input_nii_key: Option<String>,
    pub output_nii_key: Option<String>,
    pub result_image_key: Option<String>,
    pub status: JobStatus,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_status_db_round_trip() {
        for status in [JobStatus::Processing, JobStatus::Completed, JobStatus::Failed] {
            assert_eq!(JobStatus::from_str(&status.to_string()).unwrap(), status);
        }
        assert_eq!(JobStatus::Processing.to_string(), "processing");
    }

    #[test]
    fn test_unknown_status_rejected() {
        assert!(JobStatus::from_str("pending").is_err());
    }

    #[test]
    fn test_terminal_states() {
        assert!(!JobStatus::Processing.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }
}
