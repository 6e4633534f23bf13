use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

/// Lifecycle of a bulk verification job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum JobStatus {
    Initiated,
    Pending,
    #[strum(to_string = "IN_PROGRESS", serialize = "IN-PROGRESS")]
    InProgress,
    Completed,
}

impl JobStatus {
    /// Only jobs that have not been picked up yet may enter the driver loop.
    pub fn is_startable(self) -> bool {
        matches!(self, JobStatus::Initiated | JobStatus::Pending)
    }
}

/// Which verification provider a job's records are resolved against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceMode {
    Live,
    Mock,
}

impl ServiceMode {
    /// `live` in any case selects the real provider; everything else is mock.
    pub fn parse(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("live") {
            ServiceMode::Live
        } else {
            ServiceMode::Mock
        }
    }

    pub fn is_live(self) -> bool {
        self == ServiceMode::Live
    }
}

/// A row of `nin_bulk_verifications`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkVerificationJob {
    pub pk: i64,
    pub bulk_id: String,
    pub number_of_records: i32,
    pub user_fk: Option<i64>,
    pub status: JobStatus,
    pub service_mode: ServiceMode,
    pub file_name: Option<String>,
    pub wrapper_fk: Option<i64>,
    pub is_report_uploaded: bool,
    pub created_date: DateTime<Utc>,
    pub modified_date: DateTime<Utc>,
    pub completion_date: Option<DateTime<Utc>>,
    pub expiry_date: Option<DateTime<Utc>>,
}

/// Payload of the report-generation call fired on completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportRequest {
    #[serde(rename = "wrapperFk")]
    pub wrapper_fk: Option<i64>,
    pub pk: i64,
    #[serde(rename = "filename")]
    pub file_name: Option<String>,
}

impl From<&BulkVerificationJob> for ReportRequest {
    fn from(job: &BulkVerificationJob) -> Self {
        Self {
            wrapper_fk: job.wrapper_fk,
            pk: job.pk,
            file_name: job.file_name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_status_parsing_accepts_legacy_spelling() {
        assert_eq!(JobStatus::from_str("IN-PROGRESS").unwrap(), JobStatus::InProgress);
        assert_eq!(JobStatus::from_str("in_progress").unwrap(), JobStatus::InProgress);
        assert_eq!(JobStatus::from_str("completed").unwrap(), JobStatus::Completed);
        assert_eq!(JobStatus::InProgress.to_string(), "IN_PROGRESS");
    }

    #[test]
    fn test_only_initiated_and_pending_are_startable() {
        assert!(JobStatus::Initiated.is_startable());
        assert!(JobStatus::Pending.is_startable());
        assert!(!JobStatus::InProgress.is_startable());
        assert!(!JobStatus::Completed.is_startable());
    }

    #[test]
    fn test_service_mode_is_case_insensitive() {
        assert_eq!(ServiceMode::parse("LIVE"), ServiceMode::Live);
        assert_eq!(ServiceMode::parse("live"), ServiceMode::Live);
        assert_eq!(ServiceMode::parse("test"), ServiceMode::Mock);
        assert_eq!(ServiceMode::parse(""), ServiceMode::Mock);
    }
}
