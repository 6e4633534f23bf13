use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

/// Processing state of a single record. A NULL column reads as `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum RecordJobStatus {
    Pending,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Successful,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum RetrievalMode {
    SearchFromDb,
    ThirdParty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr)]
pub enum VerificationStatus {
    #[strum(serialize = "VERIFIED")]
    Verified,
    #[strum(serialize = "NOT VERIFIED")]
    NotVerified,
    #[strum(serialize = "FAILED")]
    Failed,
}

/// A row of `nin_records`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationRecord {
    pub pk: i64,
    pub bulk_fk: i64,
    pub search_parameter: String,
    pub job_status: Option<RecordJobStatus>,
    pub transaction_status: Option<TransactionStatus>,
    pub retrieval_mode: Option<RetrievalMode>,
    pub status: Option<VerificationStatus>,
    pub failure_reason: Option<String>,
    pub created_date: DateTime<Utc>,
    pub modified_date: DateTime<Utc>,
}

impl VerificationRecord {
    pub fn is_claimable(&self) -> bool {
        matches!(self.job_status, None | Some(RecordJobStatus::Pending))
    }

    /// Rebuilds the resolution persisted on a completed record.
    ///
    /// Returns `None` when the record is not completed or carries a
    /// combination of status fields that no resolution produces.
    pub fn terminal_resolution(&self) -> Option<Resolution> {
        if self.job_status != Some(RecordJobStatus::Completed) {
            return None;
        }
        let reason = self.failure_reason.clone().unwrap_or_default();
        match (self.transaction_status?, self.retrieval_mode?, self.status?) {
            (TransactionStatus::Successful, RetrievalMode::SearchFromDb, VerificationStatus::Verified) => {
                Some(Resolution::CacheHit)
            }
            (TransactionStatus::Successful, RetrievalMode::ThirdParty, VerificationStatus::Verified) => {
                Some(Resolution::Verified)
            }
            (TransactionStatus::Successful, RetrievalMode::ThirdParty, VerificationStatus::NotVerified) => {
                Some(Resolution::NotVerified { reason })
            }
            (TransactionStatus::Failed, RetrievalMode::ThirdParty, VerificationStatus::Failed) => {
                Some(Resolution::Failed { reason })
            }
            _ => None,
        }
    }
}

/// A record handed out by a claim: already flipped to `IN_PROGRESS`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimedRecord {
    pub pk: i64,
    pub search_parameter: String,
    pub created_date: DateTime<Utc>,
}

/// Terminal outcome of resolving one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Identity already present in the lookup cache.
    CacheHit,
    /// Provider found the identity.
    Verified,
    /// Provider answered but did not verify; `reason` is its business status or message.
    NotVerified { reason: String },
    /// Provider unreachable or answered unexpectedly.
    Failed { reason: String },
}

impl Resolution {
    pub fn transaction_status(&self) -> TransactionStatus {
        match self {
            Resolution::Failed { .. } => TransactionStatus::Failed,
            _ => TransactionStatus::Successful,
        }
    }

    pub fn retrieval_mode(&self) -> RetrievalMode {
        match self {
            Resolution::CacheHit => RetrievalMode::SearchFromDb,
            _ => RetrievalMode::ThirdParty,
        }
    }

    pub fn status(&self) -> VerificationStatus {
        match self {
            Resolution::CacheHit | Resolution::Verified => VerificationStatus::Verified,
            Resolution::NotVerified { .. } => VerificationStatus::NotVerified,
            Resolution::Failed { .. } => VerificationStatus::Failed,
        }
    }

    /// Reason column value; an empty reason is stored as NULL.
    pub fn failure_reason(&self) -> Option<&str> {
        match self {
            Resolution::CacheHit | Resolution::Verified => None,
            Resolution::NotVerified { reason } | Resolution::Failed { reason } => {
                Some(reason.as_str()).filter(|r| !r.is_empty())
            }
        }
    }

    /// Short label used for metrics and logs.
    pub fn outcome(&self) -> &'static str {
        match self {
            Resolution::CacheHit => "cache_hit",
            Resolution::Verified => "verified",
            Resolution::NotVerified { .. } => "not_verified",
            Resolution::Failed { .. } => "failed",
        }
    }
}
