use garde::Validate;
use serde::{Deserialize, Serialize};

/// Body of `POST /process`.
#[derive(Debug, Deserialize, Validate)]
pub struct ProcessRequest {
    #[serde(rename = "bulkFk")]
    #[garde(length(min = 1, max = 19), custom(digits_only))]
    pub bulk_fk: String,
}

impl ProcessRequest {
    /// Job primary key; only meaningful after validation passed.
    pub fn bulk_pk(&self) -> Option<i64> {
        self.bulk_fk.parse().ok()
    }
}

#[allow(clippy::ptr_arg)]
fn digits_only(value: &String, _context: &()) -> garde::Result {
    if value.chars().all(|c| c.is_ascii_digit()) {
        Ok(())
    } else {
        Err(garde::Error::new("must contain only digits"))
    }
}

/// Reply of the job trigger. `code` is 0 for accepted or rejected
/// requests and -1 for internal errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessResponse {
    pub code: i32,
    pub success: bool,
    pub message: String,
}

impl ProcessResponse {
    pub fn accepted(message: impl Into<String>) -> Self {
        Self { code: 0, success: true, message: message.into() }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self { code: 0, success: false, message: message.into() }
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self { code: -1, success: false, message: message.into() }
    }

    pub fn is_accepted(&self) -> bool {
        self.code == 0 && self.success
    }
}
