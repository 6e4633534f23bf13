use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Identity fields returned by the provider for a `found` lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedIdentity {
    pub first_name: Option<String>,
    pub middle_name: Option<String>,
    #[serde(alias = "surname")]
    pub last_name: Option<String>,
    pub gender: Option<String>,
    pub mobile: Option<String>,
    pub date_of_birth: Option<String>,
    #[serde(rename = "image", alias = "photo")]
    pub photo: Option<String>,
}

impl ResolvedIdentity {
    /// Date of birth as stored in the `date_of_birth DATE` column.
    pub fn birth_date(&self) -> Option<NaiveDate> {
        self.date_of_birth
            .as_deref()
            .and_then(|raw| NaiveDate::parse_from_str(raw.get(..10).unwrap_or(raw), "%Y-%m-%d").ok())
    }
}

/// A row of `nin_lookup`, keyed by search parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupCacheEntry {
    pub search_parameter: String,
    pub identity: ResolvedIdentity,
}
