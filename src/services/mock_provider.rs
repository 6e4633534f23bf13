//! Simulated provider for jobs not running in `live` mode.
//!
//! Keys shorter than ten characters are always rejected. Longer keys fail
//! at the transport level 10% of the time and otherwise split evenly
//! between `found` and `not_found`, after 10-100ms of simulated latency.

use async_trait::async_trait;
use rand::Rng;
use std::ops::RangeInclusive;
use std::time::Duration;

use crate::models::lookup::ResolvedIdentity;
use crate::services::provider::{ProviderError, ProviderResponse, VerificationProvider};

pub const MIN_KEY_LENGTH: usize = 10;

const SHORT_KEY_MESSAGE: &str = "ValidationError: 'id' length must be at least 10 characters long";

pub struct MockProvider {
    latency_ms: RangeInclusive<u64>,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProvider {
    pub fn new() -> Self {
        Self { latency_ms: 10..=100 }
    }

    /// Answers immediately; for tests that run many trials.
    pub fn without_latency() -> Self {
        Self { latency_ms: 0..=0 }
    }

    fn placeholder_identity() -> ResolvedIdentity {
        ResolvedIdentity {
            first_name: Some("John".to_string()),
            middle_name: Some("Leo".to_string()),
            last_name: Some("Doe".to_string()),
            gender: Some("Male".to_string()),
            mobile: Some("123-456-7890".to_string()),
            date_of_birth: Some("1980-01-01".to_string()),
            photo: Some("https://example.com/image.jpg".to_string()),
        }
    }

    fn decide(&self, search_parameter: &str) -> (Result<ProviderResponse, ProviderError>, u64) {
        let mut rng = rand::thread_rng();
        let delay = rng.gen_range(self.latency_ms.clone());

        if search_parameter.chars().count() < MIN_KEY_LENGTH {
            let outcome = Ok(ProviderResponse::ClientError { message: SHORT_KEY_MESSAGE.to_string() });
            return (outcome, delay);
        }

        let outcome = if rng.gen_bool(0.1) {
            Err(ProviderError::Network)
        } else if rng.gen_bool(0.5) {
            Ok(ProviderResponse::Found(Self::placeholder_identity()))
        } else {
            Ok(ProviderResponse::NotFound { status: "not_found".to_string() })
        };
        (outcome, delay)
    }
}

#[async_trait]
impl VerificationProvider for MockProvider {
    async fn resolve(
        &self,
        search_parameter: &str,
        _subject_consent: bool,
    ) -> Result<ProviderResponse, ProviderError> {
        let (outcome, delay) = self.decide(search_parameter);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        outcome
    }
}
