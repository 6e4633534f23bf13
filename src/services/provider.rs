use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;

use crate::models::lookup::ResolvedIdentity;

/// Classified answer of a verification provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderResponse {
    /// 200 with a successful envelope and business status `found`.
    Found(ResolvedIdentity),
    /// 200 with a successful envelope and any other business status,
    /// empty when the provider sent none.
    NotFound { status: String },
    /// 400: the provider rejected the search key.
    ClientError { message: String },
    /// Any other HTTP status or envelope shape.
    Unexpected { http_status: u16 },
}

/// Resolves an identity key against an external (or simulated) registry.
#[async_trait]
pub trait VerificationProvider: Send + Sync {
    async fn resolve(
        &self,
        search_parameter: &str,
        subject_consent: bool,
    ) -> Result<ProviderResponse, ProviderError>;
}

/// Envelope returned by the provider for every call.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderEnvelope {
    pub success: Option<bool>,
    pub status_code: Option<u16>,
    pub message: Option<String>,
    pub data: Option<ProviderData>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProviderData {
    pub status: Option<String>,
    #[serde(flatten)]
    pub identity: ResolvedIdentity,
}

/// Maps an HTTP status and decoded envelope onto a [`ProviderResponse`].
pub fn classify(http_status: u16, envelope: ProviderEnvelope) -> ProviderResponse {
    match http_status {
        200 if envelope.success == Some(true) && envelope.status_code == Some(200) => {
            match envelope.data {
                Some(ProviderData { status: Some(status), identity }) if status == "found" => {
                    ProviderResponse::Found(identity)
                }
                Some(ProviderData { status, .. }) => ProviderResponse::NotFound {
                    status: status.unwrap_or_default(),
                },
                None => ProviderResponse::Unexpected { http_status },
            }
        }
        400 => ProviderResponse::ClientError {
            message: envelope.message.unwrap_or_else(|| "Bad Request".to_string()),
        },
        _ => ProviderResponse::Unexpected { http_status },
    }
}

/// HTTP client for the live identity registry.
pub struct LiveProvider {
    http: Client,
    endpoint: Option<String>,
    api_key: Option<String>,
}

impl LiveProvider {
    pub fn new(
        endpoint: Option<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self { http, endpoint, api_key })
    }
}

#[async_trait]
impl VerificationProvider for LiveProvider {
    async fn resolve(
        &self,
        search_parameter: &str,
        subject_consent: bool,
    ) -> Result<ProviderResponse, ProviderError> {
        let endpoint = self.endpoint.as_deref().ok_or(ProviderError::NotConfigured)?;

        let mut request = self.http.post(endpoint).json(&serde_json::json!({
            "id": search_parameter,
            "isSubjectConsent": subject_consent,
        }));
        if let Some(key) = &self.api_key {
            request = request.header("token", key);
        }

        let response = request.send().await?;
        let status = response.status();

        match status {
            StatusCode::OK => {
                let envelope: ProviderEnvelope = response.json().await?;
                Ok(classify(status.as_u16(), envelope))
            }
            StatusCode::BAD_REQUEST => {
                // Error bodies are not always JSON.
                let envelope = response.json::<ProviderEnvelope>().await.unwrap_or_default();
                Ok(classify(status.as_u16(), envelope))
            }
            other => {
                tracing::warn!(http_status = other.as_u16(), "Unexpected provider response status");
                Ok(ProviderResponse::Unexpected { http_status: other.as_u16() })
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Provider endpoint is not configured")]
    NotConfigured,

    #[error("Network Error")]
    Network,
}
