use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use crate::models::job::ReportRequest;

/// Fire-and-forget calls made once a bulk job completes.
#[async_trait]
pub trait SideEffects: Send + Sync {
    /// Asks the notification service to email the job owner.
    async fn notify_completion(&self, bulk_pk: i64) -> Result<(), DispatchError>;

    /// Asks the report service to build and upload the job's result file.
    async fn request_report(&self, report: &ReportRequest) -> Result<(), DispatchError>;
}

/// Client for the downstream bulk-verification service.
pub struct DownstreamClient {
    http: Client,
    base_url: String,
}

impl DownstreamClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, DispatchError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn post(&self, path: &str, body: &serde_json::Value) -> Result<(), DispatchError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .post(&url)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(DispatchError::Rejected {
                url,
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl SideEffects for DownstreamClient {
    async fn notify_completion(&self, bulk_pk: i64) -> Result<(), DispatchError> {
        let body = serde_json::json!({ "bulkId": bulk_pk.to_string() });
        self.post("/bulk-verification/bulk-notification-mail", &body).await
    }

    async fn request_report(&self, report: &ReportRequest) -> Result<(), DispatchError> {
        let body = serde_json::to_value(report)?;
        self.post("/bulk-verification/upload-bulk-job-result", &body).await
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{url} answered HTTP {status}")]
    Rejected { url: String, status: u16 },

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    #[test]
    fn test_report_body_field_names() {
        let report = ReportRequest {
            wrapper_fk: Some(9),
            pk: 3,
            file_name: Some("march.csv".to_string()),
        };
        assert_eq!(
            serde_json::to_value(&report).unwrap(),
            serde_json::json!({ "wrapperFk": 9, "pk": 3, "filename": "march.csv" })
        );
    }

    fn client(server: &MockServer) -> DownstreamClient {
        DownstreamClient::new(&format!("{}/", server.base_url()), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_notification_posts_bulk_id() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/bulk-verification/bulk-notification-mail")
                    .header("accept", "application/json")
                    .json_body(serde_json::json!({ "bulkId": "42" }));
                then.status(200);
            })
            .await;

        client(&server).notify_completion(42).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_report_request_posts_job_fields() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/bulk-verification/upload-bulk-job-result")
                    .header("accept", "application/json")
                    .json_body(serde_json::json!({ "wrapperFk": 9, "pk": 3, "filename": "march.csv" }));
                then.status(201);
            })
            .await;

        let report = ReportRequest {
            wrapper_fk: Some(9),
            pk: 3,
            file_name: Some("march.csv".to_string()),
        };
        client(&server).request_report(&report).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_non_success_status_is_rejected() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/bulk-verification/bulk-notification-mail");
                then.status(502);
            })
            .await;

        match client(&server).notify_completion(7).await {
            Err(DispatchError::Rejected { url, status }) => {
                assert_eq!(status, 502);
                assert!(url.ends_with("/bulk-verification/bulk-notification-mail"));
                assert!(!url.contains("//bulk"));
            }
            other => panic!("expected Rejected, got {:?}", other),
        }
    }

    #[test]
    fn test_base_url_trailing_slash_is_trimmed() {
        let client = DownstreamClient::new("http://node:4000/", Duration::from_secs(1)).unwrap();
        assert_eq!(client.base_url, "http://node:4000");
    }
}
