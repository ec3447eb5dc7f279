//! Typed HTTP client for the Executr coordinator API.
//!
//! Mirrors the `/api/v1` surface one-to-one. Idempotent GETs and the
//! heartbeat are retried a few times at the transport layer; mutating
//! calls are issued exactly once (each is status-conditioned server-side,
//! so callers may safely retry them by hand).

use std::time::Duration;

use executr_api::{
    BulkCancelRequest, BulkCancelResponse, BulkSubmitResponse, ClaimRequest, CompleteRequest,
    ErrorBody, FailRequest, HealthResponse, HeartbeatRequest, Job, JobFilter, JobSubmission,
    StatsResponse,
};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

/// Transport retry attempts for idempotent calls.
const RETRY_ATTEMPTS: u32 = 3;
/// Initial backoff between retry attempts; doubles per attempt.
const RETRY_BACKOFF: Duration = Duration::from_millis(200);

/// Errors surfaced by the SDK.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The request never produced an HTTP response.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The coordinator answered with an error envelope.
    #[error("server error ({status}): {}", .body.error)]
    Api { status: StatusCode, body: ErrorBody },

    #[error("invalid base url: {0}")]
    BaseUrl(String),
}

impl ClientError {
    /// The HTTP status of a server-side rejection, if any.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ClientError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Client for one coordinator.
#[derive(Debug, Clone)]
pub struct ExecutrClient {
    http: Client,
    base_url: String,
}

impl ExecutrClient {
    /// Create a client for `base_url` (scheme + host + port, no path).
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        let base_url = base_url.into();
        let base_url = base_url.trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(ClientError::BaseUrl("empty server url".to_string()));
        }

        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self { http, base_url })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1{}", self.base_url, path)
    }

    /// `POST /jobs`
    pub async fn submit(&self, submission: &JobSubmission) -> Result<Job, ClientError> {
        let response = self
            .http
            .post(self.url("/jobs"))
            .json(submission)
            .send()
            .await?;
        decode(response).await
    }

    /// `POST /jobs/bulk`
    pub async fn submit_bulk(
        &self,
        submissions: &[JobSubmission],
    ) -> Result<BulkSubmitResponse, ClientError> {
        let response = self
            .http
            .post(self.url("/jobs/bulk"))
            .json(submissions)
            .send()
            .await?;
        decode(response).await
    }

    /// `GET /jobs`
    pub async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, ClientError> {
        self.get_with_retry(self.url("/jobs"), Some(filter)).await
    }

    /// `GET /jobs/{id}` — snapshot with attempt history.
    pub async fn get(&self, id: Uuid) -> Result<Job, ClientError> {
        self.get_with_retry::<(), Job>(self.url(&format!("/jobs/{}", id)), None)
            .await
    }

    /// `DELETE /jobs/{id}` — cancel a pending job.
    pub async fn cancel(&self, id: Uuid) -> Result<(), ClientError> {
        let response = self
            .http
            .delete(self.url(&format!("/jobs/{}", id)))
            .send()
            .await?;
        expect_no_content(response).await
    }

    /// `POST /jobs/bulk/cancel`
    pub async fn cancel_bulk(&self, job_ids: Vec<Uuid>) -> Result<BulkCancelResponse, ClientError> {
        let response = self
            .http
            .post(self.url("/jobs/bulk/cancel"))
            .json(&BulkCancelRequest { job_ids })
            .send()
            .await?;
        decode(response).await
    }

    /// `POST /jobs/claim` — `Ok(None)` means the queue is empty, which is
    /// not an error.
    pub async fn claim(
        &self,
        executor_id: &str,
        executor_ip: Option<String>,
    ) -> Result<Option<Job>, ClientError> {
        let response = self
            .http
            .post(self.url("/jobs/claim"))
            .json(&ClaimRequest {
                executor_id: executor_id.to_string(),
                executor_ip,
            })
            .send()
            .await?;

        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        decode(response).await.map(Some)
    }

    /// `PUT /jobs/{id}/heartbeat` — retried at the transport layer; the
    /// server-side stamp is idempotent.
    pub async fn heartbeat(&self, id: Uuid, executor_id: &str) -> Result<(), ClientError> {
        let url = self.url(&format!("/jobs/{}/heartbeat", id));
        let body = HeartbeatRequest {
            executor_id: executor_id.to_string(),
        };

        let response = self
            .send_with_retry(|| self.http.request(Method::PUT, &url).json(&body))
            .await?;
        expect_no_content(response).await
    }

    /// `PUT /jobs/{id}/complete` — not auto-retried; the stale-recovery
    /// loop restores consistency if the post is lost.
    pub async fn complete(&self, id: Uuid, req: &CompleteRequest) -> Result<(), ClientError> {
        let response = self
            .http
            .put(self.url(&format!("/jobs/{}/complete", id)))
            .json(req)
            .send()
            .await?;
        expect_no_content(response).await
    }

    /// `PUT /jobs/{id}/fail` — not auto-retried.
    pub async fn fail(&self, id: Uuid, req: &FailRequest) -> Result<(), ClientError> {
        let response = self
            .http
            .put(self.url(&format!("/jobs/{}/fail", id)))
            .json(req)
            .send()
            .await?;
        expect_no_content(response).await
    }

    /// `GET /health`
    pub async fn health(&self) -> Result<HealthResponse, ClientError> {
        self.get_with_retry::<(), HealthResponse>(self.url("/health"), None)
            .await
    }

    /// `GET /admin/stats`
    pub async fn stats(&self) -> Result<StatsResponse, ClientError> {
        self.get_with_retry::<(), StatsResponse>(self.url("/admin/stats"), None)
            .await
    }

    async fn get_with_retry<Q: Serialize, T: DeserializeOwned>(
        &self,
        url: String,
        query: Option<&Q>,
    ) -> Result<T, ClientError> {
        let response = self
            .send_with_retry(|| {
                let mut builder = self.http.get(&url);
                if let Some(q) = query {
                    builder = builder.query(q);
                }
                builder
            })
            .await?;
        decode(response).await
    }

    /// Issue a request up to `RETRY_ATTEMPTS` times. Transport failures
    /// and 5xx responses are retried; anything else is final.
    async fn send_with_retry(
        &self,
        build: impl Fn() -> RequestBuilder,
    ) -> Result<Response, ClientError> {
        let mut backoff = RETRY_BACKOFF;
        let mut attempt = 1;

        loop {
            let result = build().send().await;
            match result {
                Ok(response) if !response.status().is_server_error() => return Ok(response),
                Ok(response) if attempt >= RETRY_ATTEMPTS => return Ok(response),
                Err(e) if attempt >= RETRY_ATTEMPTS => return Err(e.into()),
                Ok(response) => {
                    debug!(status = %response.status(), attempt, "retrying after server error");
                }
                Err(e) => {
                    debug!(error = %e, attempt, "retrying after transport error");
                }
            }

            tokio::time::sleep(backoff).await;
            backoff *= 2;
            attempt += 1;
        }
    }
}

/// Decode a JSON success body, or surface the server's error envelope.
async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }
    Err(api_error(status, response).await)
}

async fn expect_no_content(response: Response) -> Result<(), ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    Err(api_error(status, response).await)
}

/// Preserve the `{error, context}` envelope; fall back to the raw body
/// when the server did not send one.
async fn api_error(status: StatusCode, response: Response) -> ClientError {
    let text = response.text().await.unwrap_or_default();
    let body = serde_json::from_str::<ErrorBody>(&text).unwrap_or_else(|_| {
        ErrorBody::new(if text.is_empty() {
            status.to_string()
        } else {
            text
        })
    });
    ClientError::Api { status, body }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_is_normalized() {
        let client = ExecutrClient::new("http://localhost:8080/").unwrap();
        assert_eq!(client.url("/jobs"), "http://localhost:8080/api/v1/jobs");
    }

    #[test]
    fn empty_base_url_rejected() {
        assert!(ExecutrClient::new("").is_err());
    }
}
