//! HTTP connection to a ussplitter server

use bytes::Bytes;
use reqwest::{header, Response, StatusCode, Url};
use serde::Deserialize;
use std::time::Duration;
use ussplitter_common::api::{ErrorBody, JobStatusResponse, ModelsResponse, SubmitResponse};
use ussplitter_common::{JobId, StemBundle};

use crate::error::{ClientError, Result};

const USER_AGENT: &str = concat!("ussplitter-addon/", env!("CARGO_PKG_VERSION"));
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Subset of `GET /health` the client cares about
#[derive(Debug, Clone, Deserialize)]
pub struct ServerHealth {
    pub status: String,
    #[serde(default)]
    pub module: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub queued: usize,
    #[serde(default)]
    pub processing: Option<String>,
}

/// Thin typed wrapper over the server's HTTP API
#[derive(Debug, Clone)]
pub struct ServerConnection {
    http: reqwest::Client,
    base: String,
}

impl ServerConnection {
    /// `request_timeout` bounds each request from send to the end of its body
    pub fn new(server_uri: &Url, request_timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(CONNECT_TIMEOUT.min(request_timeout))
            .timeout(request_timeout)
            .build()?;

        Ok(Self {
            http,
            base: server_uri.as_str().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    /// GET /health
    pub async fn health(&self) -> Result<ServerHealth> {
        let response = self.http.get(self.url("/health")).send().await?;
        Ok(check(response).await?.json().await?)
    }

    /// GET /models
    pub async fn models(&self) -> Result<ModelsResponse> {
        let response = self.http.get(self.url("/models")).send().await?;
        Ok(check(response).await?.json().await?)
    }

    /// POST /jobs with the raw audio as body
    pub async fn submit(&self, audio: Bytes, model: Option<&str>) -> Result<SubmitResponse> {
        let mut request = self
            .http
            .post(self.url("/jobs"))
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .body(audio);
        if let Some(model) = model {
            request = request.query(&[("model", model)]);
        }

        let response = request.send().await?;
        Ok(check(response).await?.json().await?)
    }

    /// GET /jobs/{id}
    pub async fn status(&self, job_id: &JobId) -> Result<JobStatusResponse> {
        let response = self
            .http
            .get(self.url(&format!("/jobs/{}", job_id)))
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    /// GET /jobs/{id}/result, decoded into vocals and instrumental
    pub async fn fetch_result(&self, job_id: &JobId) -> Result<StemBundle> {
        let response = self
            .http
            .get(self.url(&format!("/jobs/{}/result", job_id)))
            .send()
            .await?;
        let response = check(response).await?;

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| ClientError::Protocol("result has no Content-Type".to_string()))?;
        let body = response.bytes().await?;

        Ok(StemBundle::decode(&content_type, body)?)
    }

    /// DELETE /jobs/{id}
    pub async fn cleanup(&self, job_id: &JobId) -> Result<()> {
        let response = self
            .http
            .delete(self.url(&format!("/jobs/{}", job_id)))
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }
}

/// Turn a non-2xx answer into the matching [`ClientError`]
async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    let (code, message) = match serde_json::from_str::<ErrorBody>(&text) {
        Ok(body) => (body.error.code, body.error.message),
        Err(_) => (String::new(), text),
    };

    Err(match status {
        StatusCode::NOT_FOUND => ClientError::NotFound(message),
        StatusCode::CONFLICT => ClientError::NotReady(message),
        StatusCode::SERVICE_UNAVAILABLE => ClientError::ResourceExhausted(message),
        _ if code == ussplitter_common::api::JOB_FAILED_CODE => ClientError::JobFailed(message),
        _ => ClientError::Server {
            status: status.as_u16(),
            code,
            message,
        },
    })
}
