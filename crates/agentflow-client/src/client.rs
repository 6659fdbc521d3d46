use crate::error::ClientError;
use agentflow_core::{ErrorBody, ExecutionList, Job, JobId, SubmitRequest, SubmitResponse};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;

/// Typed client for the Agentflow HTTP API.
#[derive(Clone)]
pub struct ProgressClient {
    base_url: String,
    api_key: Option<String>,
    http: reqwest::Client,
}

impl ProgressClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: None,
            http: reqwest::Client::new(),
        }
    }

    /// Send `Authorization: Bearer <key>` with every request.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `POST /api/orchestration/execute`
    pub async fn submit(&self, request: &SubmitRequest) -> Result<SubmitResponse, ClientError> {
        let url = format!("{}/api/orchestration/execute", self.base_url);
        self.send(self.http.post(url).json(request), "submission")
            .await
    }

    /// `GET /api/progress/{id}`
    pub async fn progress(&self, id: JobId) -> Result<Job, ClientError> {
        let url = format!("{}/api/progress/{id}", self.base_url);
        self.send(self.http.get(url), &format!("job {id}")).await
    }

    /// `GET /api/executions`
    pub async fn executions(&self) -> Result<ExecutionList, ClientError> {
        let url = format!("{}/api/executions", self.base_url);
        self.send(self.http.get(url), "executions").await
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        what: &str,
    ) -> Result<T, ClientError> {
        let request = match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        };
        let resp = request.send().await?;
        decode(resp, what).await
    }
}

async fn decode<T: DeserializeOwned>(resp: Response, what: &str) -> Result<T, ClientError> {
    let status = resp.status();
    if status.is_success() {
        let body = resp.bytes().await?;
        return serde_json::from_slice(&body).map_err(|e| ClientError::Decode(e.to_string()));
    }

    let text = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&text)
        .map(|body| body.error)
        .unwrap_or(text);

    Err(match status {
        StatusCode::NOT_FOUND => ClientError::NotFound(what.to_string()),
        StatusCode::TOO_MANY_REQUESTS => ClientError::Network(format!("{status}: {message}")),
        s if s.is_server_error() => ClientError::Network(format!("{status}: {message}")),
        s => ClientError::Rejected {
            status: s.as_u16(),
            message,
        },
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = ProgressClient::new("http://localhost:5000/");
        assert_eq!(client.base_url(), "http://localhost:5000");
    }
}
