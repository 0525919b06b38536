//! HTTP client for communicating with the Portal API server.

use anyhow::{Context, Result};
use reqwest::{header, Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Success envelope returned by the server.
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    pub error_code: Option<String>,
}

/// Error envelope returned by the server for failed requests.
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorInfo,
}

#[derive(Debug, Deserialize)]
struct ErrorInfo {
    code: String,
    message: String,
    #[serde(default)]
    details: Option<serde_json::Value>,
}

/// A request the server answered with a non-success status.
#[derive(Debug, Error)]
#[error("{message} ({code}, HTTP {status})")]
pub struct ApiError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
    pub retry_after: Option<u64>,
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    fn from_body(status: StatusCode, retry_after: Option<u64>, body: &str) -> Self {
        if let Ok(parsed) = serde_json::from_str::<ErrorResponse>(body) {
            return Self {
                status,
                code: parsed.error.code,
                message: parsed.error.message,
                retry_after,
                details: parsed.error.details,
            };
        }
        match serde_json::from_str::<ApiResponse<serde_json::Value>>(body) {
            Ok(envelope) if !envelope.success => Self {
                status,
                code: envelope.error_code.unwrap_or_else(|| "UNKNOWN_ERROR".to_string()),
                message: envelope.error.unwrap_or_else(|| "request failed".to_string()),
                retry_after,
                details: None,
            },
            _ => Self {
                status,
                code: "UNKNOWN_ERROR".to_string(),
                message: if body.is_empty() {
                    status
                        .canonical_reason()
                        .unwrap_or("request failed")
                        .to_string()
                } else {
                    body.to_string()
                },
                retry_after,
                details: None,
            },
        }
    }

    /// Job the server pointed at, e.g. the existing job for a duplicate submission.
    pub fn entity_id(&self) -> Option<&str> {
        self.details
            .as_ref()
            .and_then(|d| d.get("entity_id"))
            .and_then(|v| v.as_str())
    }
}

/// HTTP client for the Portal API.
pub struct ApiClient {
    client: Client,
    base_url: String,
    admin_token: Option<String>,
}

impl ApiClient {
    /// Create a new API client pointing at the given base URL.
    pub fn new(base_url: &str, admin_token: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            admin_token: admin_token.filter(|t| !t.is_empty()),
        })
    }

    /// Return the configured base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let builder = self.client.request(method, url);
        match &self.admin_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Perform a GET request and unwrap the response data.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let resp = self
            .request(Method::GET, path)
            .send()
            .await
            .with_context(|| format!("GET {}{} failed", self.base_url, path))?;
        unwrap_envelope(resp).await
    }

    /// Perform a POST request with a JSON body and unwrap the response data.
    pub async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let resp = self
            .request(Method::POST, path)
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST {}{} failed", self.base_url, path))?;
        unwrap_envelope(resp).await
    }

    /// Perform a DELETE request and unwrap the response data.
    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let resp = self
            .request(Method::DELETE, path)
            .send()
            .await
            .with_context(|| format!("DELETE {}{} failed", self.base_url, path))?;
        unwrap_envelope(resp).await
    }

    /// Perform a raw GET request and return the full JSON value (for health endpoint).
    pub async fn get_raw(&self, path: &str) -> Result<serde_json::Value> {
        let resp = self
            .request(Method::GET, path)
            .send()
            .await
            .with_context(|| format!("GET {}{} failed", self.base_url, path))?;

        let resp = check_status(resp).await?;
        resp.json()
            .await
            .with_context(|| format!("Failed to parse response from {}{}", self.base_url, path))
    }
}

async fn check_status(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let retry_after = resp
        .headers()
        .get(header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok());
    let body = resp.text().await.unwrap_or_default();
    Err(ApiError::from_body(status, retry_after, &body).into())
}

async fn unwrap_envelope<T: DeserializeOwned>(resp: Response) -> Result<T> {
    let url = resp.url().clone();
    let resp = check_status(resp).await?;

    let api_resp: ApiResponse<T> = resp
        .json()
        .await
        .with_context(|| format!("Failed to parse response from {}", url))?;
    into_data(api_resp)
}

fn into_data<T>(api_resp: ApiResponse<T>) -> Result<T> {
    if api_resp.success {
        api_resp
            .data
            .ok_or_else(|| anyhow::anyhow!("API returned success but no data"))
    } else {
        Err(anyhow::anyhow!(
            "API error{}: {}",
            api_resp
                .error_code
                .map(|c| format!(" ({})", c))
                .unwrap_or_default(),
            api_resp.error.unwrap_or_else(|| "Unknown error".into())
        ))
    }
}
