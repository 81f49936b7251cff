//! Transport to the ingest API.
//!
//! The tracker only needs a success/failure signal, so the [`Transport`]
//! trait exposes two calls: submit one record, or submit a batch. Any
//! non-2xx response is a failure and a batch is all-or-nothing.

use crate::collector::types::EventRecord;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Header carrying the per-site shared secret.
pub const API_KEY_HEADER: &str = "X-API-Key";

/// Transport configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// API base URL, e.g. `https://analytics.example.io/api/v1`
    pub base_url: String,
    /// Per-site secret sent in `X-API-Key`
    pub api_key: String,
    /// Per-request timeout
    pub timeout: Duration,
}

impl TransportConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Single-event ingest endpoint.
    pub fn track_url(&self) -> String {
        format!("{}/events/track", self.base_url)
    }

    /// Batch ingest endpoint.
    pub fn batch_url(&self) -> String {
        format!("{}/events/track/batch", self.base_url)
    }

    /// Website registration endpoint.
    pub fn register_url(&self) -> String {
        format!("{}/websites/register", self.base_url)
    }

    /// Health check endpoint.
    pub fn health_url(&self) -> String {
        format!("{}/health", self.base_url)
    }
}

/// Transport error types.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Configuration error
    #[error("transport config error: {0}")]
    Config(String),
    /// Network/HTTP error
    #[error("transport network error: {0}")]
    Network(String),
    /// Server returned a non-2xx response
    #[error("ingest API error ({status}): {message}")]
    Server { status: u16, message: String },
    /// Response body could not be decoded
    #[error("transport serialization error: {0}")]
    Serialization(String),
}

impl TransportError {
    /// HTTP status of a server-side failure.
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Server { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Response to `POST /events/track`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackResponse {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub data: Option<TrackReceipt>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackReceipt {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
}

/// Response to `POST /events/track/batch`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResponse {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub data: Option<BatchReceipt>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReceipt {
    pub event_ids: Vec<String>,
    pub count: usize,
}

/// Request body of the batch endpoint.
#[derive(Debug, Serialize)]
pub struct BatchRequest<'a> {
    pub events: &'a [EventRecord],
}

/// Error body returned by the ingest API.
#[derive(Debug, Clone, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Delivers records to the ingest API.
pub trait Transport: Send + Sync + 'static {
    /// Submit a single record.
    fn submit_one<'a>(
        &'a self,
        record: &'a EventRecord,
    ) -> BoxFuture<'a, Result<TrackResponse, TransportError>>;

    /// Submit a batch of records as `{events: [...]}`.
    fn submit_batch<'a>(
        &'a self,
        records: &'a [EventRecord],
    ) -> BoxFuture<'a, Result<BatchResponse, TransportError>>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn submit_one<'a>(
        &'a self,
        record: &'a EventRecord,
    ) -> BoxFuture<'a, Result<TrackResponse, TransportError>> {
        (**self).submit_one(record)
    }

    fn submit_batch<'a>(
        &'a self,
        records: &'a [EventRecord],
    ) -> BoxFuture<'a, Result<BatchResponse, TransportError>> {
        (**self).submit_batch(records)
    }
}

/// Turn an error response body into a readable message.
fn error_message(body: &str) -> String {
    match serde_json::from_str::<ApiErrorBody>(body) {
        Ok(ApiErrorBody {
            message: Some(message),
            error: Some(error),
        }) => format!("{message}: {error}"),
        Ok(ApiErrorBody {
            message: Some(message),
            ..
        }) => message,
        _ if body.is_empty() => "Unknown error".to_string(),
        _ => body.to_string(),
    }
}

#[cfg(feature = "http")]
pub use http::{register_website, HttpTransport, RegisterRequest, Registration};

#[cfg(feature = "http")]
mod http {
    use super::*;
    use futures::FutureExt;
    use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};

    /// reqwest-backed [`Transport`].
    pub struct HttpTransport {
        config: TransportConfig,
        client: reqwest::Client,
    }

    impl HttpTransport {
        /// Create a new HTTP transport.
        pub fn new(config: TransportConfig) -> Result<Self, TransportError> {
            if config.base_url.is_empty() {
                return Err(TransportError::Config("API base URL is required".to_string()));
            }

            let mut headers = HeaderMap::new();
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            headers.insert(
                API_KEY_HEADER,
                HeaderValue::from_str(&config.api_key)
                    .map_err(|e| TransportError::Config(format!("invalid API key: {e}")))?,
            );

            let client = reqwest::Client::builder()
                .timeout(config.timeout)
                .default_headers(headers)
                .build()
                .map_err(|e| TransportError::Config(format!("failed to create HTTP client: {e}")))?;

            Ok(Self { config, client })
        }

        pub fn config(&self) -> &TransportConfig {
            &self.config
        }

        /// Test connection to the ingest API.
        pub async fn test_connection(&self) -> Result<bool, TransportError> {
            let response = self
                .client
                .get(self.config.health_url())
                .send()
                .await
                .map_err(|e| TransportError::Network(e.to_string()))?;

            Ok(response.status().is_success())
        }

        async fn post_json<B, R>(&self, url: String, body: &B) -> Result<R, TransportError>
        where
            B: Serialize + ?Sized,
            R: serde::de::DeserializeOwned,
        {
            let response = self
                .client
                .post(url)
                .json(body)
                .send()
                .await
                .map_err(|e| TransportError::Network(e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(TransportError::Server {
                    status: status.as_u16(),
                    message: error_message(&body),
                });
            }

            response
                .json()
                .await
                .map_err(|e| TransportError::Serialization(e.to_string()))
        }
    }

    impl Transport for HttpTransport {
        fn submit_one<'a>(
            &'a self,
            record: &'a EventRecord,
        ) -> BoxFuture<'a, Result<TrackResponse, TransportError>> {
            self.post_json(self.config.track_url(), record).boxed()
        }

        fn submit_batch<'a>(
            &'a self,
            records: &'a [EventRecord],
        ) -> BoxFuture<'a, Result<BatchResponse, TransportError>> {
            async move {
                self.post_json(self.config.batch_url(), &BatchRequest { events: records })
                    .await
            }
            .boxed()
        }
    }

    /// Body of `POST /websites/register`.
    #[derive(Debug, Clone, Serialize)]
    pub struct RegisterRequest {
        pub name: String,
        pub domain: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub description: Option<String>,
    }

    /// Credentials issued for a newly registered website.
    #[derive(Debug, Clone, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Registration {
        pub website_id: String,
        pub name: String,
        pub domain: String,
        pub api_key: String,
        pub status: String,
    }

    #[derive(Deserialize)]
    struct RegisterResponse {
        data: Registration,
    }

    /// Register a website; no API key is needed for this call.
    pub async fn register_website(
        base_url: &str,
        request: &RegisterRequest,
    ) -> Result<Registration, TransportError> {
        let config = TransportConfig::new(base_url, "");
        let response = reqwest::Client::new()
            .post(config.register_url())
            .json(request)
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Server {
                status: status.as_u16(),
                message: error_message(&body),
            });
        }

        let body: RegisterResponse = response
            .json()
            .await
            .map_err(|e| TransportError::Serialization(e.to_string()))?;
        Ok(body.data)
    }
}
