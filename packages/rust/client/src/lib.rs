//! JSON-over-HTTP client for the conversion, storage, and QA services.
//!
//! Every collaborator is reached through [`RemoteClient::call`]: the payload is
//! sent as multipart (file upload) or JSON, and the response body is decoded as
//! JSON. Calls are bounded by the configured timeout and can be cancelled with
//! a [`CancellationToken`]. Nothing is retried.

use std::time::Duration;

use docchat_shared::{ClientConfig, DocChatError, Result, ServiceEndpoints};
use reqwest::Client;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};
use url::Url;

/// User-Agent string for all outgoing requests.
const USER_AGENT: &str = concat!("docchat/", env!("CARGO_PKG_VERSION"));

/// Maximum characters of an error body echoed into a [`DocChatError::Network`].
const MAX_ERROR_BODY_CHARS: usize = 200;

/// Multipart field name the conversion service reads the upload from.
pub const FILE_FIELD: &str = "file";

// ---------------------------------------------------------------------------
// Endpoint / Payload
// ---------------------------------------------------------------------------

/// The three collaborator services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Convert,
    Store,
    Qa,
}

impl Endpoint {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Convert => "convert",
            Self::Store => "store",
            Self::Qa => "qa",
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request body, in the format the target endpoint declares.
#[derive(Debug, Clone)]
pub enum Payload {
    /// A single-file multipart form.
    File {
        field: String,
        file_name: String,
        bytes: Vec<u8>,
    },
    /// A JSON document.
    Json(serde_json::Value),
}

impl Payload {
    /// Multipart upload under the conversion service's `file` field.
    pub fn file(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self::File {
            field: FILE_FIELD.to_string(),
            file_name: file_name.into(),
            bytes,
        }
    }

    /// Serialize any value into a JSON payload.
    pub fn json<T: Serialize>(value: &T) -> Result<Self> {
        serde_json::to_value(value)
            .map(Self::Json)
            .map_err(|e| DocChatError::validation(format!("payload is not serializable: {e}")))
    }
}

// ---------------------------------------------------------------------------
// RemoteClient
// ---------------------------------------------------------------------------

/// Stateless wrapper around a shared `reqwest::Client` and the endpoint table.
#[derive(Debug, Clone)]
pub struct RemoteClient {
    http: Client,
    endpoints: ServiceEndpoints,
    timeout: Duration,
}

impl RemoteClient {
    /// Build a client from resolved configuration.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| DocChatError::config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            endpoints: config.endpoints.clone(),
            timeout: config.timeout,
        })
    }

    /// URL the given endpoint resolves to.
    pub fn endpoint_url(&self, endpoint: Endpoint) -> &Url {
        match endpoint {
            Endpoint::Convert => &self.endpoints.convert,
            Endpoint::Store => &self.endpoints.store,
            Endpoint::Qa => &self.endpoints.qa,
        }
    }

    /// Send `payload` to `endpoint` and decode the JSON response.
    pub async fn call(&self, endpoint: Endpoint, payload: Payload) -> Result<serde_json::Value> {
        self.call_with_cancel(endpoint, payload, &CancellationToken::new())
            .await
    }

    /// Like [`call`](Self::call), aborting with [`DocChatError::Cancelled`]
    /// as soon as `cancel` fires.
    #[instrument(skip_all, fields(endpoint = %endpoint))]
    pub async fn call_with_cancel(
        &self,
        endpoint: Endpoint,
        payload: Payload,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("call cancelled by caller");
                Err(DocChatError::Cancelled {
                    endpoint: endpoint.to_string(),
                })
            }
            result = self.execute(endpoint, payload) => result,
        }
    }

    /// Call `endpoint` and deserialize the response into `T`.
    pub async fn call_as<T: DeserializeOwned>(
        &self,
        endpoint: Endpoint,
        payload: Payload,
        cancel: &CancellationToken,
    ) -> Result<T> {
        let value = self.call_with_cancel(endpoint, payload, cancel).await?;
        serde_json::from_value(value).map_err(|e| {
            DocChatError::network(endpoint.as_str(), format!("unexpected response shape: {e}"))
        })
    }

    async fn execute(&self, endpoint: Endpoint, payload: Payload) -> Result<serde_json::Value> {
        let url = self.endpoint_url(endpoint).clone();
        let request = self.http.post(url.clone());

        let request = match payload {
            Payload::File {
                field,
                file_name,
                bytes,
            } => {
                debug!(%url, file_name = %file_name, size = bytes.len(), "sending multipart upload");
                let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name);
                request.multipart(reqwest::multipart::Form::new().part(field, part))
            }
            Payload::Json(body) => {
                debug!(%url, "sending JSON request");
                request.json(&body)
            }
        };

        let response = request
            .send()
            .await
            .map_err(|e| self.transport_error(endpoint, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let excerpt: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
            warn!(%status, "remote call returned non-success status");
            return Err(DocChatError::network(
                endpoint.as_str(),
                format!("HTTP {status}: {excerpt}"),
            ));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| self.transport_error(endpoint, e))?;

        debug!(%status, len = bytes.len(), "remote call complete");

        serde_json::from_slice(&bytes).map_err(|e| {
            DocChatError::network(endpoint.as_str(), format!("invalid JSON body: {e}"))
        })
    }

    fn transport_error(&self, endpoint: Endpoint, err: reqwest::Error) -> DocChatError {
        if err.is_timeout() {
            DocChatError::Timeout {
                endpoint: endpoint.to_string(),
                millis: self.timeout.as_millis() as u64,
            }
        } else {
            DocChatError::network(endpoint.as_str(), err.to_string())
        }
    }
}
