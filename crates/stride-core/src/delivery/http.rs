//! reqwest-backed delivery client

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::Method;
use serde::{Deserialize, Serialize};

use super::{Deliverer, DeliveryError, DeliveryOutcome};
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::models::{IngestResponse, RecordKind};
use crate::util::{error_excerpt, is_http_url};

/// HTTP client for the ingestion API.
///
/// Connect and whole-request timeouts come from [`ClientConfig`]; a timeout
/// is reported as a retryable network error like any other transport failure.
#[derive(Clone)]
pub struct HttpDeliverer {
    base_url: String,
    auth_token: Option<String>,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct OriginIdsRequest<'a> {
    owner_id: &'a str,
    origin_ids: &'a [String],
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    #[serde(default)]
    records: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct DeleteResponse {
    deleted: u64,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
    message: Option<String>,
    errors: Option<Vec<String>>,
}

impl HttpDeliverer {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()
            .map_err(|error| Error::Client(error.to_string()))?;
        Ok(Self {
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            auth_token: config.auth_token.clone(),
            client,
        })
    }

    fn url(&self, endpoint: &str) -> String {
        if is_http_url(endpoint) {
            endpoint.to_string()
        } else {
            format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
        }
    }

    fn request(&self, method: Method, endpoint: &str) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .request(method, self.url(endpoint))
            .header(ACCEPT, "application/json");
        match &self.auth_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Records the backend already holds for these origin ids.
    ///
    /// Any failure, including a backend without the lookup route, yields an
    /// empty list so the caller treats every record as new.
    pub async fn lookup_existing(
        &self,
        kind: RecordKind,
        owner_id: &str,
        origin_ids: &[String],
    ) -> Vec<serde_json::Value> {
        if origin_ids.is_empty() {
            return Vec::new();
        }

        let endpoint = format!("/v1/records/{}/lookup", kind.as_str());
        let result = self
            .request(Method::POST, &endpoint)
            .json(&OriginIdsRequest {
                owner_id,
                origin_ids,
            })
            .send()
            .await;

        let response = match result {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                tracing::debug!(status = response.status().as_u16(), "Lookup unsupported or refused");
                return Vec::new();
            }
            Err(error) => {
                tracing::debug!("Lookup request failed: {error}");
                return Vec::new();
            }
        };

        match response.json::<LookupResponse>().await {
            Ok(body) => body.records,
            Err(error) => {
                tracing::debug!("Lookup response was not understood: {error}");
                Vec::new()
            }
        }
    }

    /// Delete stored records of one kind by origin id, returning the count removed
    pub async fn delete_by_origin_ids(
        &self,
        kind: RecordKind,
        owner_id: &str,
        origin_ids: &[String],
    ) -> std::result::Result<u64, DeliveryError> {
        let endpoint = format!("/v1/records/{}/delete", kind.as_str());
        let response = self
            .request(Method::POST, &endpoint)
            .json(&OriginIdsRequest {
                owner_id,
                origin_ids,
            })
            .send()
            .await
            .map_err(|error| DeliveryError::Network(error.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|error| DeliveryError::Network(error.to_string()))?;
        if !(200..300).contains(&status) {
            return Err(DeliveryError::Protocol {
                status,
                message: error_message(status, &body),
            });
        }

        serde_json::from_str::<DeleteResponse>(&body)
            .map(|response| response.deleted)
            .map_err(|error| DeliveryError::Protocol {
                status,
                message: format!("invalid delete response: {error}"),
            })
    }
}

#[async_trait]
impl Deliverer for HttpDeliverer {
    async fn deliver(&self, endpoint: &str, payload: &[u8]) -> DeliveryOutcome {
        let response = match self
            .request(Method::POST, endpoint)
            .header(CONTENT_TYPE, "application/json")
            .body(payload.to_vec())
            .send()
            .await
        {
            Ok(response) => response,
            Err(error) => return DeliveryOutcome::Retryable(network_error(&error)),
        };

        let status = response.status().as_u16();
        match response.text().await {
            Ok(body) => classify_response(status, &body),
            Err(error) => DeliveryOutcome::Retryable(network_error(&error)),
        }
    }
}

fn network_error(error: &reqwest::Error) -> DeliveryError {
    if error.is_timeout() {
        DeliveryError::Network(format!("request timed out: {error}"))
    } else {
        DeliveryError::Network(error.to_string())
    }
}

/// Map an HTTP status and body onto a delivery outcome
pub(crate) fn classify_response(status: u16, body: &str) -> DeliveryOutcome {
    match status {
        200..=299 => match serde_json::from_str::<IngestResponse>(body) {
            Ok(response) => DeliveryOutcome::Delivered(response),
            // Redelivery is deduplicated server-side, so an unreadable ack is safe to retry
            Err(error) => DeliveryOutcome::Retryable(DeliveryError::Backend {
                status,
                message: format!("unreadable ingest response: {error}"),
            }),
        },
        401 | 408 | 425 | 429 | 500..=599 => DeliveryOutcome::Retryable(DeliveryError::Backend {
            status,
            message: error_message(status, body),
        }),
        _ => DeliveryOutcome::Rejected(DeliveryError::Protocol {
            status,
            message: error_message(status, body),
        }),
    }
}

fn error_message(status: u16, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ErrorBody>(body) {
        if let Some(errors) = payload.errors.filter(|errors| !errors.is_empty()) {
            return error_excerpt(&errors.join("; "));
        }
        if let Some(message) = payload.error.or(payload.message) {
            return error_excerpt(&message);
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        format!("HTTP {status}")
    } else {
        error_excerpt(trimmed)
    }
}
