//! HTTP detection backend.

use std::time::Duration;

use serde::Deserialize;

use super::{DetectedSpan, DetectionBackend, DetectionRequest};
use crate::error::{RedactorError, RedactorResult};

/// Calls a remote entity-detection endpoint with a blocking client.
pub struct HttpDetectionBackend {
    endpoint: String,
    client: reqwest::blocking::Client,
    timeout_secs: u64,
}

impl HttpDetectionBackend {
    /// Creates a backend posting to `endpoint`. Every request is bounded by
    /// `timeout_secs`.
    pub fn new(endpoint: &str, timeout_secs: u64) -> RedactorResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| RedactorError::backend("reqwest", "failed to create HTTP client", e))?;

        Ok(Self {
            endpoint: endpoint.to_string(),
            client,
            timeout_secs,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// Response body of the detection endpoint.
#[derive(Deserialize)]
struct DetectionResponse {
    #[serde(default)]
    entities: Option<Vec<DetectedSpan>>,
}

/// Parses a response body. A body without an `entities` array yields no spans.
pub(crate) fn parse_response(body: &str) -> Result<Vec<DetectedSpan>, String> {
    let parsed: DetectionResponse =
        serde_json::from_str(body).map_err(|e| format!("invalid response: {}", e))?;
    Ok(parsed.entities.unwrap_or_default())
}

impl DetectionBackend for HttpDetectionBackend {
    fn detect(&self, request: &DetectionRequest<'_>) -> RedactorResult<Vec<DetectedSpan>> {
        let page = request.page_number.saturating_sub(1);
        let failure = |reason: String| RedactorError::Detection { page, reason };

        let response = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    failure(format!("request timed out after {}s", self.timeout_secs))
                } else if e.is_connect() {
                    failure(format!("cannot connect to {}", self.endpoint))
                } else {
                    failure(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(failure(format!("HTTP {}", status.as_u16())));
        }

        let body = response.text().map_err(|e| failure(e.to_string()))?;
        parse_response(&body).map_err(failure)
    }

    fn name(&self) -> &str {
        "http"
    }
}
