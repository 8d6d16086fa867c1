//! HTTP client for the decision-extraction service.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use super::{ExtractedDecision, ExtractionBackend, StageError};

/// Decision-extraction service client
pub struct ExtractionClient {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct ExtractRequest<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct ExtractResponse {
    decisions: Vec<ExtractedDecision>,
}

impl ExtractionClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }

    fn url(&self) -> String {
        format!("{}/extract", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl ExtractionBackend for ExtractionClient {
    async fn extract(&self, combined: &str) -> Result<Vec<ExtractedDecision>, StageError> {
        let response = self
            .client
            .post(self.url())
            .json(&ExtractRequest { text: combined })
            .send()
            .await
            .map_err(|e| StageError::Transient(format!("extraction request failed: {}", e)))?;

        let status = response.status();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(StageError::Transient(format!(
                "extraction service returned {}",
                status
            )));
        }
        if !status.is_success() {
            return Err(StageError::Terminal(format!(
                "extraction service rejected request: {}",
                status
            )));
        }

        let body: ExtractResponse = response
            .json()
            .await
            .map_err(|e| StageError::Transient(format!("bad extraction response: {}", e)))?;

        Ok(body.decisions)
    }
}
