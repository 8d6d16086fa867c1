//! HTTP client for the messaging layer.
//!
//! Every message carries a cancel affordance attached by the messaging
//! service; both delivery calls return the prompt id that cancel
//! signals reference. A 403 on direct delivery means the participant's
//! DMs are closed, which the veto coordinator handles with a channel
//! fallback.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use super::{DeliveryError, Messenger};

/// Messaging service client
pub struct MessagingClient {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct DirectRequest<'a> {
    participant_id: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChannelRequest<'a> {
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct PromptResponse {
    prompt_id: String,
}

impl MessagingClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn parse_prompt(
        response: reqwest::Response,
        participant_id: &str,
    ) -> Result<String, DeliveryError> {
        let status = response.status();
        if status == StatusCode::FORBIDDEN {
            return Err(DeliveryError::Denied(participant_id.to_string()));
        }
        if !status.is_success() {
            return Err(DeliveryError::Other(format!(
                "messaging service returned {}",
                status
            )));
        }

        let body: PromptResponse = response
            .json()
            .await
            .map_err(|e| DeliveryError::Other(format!("bad messaging response: {}", e)))?;
        Ok(body.prompt_id)
    }
}

#[async_trait]
impl Messenger for MessagingClient {
    async fn send_direct(
        &self,
        participant_id: &str,
        content: &str,
    ) -> Result<String, DeliveryError> {
        let response = self
            .client
            .post(self.url("dm"))
            .json(&DirectRequest {
                participant_id,
                content,
            })
            .send()
            .await
            .map_err(|e| DeliveryError::Other(format!("direct delivery failed: {}", e)))?;

        Self::parse_prompt(response, participant_id).await
    }

    async fn send_channel(&self, channel: &str, content: &str) -> Result<String, DeliveryError> {
        let response = self
            .client
            .post(self.url(&format!("channels/{}/messages", channel)))
            .json(&ChannelRequest { content })
            .send()
            .await
            .map_err(|e| DeliveryError::Other(format!("channel delivery failed: {}", e)))?;

        Self::parse_prompt(response, "").await
    }
}
