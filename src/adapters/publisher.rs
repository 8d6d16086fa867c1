//! Publication of session results through the messaging layer.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::DecisionCandidate;

use super::{Messenger, Publisher};

/// Posts formatted results to a fixed results channel
pub struct ChannelPublisher {
    messenger: Arc<dyn Messenger>,
    results_channel: String,
}

impl ChannelPublisher {
    pub fn new(messenger: Arc<dyn Messenger>, results_channel: impl Into<String>) -> Self {
        Self {
            messenger,
            results_channel: results_channel.into(),
        }
    }

    async fn post(&self, content: &str) -> Result<()> {
        self.messenger
            .send_channel(&self.results_channel, content)
            .await
            .map(|_| ())
            .map_err(|e| anyhow!("publication delivery failed: {}", e))
    }
}

#[async_trait]
impl Publisher for ChannelPublisher {
    async fn publish(
        &self,
        confirmed: &[DecisionCandidate],
        canceled: &[DecisionCandidate],
        summary: &str,
    ) -> Result<()> {
        let mut lines = vec![format!("Decisions from {}:", summary)];
        for candidate in confirmed {
            lines.push(format!("• {} (proposed by {})", candidate.text, candidate.speaker_id));
        }
        if confirmed.is_empty() {
            lines.push("• (none survived the veto window)".to_string());
        }
        self.post(&lines.join("\n")).await?;

        // One cancellation notice per vetoed candidate
        for candidate in canceled {
            self.post(&format!("Decision vetoed: \"{}\"", candidate.text))
                .await?;
        }

        Ok(())
    }

    async fn publish_no_decision(&self, summary: &str) -> Result<()> {
        self.post(&format!("No decisions were recorded for {}.", summary))
            .await
    }

    async fn publish_manual_review(&self, summary: &str) -> Result<()> {
        self.post(&format!(
            "A participant indicated a decision was made in {} but none was captured. Manual follow-up needed.",
            summary
        ))
        .await
    }

    async fn publish_error(&self, session_id: Uuid, detail: &str) -> Result<()> {
        self.post(&format!(
            "Decision capture failed for session {}: {}",
            session_id, detail
        ))
        .await
    }
}
