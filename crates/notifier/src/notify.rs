//! Slack delivery.
//!
//! One `chat.postMessage` call per payload, fire and forget: a failed
//! post is reported to the caller and never retried here.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::{pipeline::NotificationPayload, Error, Result};

const SLACK_POST_MESSAGE_URL: &str = "https://slack.com/api/chat.postMessage";

/// Delivery interface the pipeline hands finished payloads to.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notify: Send + Sync {
    async fn post(&self, payload: &NotificationPayload) -> Result<()>;
}

/// Posts notifications via the Slack Web API.
pub struct SlackNotifier {
    client: reqwest::Client,
    api_token: String,
}

impl SlackNotifier {
    pub fn new(api_token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_token: api_token.into(),
        }
    }

    fn build_message(payload: &NotificationPayload) -> Value {
        let mut body = String::new();
        for entry in &payload.bodies {
            body.push_str("```");
            body.push_str(entry);
            body.push_str("```\n");
        }

        let attachment = json!({
            "color": payload.profile.attachment_color,
            "mrkdwn_in": ["text"],
            "text": body,
            "actions": [{
                "type": "button",
                "text": "Open Head Log",
                "url": payload.first_log_url,
            }],
        });

        json!({
            "channel": payload.profile.channel,
            "text": format!("Found log in *{}*", payload.application),
            "mrkdwn": true,
            "username": payload.profile.username,
            "icon_url": payload.profile.icon_url,
            "attachments": [attachment],
        })
    }
}

#[async_trait]
impl Notify for SlackNotifier {
    async fn post(&self, payload: &NotificationPayload) -> Result<()> {
        let message = Self::build_message(payload);

        let response = self
            .client
            .post(SLACK_POST_MESSAGE_URL)
            .bearer_auth(&self.api_token)
            .json(&message)
            .send()
            .await
            .map_err(|e| Error::Delivery(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Delivery(format!(
                "chat.postMessage returned {status}"
            )));
        }

        // Slack reports API-level failures in the body with HTTP 200.
        let body: Value = response
            .json()
            .await
            .map_err(|e| Error::Delivery(e.to_string()))?;
        if !body.get("ok").and_then(Value::as_bool).unwrap_or(false) {
            let reason = body
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            return Err(Error::Delivery(format!("chat.postMessage failed: {reason}")));
        }

        debug!(
            application = %payload.application,
            channel = payload.profile.channel.as_deref().unwrap_or(""),
            "notification delivered"
        );
        Ok(())
    }
}
