use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde_json::{Map, Value};

use crate::{
    aws::{LogEvent, MetricFilter},
    config::SlackProfile,
    pipeline::classifier::Classification,
    Error, Result,
};

/// One outbound notification: everything delivery needs for a single
/// application's message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationPayload {
    pub application: String,
    pub profile: SlackProfile,
    pub first_log_url: String,
    pub bodies: Vec<String>,
}

/// Groups classified events into one payload per application name,
/// preserving first-seen order.
pub struct NotificationAggregator {
    region: String,
}

impl NotificationAggregator {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
        }
    }

    /// The first event seen for an application fixes its destination
    /// profile and deep link; every later event for the same
    /// application only appends body content, even if it would have
    /// classified differently.
    pub fn aggregate(
        &self,
        filter: &MetricFilter,
        classified: &[(Classification, LogEvent)],
    ) -> Result<Vec<NotificationPayload>> {
        let mut payloads: Vec<NotificationPayload> = Vec::new();

        for (classification, event) in classified {
            let body = format_body(&event.message)?;

            if let Some(existing) = payloads
                .iter_mut()
                .find(|p| p.application == classification.application)
            {
                existing.bodies.push(body);
                continue;
            }

            payloads.push(NotificationPayload {
                application: classification.application.clone(),
                profile: classification.profile.clone(),
                first_log_url: self.console_url(
                    &filter.log_group,
                    &event.log_stream,
                    event.timestamp_ms,
                ),
                bodies: vec![body],
            });
        }

        Ok(payloads)
    }

    /// CloudWatch console deep link to the event's position in its
    /// stream. The viewer takes an absolute RFC 3339 start time; the
    /// event timestamp is truncated to whole seconds.
    fn console_url(&self, log_group: &str, log_stream: &str, timestamp_ms: i64) -> String {
        let event_at = Utc
            .timestamp_opt(timestamp_ms / 1000, 0)
            .single()
            .unwrap_or(DateTime::UNIX_EPOCH);

        format!(
            "https://{region}.console.aws.amazon.com/cloudwatch/home?region={region}\
             #logEventViewer:group={log_group};stream={log_stream};start={start}",
            region = self.region,
            start = event_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        )
    }
}

/// Structured log lines are re-serialized with indentation for
/// readability; serde_json's default map keeps keys sorted, so the
/// output is deterministic. Free text passes through verbatim.
fn format_body(message: &str) -> Result<String> {
    match serde_json::from_str::<Map<String, Value>>(message) {
        Ok(document) => serde_json::to_string_pretty(&document)
            .map_err(|e| Error::Internal(format!("re-serializing log document: {e}"))),
        Err(_) => Ok(message.to_string()),
    }
}
