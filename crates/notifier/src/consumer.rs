//! SQS consumption.
//!
//! One consumer per configured alarm queue. Each received message runs
//! one pipeline invocation as its own task; the completion signal
//! decides whether the message is deleted or left for redelivery.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::{sync::watch, task::JoinSet, time::sleep};
use tracing::{error, info};

use crate::{
    alarm::Alarm,
    pipeline::{AlarmPipeline, PipelineOutcome},
    Error, Result,
};

const WAIT_TIME_SECONDS: i32 = 20;
const MAX_MESSAGES_PER_POLL: i32 = 10;
const RECEIVE_ERROR_PAUSE: Duration = Duration::from_secs(5);

/// SNS wraps the alarm JSON in a notification envelope; only the inner
/// message matters here.
#[derive(Debug, Deserialize)]
struct SnsEnvelope {
    #[serde(rename = "Message")]
    message: String,
}

pub struct SqsConsumer {
    client: aws_sdk_sqs::Client,
    queue_url: String,
    pipeline: Arc<AlarmPipeline>,
}

impl SqsConsumer {
    pub fn new(client: aws_sdk_sqs::Client, queue_url: String, pipeline: Arc<AlarmPipeline>) -> Self {
        Self {
            client,
            queue_url,
            pipeline,
        }
    }

    /// Long-polls the queue until `shutdown` flips. New messages stop
    /// being accepted immediately; in-flight pipeline runs are drained
    /// to completion before returning.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut runs = JoinSet::new();
        info!(queue_url = %self.queue_url, "consuming alarm queue");

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                received = self.receive() => match received {
                    Ok(messages) => {
                        for message in messages {
                            let pipeline = self.pipeline.clone();
                            let client = self.client.clone();
                            let queue_url = self.queue_url.clone();
                            runs.spawn(async move {
                                process_message(pipeline, client, queue_url, message).await;
                            });
                        }
                    }
                    Err(err) => {
                        error!(queue_url = %self.queue_url, error = %err, "receive failed");
                        sleep(RECEIVE_ERROR_PAUSE).await;
                    }
                },
            }
        }

        info!(
            queue_url = %self.queue_url,
            in_flight = runs.len(),
            "shutting down, draining in-flight runs"
        );
        while runs.join_next().await.is_some() {}
    }

    async fn receive(&self) -> Result<Vec<aws_sdk_sqs::types::Message>> {
        let out = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(MAX_MESSAGES_PER_POLL)
            .wait_time_seconds(WAIT_TIME_SECONDS)
            .send()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        Ok(out.messages.unwrap_or_default())
    }
}

async fn process_message(
    pipeline: Arc<AlarmPipeline>,
    client: aws_sdk_sqs::Client,
    queue_url: String,
    message: aws_sdk_sqs::types::Message,
) {
    let body = message.body.as_deref().unwrap_or_default();

    let delete = match run_pipeline(&pipeline, body).await {
        Ok(outcome) => {
            info!(?outcome, "pipeline finished");
            true
        }
        Err(err) if err.is_redeliverable() => {
            error!(error = %err, "pipeline failed, leaving message for redelivery");
            false
        }
        Err(err) => {
            // Malformed payloads and delivery failures: redelivery
            // cannot fix the former and must not duplicate the latter.
            error!(error = %err, "pipeline failed, dropping message");
            true
        }
    };

    if delete {
        if let Some(receipt) = message.receipt_handle() {
            if let Err(err) = client
                .delete_message()
                .queue_url(&queue_url)
                .receipt_handle(receipt)
                .send()
                .await
            {
                error!(error = %err, "failed to delete message");
            }
        }
    }
}

async fn run_pipeline(pipeline: &AlarmPipeline, body: &str) -> Result<PipelineOutcome> {
    let alarm = parse_alarm(body)?;
    pipeline.run(&alarm).await
}

/// Unwraps the SNS envelope and deserializes the alarm. Both layers
/// failing to parse is a `MalformedInput`: the message will never
/// parse better on redelivery.
fn parse_alarm(body: &str) -> Result<Alarm> {
    let envelope: SnsEnvelope =
        serde_json::from_str(body).map_err(|e| Error::MalformedInput(format!("SNS envelope: {e}")))?;
    serde_json::from_str(&envelope.message)
        .map_err(|e| Error::MalformedInput(format!("alarm payload: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_alarm_from_sns_envelope() {
        let alarm_json = r#"{
            "AlarmName": "app-error-count",
            "NewStateValue": "ALARM",
            "StateChangeTime": "2017-01-12T16:30:42.236+0000",
            "Trigger": {"MetricName": "error-count", "Namespace": "LogMetrics"}
        }"#;
        let body = serde_json::json!({
            "Type": "Notification",
            "Message": alarm_json,
        })
        .to_string();

        let alarm = parse_alarm(&body).unwrap();
        assert_eq!(alarm.alarm_name, "app-error-count");
        assert_eq!(alarm.trigger.namespace, "LogMetrics");
    }

    #[test]
    fn rejects_non_envelope_body() {
        let err = parse_alarm("not json at all").unwrap_err();
        assert!(matches!(err, Error::MalformedInput(_)));
    }

    #[test]
    fn rejects_envelope_with_garbage_message() {
        let body = serde_json::json!({
            "Type": "Notification",
            "Message": "{\"AlarmName\": 42}",
        })
        .to_string();

        let err = parse_alarm(&body).unwrap_err();
        assert!(matches!(err, Error::MalformedInput(_)));
        assert!(err.to_string().contains("alarm payload"));
    }
}
