//! CloudWatch Logs bindings.
//!
//! The pipeline runs against the [`LogQuery`] trait; the production
//! implementation wraps the AWS SDK client, tests substitute in-memory
//! fakes. Throttling must stay distinguishable from other failures so
//! the fetcher can retry only what is retryable.

use async_trait::async_trait;
use aws_sdk_cloudwatchlogs::error::{ProvideErrorMetadata, SdkError};

use crate::{Error, Result};

/// Error code CloudWatch Logs returns when the per-account,
/// per-region transaction ceiling is exceeded.
const THROTTLING_CODE: &str = "ThrottlingException";

/// A log metric filter: the bridge between an alarm's metric and the
/// log group producing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricFilter {
    pub log_group: String,
    pub pattern: Option<String>,
}

/// One retrieved log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEvent {
    pub log_stream: String,
    pub timestamp_ms: i64,
    pub message: String,
}

/// One page request against `FilterLogEvents`. Bounds are epoch
/// milliseconds, start inclusive, end exclusive.
#[derive(Debug, Clone)]
pub struct LogEventQuery {
    pub log_group: String,
    pub pattern: Option<String>,
    pub start_ms: i64,
    pub end_ms: i64,
    pub limit: i32,
    pub next_token: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct LogEventPage {
    pub events: Vec<LogEvent>,
    pub next_token: Option<String>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LogQuery: Send + Sync {
    async fn describe_metric_filters(
        &self,
        namespace: &str,
        metric_name: &str,
    ) -> Result<Vec<MetricFilter>>;

    async fn filter_log_events(&self, query: &LogEventQuery) -> Result<LogEventPage>;
}

/// Production implementation over the CloudWatch Logs client.
pub struct CwlLogQuery {
    client: aws_sdk_cloudwatchlogs::Client,
}

impl CwlLogQuery {
    pub fn new(client: aws_sdk_cloudwatchlogs::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl LogQuery for CwlLogQuery {
    async fn describe_metric_filters(
        &self,
        namespace: &str,
        metric_name: &str,
    ) -> Result<Vec<MetricFilter>> {
        let out = self
            .client
            .describe_metric_filters()
            .metric_namespace(namespace)
            .metric_name(metric_name)
            .send()
            .await
            .map_err(classify_sdk_error)?;

        Ok(out
            .metric_filters()
            .iter()
            .filter_map(|f| {
                f.log_group_name().map(|group| MetricFilter {
                    log_group: group.to_string(),
                    pattern: f.filter_pattern().map(str::to_string),
                })
            })
            .collect())
    }

    async fn filter_log_events(&self, query: &LogEventQuery) -> Result<LogEventPage> {
        let out = self
            .client
            .filter_log_events()
            .log_group_name(&query.log_group)
            .set_filter_pattern(query.pattern.clone())
            .start_time(query.start_ms)
            .end_time(query.end_ms)
            .limit(query.limit)
            .set_next_token(query.next_token.clone())
            .send()
            .await
            .map_err(classify_sdk_error)?;

        let events = out
            .events()
            .iter()
            .map(|e| LogEvent {
                log_stream: e.log_stream_name().unwrap_or_default().to_string(),
                timestamp_ms: e.timestamp().unwrap_or_default(),
                message: e.message().unwrap_or_default().to_string(),
            })
            .collect();

        Ok(LogEventPage {
            events,
            next_token: out.next_token().map(str::to_string),
        })
    }
}

fn classify_sdk_error<E, R>(err: SdkError<E, R>) -> Error
where
    E: ProvideErrorMetadata + std::fmt::Debug,
    R: std::fmt::Debug,
{
    let code = err.code().map(str::to_string);
    let detail = err
        .message()
        .map(str::to_string)
        .unwrap_or_else(|| format!("{err:?}"));

    match code.as_deref() {
        Some(THROTTLING_CODE) => Error::Throttled(detail),
        Some(other) => Error::Transport(format!("{other}: {detail}")),
        None => Error::Transport(detail),
    }
}
