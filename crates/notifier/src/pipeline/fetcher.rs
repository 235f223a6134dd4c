use std::sync::Arc;

use tracing::info;

use crate::{
    alarm::TimeWindow,
    aws::{LogEvent, LogEventQuery, LogQuery, MetricFilter},
    retry::{retry_throttled, BackoffConfig},
    Result,
};

/// Retrieves every log event matching a filter inside a time window,
/// following continuation tokens and absorbing throttling with backoff.
pub struct LogWindowFetcher {
    query: Arc<dyn LogQuery>,
    backoff: BackoffConfig,
    page_limit: i32,
}

impl LogWindowFetcher {
    pub fn new(query: Arc<dyn LogQuery>, backoff: BackoffConfig, page_limit: i32) -> Self {
        Self {
            query,
            backoff,
            page_limit,
        }
    }

    /// Concatenates all pages in received order. Pagination ends when
    /// the backend stops returning a continuation token or returns an
    /// empty page, whichever comes first. A throttled page request is
    /// retried in place; any other failure aborts the whole fetch.
    pub async fn fetch(&self, filter: &MetricFilter, window: &TimeWindow) -> Result<Vec<LogEvent>> {
        let mut events = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let request = LogEventQuery {
                log_group: filter.log_group.clone(),
                pattern: filter.pattern.clone(),
                start_ms: window.start_ms,
                end_ms: window.end_ms,
                limit: self.page_limit,
                next_token: next_token.clone(),
            };

            let page =
                retry_throttled(&self.backoff, || self.query.filter_log_events(&request)).await?;

            let empty_page = page.events.is_empty();
            events.extend(page.events);
            next_token = page.next_token;

            if empty_page || next_token.is_none() {
                break;
            }
        }

        info!(
            log_group = %filter.log_group,
            limit = self.page_limit,
            start_ms = window.start_ms,
            end_ms = window.end_ms,
            count = events.len(),
            "fetched log events"
        );
        Ok(events)
    }
}
