//! The alarm-to-evidence correlation pipeline.
//!
//! One run per alarm: resolve the metric filter, fetch the log window,
//! classify each event to an application and destination, aggregate
//! into one payload per application, deliver. Two outcomes terminate
//! early without being failures: an alarm whose metric has no filter,
//! and a window with no matching events.

mod aggregator;
mod classifier;
mod fetcher;
mod filter_resolver;

pub use aggregator::{NotificationAggregator, NotificationPayload};
pub use classifier::{Classification, RoutingClassifier, BATCH_JOB_LOG_GROUP};
pub use fetcher::LogWindowFetcher;
pub use filter_resolver::FilterResolver;

use std::sync::Arc;

use tracing::{info, warn};

use crate::{
    alarm::{Alarm, TimeWindow},
    aws::LogQuery,
    config::{AppConfig, RangeDuration},
    notify::Notify,
    Error, Result,
};

/// Terminal state of one alarm-processing run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// All aggregated payloads were handed to delivery.
    Delivered(usize),
    /// The alarm's metric has no associated log metric filter.
    NoFilterFound,
    /// The window matched no log events: an unreproducible
    /// correlation, not a failure.
    NoEventsFound,
}

pub struct AlarmPipeline {
    resolver: FilterResolver,
    fetcher: LogWindowFetcher,
    classifier: RoutingClassifier,
    aggregator: NotificationAggregator,
    notifier: Arc<dyn Notify>,
    range: RangeDuration,
}

impl AlarmPipeline {
    pub fn new(
        query: Arc<dyn LogQuery>,
        notifier: Arc<dyn Notify>,
        classifier: RoutingClassifier,
        config: &AppConfig,
    ) -> Self {
        Self {
            resolver: FilterResolver::new(query.clone()),
            fetcher: LogWindowFetcher::new(query, config.log.backoff.clone(), config.log.limit),
            classifier,
            aggregator: NotificationAggregator::new(config.aws.region.clone()),
            notifier,
            range: config.log.range_duration,
        }
    }

    /// Runs the full correlation for one alarm. Either every aggregated
    /// payload is handed to delivery or none is; a delivery failure
    /// mid-run skips the remaining payloads and surfaces the error.
    pub async fn run(&self, alarm: &Alarm) -> Result<PipelineOutcome> {
        let filter = match self
            .resolver
            .resolve(&alarm.trigger.namespace, &alarm.trigger.metric_name)
            .await
        {
            Ok(filter) => filter,
            Err(Error::NoMetricFilter {
                namespace,
                metric_name,
            }) => {
                warn!(
                    alarm_name = %alarm.alarm_name,
                    namespace = %namespace,
                    metric_name = %metric_name,
                    "no metric filter for alarm, nothing to correlate"
                );
                return Ok(PipelineOutcome::NoFilterFound);
            }
            Err(err) => return Err(err),
        };

        let state_change = alarm.state_change_time()?;
        let window = TimeWindow::around(state_change, self.range.before, self.range.after);

        let events = self.fetcher.fetch(&filter, &window).await?;
        if events.is_empty() {
            warn!(
                alarm_name = %alarm.alarm_name,
                log_group = %filter.log_group,
                start_ms = window.start_ms,
                end_ms = window.end_ms,
                "no log events in window, skipping notification"
            );
            return Ok(PipelineOutcome::NoEventsFound);
        }

        let classified: Vec<_> = events
            .into_iter()
            .map(|event| (self.classifier.classify(&filter, &event), event))
            .collect();
        let payloads = self.aggregator.aggregate(&filter, &classified)?;

        let delivered = payloads.len();
        for payload in &payloads {
            self.notifier.post(payload).await?;
        }

        info!(
            alarm_name = %alarm.alarm_name,
            log_group = %filter.log_group,
            notifications = delivered,
            "alarm processed"
        );
        Ok(PipelineOutcome::Delivered(delivered))
    }
}
