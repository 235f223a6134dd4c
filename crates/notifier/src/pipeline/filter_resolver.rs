use std::sync::Arc;

use tracing::info;

use crate::{
    aws::{LogQuery, MetricFilter},
    Error, Result,
};

/// Resolves an alarm's metric identity to the log metric filter that
/// emits the metric.
pub struct FilterResolver {
    query: Arc<dyn LogQuery>,
}

impl FilterResolver {
    pub fn new(query: Arc<dyn LogQuery>) -> Self {
        Self { query }
    }

    /// Looks up the filter for `(namespace, metric_name)`. More than
    /// one associated filter is a configuration smell upstream; the
    /// first one returned wins, no disambiguation is attempted.
    pub async fn resolve(&self, namespace: &str, metric_name: &str) -> Result<MetricFilter> {
        let filters = self
            .query
            .describe_metric_filters(namespace, metric_name)
            .await?;

        let filter = filters
            .into_iter()
            .next()
            .ok_or_else(|| Error::NoMetricFilter {
                namespace: namespace.to_string(),
                metric_name: metric_name.to_string(),
            })?;

        info!(
            metric_namespace = namespace,
            metric_name,
            log_group = %filter.log_group,
            filter = filter.pattern.as_deref().unwrap_or(""),
            "resolved metric filter"
        );
        Ok(filter)
    }
}
