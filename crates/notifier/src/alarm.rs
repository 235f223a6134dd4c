//! CloudWatch alarm notification payloads and the time window derived
//! from them.

use chrono::{DateTime, FixedOffset};
use serde::Deserialize;

use crate::{Error, Result};

/// Timestamp format CloudWatch uses for `StateChangeTime`,
/// e.g. `2017-01-12T16:30:42.236+0000`.
const STATE_CHANGE_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f%z";

/// A metric alarm state change, as delivered inside an SNS notification.
#[derive(Debug, Clone, Deserialize)]
pub struct Alarm {
    #[serde(rename = "AlarmName")]
    pub alarm_name: String,
    #[serde(rename = "AlarmDescription", default)]
    pub alarm_description: Option<String>,
    #[serde(rename = "AWSAccountId", default)]
    pub aws_account_id: String,
    #[serde(rename = "NewStateValue")]
    pub new_state_value: String,
    #[serde(rename = "NewStateReason", default)]
    pub new_state_reason: String,
    #[serde(rename = "StateChangeTime")]
    pub state_change_time: String,
    #[serde(rename = "Region", default)]
    pub region: String,
    #[serde(rename = "OldStateValue", default)]
    pub old_state_value: String,
    #[serde(rename = "Trigger")]
    pub trigger: AlarmTrigger,
}

/// The metric identity that tripped the alarm.
#[derive(Debug, Clone, Deserialize)]
pub struct AlarmTrigger {
    #[serde(rename = "MetricName")]
    pub metric_name: String,
    #[serde(rename = "Namespace")]
    pub namespace: String,
    #[serde(rename = "Statistic", default)]
    pub statistic: String,
    #[serde(rename = "Period", default)]
    pub period: i64,
    #[serde(rename = "EvaluationPeriods", default)]
    pub evaluation_periods: i64,
    #[serde(rename = "ComparisonOperator", default)]
    pub comparison_operator: String,
    #[serde(rename = "Threshold", default)]
    pub threshold: f64,
}

impl Alarm {
    /// Parses `StateChangeTime` into a fixed-offset instant.
    /// Failure here means the payload is unrecoverable.
    pub fn state_change_time(&self) -> Result<DateTime<FixedOffset>> {
        DateTime::parse_from_str(&self.state_change_time, STATE_CHANGE_TIME_FORMAT).map_err(|e| {
            Error::MalformedInput(format!(
                "state change time {:?}: {e}",
                self.state_change_time
            ))
        })
    }
}

/// Half-open `[start, end)` range of epoch milliseconds around an
/// alarm's state-change instant. Offsets are applied symmetrically to a
/// fixed anchor, so `start <= end` holds by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start_ms: i64,
    pub end_ms: i64,
}

impl TimeWindow {
    pub fn around(anchor: DateTime<FixedOffset>, before_secs: u64, after_secs: u64) -> Self {
        let anchor_ms = anchor.timestamp_millis();
        Self {
            start_ms: anchor_ms - before_secs as i64 * 1000,
            end_ms: anchor_ms + after_secs as i64 * 1000,
        }
    }

    pub fn contains(&self, timestamp_ms: i64) -> bool {
        self.start_ms <= timestamp_ms && timestamp_ms < self.end_ms
    }
}
