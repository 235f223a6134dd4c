use globset::{Glob, GlobMatcher};

use crate::{
    aws::{LogEvent, MetricFilter},
    config::{AlarmConfig, RoutingGroup, SlackProfile},
    Error, Result,
};

/// Log group CloudWatch assigns to AWS Batch job output. Streams under
/// it are named `<jobDefinitionName>/<queue>/<task id>`.
pub const BATCH_JOB_LOG_GROUP: &str = "/aws/batch/job";

/// A routing group with its glob patterns compiled.
#[derive(Debug)]
struct CompiledGroup {
    profile: SlackProfile,
    log_groups: Vec<GlobMatcher>,
    batch_job_definitions: Vec<GlobMatcher>,
}

/// Resolves each log event to an application name and the Slack
/// profile its notification should use.
///
/// All patterns are compiled at construction; `classify` itself cannot
/// fail and always yields the same result for the same input.
#[derive(Debug)]
pub struct RoutingClassifier {
    default_profile: SlackProfile,
    groups: Vec<CompiledGroup>,
}

/// Result of classifying one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub application: String,
    pub profile: SlackProfile,
}

impl RoutingClassifier {
    /// Compiles the routing rules of one alarm configuration. The
    /// alarm-level profile override is folded into `default_profile`
    /// here, so classification works from a single effective default.
    pub fn compile(default_profile: &SlackProfile, alarm: &AlarmConfig) -> Result<Self> {
        let default_profile = default_profile.merged_with(&alarm.slack);
        let groups = alarm
            .groups
            .iter()
            .map(compile_group)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            default_profile,
            groups,
        })
    }

    pub fn classify(&self, filter: &MetricFilter, event: &LogEvent) -> Classification {
        if filter.log_group == BATCH_JOB_LOG_GROUP {
            // The leading stream path segment is the job definition name.
            let job_definition = event.log_stream.split('/').next().unwrap_or_default();
            Classification {
                application: format!("{job_definition} (batch)"),
                profile: self.resolve_profile(|g| &g.batch_job_definitions, job_definition),
            }
        } else {
            Classification {
                application: filter.log_group.clone(),
                profile: self.resolve_profile(|g| &g.log_groups, &filter.log_group),
            }
        }
    }

    /// First group with a matching pattern wins, in configured order;
    /// its profile overrides the effective default field by field. No
    /// match falls back to the default unchanged.
    fn resolve_profile<'a, F>(&'a self, patterns: F, candidate: &str) -> SlackProfile
    where
        F: Fn(&'a CompiledGroup) -> &'a Vec<GlobMatcher>,
    {
        for group in &self.groups {
            if patterns(group).iter().any(|m| m.is_match(candidate)) {
                return self.default_profile.merged_with(&group.profile);
            }
        }
        self.default_profile.clone()
    }
}

fn compile_group(group: &RoutingGroup) -> Result<CompiledGroup> {
    Ok(CompiledGroup {
        profile: group.slack.clone(),
        log_groups: compile_patterns(&group.log_groups)?,
        batch_job_definitions: compile_patterns(&group.batch_job_definitions)?,
    })
}

fn compile_patterns(patterns: &[String]) -> Result<Vec<GlobMatcher>> {
    patterns
        .iter()
        .map(|pattern| {
            Ok(Glob::new(pattern)
                .map_err(|e| Error::Config(format!("invalid glob pattern {pattern:?}: {e}")))?
                .compile_matcher())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(channel: &str) -> SlackProfile {
        SlackProfile {
            channel: Some(channel.to_string()),
            ..SlackProfile::default()
        }
    }

    fn group(channel: &str, log_groups: &[&str], batch: &[&str]) -> RoutingGroup {
        RoutingGroup {
            slack: profile(channel),
            log_groups: log_groups.iter().map(|s| s.to_string()).collect(),
            batch_job_definitions: batch.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn alarm_config(groups: Vec<RoutingGroup>) -> AlarmConfig {
        AlarmConfig {
            sqs_url: "https://sqs.example/queue".to_string(),
            slack: SlackProfile::default(),
            groups,
        }
    }

    fn batch_filter() -> MetricFilter {
        MetricFilter {
            log_group: BATCH_JOB_LOG_GROUP.to_string(),
            pattern: None,
        }
    }

    fn event(stream: &str) -> LogEvent {
        LogEvent {
            log_stream: stream.to_string(),
            timestamp_ms: 0,
            message: "boom".to_string(),
        }
    }

    #[test]
    fn derives_application_name_from_batch_stream() {
        let classifier =
            RoutingClassifier::compile(&profile("#alerts"), &alarm_config(vec![])).unwrap();

        let c = classifier.classify(&batch_filter(), &event("jobdef-42/default/abc123"));
        assert_eq!(c.application, "jobdef-42 (batch)");
    }

    #[test]
    fn batch_rules_match_on_bare_job_definition_name() {
        let classifier = RoutingClassifier::compile(
            &profile("#alerts"),
            &alarm_config(vec![group("#batch-alerts", &[], &["jobdef-*"])]),
        )
        .unwrap();

        let matched = classifier.classify(&batch_filter(), &event("jobdef-42/default/abc123"));
        assert_eq!(matched.profile.channel.as_deref(), Some("#batch-alerts"));

        let fallback = classifier.classify(&batch_filter(), &event("other-job/default/abc123"));
        assert_eq!(fallback.profile.channel.as_deref(), Some("#alerts"));
    }

    #[test]
    fn log_group_rules_match_the_whole_group_name() {
        let classifier = RoutingClassifier::compile(
            &profile("#alerts"),
            &alarm_config(vec![group("#web-alerts", &["/app/web*"], &[])]),
        )
        .unwrap();

        let filter = MetricFilter {
            log_group: "/app/web/nginx".to_string(),
            pattern: None,
        };
        let c = classifier.classify(&filter, &event("stream"));
        assert_eq!(c.application, "/app/web/nginx");
        assert_eq!(c.profile.channel.as_deref(), Some("#web-alerts"));
    }

    #[test]
    fn first_matching_group_wins() {
        let classifier = RoutingClassifier::compile(
            &profile("#alerts"),
            &alarm_config(vec![
                group("#first", &[], &["jobdef-*"]),
                group("#second", &[], &["jobdef-42"]),
            ]),
        )
        .unwrap();

        let c = classifier.classify(&batch_filter(), &event("jobdef-42/default/abc123"));
        assert_eq!(c.profile.channel.as_deref(), Some("#first"));
    }

    #[test]
    fn group_override_keeps_unset_default_fields() {
        let default = SlackProfile {
            channel: Some("#alerts".to_string()),
            username: Some("notifier".to_string()),
            icon_url: None,
            attachment_color: Some("#ff0000".to_string()),
        };
        let classifier = RoutingClassifier::compile(
            &default,
            &alarm_config(vec![group("#batch-alerts", &[], &["jobdef-*"])]),
        )
        .unwrap();

        let c = classifier.classify(&batch_filter(), &event("jobdef-42/default/abc123"));
        assert_eq!(c.profile.channel.as_deref(), Some("#batch-alerts"));
        assert_eq!(c.profile.username.as_deref(), Some("notifier"));
        assert_eq!(c.profile.attachment_color.as_deref(), Some("#ff0000"));
    }

    #[test]
    fn alarm_level_override_is_folded_into_the_default() {
        let alarm = AlarmConfig {
            slack: profile("#app-alerts"),
            ..alarm_config(vec![])
        };
        let classifier = RoutingClassifier::compile(&profile("#alerts"), &alarm).unwrap();

        let filter = MetricFilter {
            log_group: "/app/api".to_string(),
            pattern: None,
        };
        let c = classifier.classify(&filter, &event("stream"));
        assert_eq!(c.profile.channel.as_deref(), Some("#app-alerts"));
    }

    #[test]
    fn classification_is_idempotent() {
        let classifier = RoutingClassifier::compile(
            &profile("#alerts"),
            &alarm_config(vec![group("#batch-alerts", &[], &["jobdef-?"])]),
        )
        .unwrap();

        let e = event("jobdef-4/default/abc123");
        let first = classifier.classify(&batch_filter(), &e);
        let second = classifier.classify(&batch_filter(), &e);
        assert_eq!(first, second);
    }

    #[test]
    fn character_classes_are_supported() {
        let classifier = RoutingClassifier::compile(
            &profile("#alerts"),
            &alarm_config(vec![group("#batch-alerts", &[], &["jobdef-[0-9]"])]),
        )
        .unwrap();

        let matched = classifier.classify(&batch_filter(), &event("jobdef-7/default/a"));
        assert_eq!(matched.profile.channel.as_deref(), Some("#batch-alerts"));

        let unmatched = classifier.classify(&batch_filter(), &event("jobdef-x/default/a"));
        assert_eq!(unmatched.profile.channel.as_deref(), Some("#alerts"));
    }

    #[test]
    fn invalid_pattern_fails_compilation() {
        let err = RoutingClassifier::compile(
            &profile("#alerts"),
            &alarm_config(vec![group("#x", &[], &["jobdef-["])]),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
