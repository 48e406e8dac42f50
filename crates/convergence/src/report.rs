//! Run reports

use crate::resource::ResourceRef;
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::time::Duration;

/// Result status of one resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    /// Guard satisfied, nothing to do
    Unchanged,
    /// Action ran and succeeded
    Converged,
    Failed,
    /// Not visited (dry run, abort or cancellation)
    Skipped,
}

impl OutcomeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unchanged => "unchanged",
            Self::Converged => "converged",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

/// Why a resource was visited
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Trigger {
    /// Its place in the graph order
    #[default]
    Declared,
    /// A notification from a converged resource
    Notification { from: ResourceRef },
}

/// What happened to a single resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionOutcome {
    pub resource: ResourceRef,
    pub status: OutcomeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Extra note, such as an absorbed guard error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub trigger: Trigger,
    #[serde(rename = "duration_ms", serialize_with = "serialize_millis")]
    pub duration: Duration,
}

impl ExecutionOutcome {
    pub fn new(resource: ResourceRef, status: OutcomeStatus) -> Self {
        Self {
            resource,
            status,
            error: None,
            detail: None,
            exit_code: None,
            trigger: Trigger::Declared,
            duration: Duration::ZERO,
        }
    }

    pub fn skipped(resource: ResourceRef, detail: impl Into<String>) -> Self {
        Self::new(resource, OutcomeStatus::Skipped).with_detail(detail)
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_exit_code(mut self, code: Option<i32>) -> Self {
        self.exit_code = code;
        self
    }

    pub fn with_trigger(mut self, trigger: Trigger) -> Self {
        self.trigger = trigger;
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }
}

fn serialize_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
}

/// Terminal status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every visited resource ended unchanged, converged or skipped
    CompletedClean,
    /// Some failures were accepted and the run went on
    CompletedWithFailures,
    /// Stopped early on an unacceptable failure or cancellation
    Aborted,
}

impl RunStatus {
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Aborted)
    }
}

/// Per-status counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub unchanged: usize,
    pub converged: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl RunSummary {
    /// Total number of outcomes
    pub fn total(&self) -> usize {
        self.unchanged + self.converged + self.failed + self.skipped
    }

    /// Check if nothing failed
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    pub fn add(&mut self, status: OutcomeStatus) {
        match status {
            OutcomeStatus::Unchanged => self.unchanged += 1,
            OutcomeStatus::Converged => self.converged += 1,
            OutcomeStatus::Failed => self.failed += 1,
            OutcomeStatus::Skipped => self.skipped += 1,
        }
    }
}

/// Everything that happened during one run, in visiting order
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: RunStatus,
    pub cancelled: bool,
    pub dry_run: bool,
    summary: RunSummary,
    outcomes: Vec<ExecutionOutcome>,
}

impl RunReport {
    pub(crate) fn start(dry_run: bool) -> Self {
        let now = Utc::now();
        Self {
            started_at: now,
            finished_at: now,
            status: RunStatus::CompletedClean,
            cancelled: false,
            dry_run,
            summary: RunSummary::default(),
            outcomes: Vec::new(),
        }
    }

    pub(crate) fn record(&mut self, outcome: ExecutionOutcome) {
        self.summary.add(outcome.status);
        self.outcomes.push(outcome);
    }

    pub(crate) fn finish(&mut self, status: RunStatus) {
        self.status = status;
        self.finished_at = Utc::now();
    }

    pub fn outcomes(&self) -> &[ExecutionOutcome] {
        &self.outcomes
    }

    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    /// Outcome of the resource's declared visit
    pub fn outcome_of(&self, resource: &ResourceRef) -> Option<&ExecutionOutcome> {
        self.outcomes
            .iter()
            .find(|o| &o.resource == resource && o.trigger == Trigger::Declared)
    }

    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ResourceKind;

    fn r(id: &str) -> ResourceRef {
        ResourceRef::new(ResourceKind::Execute, id)
    }

    #[test]
    fn test_summary_counts() {
        let mut report = RunReport::start(false);
        report.record(ExecutionOutcome::new(r("a"), OutcomeStatus::Converged));
        report.record(ExecutionOutcome::new(r("b"), OutcomeStatus::Failed).with_error("boom"));
        report.record(ExecutionOutcome::skipped(r("c"), "aborted"));
        report.finish(RunStatus::Aborted);

        let summary = report.summary();
        assert_eq!(summary.total(), 3);
        assert_eq!(summary.converged, 1);
        assert_eq!(summary.failed, 1);
        assert!(!summary.is_success());
        assert!(!report.status.is_success());
        assert_eq!(
            report.outcome_of(&r("b")).unwrap().error.as_deref(),
            Some("boom")
        );
    }

    #[test]
    fn test_outcome_json_shape() {
        let outcome = ExecutionOutcome::new(
            ResourceRef::new(ResourceKind::Service, "nginx"),
            OutcomeStatus::Converged,
        )
        .with_exit_code(Some(0))
        .with_trigger(Trigger::Notification {
            from: ResourceRef::new(ResourceKind::File, "/etc/nginx.conf"),
        })
        .with_duration(Duration::from_millis(1500));

        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["resource"]["kind"], "service");
        assert_eq!(json["status"], "converged");
        assert_eq!(json["duration_ms"], 1500);
        assert_eq!(json["trigger"]["type"], "notification");
        assert_eq!(json["trigger"]["from"]["identifier"], "/etc/nginx.conf");
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_report_json_status() {
        let mut report = RunReport::start(true);
        report.finish(RunStatus::CompletedWithFailures);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "completed_with_failures");
        assert_eq!(json["dry_run"], true);
        assert_eq!(json["summary"]["failed"], 0);
    }
}
