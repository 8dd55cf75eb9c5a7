//! Run results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::Result;
use crate::migrator::ImporterStats;
use crate::pipeline::{duration_secs, PipelineStats, RecordError};

/// Final status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every entry migrated without record errors.
    Completed,
    /// Some entries or records failed; the rest migrated.
    Partial,
    /// Every entry failed.
    Failed,
    /// Stopped by cancellation; migrated records stay migrated.
    Cancelled,
    /// Validate mode, no problems found.
    Validated,
    /// Validate mode, at least one entry cannot run.
    ValidationFailed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Completed => "completed",
            RunStatus::Partial => "partial",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
            RunStatus::Validated => "validated",
            RunStatus::ValidationFailed => "validation_failed",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of one plan entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainStatus {
    Completed,
    /// Finished with record or importer failures.
    Partial,
    Failed,
    /// Not installed in the source system; nothing to migrate.
    Skipped,
    Cancelled,
}

/// Why a plan entry did not run to completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainErrorKind {
    DomainNotSupported,
    NotInstalled,
    InvalidOptions,
    /// Stopped by the `abort_domain` failure policy.
    Aborted,
    /// The scan or a worker task failed.
    PipelineFailed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainError {
    pub kind: DomainErrorKind,
    pub message: String,
}

/// Outcome of one plan entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainOutcome {
    pub domain: String,
    pub status: DomainStatus,
    pub migrated: u64,
    pub validated: u64,
    pub skipped: u64,
    pub failed: u64,
    pub importers_migrated: u64,
    pub importers_failed: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<DomainError>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub record_errors: Vec<RecordError>,
    #[serde(with = "duration_secs")]
    pub elapsed: Duration,
}

impl DomainOutcome {
    fn empty(domain: &str, status: DomainStatus) -> Self {
        Self {
            domain: domain.to_string(),
            status,
            migrated: 0,
            validated: 0,
            skipped: 0,
            failed: 0,
            importers_migrated: 0,
            importers_failed: 0,
            error: None,
            record_errors: Vec::new(),
            elapsed: Duration::ZERO,
        }
    }

    /// An entry skipped because the run was cancelled first.
    pub fn cancelled(domain: &str) -> Self {
        Self::empty(domain, DomainStatus::Cancelled)
    }

    /// An entry that never started.
    pub fn not_run(
        domain: &str,
        status: DomainStatus,
        kind: DomainErrorKind,
        message: impl Into<String>,
    ) -> Self {
        let mut outcome = Self::empty(domain, status);
        outcome.error = Some(DomainError {
            kind,
            message: message.into(),
        });
        outcome
    }

    /// An entry whose pipeline ran.
    pub fn from_stats(domain: &str, stats: PipelineStats, importers: ImporterStats) -> Self {
        let mut outcome = Self::empty(domain, DomainStatus::Completed);
        outcome.migrated = stats.migrated;
        outcome.validated = stats.validated + importers.validated;
        outcome.skipped = stats.skipped;
        outcome.failed = stats.failed;
        outcome.importers_migrated = importers.migrated;
        outcome.importers_failed = importers.failed;
        outcome.record_errors = stats.errors;
        outcome.record_errors.extend(importers.errors);
        outcome.elapsed = stats.elapsed;

        outcome.status = if stats.cancelled {
            DomainStatus::Cancelled
        } else if let Some(message) = stats.scan_error {
            outcome.error = Some(DomainError {
                kind: DomainErrorKind::PipelineFailed,
                message,
            });
            DomainStatus::Failed
        } else if stats.aborted {
            outcome.error = Some(DomainError {
                kind: DomainErrorKind::Aborted,
                message: "stopped after a target write failure".to_string(),
            });
            DomainStatus::Failed
        } else if outcome.failed > 0 || outcome.importers_failed > 0 {
            DomainStatus::Partial
        } else {
            DomainStatus::Completed
        };
        outcome
    }
}

/// Validation of one plan entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryCheck {
    pub domain: String,
    pub registered: bool,
    pub installed: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub problems: Vec<String>,
}

impl EntryCheck {
    pub fn is_ok(&self) -> bool {
        self.problems.is_empty()
    }
}

/// Validate-mode report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Structural problems with the plan document itself.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub plan_problems: Vec<String>,

    pub entries: Vec<EntryCheck>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.plan_problems.is_empty() && self.entries.iter().all(EntryCheck::is_ok)
    }

    /// `plan: problem` lines, then `domain: problem` for every failing entry.
    pub fn problems(&self) -> Vec<String> {
        self.plan_problems
            .iter()
            .map(|p| format!("plan: {}", p))
            .chain(
                self.entries
                    .iter()
                    .flat_map(|e| e.problems.iter().map(move |p| format!("{}: {}", e.domain, p))),
            )
            .collect()
    }
}

/// Result of a migration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    /// Unique run identifier.
    pub run_id: String,

    pub plan_id: String,

    /// Digest of the plan as executed.
    pub plan_digest: String,

    pub status: RunStatus,

    pub dry_run: bool,

    pub started_at: DateTime<Utc>,

    pub completed_at: DateTime<Utc>,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    /// Per-entry outcomes, in plan order.
    pub domains: Vec<DomainOutcome>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationReport>,
}

impl RunResult {
    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn domain(&self, name: &str) -> Option<&DomainOutcome> {
        self.domains.iter().find(|d| d.domain == name)
    }

    /// Record-level failures across all entries.
    pub fn record_errors(&self) -> impl Iterator<Item = &RecordError> {
        self.domains.iter().flat_map(|d| d.record_errors.iter())
    }

    pub fn total_migrated(&self) -> u64 {
        self.domains.iter().map(|d| d.migrated).sum()
    }

    pub fn total_failed(&self) -> u64 {
        self.domains.iter().map(|d| d.failed).sum()
    }

    /// Overall status from entry outcomes.
    pub(crate) fn summarize(domains: &[DomainOutcome], cancelled: bool) -> RunStatus {
        if cancelled {
            return RunStatus::Cancelled;
        }
        let failed = domains
            .iter()
            .filter(|d| d.status == DomainStatus::Failed)
            .count();
        if !domains.is_empty() && failed == domains.len() {
            RunStatus::Failed
        } else if failed > 0 || domains.iter().any(|d| d.status == DomainStatus::Partial) {
            RunStatus::Partial
        } else {
            RunStatus::Completed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(status: DomainStatus) -> DomainOutcome {
        DomainOutcome::empty("d", status)
    }

    #[test]
    fn test_summarize() {
        use DomainStatus::*;
        assert_eq!(
            RunResult::summarize(&[outcome(Completed), outcome(Skipped)], false),
            RunStatus::Completed
        );
        assert_eq!(
            RunResult::summarize(&[outcome(Completed), outcome(Failed)], false),
            RunStatus::Partial
        );
        assert_eq!(
            RunResult::summarize(&[outcome(Failed), outcome(Failed)], false),
            RunStatus::Failed
        );
        assert_eq!(
            RunResult::summarize(&[outcome(Completed)], true),
            RunStatus::Cancelled
        );
    }

    #[test]
    fn test_from_stats_aborted_is_failed() {
        let stats = PipelineStats {
            migrated: 2,
            failed: 1,
            aborted: true,
            ..Default::default()
        };
        let outcome = DomainOutcome::from_stats("iso", stats, ImporterStats::default());
        assert_eq!(outcome.status, DomainStatus::Failed);
        assert_eq!(outcome.error.unwrap().kind, DomainErrorKind::Aborted);
    }

    #[test]
    fn test_from_stats_scan_failure_keeps_counts() {
        let stats = PipelineStats {
            scanned: 2,
            migrated: 2,
            scan_error: Some("connection lost".into()),
            ..Default::default()
        };
        let outcome = DomainOutcome::from_stats("iso", stats, ImporterStats::default());
        assert_eq!(outcome.status, DomainStatus::Failed);
        assert_eq!(outcome.migrated, 2);
        let error = outcome.error.unwrap();
        assert_eq!(error.kind, DomainErrorKind::PipelineFailed);
        assert_eq!(error.message, "connection lost");
    }

    #[test]
    fn test_validation_report_problems() {
        let report = ValidationReport {
            plan_problems: vec![],
            entries: vec![
                EntryCheck {
                    domain: "iso".into(),
                    registered: true,
                    installed: true,
                    problems: vec![],
                },
                EntryCheck {
                    domain: "rpm".into(),
                    registered: false,
                    installed: false,
                    problems: vec!["Domain not supported: rpm".into()],
                },
            ],
        };
        assert!(!report.is_ok());
        assert_eq!(report.problems(), vec!["rpm: Domain not supported: rpm"]);
    }

    #[test]
    fn test_plan_problems_fail_the_report() {
        let report = ValidationReport {
            plan_problems: vec!["plan 'p' has no entries".into()],
            entries: vec![],
        };
        assert!(!report.is_ok());
        assert_eq!(report.problems(), vec!["plan: plan 'p' has no entries"]);
    }

    #[test]
    fn test_status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&RunStatus::ValidationFailed).unwrap(),
            "\"validation_failed\""
        );
        assert_eq!(RunStatus::Partial.to_string(), "partial");
    }
}
