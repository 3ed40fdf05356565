//! Progress and result reporting
//!
//! Pure accounting for export/import/delete runs: a coarse percentage while
//! the run is in flight, and per-entity-type outcome counts once it's done.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::info;

use crate::models::{BatchFailure, EntityType};

/// Which flow a report describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    Export,
    Import,
    Delete,
}

impl std::fmt::Display for RunKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Export => write!(f, "export"),
            Self::Import => write!(f, "import"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// A progress notification
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressUpdate {
    pub kind: RunKind,
    /// Entity type being worked on, if any
    pub entity_type: Option<EntityType>,
    pub message: String,
    pub steps_completed: usize,
    pub total_steps: usize,
    pub percent: f64,
}

/// Receives progress notifications during a run
pub trait ProgressSink: Send + Sync {
    fn update(&self, update: &ProgressUpdate);
}

/// Closures work as sinks, e.g. `&|u: &ProgressUpdate| println!("{}", u.percent)`
impl<F> ProgressSink for F
where
    F: Fn(&ProgressUpdate) + Send + Sync,
{
    fn update(&self, update: &ProgressUpdate) {
        self(update)
    }
}

/// Boxed progress callback
pub type ProgressCallback = Box<dyn Fn(&ProgressUpdate) + Send + Sync>;

/// Discards every update
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn update(&self, _update: &ProgressUpdate) {}
}

/// Logs every update at info level
#[derive(Debug, Clone, Copy, Default)]
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn update(&self, update: &ProgressUpdate) {
        info!(
            kind = %update.kind,
            entity_type = update.entity_type.map(|t| t.as_str()),
            "[{:>3.0}%] {}",
            update.percent,
            update.message
        );
    }
}

/// Tracks completed steps and forwards updates to a sink
pub struct ProgressTracker<'a> {
    kind: RunKind,
    total_steps: usize,
    steps_completed: usize,
    sink: &'a dyn ProgressSink,
}

impl<'a> ProgressTracker<'a> {
    pub fn new(kind: RunKind, total_steps: usize, sink: &'a dyn ProgressSink) -> Self {
        Self {
            kind,
            total_steps,
            steps_completed: 0,
            sink,
        }
    }

    /// Percentage complete; a run with no steps is complete
    pub fn percent(&self) -> f64 {
        if self.total_steps == 0 {
            return 100.0;
        }
        let completed = self.steps_completed.min(self.total_steps);
        completed as f64 / self.total_steps as f64 * 100.0
    }

    pub fn steps_completed(&self) -> usize {
        self.steps_completed
    }

    /// Announce work without completing a step
    pub fn report(&self, entity_type: Option<EntityType>, message: impl Into<String>) {
        self.sink.update(&ProgressUpdate {
            kind: self.kind,
            entity_type,
            message: message.into(),
            steps_completed: self.steps_completed,
            total_steps: self.total_steps,
            percent: self.percent(),
        });
    }

    /// Complete one step and announce it
    pub fn advance(&mut self, entity_type: Option<EntityType>, message: impl Into<String>) {
        self.steps_completed += 1;
        self.report(entity_type, message);
    }
}

/// Outcome counts for one entity type
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TypeOutcome {
    pub requested: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<BatchFailure>,
}

impl TypeOutcome {
    /// Record the failures of a batch call
    pub fn record_failures(&mut self, failures: &[BatchFailure]) {
        self.failed += failures.len();
        self.failures.extend_from_slice(failures);
    }
}

/// Final report of a run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub kind: RunKind,
    pub outcomes: BTreeMap<EntityType, TypeOutcome>,
    pub elapsed_ms: u64,
}

impl RunReport {
    pub fn new(kind: RunKind) -> Self {
        Self {
            kind,
            outcomes: BTreeMap::new(),
            elapsed_ms: 0,
        }
    }

    /// Outcome entry for a type, created on first use
    pub fn outcome_mut(&mut self, entity_type: EntityType) -> &mut TypeOutcome {
        self.outcomes.entry(entity_type).or_default()
    }

    pub fn outcome(&self, entity_type: EntityType) -> Option<&TypeOutcome> {
        self.outcomes.get(&entity_type)
    }

    pub fn total_succeeded(&self) -> usize {
        self.outcomes.values().map(|o| o.succeeded).sum()
    }

    pub fn total_failed(&self) -> usize {
        self.outcomes.values().map(|o| o.failed).sum()
    }

    pub fn total_skipped(&self) -> usize {
        self.outcomes.values().map(|o| o.skipped).sum()
    }

    pub fn has_failures(&self) -> bool {
        self.total_failed() > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_percent_with_no_steps() {
        let tracker = ProgressTracker::new(RunKind::Import, 0, &NoopProgress);
        assert_eq!(tracker.percent(), 100.0);
    }

    #[test]
    fn test_tracker_forwards_updates() {
        let seen = Mutex::new(Vec::new());
        let sink = |u: &ProgressUpdate| seen.lock().unwrap().push(u.percent);
        let mut tracker = ProgressTracker::new(RunKind::Export, 4, &sink);

        tracker.report(Some(EntityType::Bank), "Fetching banks");
        tracker.advance(Some(EntityType::Bank), "Fetched banks");
        tracker.advance(Some(EntityType::Account), "Fetched accounts");

        assert_eq!(*seen.lock().unwrap(), vec![0.0, 25.0, 50.0]);
    }

    #[test]
    fn test_percent_caps_at_100() {
        let mut tracker = ProgressTracker::new(RunKind::Delete, 1, &NoopProgress);
        tracker.advance(None, "one");
        tracker.advance(None, "two");
        assert_eq!(tracker.percent(), 100.0);
    }

    #[test]
    fn test_report_totals() {
        let mut report = RunReport::new(RunKind::Delete);
        report.outcome_mut(EntityType::Bank).succeeded = 2;
        report
            .outcome_mut(EntityType::Asset)
            .record_failures(&[BatchFailure::for_id(4, "not found")]);
        report.outcome_mut(EntityType::Transaction).skipped = 3;

        assert_eq!(report.total_succeeded(), 2);
        assert_eq!(report.total_failed(), 1);
        assert_eq!(report.total_skipped(), 3);
        assert!(report.has_failures());
        assert_eq!(report.outcome(EntityType::Asset).unwrap().failures.len(), 1);
    }
}
