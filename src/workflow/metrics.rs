//! Shared counters and traces for a workflow spanning many refinement runs.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;

use crate::events::{TraceEntry, TraceLog};
use crate::models::RunResult;

/// Aggregated statistics across the runs of one workflow.
#[derive(Debug, Default, Clone, Serialize)]
pub struct WorkflowMetrics {
    pub runs_completed: usize,
    /// Attempts across all completed runs.
    pub iterations_attempted: usize,
    /// Runs whose selected iteration executed cleanly.
    pub runs_succeeded: usize,
    /// How often each stop reason ended a run, keyed by its snake_case name.
    pub stop_reasons: BTreeMap<String, usize>,
    pub failures: Vec<String>,
}

impl WorkflowMetrics {
    pub fn record_run(&mut self, result: &RunResult) {
        self.runs_completed += 1;
        self.iterations_attempted += result.len();
        if result.succeeded() {
            self.runs_succeeded += 1;
        }
        *self
            .stop_reasons
            .entry(result.stop_reason.as_str().to_string())
            .or_default() += 1;
    }

    pub fn record_failure(&mut self, error: String) {
        self.failures.push(error);
    }

    /// Mean attempts per completed run.
    pub fn mean_iterations(&self) -> f64 {
        if self.runs_completed == 0 {
            return 0.0;
        }
        self.iterations_attempted as f64 / self.runs_completed as f64
    }
}

/// Context passed to every step.
///
/// Cloneable and thread-safe; clones share the same metrics and trace, so it
/// can be handed to parallel workers.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    metrics: Arc<Mutex<WorkflowMetrics>>,
    trace: TraceLog,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_run(&self, result: &RunResult) {
        self.lock().record_run(result);
    }

    pub fn record_failure(&self, error: impl Into<String>) {
        self.lock().record_failure(error.into());
    }

    pub fn snapshot(&self) -> WorkflowMetrics {
        self.lock().clone()
    }

    /// Observer that refinement steps attach to their engines.
    pub fn trace(&self) -> &TraceLog {
        &self.trace
    }

    pub fn trace_snapshot(&self) -> Vec<TraceEntry> {
        self.trace.snapshot()
    }

    fn lock(&self) -> MutexGuard<'_, WorkflowMetrics> {
        self.metrics.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Execution, IterationRecord, StopReason};
    use chrono::Utc;
    use uuid::Uuid;

    fn run(stop_reason: StopReason, attempts: usize) -> RunResult {
        let history = (1..=attempts)
            .map(|i| IterationRecord::new(i, format!("c{i}"), None, Execution::success("ok")))
            .collect();
        RunResult::finish(Uuid::new_v4(), history, stop_reason, Utc::now())
    }

    #[test]
    fn clones_share_metrics() {
        let ctx = ExecutionContext::new();
        let worker = ctx.clone();
        worker.record_run(&run(StopReason::Success, 1));
        worker.record_run(&run(StopReason::MaxIterationsReached, 3));
        ctx.record_failure("producer down");

        let metrics = ctx.snapshot();
        assert_eq!(metrics.runs_completed, 2);
        assert_eq!(metrics.iterations_attempted, 4);
        assert_eq!(metrics.runs_succeeded, 2);
        assert_eq!(metrics.stop_reasons["success"], 1);
        assert_eq!(metrics.stop_reasons["max_iterations_reached"], 1);
        assert_eq!(metrics.failures, vec!["producer down".to_string()]);
        assert!((metrics.mean_iterations() - 2.0).abs() < f64::EPSILON);
    }
}
