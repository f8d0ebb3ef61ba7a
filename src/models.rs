use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// What happened when a candidate was executed or rendered.
///
/// Executors never fail past their boundary: every problem is reported as
/// `succeeded == false` with an error description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Execution {
    pub succeeded: bool,
    /// Reference to the produced side effect (image path, result preview, ...).
    pub artifact_ref: Option<String>,
    pub error: Option<String>,
}

impl Execution {
    /// Clean execution that produced the given artifact.
    pub fn success(artifact_ref: impl Into<String>) -> Self {
        Self {
            succeeded: true,
            artifact_ref: Some(artifact_ref.into()),
            error: None,
        }
    }

    /// Clean execution with nothing to show for it (e.g. a query returning no rows).
    pub fn empty() -> Self {
        Self {
            succeeded: true,
            artifact_ref: None,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            artifact_ref: None,
            error: Some(error.into()),
        }
    }
}

/// One attempt within a refinement run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    /// 1-based position in the attempt sequence.
    pub index: usize,
    pub candidate: String,
    pub artifact_ref: Option<String>,
    /// Critique that led to this candidate; `None` for the initial generation.
    pub feedback: Option<String>,
    pub succeeded: bool,
    pub error: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl IterationRecord {
    pub fn new(
        index: usize,
        candidate: String,
        feedback: Option<String>,
        execution: Execution,
    ) -> Self {
        Self {
            index,
            candidate,
            artifact_ref: execution.artifact_ref,
            feedback,
            succeeded: execution.succeeded,
            error: execution.error,
            recorded_at: Utc::now(),
        }
    }

    /// True when execution succeeded and left a non-blank artifact behind.
    pub fn has_output(&self) -> bool {
        self.succeeded
            && self
                .artifact_ref
                .as_deref()
                .is_some_and(|a| !a.trim().is_empty())
    }

    /// True when the feedback is missing or whitespace-only.
    pub fn feedback_is_blank(&self) -> bool {
        self.feedback.as_deref().is_none_or(|f| f.trim().is_empty())
    }

    /// Short content hash of the candidate, used to log candidates without dumping them.
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.candidate)
    }
}

pub(crate) fn fingerprint(text: &str) -> String {
    let digest = Sha256::digest(text.trim().as_bytes());
    digest.iter().take(6).map(|b| format!("{b:02x}")).collect()
}

/// Why a refinement run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    MaxIterationsReached,
    Success,
    ConvergedIdentical,
    NoFeedbackSatisfied,
    RegressionDetected,
    ProducerExhausted,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MaxIterationsReached => "max_iterations_reached",
            Self::Success => "success",
            Self::ConvergedIdentical => "converged_identical",
            Self::NoFeedbackSatisfied => "no_feedback_satisfied",
            Self::RegressionDetected => "regression_detected",
            Self::ProducerExhausted => "producer_exhausted",
        }
    }

    /// Human-readable explanation, as printed by the reporting helpers.
    pub fn describe(&self) -> &'static str {
        match self {
            Self::MaxIterationsReached => "reached the iteration limit",
            Self::Success => "candidate executed successfully with output",
            Self::ConvergedIdentical => "candidate identical to the previous one",
            Self::NoFeedbackSatisfied => "critic returned no feedback",
            Self::RegressionDetected => "refinement broke a working candidate",
            Self::ProducerExhausted => "no further candidate could be produced",
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PartialEq<&str> for StopReason {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

/// Outcome of a complete refinement run. Owned entirely by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: Uuid,
    pub history: Vec<IterationRecord>,
    pub stop_reason: StopReason,
    /// Position in `history` of the selected answer (0-based).
    pub best_index: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunResult {
    pub(crate) fn finish(
        run_id: Uuid,
        history: Vec<IterationRecord>,
        stop_reason: StopReason,
        started_at: DateTime<Utc>,
    ) -> Self {
        let best_index = select_best_index(&history);
        Self {
            run_id,
            history,
            stop_reason,
            best_index,
            started_at,
            finished_at: Utc::now(),
        }
    }

    /// The selected iteration.
    pub fn best(&self) -> &IterationRecord {
        &self.history[self.best_index]
    }

    /// The selected candidate payload.
    pub fn final_candidate(&self) -> &str {
        &self.best().candidate
    }

    /// Whether the selected iteration executed cleanly.
    pub fn succeeded(&self) -> bool {
        self.best().succeeded
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Plain-text transcript: per-iteration feedback, the chosen answer and why the loop stopped.
    pub fn report(&self) -> String {
        let mut out = String::new();
        for record in &self.history {
            let status = if record.succeeded { "ok" } else { "failed" };
            out.push_str(&format!("== Iteration {} [{status}] ==\n", record.index));
            if let Some(feedback) = record.feedback.as_deref().filter(|f| !f.trim().is_empty()) {
                out.push_str("Feedback:\n");
                out.push_str(feedback.trim());
                out.push('\n');
            }
            if let Some(error) = &record.error {
                out.push_str(&format!("Error: {error}\n"));
            }
            if let Some(artifact) = &record.artifact_ref {
                out.push_str(&format!("Artifact: {artifact}\n"));
            }
        }
        out.push_str(&format!(
            "\nStopped after {} iteration(s): {} ({})\n",
            self.len(),
            self.stop_reason.describe(),
            self.stop_reason
        ));
        out.push_str(&format!("Selected iteration {}:\n", self.best().index));
        out.push_str(self.final_candidate().trim());
        out.push('\n');
        out
    }
}

/// Most recent successful iteration, falling back to the last attempt.
pub(crate) fn select_best_index(history: &[IterationRecord]) -> usize {
    history
        .iter()
        .rposition(|r| r.succeeded)
        .unwrap_or_else(|| history.len().saturating_sub(1))
}
