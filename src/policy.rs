//! Convergence policy: decides, from the history alone, whether a run continues.
//!
//! Rules are checked in a fixed order and the first match wins:
//!
//! 1. fewer attempts than `min_iterations` always continues;
//! 2. `max_iterations` reached stops;
//! 3. success stop (opt-in) when the latest attempt ran cleanly with output;
//! 4. identical candidate to the previous attempt (convergence, opt-in);
//! 5. empty critique on a refined attempt (convergence, opt-in);
//! 6. regression: the latest attempt failed where the previous one worked.

use serde::{Deserialize, Serialize};

use crate::config::RefinementConfig;
use crate::models::{IterationRecord, StopReason};

/// Outcome of one policy consultation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    Continue,
    Stop(StopReason),
}

impl Decision {
    pub fn is_stop(&self) -> bool {
        matches!(self, Self::Stop(_))
    }
}

/// Pure decision function over the iteration history.
pub fn decide(history: &[IterationRecord], config: &RefinementConfig) -> Decision {
    let Some(latest) = history.last() else {
        return Decision::Continue;
    };
    let attempts = history.len();

    if attempts < config.min_iterations {
        return Decision::Continue;
    }

    if attempts >= config.max_iterations {
        return Decision::Stop(StopReason::MaxIterationsReached);
    }

    if config.stop_on_success && latest.has_output() {
        return Decision::Stop(StopReason::Success);
    }

    let previous = attempts
        .checked_sub(2)
        .and_then(|idx| history.get(idx));

    if let Some(previous) = previous {
        if config.stop_on_convergence {
            if latest.candidate.trim() == previous.candidate.trim() {
                return Decision::Stop(StopReason::ConvergedIdentical);
            }
            if latest.feedback_is_blank() {
                return Decision::Stop(StopReason::NoFeedbackSatisfied);
            }
        }

        if !latest.succeeded && previous.succeeded {
            return Decision::Stop(StopReason::RegressionDetected);
        }
    }

    Decision::Continue
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Execution;

    fn ok(index: usize, candidate: &str, feedback: Option<&str>) -> IterationRecord {
        IterationRecord::new(
            index,
            candidate.to_string(),
            feedback.map(str::to_string),
            Execution::success(format!("artifact_{index}")),
        )
    }

    fn failed(index: usize, candidate: &str, feedback: Option<&str>) -> IterationRecord {
        IterationRecord::new(
            index,
            candidate.to_string(),
            feedback.map(str::to_string),
            Execution::failure("no such column: totl"),
        )
    }

    fn chart_config(max: usize) -> RefinementConfig {
        RefinementConfig::chart().with_max_iterations(max)
    }

    #[test]
    fn empty_history_continues() {
        assert_eq!(decide(&[], &RefinementConfig::default()), Decision::Continue);
    }

    #[test]
    fn single_iteration_budget_stops_immediately() {
        let config = chart_config(1);
        assert_eq!(
            decide(&[ok(1, "a", None)], &config),
            Decision::Stop(StopReason::MaxIterationsReached)
        );
    }

    #[test]
    fn first_iteration_without_feedback_is_not_convergence() {
        let config = chart_config(3);
        assert_eq!(decide(&[ok(1, "a", None)], &config), Decision::Continue);
    }

    #[test]
    fn identical_candidates_stop_even_with_feedback() {
        let config = chart_config(5);
        let history = [ok(1, "plot()", None), ok(2, "  plot()\n", Some("Looks fine."))];
        assert_eq!(
            decide(&history, &config),
            Decision::Stop(StopReason::ConvergedIdentical)
        );
    }

    #[test]
    fn blank_feedback_stops_when_convergence_enabled() {
        let config = chart_config(5);
        let history = [ok(1, "a", None), ok(2, "b", Some("   "))];
        assert_eq!(
            decide(&history, &config),
            Decision::Stop(StopReason::NoFeedbackSatisfied)
        );

        let config = config.with_stop_on_convergence(false);
        assert_eq!(decide(&history, &config), Decision::Continue);
    }

    #[test]
    fn regression_stops() {
        let config = chart_config(5);
        let history = [ok(1, "a", None), failed(2, "b", Some("use a log scale"))];
        assert_eq!(
            decide(&history, &config),
            Decision::Stop(StopReason::RegressionDetected)
        );
    }

    #[test]
    fn repeated_failure_is_not_regression() {
        let config = chart_config(5);
        let history = [failed(1, "a", None), failed(2, "b", Some("fix the column"))];
        assert_eq!(decide(&history, &config), Decision::Continue);
    }

    #[test]
    fn success_stop_only_when_enabled() {
        let history = [ok(1, "SELECT 1", None)];
        assert_eq!(
            decide(&history, &RefinementConfig::sql()),
            Decision::Stop(StopReason::Success)
        );
        assert_eq!(decide(&history, &chart_config(3)), Decision::Continue);
    }

    #[test]
    fn success_requires_output() {
        let empty = IterationRecord::new(1, "SELECT 1".into(), None, Execution::empty());
        assert_eq!(decide(&[empty], &RefinementConfig::sql()), Decision::Continue);
    }

    #[test]
    fn min_iterations_override_every_early_stop() {
        let config = RefinementConfig::sql()
            .with_max_iterations(3)
            .with_min_iterations(3);
        let history = [ok(1, "a", None), ok(2, "a", Some(""))];
        assert_eq!(decide(&history, &config), Decision::Continue);

        let history = [ok(1, "a", None), ok(2, "a", Some("")), ok(3, "a", None)];
        assert_eq!(
            decide(&history, &config),
            Decision::Stop(StopReason::MaxIterationsReached)
        );
    }

    #[test]
    fn max_iterations_outranks_success() {
        let config = RefinementConfig::sql().with_max_iterations(1);
        assert_eq!(
            decide(&[ok(1, "SELECT 1", None)], &config),
            Decision::Stop(StopReason::MaxIterationsReached)
        );
    }
}
