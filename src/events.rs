//! Progress notifications emitted while a refinement run is in flight.
//!
//! Events are for human observability only; the authoritative outcome is
//! always the returned [`crate::RunResult`].

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::models::StopReason;
use crate::policy::Decision;

/// A structured progress event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RefinementEvent {
    RunStarted {
        run_id: Uuid,
        max_iterations: usize,
    },
    CandidateProduced {
        index: usize,
        fingerprint: String,
    },
    Executed {
        index: usize,
        succeeded: bool,
        artifact_ref: Option<String>,
        error: Option<String>,
    },
    /// Critique of iteration `index` arrived (possibly empty).
    FeedbackReceived {
        index: usize,
        feedback: String,
    },
    EvaluatorFailed {
        index: usize,
        message: String,
    },
    ProducerFailed {
        index: usize,
        message: String,
    },
    Decided {
        index: usize,
        decision: Decision,
    },
    RunFinished {
        run_id: Uuid,
        stop_reason: StopReason,
        best_index: usize,
        iterations: usize,
    },
}

/// Receiver of [`RefinementEvent`]s.
pub trait RefinementObserver: Send + Sync {
    fn on_event(&self, event: &RefinementEvent);
}

impl<F> RefinementObserver for F
where
    F: Fn(&RefinementEvent) + Send + Sync,
{
    fn on_event(&self, event: &RefinementEvent) {
        self(event)
    }
}

/// A timestamped event.
#[derive(Debug, Clone, Serialize)]
pub struct TraceEntry {
    pub timestamp: DateTime<Utc>,
    pub event: RefinementEvent,
}

impl TraceEntry {
    pub fn new(event: RefinementEvent) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
        }
    }
}

/// Observer that keeps every event in memory. Cheap to clone; clones share the log.
#[derive(Debug, Clone, Default)]
pub struct TraceLog {
    entries: Arc<Mutex<Vec<TraceEntry>>>,
}

impl TraceLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every entry recorded so far.
    pub fn snapshot(&self) -> Vec<TraceEntry> {
        self.lock().clone()
    }

    /// Events only, in emission order.
    pub fn events(&self) -> Vec<RefinementEvent> {
        self.lock().iter().map(|e| e.event.clone()).collect()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, Vec<TraceEntry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl RefinementObserver for TraceLog {
    fn on_event(&self, event: &RefinementEvent) {
        self.lock().push(TraceEntry::new(event.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn trace_log_clones_share_entries() {
        let log = TraceLog::new();
        let handle = log.clone();
        handle.on_event(&RefinementEvent::CandidateProduced {
            index: 1,
            fingerprint: "abc".into(),
        });
        assert_eq!(log.snapshot().len(), 1);
        log.clear();
        assert!(handle.events().is_empty());
    }

    #[test]
    fn closures_are_observers() {
        let seen = AtomicUsize::new(0);
        let observer = |_: &RefinementEvent| {
            seen.fetch_add(1, Ordering::SeqCst);
        };
        observer.on_event(&RefinementEvent::EvaluatorFailed {
            index: 1,
            message: "timeout".into(),
        });
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let value = serde_json::to_value(RefinementEvent::Decided {
            index: 2,
            decision: Decision::Stop(StopReason::Success),
        })
        .unwrap();
        assert_eq!(value["type"], "decided");
        assert_eq!(value["index"], 2);
    }
}
