//! The refinement loop controller.
//!
//! The controller drives `produce -> execute -> decide -> (evaluate -> produce ...)`
//! and accumulates an [`IterationRecord`] per attempt. It performs no I/O of its
//! own: every model call, code execution or query goes through the injected
//! [`Producer`], [`Executor`] and [`Evaluator`].
//!
//! Failure handling:
//! - a producer failure on the first attempt fails the whole run;
//! - a producer failure later stops the run with [`StopReason::ProducerExhausted`];
//! - an evaluator failure is downgraded to empty feedback;
//! - execution failures are recorded on the iteration and judged by the policy.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, instrument, warn, Span};
use uuid::Uuid;

use crate::{
    config::RefinementConfig,
    error::{RefineError, Result},
    events::{RefinementEvent, RefinementObserver},
    models::{Execution, IterationRecord, RunResult, StopReason},
    policy::{decide, Decision},
};

/// Produces candidates: the initial one from the task alone, later ones from
/// the previous candidate plus its critique.
#[async_trait]
pub trait Producer: Send + Sync {
    async fn produce(
        &self,
        task: &str,
        prior_candidate: Option<&str>,
        feedback: Option<&str>,
    ) -> Result<String>;
}

/// Executes or renders a candidate. Never fails: problems are reported in the
/// returned [`Execution`].
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, candidate: &str) -> Execution;
}

/// Critiques the latest attempt (its candidate plus artifact or error text).
///
/// An `Err` is treated by the controller exactly like an empty critique.
#[async_trait]
pub trait Evaluator: Send + Sync {
    async fn evaluate(&self, task: &str, latest: &IterationRecord) -> Result<String>;
}

/// Owned view of a producer call, handed to [`LambdaProducer`] closures.
#[derive(Debug, Clone)]
pub struct ProduceRequest {
    pub task: String,
    pub prior_candidate: Option<String>,
    pub feedback: Option<String>,
}

/// Turn an async closure into a [`Producer`].
///
/// ```rust,ignore
/// let producer = LambdaProducer(|req: ProduceRequest| async move {
///     Ok(format!("draft for {}", req.task))
/// });
/// ```
pub struct LambdaProducer<F>(pub F);

#[async_trait]
impl<F, Fut> Producer for LambdaProducer<F>
where
    F: Fn(ProduceRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<String>> + Send,
{
    async fn produce(
        &self,
        task: &str,
        prior_candidate: Option<&str>,
        feedback: Option<&str>,
    ) -> Result<String> {
        (self.0)(ProduceRequest {
            task: task.to_string(),
            prior_candidate: prior_candidate.map(str::to_string),
            feedback: feedback.map(str::to_string),
        })
        .await
    }
}

/// Turn an async closure over the candidate text into an [`Executor`].
pub struct LambdaExecutor<F>(pub F);

#[async_trait]
impl<F, Fut> Executor for LambdaExecutor<F>
where
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = Execution> + Send,
{
    async fn execute(&self, candidate: &str) -> Execution {
        (self.0)(candidate.to_string()).await
    }
}

/// Turn an async closure over `(task, latest attempt)` into an [`Evaluator`].
pub struct LambdaEvaluator<F>(pub F);

#[async_trait]
impl<F, Fut> Evaluator for LambdaEvaluator<F>
where
    F: Fn(String, IterationRecord) -> Fut + Send + Sync,
    Fut: Future<Output = Result<String>> + Send,
{
    async fn evaluate(&self, task: &str, latest: &IterationRecord) -> Result<String> {
        (self.0)(task.to_string(), latest.clone()).await
    }
}

/// Runs refinement loops under a fixed [`RefinementConfig`].
///
/// The engine holds no per-run state, so one engine may drive any number of
/// concurrent runs.
#[derive(Clone, Default)]
pub struct RefinementEngine {
    config: RefinementConfig,
    observer: Option<Arc<dyn RefinementObserver>>,
}

impl RefinementEngine {
    pub fn new(config: RefinementConfig) -> Self {
        Self {
            config,
            observer: None,
        }
    }

    /// Attach a progress observer.
    pub fn with_observer(mut self, observer: impl RefinementObserver + 'static) -> Self {
        self.observer = Some(Arc::new(observer));
        self
    }

    pub fn with_shared_observer(mut self, observer: Arc<dyn RefinementObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn config(&self) -> &RefinementConfig {
        &self.config
    }

    /// Drive one refinement run to completion.
    #[instrument(skip_all, fields(run_id = tracing::field::Empty, max_iterations = self.config.max_iterations))]
    pub async fn run<P, X, E>(
        &self,
        task: &str,
        producer: &P,
        executor: &X,
        evaluator: &E,
    ) -> Result<RunResult>
    where
        P: Producer + ?Sized,
        X: Executor + ?Sized,
        E: Evaluator + ?Sized,
    {
        self.config.validate()?;

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        Span::current().record("run_id", tracing::field::display(run_id));
        info!("Starting refinement run");
        self.emit(RefinementEvent::RunStarted {
            run_id,
            max_iterations: self.config.max_iterations,
        });

        let initial = producer.produce(task, None, None).await.map_err(|err| {
            warn!(error = %err, "Initial candidate could not be produced");
            self.emit(RefinementEvent::ProducerFailed {
                index: 1,
                message: err.to_string(),
            });
            match err {
                RefineError::Producer(_) => err,
                other => RefineError::producer(other),
            }
        })?;

        let mut history = vec![self.attempt(1, initial, None, executor).await];

        let stop_reason = loop {
            let attempts = history.len();
            let decision = decide(&history, &self.config);
            self.emit(RefinementEvent::Decided {
                index: attempts,
                decision,
            });
            if let Decision::Stop(reason) = decision {
                break reason;
            }
            if attempts >= self.config.max_iterations {
                break StopReason::MaxIterationsReached;
            }

            let latest = &history[attempts - 1];
            let feedback = match evaluator.evaluate(task, latest).await {
                Ok(feedback) => feedback,
                Err(err) => {
                    warn!(iteration = attempts, error = %err, "Evaluator failed; treating feedback as empty");
                    self.emit(RefinementEvent::EvaluatorFailed {
                        index: attempts,
                        message: err.to_string(),
                    });
                    String::new()
                }
            };
            debug!(iteration = attempts, feedback_len = feedback.len(), "Received feedback");
            self.emit(RefinementEvent::FeedbackReceived {
                index: attempts,
                feedback: feedback.clone(),
            });

            let next_index = attempts + 1;
            let candidate = match producer
                .produce(task, Some(&latest.candidate), Some(&feedback))
                .await
            {
                Ok(candidate) => candidate,
                Err(err) => {
                    warn!(iteration = next_index, error = %err, "Producer exhausted; keeping best candidate so far");
                    self.emit(RefinementEvent::ProducerFailed {
                        index: next_index,
                        message: err.to_string(),
                    });
                    break StopReason::ProducerExhausted;
                }
            };

            let record = self
                .attempt(next_index, candidate, Some(feedback), executor)
                .await;
            history.push(record);
        };

        let result = RunResult::finish(run_id, history, stop_reason, started_at);
        info!(
            stop_reason = %result.stop_reason,
            iterations = result.len(),
            best_index = result.best_index,
            "Refinement run finished"
        );
        self.emit(RefinementEvent::RunFinished {
            run_id,
            stop_reason: result.stop_reason,
            best_index: result.best_index,
            iterations: result.len(),
        });
        Ok(result)
    }

    async fn attempt<X>(
        &self,
        index: usize,
        candidate: String,
        feedback: Option<String>,
        executor: &X,
    ) -> IterationRecord
    where
        X: Executor + ?Sized,
    {
        let fingerprint = crate::models::fingerprint(&candidate);
        debug!(iteration = index, candidate = %fingerprint, "Produced candidate");
        self.emit(RefinementEvent::CandidateProduced { index, fingerprint });

        let execution = executor.execute(&candidate).await;
        match &execution.error {
            Some(error) if !execution.succeeded => {
                warn!(iteration = index, error = %error, "Candidate execution failed");
            }
            _ => debug!(iteration = index, artifact = ?execution.artifact_ref, "Candidate executed"),
        }
        self.emit(RefinementEvent::Executed {
            index,
            succeeded: execution.succeeded,
            artifact_ref: execution.artifact_ref.clone(),
            error: execution.error.clone(),
        });

        IterationRecord::new(index, candidate, feedback, execution)
    }

    fn emit(&self, event: RefinementEvent) {
        if let Some(observer) = &self.observer {
            observer.on_event(&event);
        }
    }
}

/// One-shot form of [`RefinementEngine::run`].
pub async fn run_refinement<P, X, E>(
    task: &str,
    producer: &P,
    executor: &X,
    evaluator: &E,
    config: RefinementConfig,
) -> Result<RunResult>
where
    P: Producer + ?Sized,
    X: Executor + ?Sized,
    E: Evaluator + ?Sized,
{
    RefinementEngine::new(config)
        .run(task, producer, executor, evaluator)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::TraceLog;

    #[tokio::test]
    async fn lambdas_drive_a_run() {
        let producer = LambdaProducer(|req: ProduceRequest| async move {
            Ok::<_, RefineError>(match req.feedback {
                None => format!("draft: {}", req.task),
                Some(feedback) => format!("revised ({feedback})"),
            })
        });
        let executor = LambdaExecutor(|candidate: String| async move {
            Execution::success(format!("{} chars", candidate.len()))
        });
        let evaluator = LambdaEvaluator(|_task: String, latest: IterationRecord| async move {
            Ok::<_, RefineError>(format!("tighten iteration {}", latest.index))
        });

        let result = run_refinement(
            "rust ownership",
            &producer,
            &executor,
            &evaluator,
            RefinementConfig::essay(),
        )
        .await
        .unwrap();

        assert_eq!(result.len(), 2);
        assert_eq!(result.stop_reason, StopReason::MaxIterationsReached);
        assert_eq!(result.final_candidate(), "revised (tighten iteration 1)");
        assert_eq!(result.history[1].feedback.as_deref(), Some("tighten iteration 1"));
    }

    #[tokio::test]
    async fn invalid_config_is_rejected_before_any_call() {
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = calls.clone();
        let producer = LambdaProducer(move |_req: ProduceRequest| {
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async move { Ok::<_, RefineError>("draft".to_string()) }
        });
        let executor = LambdaExecutor(|_c: String| async move { Execution::empty() });
        let evaluator = LambdaEvaluator(|_t: String, _r: IterationRecord| async move {
            Ok::<_, RefineError>(String::new())
        });

        let config = RefinementConfig::default().with_max_iterations(0);
        let err = run_refinement("task", &producer, &executor, &evaluator, config)
            .await
            .unwrap_err();
        assert!(matches!(err, RefineError::Config(_)));
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn observer_sees_run_lifecycle() {
        let log = TraceLog::new();
        let engine = RefinementEngine::new(RefinementConfig::sql()).with_observer(log.clone());
        let producer =
            LambdaProducer(|_req: ProduceRequest| async move { Ok::<_, RefineError>("SELECT 1".to_string()) });
        let executor = LambdaExecutor(|_c: String| async move { Execution::success("1 row") });
        let evaluator = LambdaEvaluator(|_t: String, _r: IterationRecord| async move {
            Ok::<_, RefineError>(String::new())
        });

        let result = engine
            .run("one", &producer, &executor, &evaluator)
            .await
            .unwrap();
        assert_eq!(result.stop_reason, StopReason::Success);

        let events = log.events();
        assert!(matches!(events.first(), Some(RefinementEvent::RunStarted { .. })));
        assert!(matches!(
            events.last(),
            Some(RefinementEvent::RunFinished {
                stop_reason: StopReason::Success,
                iterations: 1,
                ..
            })
        ));
        assert!(!events
            .iter()
            .any(|e| matches!(e, RefinementEvent::FeedbackReceived { .. })));
    }
}
