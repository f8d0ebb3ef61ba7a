use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::adapters::CallSite;
use crate::controller::RefinementEngine;
use crate::error::Result;
use crate::models::RunResult;

use super::metrics::ExecutionContext;
use super::Step;

/// A call site as a workflow step: task in, [`RunResult`] out.
///
/// Events go to the context's trace and every outcome is counted in its
/// metrics. Sites with per-run state (such as [`crate::adapters::ChartAgent`]'s
/// version counter) should get one step per concurrent run.
pub struct RefinementStep<S: ?Sized> {
    site: Arc<S>,
}

impl<S: CallSite + 'static> RefinementStep<S> {
    pub fn new(site: S) -> Self {
        Self {
            site: Arc::new(site),
        }
    }
}

impl<S: CallSite + ?Sized> RefinementStep<S> {
    pub fn shared(site: Arc<S>) -> Self {
        Self { site }
    }
}

#[async_trait]
impl<S> Step<String, RunResult> for RefinementStep<S>
where
    S: CallSite + ?Sized + 'static,
{
    async fn run(&self, task: String, ctx: &ExecutionContext) -> Result<RunResult> {
        let engine = RefinementEngine::new(self.site.config()).with_observer(ctx.trace().clone());
        self.site.begin_run();
        match engine
            .run(&task, self.site.as_ref(), self.site.as_ref(), self.site.as_ref())
            .await
        {
            Ok(result) => {
                ctx.record_run(&result);
                Ok(result)
            }
            Err(err) => {
                warn!(site = self.site.name(), error = %err, "Refinement step failed");
                ctx.record_failure(format!("{}: {err}", self.site.name()));
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::EssayWriter;
    use crate::events::RefinementEvent;
    use crate::llm::{LlmClient, MockRequest};
    use crate::workflow::ParallelMapStep;

    fn writer() -> EssayWriter {
        let client = LlmClient::mock(|req: MockRequest| {
            let text = req.last_text();
            if text.contains("peer reviewer") {
                Ok("Add a counterargument.".to_string())
            } else if text.contains("Revise the essay") {
                Ok("Revised essay with a counterargument.".to_string())
            } else {
                Ok("First draft.".to_string())
            }
        });
        EssayWriter::with_client(client)
    }

    #[tokio::test]
    async fn runs_are_counted_and_traced() {
        let step = RefinementStep::new(writer()).map(|run: RunResult| run.final_candidate().to_string());
        let ctx = ExecutionContext::new();
        let essay = step.run("urban trees".to_string(), &ctx).await.unwrap();
        assert_eq!(essay, "Revised essay with a counterargument.");

        let metrics = ctx.snapshot();
        assert_eq!(metrics.runs_completed, 1);
        assert_eq!(metrics.iterations_attempted, 2);
        assert!(ctx
            .trace_snapshot()
            .iter()
            .any(|e| matches!(e.event, RefinementEvent::RunFinished { .. })));
    }

    #[tokio::test]
    async fn fan_out_over_topics() {
        let fan_out = ParallelMapStep::new(RefinementStep::new(writer()), 2);
        let ctx = ExecutionContext::new();
        let topics = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let runs = fan_out.run(topics, &ctx).await.unwrap();
        assert_eq!(runs.len(), 3);
        assert_eq!(ctx.snapshot().runs_completed, 3);
        assert_eq!(ctx.snapshot().stop_reasons["max_iterations_reached"], 3);
    }
}
