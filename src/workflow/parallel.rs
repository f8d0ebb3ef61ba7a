//! Fan-out of independent inputs over a bounded worker pool.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tracing::debug;

use crate::error::Result;

use super::metrics::ExecutionContext;
use super::Step;

/// Apply a worker step to each input concurrently.
///
/// At most `concurrency` inputs are in flight at once. Outputs come back in
/// input order regardless of completion order.
///
/// ```rust,ignore
/// let fan_out = ParallelMapStep::new(RefinementStep::new(sql_agent), 4);
/// let runs = fan_out.run(questions, &ctx).await?;
/// ```
pub struct ParallelMapStep<Input, Output> {
    worker: Arc<dyn Step<Input, Output>>,
    concurrency: usize,
}

impl<Input, Output> ParallelMapStep<Input, Output>
where
    Input: Send + Sync + 'static,
    Output: Send + Sync + 'static,
{
    pub fn new(worker: impl Step<Input, Output> + 'static, concurrency: usize) -> Self {
        Self {
            worker: Arc::new(worker),
            concurrency: concurrency.max(1),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Run every input and keep each outcome, failures included.
    pub async fn run_settled(
        &self,
        inputs: Vec<Input>,
        ctx: &ExecutionContext,
    ) -> Vec<Result<Output>> {
        debug!(inputs = inputs.len(), concurrency = self.concurrency, "Fanning out");
        let mut indexed = stream::iter(inputs.into_iter().enumerate().map(|(idx, input)| {
            let worker = self.worker.clone();
            let ctx = ctx.clone();
            async move { (idx, worker.run(input, &ctx).await) }
        }))
        .buffer_unordered(self.concurrency)
        .collect::<Vec<_>>()
        .await;

        indexed.sort_by_key(|(idx, _)| *idx);
        indexed.into_iter().map(|(_, result)| result).collect()
    }
}

#[async_trait]
impl<Input, Output> Step<Vec<Input>, Vec<Output>> for ParallelMapStep<Input, Output>
where
    Input: Send + Sync + 'static,
    Output: Send + Sync + 'static,
{
    /// Fails with the first error in input order.
    async fn run(&self, inputs: Vec<Input>, ctx: &ExecutionContext) -> Result<Vec<Output>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        self.run_settled(inputs, ctx).await.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RefineError;
    use crate::workflow::LambdaStep;
    use std::time::Duration;

    #[tokio::test]
    async fn outputs_follow_input_order() {
        let worker = LambdaStep(|ms: u64| async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok::<_, RefineError>(ms * 10)
        });
        let fan_out = ParallelMapStep::new(worker, 3);
        let ctx = ExecutionContext::new();
        let outputs = fan_out.run(vec![30, 5, 15, 0], &ctx).await.unwrap();
        assert_eq!(outputs, vec![300, 50, 150, 0]);
    }

    #[tokio::test]
    async fn settled_keeps_partial_results() {
        let worker = LambdaStep(|n: i32| async move {
            if n < 0 {
                Err(RefineError::Execution(format!("negative: {n}")))
            } else {
                Ok(n + 1)
            }
        });
        let fan_out = ParallelMapStep::new(worker, 0);
        assert_eq!(fan_out.concurrency(), 1);

        let ctx = ExecutionContext::new();
        let settled = fan_out.run_settled(vec![1, -1, 2], &ctx).await;
        assert_eq!(settled.len(), 3);
        assert!(settled[1].is_err());
        assert_eq!(*settled[2].as_ref().unwrap(), 3);

        assert!(fan_out.run(vec![1, -1], &ctx).await.is_err());
    }
}
