use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;

use super::metrics::ExecutionContext;
use super::Step;

/// Two steps run back to back; created by [`Step::then`].
pub struct ChainStep<I, M, O> {
    first: Arc<dyn Step<I, M>>,
    second: Arc<dyn Step<M, O>>,
}

impl<I, M, O> ChainStep<I, M, O>
where
    I: Send + Sync + 'static,
    M: Send + Sync + 'static,
    O: Send + Sync + 'static,
{
    pub fn new(first: impl Step<I, M> + 'static, second: impl Step<M, O> + 'static) -> Self {
        Self {
            first: Arc::new(first),
            second: Arc::new(second),
        }
    }
}

#[async_trait]
impl<I, M, O> Step<I, O> for ChainStep<I, M, O>
where
    I: Send + Sync + 'static,
    M: Send + Sync + 'static,
    O: Send + Sync + 'static,
{
    async fn run(&self, input: I, ctx: &ExecutionContext) -> Result<O> {
        let intermediate = self.first.run(input, ctx).await?;
        self.second.run(intermediate, ctx).await
    }
}
