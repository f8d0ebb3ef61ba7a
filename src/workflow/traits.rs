//! Core workflow traits and primitives.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;

use super::chain::ChainStep;
use super::metrics::ExecutionContext;

/// A unit of asynchronous work that transforms an input into an output.
///
/// Steps compose with [`Step::then`] and [`Step::map`]:
///
/// ```rust,ignore
/// let pipeline = RefinementStep::new(sql_agent)
///     .map(|run| run.final_candidate().to_string());
/// let ctx = ExecutionContext::new();
/// let query = pipeline.run("Top five customers by revenue".into(), &ctx).await?;
/// ```
#[async_trait]
pub trait Step<Input, Output>: Send + Sync {
    async fn run(&self, input: Input, ctx: &ExecutionContext) -> Result<Output>;

    /// Feed this step's output into `next`.
    fn then<NextOut, S>(self, next: S) -> ChainStep<Input, Output, NextOut>
    where
        Self: Sized + 'static,
        Input: Send + Sync + 'static,
        Output: Send + Sync + 'static,
        NextOut: Send + Sync + 'static,
        S: Step<Output, NextOut> + 'static,
    {
        ChainStep::new(self, next)
    }

    /// Transform this step's output with a plain function.
    fn map<NewOut, F>(self, f: F) -> MapStep<Self, F, Input, Output, NewOut>
    where
        Self: Sized + 'static,
        Input: Send + Sync + 'static,
        Output: Send + Sync + 'static,
        NewOut: Send + Sync + 'static,
        F: Fn(Output) -> NewOut + Send + Sync + 'static,
    {
        MapStep::new(self, f)
    }
}

/// Turn an async closure into a [`Step`].
///
/// ```rust,ignore
/// let shout = LambdaStep(|task: String| async move { Ok(task.to_uppercase()) });
/// ```
pub struct LambdaStep<F>(pub F);

#[async_trait]
impl<F, Fut, Input, Output> Step<Input, Output> for LambdaStep<F>
where
    Input: Send + 'static,
    Output: Send + 'static,
    F: Fn(Input) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<Output>> + Send,
{
    async fn run(&self, input: Input, _ctx: &ExecutionContext) -> Result<Output> {
        (self.0)(input).await
    }
}

/// Created by [`Step::map`].
pub struct MapStep<S, F, I, O, NewO> {
    inner: S,
    func: Arc<F>,
    _marker: std::marker::PhantomData<fn(I) -> (O, NewO)>,
}

impl<S, F, I, O, NewO> MapStep<S, F, I, O, NewO> {
    pub fn new(inner: S, func: F) -> Self {
        Self {
            inner,
            func: Arc::new(func),
            _marker: std::marker::PhantomData,
        }
    }
}

#[async_trait]
impl<S, F, I, O, NewO> Step<I, NewO> for MapStep<S, F, I, O, NewO>
where
    I: Send + Sync + 'static,
    O: Send + Sync + 'static,
    NewO: Send + Sync + 'static,
    S: Step<I, O>,
    F: Fn(O) -> NewO + Send + Sync + 'static,
{
    async fn run(&self, input: I, ctx: &ExecutionContext) -> Result<NewO> {
        let output = self.inner.run(input, ctx).await?;
        Ok((self.func)(output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RefineError;

    #[tokio::test]
    async fn then_feeds_output_forward() {
        let trim = LambdaStep(|task: String| async move { Ok::<_, RefineError>(task.trim().to_string()) });
        let count = LambdaStep(|task: String| async move { Ok::<_, RefineError>(task.len()) });
        let pipeline = trim.then(count).map(|n: usize| n * 2);

        let ctx = ExecutionContext::new();
        assert_eq!(pipeline.run("  abc  ".to_string(), &ctx).await.unwrap(), 6);
    }

    #[tokio::test]
    async fn chain_stops_at_first_error() {
        let fail = LambdaStep(|_task: String| async move {
            Err::<String, _>(RefineError::Context("no task".into()))
        });
        let ran = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = ran.clone();
        let never = LambdaStep(move |task: String| {
            let flag = flag.clone();
            async move {
                flag.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok::<_, RefineError>(task)
            }
        });
        let ctx = ExecutionContext::new();
        let err = fail.then(never).run("x".to_string(), &ctx).await.unwrap_err();
        assert!(matches!(err, RefineError::Context(_)));
        assert!(!ran.load(std::sync::atomic::Ordering::SeqCst));
    }
}
