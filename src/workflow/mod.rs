//! Composing refinement runs into larger pipelines.
//!
//! - [`Step`]: async unit of work, chainable with `then` and `map`
//! - [`RefinementStep`]: a call site as a step
//! - [`ParallelMapStep`]: independent inputs over a bounded worker pool
//! - [`ExecutionContext`]: shared metrics and event trace
//!
//! ```rust,ignore
//! let answers = ParallelMapStep::new(
//!     RefinementStep::new(sql_agent).map(|run| run.final_candidate().to_string()),
//!     4,
//! );
//! let ctx = ExecutionContext::new();
//! let queries = answers.run(questions, &ctx).await?;
//! println!("{:?}", ctx.snapshot().stop_reasons);
//! ```

mod chain;
mod metrics;
mod parallel;
mod refinement;
mod traits;

pub use chain::ChainStep;
pub use metrics::{ExecutionContext, WorkflowMetrics};
pub use parallel::ParallelMapStep;
pub use refinement::RefinementStep;
pub use traits::{LambdaStep, MapStep, Step};
