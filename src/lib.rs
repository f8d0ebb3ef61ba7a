//! Generate, execute, critique, repeat.
//!
//! This crate drives bounded reflection loops: a producer writes a candidate
//! (SQL, plotting code, an essay), an executor runs it, an evaluator critiques
//! the result, and a convergence policy decides when to stop. The caller gets
//! back a [`RunResult`] with the full history and the best candidate seen.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use reflection_loop::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> reflection_loop::Result<()> {
//!     let producer = LambdaProducer(|req: ProduceRequest| async move {
//!         Ok::<_, RefineError>(match req.feedback {
//!             None => "SELECT * FROM orders".to_string(),
//!             Some(_) => "SELECT id, total FROM orders".to_string(),
//!         })
//!     });
//!     let executor = LambdaExecutor(|sql: String| async move {
//!         Execution::success(format!("ran: {sql}"))
//!     });
//!     let evaluator = LambdaEvaluator(|_task: String, _latest: IterationRecord| async move {
//!         Ok::<_, RefineError>("Select only the columns you need.".to_string())
//!     });
//!
//!     let result = run_refinement(
//!         "List order totals",
//!         &producer,
//!         &executor,
//!         &evaluator,
//!         RefinementConfig::default(),
//!     )
//!     .await?;
//!     println!("{}", result.report());
//!     Ok(())
//! }
//! ```
//!
//! # Features
//!
//! - **`sqlite`**: [`adapters::SqliteRunner`], a `sqlx`-backed SQL runner.

pub mod adapters;
pub mod artifacts;
pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod llm;
pub mod models;
pub mod policy;
pub mod workflow;

pub use adapters::{run_site, run_site_observed, CallSite, ChartAgent, EssayWriter, SqlAgent};
pub use artifacts::{ArtifactWriter, SavedArtifacts};
pub use config::{ModelTier, RefinementConfig};
pub use controller::{
    run_refinement, Evaluator, Executor, LambdaEvaluator, LambdaExecutor, LambdaProducer,
    ProduceRequest, Producer, RefinementEngine,
};
pub use error::{RefineError, Result, ResultExt};
pub use events::{RefinementEvent, RefinementObserver, TraceEntry, TraceLog};
pub use llm::{ApiStyle, LlmClient, LlmConfig, Message, MockHandler, MockRequest, RetryPolicy};
pub use models::{Execution, IterationRecord, RunResult, StopReason};
pub use policy::{decide, Decision};
pub use workflow::{
    ChainStep, ExecutionContext, LambdaStep, MapStep, ParallelMapStep, RefinementStep, Step,
    WorkflowMetrics,
};

/// Prelude module for convenient imports.
///
/// ```rust
/// use reflection_loop::prelude::*;
/// ```
pub mod prelude {
    pub use crate::adapters::{
        run_site, run_site_observed, CallSite, ChartAgent, ChartRenderer, DatasetContext,
        DatasetProfile, EssayWriter, PythonRenderer, QueryOutput, SqlAgent, SqlRunner,
    };
    #[cfg(feature = "sqlite")]
    pub use crate::adapters::SqliteRunner;
    pub use crate::artifacts::{ArtifactWriter, SavedArtifacts};
    pub use crate::config::{ModelTier, RefinementConfig};
    pub use crate::controller::{
        run_refinement, Evaluator, Executor, LambdaEvaluator, LambdaExecutor, LambdaProducer,
        ProduceRequest, Producer, RefinementEngine,
    };
    pub use crate::error::{RefineError, Result, ResultExt};
    pub use crate::events::{RefinementEvent, RefinementObserver, TraceLog};
    pub use crate::llm::{LlmClient, LlmConfig, Message, MockRequest};
    pub use crate::models::{Execution, IterationRecord, RunResult, StopReason};
    pub use crate::policy::Decision;
    pub use crate::workflow::{
        ExecutionContext, LambdaStep, ParallelMapStep, RefinementStep, Step, WorkflowMetrics,
    };

    pub use schemars::JsonSchema;
    pub use serde::{Deserialize, Serialize};
}
