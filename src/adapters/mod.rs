//! Call-site adapters.
//!
//! Each adapter bundles a producer, an executor and an evaluator for one kind
//! of artifact, plus the [`RefinementConfig`] that suits it.

pub mod chart;
pub mod essay;
pub mod sql;

use std::sync::Arc;

use tracing::info;

use crate::{
    config::RefinementConfig,
    controller::{Evaluator, Executor, Producer, RefinementEngine},
    error::Result,
    events::RefinementObserver,
    models::RunResult,
};

pub use chart::{ChartAgent, ChartRenderer, DatasetContext, DatasetProfile, PythonRenderer};
pub use essay::EssayWriter;
pub use sql::{QueryOutput, SqlAgent, SqlRunner};

#[cfg(feature = "sqlite")]
pub use sql::SqliteRunner;

/// A self-contained refinement site.
pub trait CallSite: Producer + Executor + Evaluator {
    /// Short label used in logs and metrics.
    fn name(&self) -> &str;

    fn config(&self) -> RefinementConfig;

    /// Called once before each run. Sites with per-run counters reset them here.
    fn begin_run(&self) {}
}

/// Run `site` on `task` with the site's own config.
pub async fn run_site<S>(site: &S, task: &str) -> Result<RunResult>
where
    S: CallSite + ?Sized,
{
    run_with_engine(site, task, RefinementEngine::new(site.config())).await
}

/// Like [`run_site`], reporting progress to `observer`.
pub async fn run_site_observed<S>(
    site: &S,
    task: &str,
    observer: Arc<dyn RefinementObserver>,
) -> Result<RunResult>
where
    S: CallSite + ?Sized,
{
    let engine = RefinementEngine::new(site.config()).with_shared_observer(observer);
    run_with_engine(site, task, engine).await
}

async fn run_with_engine<S>(site: &S, task: &str, engine: RefinementEngine) -> Result<RunResult>
where
    S: CallSite + ?Sized,
{
    info!(site = site.name(), "Running call site");
    site.begin_run();
    engine.run(task, site, site, site).await
}
