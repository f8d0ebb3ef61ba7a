//! Example: a full essay refinement run against scripted models, no network.
//!
//! Run with: `cargo run --example offline_loop`

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use reflection_loop::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,reflection_loop=debug"));
    fmt().with_env_filter(filter).init();

    let drafts = AtomicUsize::new(0);
    let drafter = LlmClient::mock(move |_req: MockRequest| {
        let n = drafts.fetch_add(1, Ordering::SeqCst);
        Ok(format!(
            "Draft {n}: Remote work changes how cities are used. Commuting falls, \
             neighbourhood economies grow, and offices empty out."
        ))
    });
    let reviewer = LlmClient::mock(|req: MockRequest| {
        if req.last_text().contains("Draft 0") {
            Ok("Verdict: promising but thin.\nTop fix: cite evidence for falling commutes.".into())
        } else {
            Ok(String::new())
        }
    });

    let writer = EssayWriter::new(drafter.clone(), reviewer, drafter)
        .with_config(RefinementConfig::essay().with_max_iterations(4));

    let trace = TraceLog::new();
    let result = run_site_observed(
        &writer,
        "How remote work reshapes cities",
        Arc::new(trace.clone()),
    )
    .await?;

    println!("{}", result.report());
    println!("{} events recorded", trace.events().len());

    let out = std::env::temp_dir().join("reflection-loop-offline");
    let saved = ArtifactWriter::new(&out, "essay", "md").write_run(&result).await?;
    println!("Final essay written to {}", saved.final_candidate.display());
    Ok(())
}
