//! Example: draft, peer review and revise an essay.
//!
//! Run with: `OPENAI_API_KEY=... cargo run --example essay_reflection -- "topic"`

use reflection_loop::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,reflection_loop=debug"));
    fmt().with_env_filter(filter).init();

    let topic = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "Should cities ban cars from their historic centres?".to_string());

    let writer = EssayWriter::from_env()?;
    let result = run_site(&writer, &topic).await?;

    println!("{}", result.report());

    let saved = ArtifactWriter::new("./essays", "essay", "md")
        .write_run(&result)
        .await?;
    println!(
        "Saved {} drafts and {} critiques; final essay at {}",
        saved.candidates.len(),
        saved.feedback.len(),
        saved.final_candidate.display()
    );
    Ok(())
}
