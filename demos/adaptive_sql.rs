//! Example: text-to-SQL against a SQLite file, refined from execution feedback.
//!
//! Run with:
//! `OPENAI_API_KEY=... cargo run --features sqlite --example adaptive_sql -- shop.db "question"`

use reflection_loop::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,reflection_loop=debug"));
    fmt().with_env_filter(filter).init();

    let mut args = std::env::args().skip(1);
    let db_path = args.next().unwrap_or_else(|| "products.db".to_string());
    let question = args
        .next()
        .unwrap_or_else(|| "Which five products brought in the most revenue last month?".to_string());

    let generation_model = "openai:gpt-4o-mini";
    let config = RefinementConfig::for_generation_tier(ModelTier::classify(generation_model));
    println!("Using {config:?} for {generation_model}");

    let runner = SqliteRunner::connect(&db_path).await?;
    let agent = SqlAgent::from_runner(
        LlmClient::from_env(generation_model)?,
        LlmClient::from_env("openai:gpt-4o")?,
        runner,
    )
    .await?
    .with_config(config);

    let result = run_site(&agent, &question).await?;
    println!("{}", result.report());
    println!("Stop reason: {}", result.stop_reason.describe());
    Ok(())
}
