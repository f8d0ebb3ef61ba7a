//! Example: generate a matplotlib chart from a CSV, critique the image, refine.
//!
//! Requires `python3` with pandas and matplotlib.
//!
//! Run with: `OPENAI_API_KEY=... cargo run --example chart_reflection -- sales.csv`

use reflection_loop::adapters::chart::{suggest_instruction, ColumnKind};
use reflection_loop::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,reflection_loop=debug"));
    fmt().with_env_filter(filter).init();

    let csv = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "coffee_sales.csv".to_string());

    // Column kinds are declared by hand here; a caller with a dataframe library
    // would derive them.
    let profile = DatasetProfile::new(1_000)
        .with_column("date", ColumnKind::Other)
        .with_column("coffee_name", ColumnKind::Categorical)
        .with_column("cash_type", ColumnKind::Categorical)
        .with_column("price", ColumnKind::Numeric);
    let context = DatasetContext::new(
        profile.schema_text(),
        r#"[{"date": "2024-03-01", "coffee_name": "Latte", "cash_type": "card", "price": 38.7}]"#,
    );
    let instruction = suggest_instruction(&profile);

    let generator = LlmClient::from_env("openai:gpt-4o-mini")?;
    let critic = LlmClient::from_env("openai:gpt-4o")?;
    let renderer = PythonRenderer::new().with_data_csv(&csv);

    let agent = ChartAgent::new(generator, critic, renderer, context)
        .with_output_dir("./charts")
        .with_basename("coffee");

    let result = run_site(&agent, &instruction).await?;
    println!("{}", result.report());
    if let Some(image) = &result.best().artifact_ref {
        println!("Best chart: {image}");
    }
    Ok(())
}
