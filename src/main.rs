use anyhow::Result;
use clap::Parser;
use fars_query::{AnswerMode, EngineConfig, QueryEngine};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fars-query")]
#[command(about = "Answer natural-language questions about the FARS crash records")]
struct Args {
    /// The question in natural language
    question: String,

    /// Maximum number of corrective retries (or set FARS_MAX_RETRIES)
    #[arg(long)]
    max_retries: Option<u32>,

    /// Render the answer from a fixed template instead of a second LLM call
    #[arg(long)]
    template: bool,

    /// Print only the answer instead of the full JSON response
    #[arg(long)]
    answer_only: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = EngineConfig::from_env()?;
    if let Some(max_retries) = args.max_retries {
        config.max_retries = max_retries;
    }
    if args.template {
        config.answer_mode = AnswerMode::Template;
    }

    info!("FARS query engine starting...");
    let engine = QueryEngine::global(&config).await?;
    let response = engine.ask(&args.question).await;

    if args.answer_only {
        println!("{}", response.answer);
    } else {
        println!("{}", serde_json::to_string_pretty(&response)?);
    }

    Ok(())
}
