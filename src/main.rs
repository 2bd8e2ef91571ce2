use anyhow::Result;
use clap::Parser;
use insight_engine::executor::SqliteEngine;
use insight_engine::schema::SqliteSchemaProvider;
use insight_engine::{AppConfig, TurnOrchestrator};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(name = "insight")]
#[command(about = "Natural-language analytics assistant over a SQLite warehouse")]
struct Args {
    /// The business question in natural language
    question: String,

    /// Path to the SQLite warehouse (default: from DB_PATH or data/adventureworks.db)
    #[arg(short, long)]
    db: Option<PathBuf>,

    /// LLM API key (or set LLM_API_KEY env var)
    #[arg(long)]
    api_key: Option<String>,

    /// Print the full turn trace as JSON
    #[arg(long)]
    trace: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let mut config = AppConfig::from_env();
    if let Some(db) = args.db {
        config.db_path = db;
    }

    info!("Insight engine starting, warehouse: {}", config.db_path.display());

    let api_key = args
        .api_key
        .or_else(|| std::env::var("LLM_API_KEY").ok())
        .unwrap_or_default();

    let llm = Arc::new(
        insight_engine::llm::HttpGenerationClient::new(
            api_key,
            config.llm_base_url.clone(),
            config.llm_model.clone(),
        )
        .with_retry_policy(config.llm_max_retries, config.llm_base_delay_ms),
    );
    let engine = Arc::new(SqliteEngine::open(
        &config.db_path,
        Duration::from_secs(config.sql_timeout_seconds),
    )?);
    let schema = Arc::new(SqliteSchemaProvider::open(&config.db_path)?);

    let orchestrator = TurnOrchestrator::new(llm, engine, schema, &config);
    let turn = orchestrator.run_turn(&args.question).await;

    if args.trace {
        println!("{}", serde_json::to_string_pretty(&turn)?);
    } else {
        if let Some(result) = &turn.result {
            println!("Rows: {}  Columns: {}", result.row_count, result.columns.join(", "));
        }
        println!(
            "\n{}",
            turn.final_answer.as_deref().unwrap_or("(no answer)")
        );
    }

    Ok(())
}
