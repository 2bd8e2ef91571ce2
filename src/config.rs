//! Application configuration
//!
//! Policy knobs and collaborator settings, loaded from environment variables
//! with sensible defaults. Values like the correction-attempt bound and the
//! ambiguity fallback route are product policy, so they live here rather than
//! inline in the orchestrator.

use crate::agents::router::Route;
use std::path::PathBuf;

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Runtime configuration for the assistant core.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Path to the SQLite warehouse file.
    pub db_path: PathBuf,

    /// Maximum rows returned when executing in preview mode.
    pub max_preview_rows: usize,

    /// Busy timeout applied to warehouse queries, in seconds.
    pub sql_timeout_seconds: u64,

    /// How many SQL correction retries a turn may attempt.
    pub max_correction_attempts: usize,

    /// Route chosen when the router fails or returns garbage.
    pub default_route_on_ambiguity: Route,

    /// Rows embedded in the synthesis prompt.
    pub synthesis_preview_rows: usize,

    /// Rows embedded in a generated chart spec.
    pub chart_max_rows: usize,

    /// Generation backend endpoint (OpenAI-compatible chat completions).
    pub llm_base_url: String,
    pub llm_model: String,

    /// Bounded retry policy for transient backend failures.
    pub llm_max_retries: u32,
    pub llm_base_delay_ms: u64,

    /// Tables the executor expects generated SQL to reference.
    pub allowed_tables: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("data/adventureworks.db"),
            max_preview_rows: 100,
            sql_timeout_seconds: 30,
            max_correction_attempts: 1,
            default_route_on_ambiguity: Route::Data,
            synthesis_preview_rows: 20,
            chart_max_rows: 100,
            llm_base_url: "https://api.openai.com/v1".to_string(),
            llm_model: "gpt-4".to_string(),
            llm_max_retries: 3,
            llm_base_delay_ms: 1000,
            allowed_tables: vec![
                "AdventureWorks_Sales_2015".to_string(),
                "AdventureWorks_Sales_2016".to_string(),
                "AdventureWorks_Sales_2017".to_string(),
                "AdventureWorks_Products".to_string(),
                "AdventureWorks_Product_Subcategories".to_string(),
                "AdventureWorks_Product_Categories".to_string(),
                "AdventureWorks_Customers".to_string(),
                "AdventureWorks_Territories".to_string(),
                "AdventureWorks_Returns".to_string(),
            ],
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            db_path: std::env::var("DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            max_preview_rows: env_or("MAX_PREVIEW_ROWS", defaults.max_preview_rows),
            sql_timeout_seconds: env_or("SQL_TIMEOUT_SECONDS", defaults.sql_timeout_seconds),
            max_correction_attempts: env_or(
                "MAX_CORRECTION_ATTEMPTS",
                defaults.max_correction_attempts,
            ),
            default_route_on_ambiguity: std::env::var("DEFAULT_ROUTE")
                .ok()
                .and_then(|v| Route::parse(&v))
                .unwrap_or(defaults.default_route_on_ambiguity),
            synthesis_preview_rows: env_or(
                "SYNTHESIS_PREVIEW_ROWS",
                defaults.synthesis_preview_rows,
            ),
            chart_max_rows: env_or("CHART_MAX_ROWS", defaults.chart_max_rows),
            llm_base_url: std::env::var("LLM_BASE_URL").unwrap_or(defaults.llm_base_url),
            llm_model: std::env::var("LLM_MODEL").unwrap_or(defaults.llm_model),
            llm_max_retries: env_or("LLM_MAX_RETRIES", defaults.llm_max_retries),
            llm_base_delay_ms: env_or("LLM_BASE_DELAY_MS", defaults.llm_base_delay_ms),
            allowed_tables: defaults.allowed_tables,
        }
    }
}
