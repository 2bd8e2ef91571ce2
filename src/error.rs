use thiserror::Error;

#[derive(Error, Debug)]
pub enum AssistantError {
    #[error("Generation error: {0}")]
    Generation(String),

    #[error("Query execution error: {0}")]
    QueryExecution(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AssistantError>;
