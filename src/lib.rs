//! Insight Engine - natural-language analytics assistant core
//!
//! A user asks a business question in plain language; the engine routes it
//! to a conversational answer or a warehouse-query path, generates SQL
//! against the live schema, executes it with one bounded correction retry,
//! and synthesizes the result into narrative findings plus an optional chart
//! spec. Every turn produces a structured, replayable trace and always ends
//! with a final answer, even under partial failure.
//!
//! Collaborators (text generation, query engine, schema description) are
//! injected behind traits; see [`orchestrator::TurnOrchestrator`] for the
//! state machine tying the stages together.

pub mod agents;
pub mod config;
pub mod error;
pub mod executor;
pub mod history;
pub mod llm;
pub mod orchestrator;
pub mod schema;
pub mod trace;

pub use config::AppConfig;
pub use error::{AssistantError, Result};
pub use orchestrator::TurnOrchestrator;
