//! SQL plan generation
//!
//! Turns a business question plus a schema description into a candidate SQL
//! statement. The schema rules are enforced by instruction, not by a parser:
//! only schema-verifiable columns, explicit key-column join paths, UNION ALL
//! with per-branch GROUP BY for per-year partition tables, and no trailing
//! semicolon. When the question cannot be answered from the schema the plan
//! degrades to a trivially-valid placeholder with low confidence instead of
//! failing, so a plan step only raises on generation-transport failure.

use crate::agents::router::Confidence;
use crate::error::Result;
use crate::llm::{get_str, get_str_list, FieldSpec, GenerationBackend};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Placeholder emitted when planning is inconclusive or fails upstream.
pub const PLACEHOLDER_SQL: &str = "SELECT 1";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqlPlan {
    pub sql: String,
    pub explanation: String,
    pub tables_used: Vec<String>,
    pub key_metrics: Vec<String>,
    pub confidence: Confidence,
}

const EXPECTED_FIELDS: FieldSpec<'static> = &[
    ("sql", "str"),
    ("explanation", "str"),
    ("tables_used", "list"),
    ("key_metrics", "list"),
    ("confidence", "str"),
];

pub struct SqlPlannerAgent {
    llm: Arc<dyn GenerationBackend>,
}

impl SqlPlannerAgent {
    pub fn new(llm: Arc<dyn GenerationBackend>) -> Self {
        Self { llm }
    }

    /// Generate a SQL plan for a question against the supplied schema text.
    pub async fn plan(&self, question: &str, schema_text: &str) -> Result<SqlPlan> {
        info!("Planning SQL for question: {}", crate::llm::truncate(question, 150));

        let prompt = format!(
            "You are an expert SQL query planner for a business analytics database (SQLite).\n\n\
             CRITICAL RULES (MUST FOLLOW):\n\
             1. Use ONLY tables and columns that exist in the schema below\n\
             2. Verify every column name against the schema - NO guessing or hallucination\n\
             3. Use proper JOIN relationships based on shared key columns, never on table-name \
             resemblance\n\
             4. Write efficient, optimized SQLite queries\n\
             5. Add helpful column aliases for readability\n\
             6. Use appropriate aggregations (SUM, COUNT, AVG) for metrics\n\
             7. Add ORDER BY and LIMIT clauses when showing top/bottom results\n\
             8. IMPORTANT: Do NOT include semicolons (;) at the end of SQL queries\n\
             9. If you define a table alias, you MUST use that exact alias in all column references\n\
             10. For tables partitioned by year (e.g., Sales_2015/2016/2017): combine them with \
             UNION ALL, NOT JOIN (JOIN creates cartesian products)\n\
             11. CRITICAL UNION ALL PATTERN: Each SELECT in the union must have its OWN GROUP BY \
             before combining. Never put GROUP BY after UNION ALL.\n\n\
             DATABASE SCHEMA:\n{}\n\n\
             USER QUESTION: {}\n\n\
             Generate a response with:\n\
             1. sql: Complete SQLite query\n\
             2. explanation: Business-friendly explanation of what the query does (2-3 sentences)\n\
             3. tables_used: Array of table names used in the query\n\
             4. key_metrics: Array of key metrics/columns being analyzed\n\
             5. confidence: 'high', 'medium', or 'low' based on schema match\n\n\
             If you cannot answer due to missing columns, return: sql='{}', \
             explanation describing the limitation, confidence='low'",
            schema_text, question, PLACEHOLDER_SQL
        );

        let rsp = self.llm.complete(&prompt, EXPECTED_FIELDS).await?;

        let sql = normalize_sql(&get_str(&rsp, "sql", PLACEHOLDER_SQL));
        let plan = SqlPlan {
            sql,
            explanation: get_str(&rsp, "explanation", "No explanation provided"),
            tables_used: get_str_list(&rsp, "tables_used"),
            key_metrics: get_str_list(&rsp, "key_metrics"),
            confidence: Confidence::parse_or_medium(&get_str(&rsp, "confidence", "medium")),
        };

        info!(
            "SQL plan generated: tables={:?}, confidence={:?}",
            plan.tables_used, plan.confidence
        );
        debug!("Generated SQL:\n{}", plan.sql);

        Ok(plan)
    }

    /// Re-plan after an execution failure, with the engine error as context.
    pub async fn correct(
        &self,
        question: &str,
        failed_sql: &str,
        error_text: &str,
        schema_text: &str,
    ) -> Result<SqlPlan> {
        let correction_question = format!(
            "The following SQL failed with error: {}\n\n\
             Original SQL:\n{}\n\n\
             User question: {}\n\n\
             Fix the SQL to use only valid columns from the schema.",
            error_text, failed_sql, question
        );
        self.plan(&correction_question, schema_text).await
    }
}

/// Strip whitespace and any trailing statement separator. A plan is always a
/// single statement; an empty result falls back to the placeholder.
fn normalize_sql(sql: &str) -> String {
    let trimmed = sql.trim().trim_end_matches(';').trim_end();
    if trimmed.is_empty() {
        PLACEHOLDER_SQL.to_string()
    } else {
        trimmed.to_string()
    }
}
