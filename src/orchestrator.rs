//! Turn orchestration
//!
//! The state machine driving one conversational turn:
//!
//! ```text
//! Routing -> {PlanningData, AnsweringNonData}
//!         -> [Executing -> (CorrectingOnce)? -> Synthesizing] -> Done
//! ```
//!
//! Every stage invocation sits behind a failure boundary: the step is opened
//! before the collaborator call and closed after it, success or not, and a
//! failed stage downgrades to a stage-specific safe default so the turn
//! always runs to completion with a `final_answer` set. A SQL execution
//! failure triggers a bounded correction loop (one retry by default); if the
//! retry also fails the pipeline continues with a synthetic one-cell error
//! table so synthesis still receives a well-formed result.

use crate::agents::non_data::{NonDataAgent, FALLBACK_ANSWER};
use crate::agents::planner::{SqlPlannerAgent, PLACEHOLDER_SQL};
use crate::agents::router::{Route, RouterAgent};
use crate::agents::synthesizer::{SynthesizerAgent, FALLBACK_SUMMARY};
use crate::config::AppConfig;
use crate::error::AssistantError;
use crate::executor::{QueryEngine, QueryExecutor, QueryResult};
use crate::llm::GenerationBackend;
use crate::schema::SchemaProvider;
use crate::trace::{AgentStep, ConversationTurn, StepSlot};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Last-resort answer when the stage that owned the answer itself failed.
const FINAL_ANSWER_FALLBACK: &str =
    "I wasn't able to complete that request. Please try rephrasing your question.";

pub struct TurnOrchestrator {
    router: RouterAgent,
    planner: SqlPlannerAgent,
    non_data: NonDataAgent,
    synthesizer: SynthesizerAgent,
    executor: QueryExecutor,
    schema: Arc<dyn SchemaProvider>,
    default_route: Route,
    max_correction_attempts: usize,
}

impl TurnOrchestrator {
    /// Wire up all stage components around the injected collaborators.
    pub fn new(
        llm: Arc<dyn GenerationBackend>,
        engine: Arc<dyn QueryEngine>,
        schema: Arc<dyn SchemaProvider>,
        config: &AppConfig,
    ) -> Self {
        Self {
            router: RouterAgent::new(Arc::clone(&llm), config.default_route_on_ambiguity),
            planner: SqlPlannerAgent::new(Arc::clone(&llm)),
            non_data: NonDataAgent::new(Arc::clone(&llm)),
            synthesizer: SynthesizerAgent::new(
                Arc::clone(&llm),
                config.synthesis_preview_rows,
                config.chart_max_rows,
            ),
            executor: QueryExecutor::new(engine, config.max_preview_rows)
                .with_allowed_tables(config.allowed_tables.clone()),
            schema,
            default_route: config.default_route_on_ambiguity,
            max_correction_attempts: config.max_correction_attempts,
        }
    }

    /// Drive one full turn. Never fails: partial failures surface as
    /// `error`-status trace steps and degraded answers.
    pub async fn run_turn(&self, user_message: &str) -> ConversationTurn {
        let mut turn = ConversationTurn::new(user_message);

        let route = self.routing_stage(&mut turn).await;

        match route {
            Route::NonData => self.non_data_stage(&mut turn).await,
            Route::Data => {
                self.planning_stage(&mut turn).await;
                let result = self.execution_stage(&mut turn).await;
                self.synthesis_stage(&mut turn, &result).await;
                turn.result = Some(result);
            }
        }

        if turn.final_answer.as_deref().map_or(true, |a| a.trim().is_empty()) {
            turn.final_answer = Some(FINAL_ANSWER_FALLBACK.to_string());
        }

        turn
    }

    async fn routing_stage(&self, turn: &mut ConversationTurn) -> Route {
        info!("ROUTER: starting routing decision");
        let step = AgentStep::start("Router");
        turn.trace.open(&step, StepSlot::Router);

        match self.router.route(&turn.user_message).await {
            Ok(decision) => {
                let output = serde_json::json!({
                    "route": decision.route,
                    "confidence": decision.confidence,
                    "rationale": decision.rationale,
                    "user_intent": decision.user_intent,
                });
                turn.trace.close(step.succeed(output), StepSlot::Router);
                turn.trace.selected_route = Some(decision.route);
                info!("ROUTER: completed - route={}", decision.route.as_str());
                decision.route
            }
            Err(e) => {
                error!("ROUTER: failed - {}", e);
                turn.trace.close(step.fail(e.to_string()), StepSlot::Router);
                turn.trace.selected_route = Some(self.default_route);
                self.default_route
            }
        }
    }

    async fn non_data_stage(&self, turn: &mut ConversationTurn) {
        info!("NON-DATA: starting response generation");
        let step = AgentStep::start("Non-Data QA");
        turn.trace.open(&step, StepSlot::NonData);

        match self.non_data.answer(&turn.user_message).await {
            Ok(ans) => {
                let output = serde_json::json!({
                    "answer": ans.answer,
                    "category": ans.category,
                    "rationale": ans.rationale,
                });
                turn.trace.close(step.succeed(output), StepSlot::NonData);
                let answer = if ans.answer.trim().is_empty() {
                    FALLBACK_ANSWER.to_string()
                } else {
                    ans.answer
                };
                info!("NON-DATA: completed - category={}", ans.category);
                turn.final_answer = Some(answer);
            }
            Err(e) => {
                error!("NON-DATA: failed - {}", e);
                turn.trace.close(step.fail(e.to_string()), StepSlot::NonData);
                turn.final_answer = Some(FALLBACK_ANSWER.to_string());
            }
        }
    }

    async fn planning_stage(&self, turn: &mut ConversationTurn) {
        info!("PLANNER: starting SQL generation");
        let step = AgentStep::start("SQL Planner");
        turn.trace.open(&step, StepSlot::Planner);

        let planned = match self.schema.describe() {
            Ok(schema_text) => self.planner.plan(&turn.user_message, &schema_text).await,
            Err(e) => Err(e),
        };

        match planned {
            Ok(plan) => {
                let output = serde_json::json!({
                    "sql": plan.sql,
                    "explanation": plan.explanation,
                    "tables_used": plan.tables_used,
                    "key_metrics": plan.key_metrics,
                    "confidence": plan.confidence,
                });
                turn.trace.close(step.succeed(output), StepSlot::Planner);
                turn.trace.generated_sql = Some(plan.sql);
                info!("PLANNER: completed - confidence={:?}", plan.confidence);
            }
            Err(e) => {
                error!("PLANNER: failed - {}", e);
                turn.trace.close(step.fail(e.to_string()), StepSlot::Planner);
                turn.trace.generated_sql = Some(PLACEHOLDER_SQL.to_string());
            }
        }
    }

    async fn execution_stage(&self, turn: &mut ConversationTurn) -> QueryResult {
        info!("EXECUTOR: starting SQL execution");
        let step = AgentStep::start("SQL Executor");
        turn.trace.open(&step, StepSlot::Executor);

        let sql = turn
            .trace
            .generated_sql
            .clone()
            .unwrap_or_else(|| PLACEHOLDER_SQL.to_string());

        let result = match self.executor.execute(&sql).await {
            Ok(result) => {
                let output = execution_output(&result, false);
                turn.trace.close(step.succeed(output), StepSlot::Executor);
                info!(
                    "EXECUTOR: completed - {} rows, {} columns",
                    result.row_count,
                    result.columns.len()
                );
                result
            }
            Err(AssistantError::QueryExecution(error_msg)) => {
                turn.trace.original_sql_error = Some(error_msg.clone());
                if self.max_correction_attempts > 0 {
                    warn!("EXECUTOR: SQL failed, attempting correction: {}", error_msg);
                    turn.trace.sql_corrected = true;
                    self.correction_loop(turn, step, &sql, &error_msg).await
                } else {
                    error!("EXECUTOR: SQL failed, correction disabled: {}", error_msg);
                    turn.trace.close(step.fail(error_msg.clone()), StepSlot::Executor);
                    QueryResult::error_table(format!("SQL execution failed: {}", error_msg))
                }
            }
            Err(e) => {
                // Unexpected failure class: record it and keep the pipeline
                // moving with a well-formed error table.
                error!("EXECUTOR: failed - {}", e);
                let table = QueryResult::error_table(format!("SQL execution failed: {}", e));
                turn.trace.close(step.fail(e.to_string()), StepSlot::Executor);
                table
            }
        };

        turn.trace.execution_metadata = Some(serde_json::json!({
            "row_count": result.row_count,
            "columns": result.columns,
        }));
        result
    }

    /// Bounded correction: re-plan with the engine error as context and
    /// retry. One attempt by default; a second failure terminates the loop
    /// with the synthetic failure table.
    async fn correction_loop(
        &self,
        turn: &mut ConversationTurn,
        step: AgentStep,
        failed_sql: &str,
        error_msg: &str,
    ) -> QueryResult {
        let mut last_error = error_msg.to_string();

        for attempt in 1..=self.max_correction_attempts {
            info!(
                "EXECUTOR: correction attempt {} of {}",
                attempt, self.max_correction_attempts
            );

            let corrected = match self.schema.describe() {
                Ok(schema_text) => {
                    self.planner
                        .correct(&turn.user_message, failed_sql, error_msg, &schema_text)
                        .await
                }
                Err(e) => Err(e),
            };

            let plan = match corrected {
                Ok(plan) => plan,
                Err(e) => {
                    last_error = e.to_string();
                    continue;
                }
            };

            turn.trace.generated_sql = Some(plan.sql.clone());
            match self.executor.execute(&plan.sql).await {
                Ok(result) => {
                    let output = execution_output(&result, true);
                    turn.trace.close(step.succeed(output), StepSlot::Executor);
                    info!("EXECUTOR: correction successful");
                    return result;
                }
                Err(e) => {
                    last_error = e.to_string();
                }
            }
        }

        error!("EXECUTOR: correction failed: {}", last_error);
        turn.trace.close(
            step.fail(format!("Correction failed: {}", last_error)),
            StepSlot::Executor,
        );
        QueryResult::error_table(format!("SQL execution failed: {}", error_msg))
    }

    async fn synthesis_stage(&self, turn: &mut ConversationTurn, result: &QueryResult) {
        info!("SYNTHESIZER: starting result synthesis");
        let step = AgentStep::start("Synthesizer");
        turn.trace.open(&step, StepSlot::Synthesizer);

        match self
            .synthesizer
            .synthesize(&result.columns, &result.rows)
            .await
        {
            Ok(syn) => {
                let output = serde_json::json!({
                    "summary": syn.summary,
                    "key_findings": syn.key_findings,
                    "detailed_analysis": syn.detailed_analysis,
                    "recommendations": syn.recommendations,
                    "has_chart": syn.chart_spec.is_some(),
                });
                turn.trace.close(step.succeed(output), StepSlot::Synthesizer);
                let summary = if syn.summary.trim().is_empty() {
                    FALLBACK_SUMMARY.to_string()
                } else {
                    syn.summary.clone()
                };
                info!("SYNTHESIZER: completed with {} findings", syn.key_findings.len());
                turn.trace.synthesis_output = Some(syn);
                turn.final_answer = Some(summary);
            }
            Err(e) => {
                error!("SYNTHESIZER: failed - {}", e);
                turn.trace.close(step.fail(e.to_string()), StepSlot::Synthesizer);
                turn.final_answer = Some(FALLBACK_SUMMARY.to_string());
            }
        }
    }
}

fn execution_output(result: &QueryResult, corrected: bool) -> serde_json::Value {
    let mut output = serde_json::json!({
        "row_count": result.row_count,
        "column_count": result.columns.len(),
        "columns": result.columns,
    });
    if corrected {
        output["corrected"] = serde_json::Value::Bool(true);
    }
    output
}
